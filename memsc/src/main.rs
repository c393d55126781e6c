use anyhow::Context;
use memsc_lib::Settings;
use tracing_subscriber::EnvFilter;

mod cmd;
mod command;
mod display;
mod saved;
mod session;

use cmd::Args;
use session::Session;

async fn wrapped_main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let settings_path = args.config.or_else(Settings::default_path);
    let mut settings = match &settings_path {
        Some(path) => Settings::load(path).with_context(|| format!("failed to load {}", path.display()))?,
        None => Settings::default(),
    };
    if args.include_executable {
        settings.scan.include_executable = true;
    }
    if let Some(size) = args.block_size {
        settings.scan.max_read_size = size;
    }

    let auto_attach = args.pid.or(settings.auto_attach);
    let mut session = Session::new(settings, settings_path)?;

    println!("memsc {}, type help for commands", env!("CARGO_PKG_VERSION"));
    if let Some(pid) = auto_attach {
        if let Err(e) = session.attach(pid) {
            eprintln!("error: {e:#}");
        }
    }

    session.run().await
}

#[tokio::main]
async fn main() {
    let code = match wrapped_main().await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {err:#}");
            1
        }
    };

    // The stdin reader parks a blocking thread the runtime would wait on.
    std::process::exit(code);
}
