use std::path::PathBuf;

use argh::FromArgs;
use memsc_lib::config::parse_size;

#[derive(FromArgs, PartialEq, Debug)]
#[argh(description = "Interactive value scanner for live processes.")]
pub struct Args {
    #[argh(option, short = 'p', description = "process id to attach to on startup")]
    pub pid: Option<i32>,

    #[argh(option, short = 'c', description = "settings file")]
    pub config: Option<PathBuf>,

    #[argh(switch, short = 'x', description = "scan executable regions too")]
    pub include_executable: bool,

    #[argh(
        option,
        from_str_fn(block_size),
        description = "bytes per cross-process read, e.g. 0x100000"
    )]
    pub block_size: Option<usize>,
}

fn block_size(value: &str) -> Result<usize, String> {
    parse_size(value).map_err(|e| e.to_string())
}
