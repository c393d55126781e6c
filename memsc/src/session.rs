use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use memsc_lib::config::parse_size;
use memsc_lib::maps::find_region;
use memsc_lib::process::{list_processes, process_name};
use memsc_lib::{ScanReport, ScanValue, Scanner, Settings};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::command::{Command, HELP};
use crate::display::{human_bytes, HexDump};
use crate::saved::SavedList;

enum Flow {
    Continue,
    Quit,
}

pub struct Session {
    scanner: Scanner,
    saved: SavedList,
    settings: Settings,
    settings_path: Option<PathBuf>,
}

impl Session {
    pub fn new(settings: Settings, settings_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let scanner = Scanner::new(settings.scan.clone())?;

        Ok(Self {
            scanner,
            saved: SavedList::default(),
            settings,
            settings_path,
        })
    }

    /// Saved addresses belong to one process and are dropped when
    /// switching to another.
    pub fn attach(&mut self, pid: i32) -> anyhow::Result<()> {
        let previous = self.scanner.pid();
        if !self.scanner.attach(pid) {
            bail!("no process with pid {pid}");
        }
        if let Some(previous) = previous.filter(|&previous| previous != pid) {
            if !self.saved.is_empty() {
                println!("dropping {} saved addresses of {previous}", self.saved.len());
                self.saved.clear();
            }
        }

        match process_name(pid) {
            Ok(name) => println!("attached to {pid} ({name})"),
            Err(_) => println!("attached to {pid}"),
        }
        Ok(())
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            self.prompt()?;

            let line = tokio::select! {
                line = lines.next_line() => line.context("failed to read stdin")?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else {
                println!();
                break;
            };

            let command = match Command::parse(&line) {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(e) => {
                    eprintln!("error: {e:#}");
                    continue;
                }
            };

            match self.execute(command).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => break,
                Err(e) => eprintln!("error: {e:#}"),
            }
        }

        Ok(())
    }

    fn prompt(&self) -> anyhow::Result<()> {
        let mut stdout = std::io::stdout();
        match (self.scanner.pid(), self.scanner.value_kind()) {
            (Some(pid), Some(kind)) => {
                write!(stdout, "[{pid} {} {kind}]> ", self.scanner.matches().len())?
            }
            (Some(pid), None) => write!(stdout, "[{pid}]> ")?,
            (None, _) => write!(stdout, "> ")?,
        }
        stdout.flush()?;
        Ok(())
    }

    async fn execute(&mut self, command: Command) -> anyhow::Result<Flow> {
        debug!(?command, "executing");

        match command {
            Command::Ps(filter) => {
                for entry in list_processes(filter.as_deref()) {
                    println!("{:>7}  {}", entry.pid, entry.name);
                }
            }
            Command::Attach(pid) => self.attach(pid)?,
            Command::Detach => {
                self.scanner.detach();
                println!("detached");
            }
            Command::Scan(value) => {
                self.scanner.reset();
                let report = self.run_scan(value).await?;
                self.print_report(&report);
            }
            Command::Next(text) => {
                let Some(kind) = self.scanner.value_kind() else {
                    bail!("no matches to narrow, start with scan <kind> <value>");
                };
                let report = self.run_scan(ScanValue::parse(kind, &text)?).await?;
                self.print_report(&report);
            }
            Command::Reset => {
                self.scanner.reset();
                println!("matches cleared");
            }
            Command::Matches(count) => self.print_matches(count),
            Command::Watch(count) => self.watch(count).await?,
            Command::Read { address, length } => {
                let data = self.scanner.read(address, length)?;
                print!("{}", HexDump::new(address, &data));
            }
            Command::Write { address, value } => {
                self.scanner.write_scan_value(address, value)?;
                println!("wrote {value} ({}) to {address:#x}", value.kind());
            }
            Command::WriteSaved { index, value } => {
                let entry = self
                    .saved
                    .get(index)
                    .with_context(|| format!("no saved entry #{index}"))?;
                let value = ScanValue::parse(entry.kind, &value)?;
                self.scanner.write_scan_value(entry.address, value)?;
                println!("wrote {value} ({}) to #{index} at {:#x}", entry.kind, entry.address);
            }
            Command::Keep {
                address,
                kind,
                description,
            } => {
                let index = self.saved.keep(address, kind, description);
                println!("saved {address:#x} as {kind} at #{index}");
            }
            Command::Saved => self.print_saved(),
            Command::Unkeep(index) => {
                let entry = self
                    .saved
                    .unkeep(index)
                    .with_context(|| format!("no saved entry #{index}"))?;
                println!("dropped {:#x} ({})", entry.address, entry.kind);
            }
            Command::Maps => {
                for region in self.scanner.regions()? {
                    println!("{region}");
                }
            }
            Command::Where(address) => {
                let regions = self.scanner.regions()?;
                match find_region(&regions, address) {
                    Some(region) => println!("{:#x} = {:#x}+{:#x}  {region}", address, region.start, address - region.start),
                    None => println!("{address:#x} is not mapped"),
                }
            }
            Command::Set { key, value } => self.set(&key, &value)?,
            Command::Save => {
                let path = self.settings_path.as_ref().context("no settings path, pass --config")?;
                self.settings.save(path)?;
                println!("saved {}", path.display());
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => return Ok(Flow::Quit),
        }

        Ok(Flow::Continue)
    }

    /// Runs a scan on the blocking pool so ctrl-c can cancel it.
    async fn run_scan(&mut self, value: ScanValue) -> anyhow::Result<ScanReport> {
        let handle = self.scanner.handle();
        let mut scanner = std::mem::take(&mut self.scanner);
        scanner.set_progress_callback(progress_printer());

        let mut task = tokio::task::spawn_blocking(move || {
            let result = scanner.scan_value(value);
            scanner.clear_progress_callback();
            (scanner, result)
        });

        let joined = loop {
            tokio::select! {
                joined = &mut task => break joined,
                _ = tokio::signal::ctrl_c() => {
                    eprint!("\ncancelling...");
                    handle.cancel();
                }
            }
        };

        let (scanner, result) = match joined {
            Ok(done) => done,
            Err(e) => {
                self.scanner = Scanner::new(self.settings.scan.clone())?;
                bail!("scan worker failed, session detached: {e}");
            }
        };
        self.scanner = scanner;
        eprintln!();

        Ok(result?)
    }

    fn print_report(&self, report: &ScanReport) {
        let suffix = if report.cancelled { ", cancelled" } else { "" };
        println!(
            "{} scan: {} matches, {} in {:.2?}{suffix}",
            report.mode,
            report.matches,
            human_bytes(report.bytes_scanned),
            report.elapsed
        );
        if report.skipped_regions > 0 {
            println!("{} regions could not be fully read", report.skipped_regions);
        }
    }

    fn print_matches(&self, count: usize) {
        let matches = self.scanner.snapshot();
        println!("{} matches", matches.len());

        for m in matches.iter().take(count) {
            match self.scanner.read_scan_value(m.address, m.kind) {
                Ok(value) => println!("  {:#014x}  {value}", m.address),
                Err(e) => println!("  {:#014x}  <{e}>", m.address),
            }
        }
        if matches.len() > count {
            println!("  ... {} more", matches.len() - count);
        }
    }

    /// Lists saved entries, marking those whose value moved since the last
    /// listing with `*`.
    fn print_saved(&mut self) {
        let Self { scanner, saved, .. } = self;
        let rows = saved.refresh(|address, kind| scanner.read_scan_value(address, kind));
        println!("{} saved", rows.len());

        for row in rows {
            let marker = if row.changed { '*' } else { ' ' };
            let value = match &row.value {
                Ok(value) => value.to_string(),
                Err(e) => format!("<{e}>"),
            };
            println!(
                "{marker}#{:<3} {:#014x}  {:<4} {value:<20} {}",
                row.index,
                row.address,
                row.kind.name(),
                row.description
            );
        }
    }

    async fn watch(&mut self, count: usize) -> anyhow::Result<()> {
        let period = Duration::from_millis(self.settings.update_interval_ms.max(1));
        let mut ticker = tokio::time::interval(period);

        println!("refreshing every {period:?}, ctrl-c to stop");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.print_matches(count);
                    if !self.saved.is_empty() {
                        self.print_saved();
                    }
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        Ok(())
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "scan-block-size" => {
                let size = parse_size(value)?;
                self.scanner.set_max_read_size(size)?;
                self.settings.scan.max_read_size = size;
            }
            "epsilon" => {
                let epsilon: f64 = value.parse().with_context(|| format!("invalid epsilon {value:?}"))?;
                self.scanner.set_epsilon(epsilon)?;
                self.settings.scan.epsilon = epsilon;
            }
            "include-executable" => {
                let include = parse_switch(value)?;
                self.scanner.set_include_executable(include)?;
                self.settings.scan.include_executable = include;
            }
            "update-interval" => {
                let interval: u64 = value.parse().with_context(|| format!("invalid interval {value:?}"))?;
                if interval == 0 {
                    bail!("update-interval must be at least 1 ms");
                }
                self.settings.update_interval_ms = interval;
            }
            "auto-attach" => {
                self.settings.auto_attach = match value {
                    "none" | "off" => None,
                    pid => Some(pid.parse().with_context(|| format!("invalid pid {pid:?}"))?),
                };
            }
            other => bail!("unknown setting {other:?}"),
        }

        info!(key, value, "setting changed");
        Ok(())
    }
}

fn parse_switch(value: &str) -> anyhow::Result<bool> {
    match value {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        other => bail!("expected on or off, got {other:?}"),
    }
}

fn progress_printer() -> impl FnMut(usize, usize) + Send + 'static {
    let mut last = None;

    move |done, total| {
        let percent = if total == 0 { 100 } else { done.saturating_mul(100) / total };
        if last != Some(percent) {
            last = Some(percent);
            eprint!("\rscanning {percent:>3}%  {} / {}", human_bytes(done), human_bytes(total));
        }
    }
}
