use anyhow::{anyhow, bail, Context};
use memsc_lib::config::parse_size;
use memsc_lib::{ScanValue, ValueKind};

pub const DEFAULT_LISTED_MATCHES: usize = 20;

pub const HELP: &str = "\
commands:
  ps [filter]                   list processes, optionally by name
  attach <pid>                  attach to a process, dropping matches
  detach
  scan <kind> <value>           start a new scan
  next <value>                  narrow the matches with the kind in effect
  reset                         forget all matches
  matches [n]                   show the first n matches with current values
  watch [n]                     matches and saved entries, refreshed
                                until ctrl-c
  read <addr> <len>             hex dump of process memory
  write <kind> <addr> <value>   store a value
  write #<n> <value>            store a value into saved entry n
  keep <addr> <kind> [desc]     pin an address; survives scans and resets
  saved                         list pinned addresses with current values
  unkeep <n>                    drop saved entry n
  maps                          list memory regions
  where <addr>                  find the region holding an address
  set <key> <value>             scan-block-size, epsilon, include-executable,
                                update-interval, auto-attach
  save                          write settings to disk
  help
  quit
kinds: u8 u16 u32 i32 u64 f32 f64";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ps(Option<String>),
    Attach(i32),
    Detach,
    Scan(ScanValue),
    Next(String),
    Reset,
    Matches(usize),
    Watch(usize),
    Read { address: usize, length: usize },
    Write { address: usize, value: ScanValue },
    WriteSaved { index: usize, value: String },
    Keep { address: usize, kind: ValueKind, description: String },
    Saved,
    Unkeep(usize),
    Maps,
    Where(usize),
    Set { key: String, value: String },
    Save,
    Help,
    Quit,
}

/// Addresses are always hexadecimal, with or without a `0x` prefix.
pub fn parse_address(text: &str) -> anyhow::Result<usize> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);

    usize::from_str_radix(digits, 16).with_context(|| format!("invalid address {text:?}"))
}

/// Saved entries are numbered from zero and may be written as `#<n>`.
fn parse_entry(text: &str) -> anyhow::Result<usize> {
    text.strip_prefix('#')
        .unwrap_or(text)
        .parse()
        .with_context(|| format!("invalid entry {text:?}"))
}

fn parse_count(arg: Option<&str>) -> anyhow::Result<usize> {
    match arg {
        Some(n) => n.parse().with_context(|| format!("invalid count {n:?}")),
        None => Ok(DEFAULT_LISTED_MATCHES),
    }
}

impl Command {
    /// Parses one input line; blank lines yield `None`.
    pub fn parse(line: &str) -> anyhow::Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();
        let arg = |index: usize, what: &str| {
            args.get(index)
                .copied()
                .ok_or_else(|| anyhow!("{name}: missing {what}"))
        };

        let command = match name {
            "ps" => Command::Ps(args.first().map(|s| s.to_string())),
            "attach" => {
                let pid = arg(0, "pid")?;
                Command::Attach(pid.parse().with_context(|| format!("invalid pid {pid:?}"))?)
            }
            "detach" => Command::Detach,
            "scan" => {
                let kind: ValueKind = arg(0, "kind")?.parse()?;
                Command::Scan(ScanValue::parse(kind, arg(1, "value")?)?)
            }
            "next" => Command::Next(arg(0, "value")?.to_string()),
            "reset" => Command::Reset,
            "matches" => Command::Matches(parse_count(args.first().copied())?),
            "watch" => Command::Watch(parse_count(args.first().copied())?),
            "read" => Command::Read {
                address: parse_address(arg(0, "address")?)?,
                length: parse_size(arg(1, "length")?)?,
            },
            "write" if args.first().is_some_and(|target| target.starts_with('#')) => {
                Command::WriteSaved {
                    index: parse_entry(arg(0, "entry")?)?,
                    value: arg(1, "value")?.to_string(),
                }
            }
            "write" => {
                let kind: ValueKind = arg(0, "kind")?.parse()?;
                Command::Write {
                    address: parse_address(arg(1, "address")?)?,
                    value: ScanValue::parse(kind, arg(2, "value")?)?,
                }
            }
            "keep" => Command::Keep {
                address: parse_address(arg(0, "address")?)?,
                kind: arg(1, "kind")?.parse()?,
                description: args.get(2..).map(|rest| rest.join(" ")).unwrap_or_default(),
            },
            "saved" => Command::Saved,
            "unkeep" => Command::Unkeep(parse_entry(arg(0, "entry")?)?),
            "maps" => Command::Maps,
            "where" => Command::Where(parse_address(arg(0, "address")?)?),
            "set" => Command::Set {
                key: arg(0, "key")?.to_string(),
                value: arg(1, "value")?.to_string(),
            },
            "save" => Command::Save,
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            other => bail!("unknown command {other:?}, try help"),
        };

        Ok(Some(command))
    }
}
