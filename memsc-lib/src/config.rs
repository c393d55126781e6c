use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Smallest usable bounded read: one element of the widest kind.
pub const MIN_READ_SIZE: usize = 8;

pub const DEFAULT_MAX_READ_SIZE: usize = 0x100_0000;
pub const DEFAULT_EPSILON: f64 = 1e-9;
pub const DEFAULT_UPDATE_INTERVAL_MS: u64 = 100;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("max read size {0:#x} is below the minimum of {min} bytes", min = MIN_READ_SIZE)]
    ReadSizeTooSmall(usize),
    #[error("epsilon must be a positive finite number, got {0}")]
    InvalidEpsilon(f64),
    #[error("invalid size {0:?}")]
    InvalidSize(String),
    #[error("failed to access settings file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Knobs of the scan engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ScanConfig {
    /// Bytes per bounded cross-process read.
    #[serde(rename = "scan-block-size", deserialize_with = "deserialize_size")]
    pub max_read_size: usize,
    /// Tolerance for float comparisons.
    pub epsilon: f64,
    pub include_executable: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_read_size: DEFAULT_MAX_READ_SIZE,
            epsilon: DEFAULT_EPSILON,
            include_executable: false,
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_max_read_size(self.max_read_size)?;
        check_epsilon(self.epsilon)
    }
}

pub(crate) fn check_max_read_size(size: usize) -> Result<(), ConfigError> {
    if size < MIN_READ_SIZE {
        return Err(ConfigError::ReadSizeTooSmall(size));
    }
    Ok(())
}

pub(crate) fn check_epsilon(epsilon: f64) -> Result<(), ConfigError> {
    if !epsilon.is_finite() || epsilon <= 0.0 {
        return Err(ConfigError::InvalidEpsilon(epsilon));
    }
    Ok(())
}

/// Front-end settings persisted between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Settings {
    /// Refresh period of displayed values.
    #[serde(rename = "update-interval")]
    pub update_interval_ms: u64,
    /// Process to attach to on startup.
    pub auto_attach: Option<i32>,
    #[serde(flatten)]
    pub scan: ScanConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            update_interval_ms: DEFAULT_UPDATE_INTERVAL_MS,
            auto_attach: None,
            scan: ScanConfig::default(),
        }
    }
}

impl Settings {
    /// `$XDG_CONFIG_HOME/memsc/settings.json`, falling back to `~/.config`.
    pub fn default_path() -> Option<PathBuf> {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;

        Some(base.join("memsc").join("settings.json"))
    }

    /// Loads settings, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_owned(),
                    source,
                })
            }
        };

        let settings: Settings = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })?;
        settings.scan.validate()?;

        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_owned(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let contents = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })?;
        fs::write(path, contents).map_err(io_err)
    }
}

/// Parses a size written in C literal conventions: `0x` hex, `0b` binary,
/// a leading `0` for octal, decimal otherwise.
pub fn parse_size(text: &str) -> Result<usize, ConfigError> {
    let text = text.trim();
    let invalid = || ConfigError::InvalidSize(text.to_string());

    let (digits, radix) = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        (hex, 16)
    } else if let Some(bin) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
        (bin, 2)
    } else if text.len() > 1 && text.starts_with('0') {
        (&text[1..], 8)
    } else {
        (text, 10)
    };

    usize::from_str_radix(digits, radix).map_err(|_| invalid())
}

fn deserialize_size<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawSize {
        Number(usize),
        Text(String),
    }

    match RawSize::deserialize(deserializer)? {
        RawSize::Number(size) => Ok(size),
        RawSize::Text(text) => parse_size(&text).map_err(serde::de::Error::custom),
    }
}
