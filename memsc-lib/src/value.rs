use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::read::{self, ReadMemoryError};
use crate::memory::RemoteProcess;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValueParseError {
    #[error("unknown value type {0:?}, expected one of u8, u16, u32, i32, u64, f32, f64")]
    UnknownKind(String),
    #[error("{text:?} is not a valid {kind} value")]
    Invalid { kind: ValueKind, text: String },
}

/// Width and interpretation of the values a scan compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    U8,
    U16,
    U32,
    I32,
    U64,
    F32,
    F64,
}

impl ValueKind {
    pub const ALL: [ValueKind; 7] = [
        ValueKind::U8,
        ValueKind::U16,
        ValueKind::U32,
        ValueKind::I32,
        ValueKind::U64,
        ValueKind::F32,
        ValueKind::F64,
    ];

    pub const fn width(self) -> usize {
        match self {
            ValueKind::U8 => 1,
            ValueKind::U16 => 2,
            ValueKind::U32 | ValueKind::I32 | ValueKind::F32 => 4,
            ValueKind::U64 | ValueKind::F64 => 8,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, ValueKind::F32 | ValueKind::F64)
    }

    pub const fn name(self) -> &'static str {
        match self {
            ValueKind::U8 => "u8",
            ValueKind::U16 => "u16",
            ValueKind::U32 => "u32",
            ValueKind::I32 => "i32",
            ValueKind::U64 => "u64",
            ValueKind::F32 => "f32",
            ValueKind::F64 => "f64",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ValueKind {
    type Err = ValueParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "u8" | "byte" => Ok(ValueKind::U8),
            "u16" | "2bytes" => Ok(ValueKind::U16),
            "u32" | "4bytes" => Ok(ValueKind::U32),
            "i32" | "int" => Ok(ValueKind::I32),
            "u64" | "8bytes" => Ok(ValueKind::U64),
            "f32" | "float" => Ok(ValueKind::F32),
            "f64" | "double" => Ok(ValueKind::F64),
            _ => Err(ValueParseError::UnknownKind(s.to_string())),
        }
    }
}

/// A value tagged with its kind, as entered by a user or read back for display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScanValue {
    U8(u8),
    U16(u16),
    U32(u32),
    I32(i32),
    U64(u64),
    F32(f32),
    F64(f64),
}

fn parse_unsigned(text: &str) -> Option<u64> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

fn parse_signed(text: &str) -> Option<i64> {
    match text.strip_prefix('-') {
        Some(rest) => parse_unsigned(rest).and_then(|v| 0i64.checked_sub_unsigned(v)),
        None => parse_unsigned(text.trim_start_matches('+')).and_then(|v| i64::try_from(v).ok()),
    }
}

impl ScanValue {
    /// Parses `text` as a `kind`. Integers take decimal or `0x` hex, floats
    /// accept a comma as the decimal separator.
    pub fn parse(kind: ValueKind, text: &str) -> Result<Self, ValueParseError> {
        let text = text.trim();
        let invalid = || ValueParseError::Invalid {
            kind,
            text: text.to_string(),
        };

        let value = match kind {
            ValueKind::U8 => ScanValue::U8(parse_unsigned(text).and_then(|v| v.try_into().ok()).ok_or_else(invalid)?),
            ValueKind::U16 => ScanValue::U16(parse_unsigned(text).and_then(|v| v.try_into().ok()).ok_or_else(invalid)?),
            ValueKind::U32 => ScanValue::U32(parse_unsigned(text).and_then(|v| v.try_into().ok()).ok_or_else(invalid)?),
            ValueKind::I32 => ScanValue::I32(parse_signed(text).and_then(|v| v.try_into().ok()).ok_or_else(invalid)?),
            ValueKind::U64 => ScanValue::U64(parse_unsigned(text).ok_or_else(invalid)?),
            ValueKind::F32 => ScanValue::F32(text.replace(',', ".").parse().map_err(|_| invalid())?),
            ValueKind::F64 => ScanValue::F64(text.replace(',', ".").parse().map_err(|_| invalid())?),
        };

        Ok(value)
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            ScanValue::U8(_) => ValueKind::U8,
            ScanValue::U16(_) => ValueKind::U16,
            ScanValue::U32(_) => ValueKind::U32,
            ScanValue::I32(_) => ValueKind::I32,
            ScanValue::U64(_) => ValueKind::U64,
            ScanValue::F32(_) => ValueKind::F32,
            ScanValue::F64(_) => ValueKind::F64,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            ScanValue::U8(v) => v.to_ne_bytes().to_vec(),
            ScanValue::U16(v) => v.to_ne_bytes().to_vec(),
            ScanValue::U32(v) => v.to_ne_bytes().to_vec(),
            ScanValue::I32(v) => v.to_ne_bytes().to_vec(),
            ScanValue::U64(v) => v.to_ne_bytes().to_vec(),
            ScanValue::F32(v) => v.to_ne_bytes().to_vec(),
            ScanValue::F64(v) => v.to_ne_bytes().to_vec(),
        }
    }
}

impl fmt::Display for ScanValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanValue::U8(v) => write!(f, "{v}"),
            ScanValue::U16(v) => write!(f, "{v}"),
            ScanValue::U32(v) => write!(f, "{v}"),
            ScanValue::I32(v) => write!(f, "{v}"),
            ScanValue::U64(v) => write!(f, "{v}"),
            ScanValue::F32(v) => write!(f, "{v}"),
            ScanValue::F64(v) => write!(f, "{v}"),
        }
    }
}

/// Reads the value of `kind` currently stored at `address`.
pub fn read_scan_value<P: RemoteProcess + ?Sized>(
    process: &P,
    address: usize,
    kind: ValueKind,
) -> Result<ScanValue, ReadMemoryError> {
    let value = match kind {
        ValueKind::U8 => ScanValue::U8(read::read_u8(process, address)?),
        ValueKind::U16 => ScanValue::U16(read::read_u16(process, address)?),
        ValueKind::U32 => ScanValue::U32(read::read_u32(process, address)?),
        ValueKind::I32 => ScanValue::I32(read::read_i32(process, address)?),
        ValueKind::U64 => ScanValue::U64(read::read_u64(process, address)?),
        ValueKind::F32 => ScanValue::F32(read::read_f32(process, address)?),
        ValueKind::F64 => ScanValue::F64(read::read_f64(process, address)?),
    };

    Ok(value)
}
