use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Pseudo-regions whose pages fault when read through `process_vm_readv`.
const UNREADABLE_REGIONS: [&str; 2] = ["[vvar]", "[vvar_vclock]"];

#[derive(Error, Debug)]
pub enum MapsError {
    #[error("failed to open maps of process {pid}: {reason}")]
    Attach { pid: i32, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Permissions(u8);

impl Permissions {
    pub const READ: Self = Self(1 << 0);
    pub const WRITE: Self = Self(1 << 1);
    pub const EXECUTE: Self = Self(1 << 2);
    pub const SHARED: Self = Self(1 << 3);
    pub const PRIVATE: Self = Self(1 << 4);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    fn parse(raw: &str) -> Self {
        let mut perms = Self::empty();
        for c in raw.chars() {
            match c {
                'r' => perms.insert(Self::READ),
                'w' => perms.insert(Self::WRITE),
                'x' => perms.insert(Self::EXECUTE),
                's' => perms.insert(Self::SHARED),
                'p' => perms.insert(Self::PRIVATE),
                _ => {}
            }
        }
        perms
    }
}

impl std::ops::BitOr for Permissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |perm, c| if self.contains(perm) { c } else { '-' };
        let share = if self.contains(Self::SHARED) {
            's'
        } else if self.contains(Self::PRIVATE) {
            'p'
        } else {
            '-'
        };
        write!(
            f,
            "{}{}{}{}",
            flag(Self::READ, 'r'),
            flag(Self::WRITE, 'w'),
            flag(Self::EXECUTE, 'x'),
            share
        )
    }
}

/// One line of `/proc/<pid>/maps`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryRegion {
    pub start: usize,
    pub length: usize,
    pub permissions: Permissions,
    /// Offset into the mapped file, 0 for anonymous mappings.
    pub offset: usize,
    /// (major, minor) of the device holding the mapped file.
    pub device: (u32, u32),
    pub inode: u64,
    /// File path or pseudo-name such as `[heap]` or `[stack]`.
    pub name: Option<String>,
}

impl MemoryRegion {
    pub fn end(&self) -> usize {
        self.start + self.length
    }

    pub fn contains(&self, address: usize) -> bool {
        address >= self.start && address < self.end()
    }

    pub fn is_readable(&self) -> bool {
        self.permissions.contains(Permissions::READ)
    }

    pub fn is_writable(&self) -> bool {
        self.permissions.contains(Permissions::WRITE)
    }

    pub fn is_executable(&self) -> bool {
        self.permissions.contains(Permissions::EXECUTE)
    }

    fn is_unreadable_pseudo(&self) -> bool {
        self.name
            .as_deref()
            .map_or(false, |name| UNREADABLE_REGIONS.contains(&name))
    }

    /// Parses `start-end perms offset major:minor inode [path]`.
    fn parse(line: &str) -> Option<Self> {
        let mut parts = line.trim_end().splitn(6, ' ');

        let (start, end) = parts.next()?.split_once('-')?;
        let start = usize::from_str_radix(start, 16).ok()?;
        let end = usize::from_str_radix(end, 16).ok()?;
        if end < start {
            return None;
        }

        let perms = parts.next()?;
        if perms.len() != 4 {
            return None;
        }
        let permissions = Permissions::parse(perms);

        let offset = usize::from_str_radix(parts.next()?, 16).ok()?;

        let (major, minor) = parts.next()?.split_once(':')?;
        let device = (
            u32::from_str_radix(major, 16).ok()?,
            u32::from_str_radix(minor, 16).ok()?,
        );

        let inode = parts.next()?.parse::<u64>().ok()?;

        let name = parts
            .next()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        Some(Self {
            start,
            length: end - start,
            permissions,
            offset,
            device,
            inode,
            name,
        })
    }
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:012x}-{:012x} {} {:08x} {:02x}:{:02x} {}",
            self.start,
            self.end(),
            self.permissions,
            self.offset,
            self.device.0,
            self.device.1,
            self.inode
        )?;
        if let Some(name) = &self.name {
            write!(f, " {name}")?;
        }
        Ok(())
    }
}

/// Reads the address map of `pid`.
///
/// An unreadable maps file is an attach failure and yields no regions at all;
/// a malformed line only cuts the listing short.
pub fn enumerate(pid: i32, include_executable: bool) -> Result<Vec<MemoryRegion>, MapsError> {
    let path = format!("/proc/{pid}/maps");
    let file = File::open(&path).map_err(|e| MapsError::Attach {
        pid,
        reason: e.to_string(),
    })?;

    let regions = parse_maps(BufReader::new(file), include_executable);
    debug!(pid, regions = regions.len(), "enumerated memory regions");
    Ok(regions)
}

pub fn parse_maps<R: BufRead>(reader: R, include_executable: bool) -> Vec<MemoryRegion> {
    let mut regions = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(line = index + 1, "stopped reading maps: {e}");
                break;
            }
        };

        let Some(region) = MemoryRegion::parse(&line) else {
            warn!(line = index + 1, "stopped at malformed maps line: {line:?}");
            break;
        };

        if region.is_unreadable_pseudo() {
            continue;
        }
        if region.is_executable() && !include_executable {
            continue;
        }

        regions.push(region);
    }

    regions
}

/// Total bytes an initial scan will visit, used as the progress denominator.
pub fn scannable_size(regions: &[MemoryRegion], include_executable: bool) -> usize {
    regions
        .iter()
        .filter(|region| region.is_readable())
        .filter(|region| include_executable || !region.is_executable())
        .map(|region| region.length)
        .sum()
}

/// Finds the region holding `address` in an address-ordered listing.
pub fn find_region(regions: &[MemoryRegion], address: usize) -> Option<&MemoryRegion> {
    let index = regions.partition_point(|region| region.end() <= address);
    regions.get(index).filter(|region| region.contains(address))
}
