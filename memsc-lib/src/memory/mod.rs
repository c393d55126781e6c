use crate::maps::{self, MapsError, MemoryRegion};
use crate::process::{self, ProcessError};

use self::read::{read_os_memory, ReadMemoryError};
use self::write::{write_os_memory, WriteMemoryError};

pub mod read;
pub mod write;

#[cfg(test)]
pub(crate) mod fake;

/// The target of a scan: something with an address map that can be read
/// and written one bounded transfer at a time.
pub trait RemoteProcess {
    fn pid(&self) -> i32;

    fn regions(&self, include_executable: bool) -> Result<Vec<MemoryRegion>, MapsError>;

    /// Fills `buffer` from `address` with a single transfer. Anything short
    /// of `buffer.len()` bytes is an error.
    fn read_bounded(&self, address: usize, buffer: &mut [u8]) -> Result<(), ReadMemoryError>;

    /// Writes all of `data` to `address` with a single transfer.
    fn write(&self, address: usize, data: &[u8]) -> Result<(), WriteMemoryError>;
}

/// A live process accessed through `/proc/<pid>/maps` and
/// `process_vm_readv`/`process_vm_writev`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinuxProcess {
    pid: i32,
}

impl LinuxProcess {
    pub fn open(pid: i32) -> Result<Self, ProcessError> {
        if !process::exists(pid) {
            return Err(ProcessError::NotFound(pid.to_string()));
        }

        Ok(Self { pid })
    }
}

impl RemoteProcess for LinuxProcess {
    fn pid(&self) -> i32 {
        self.pid
    }

    fn regions(&self, include_executable: bool) -> Result<Vec<MemoryRegion>, MapsError> {
        maps::enumerate(self.pid, include_executable)
    }

    fn read_bounded(&self, address: usize, buffer: &mut [u8]) -> Result<(), ReadMemoryError> {
        read_os_memory(self.pid, address, buffer)
    }

    fn write(&self, address: usize, data: &[u8]) -> Result<(), WriteMemoryError> {
        write_os_memory(self.pid, address, data)
    }
}

impl<P: RemoteProcess + ?Sized> RemoteProcess for &P {
    fn pid(&self) -> i32 {
        (**self).pid()
    }

    fn regions(&self, include_executable: bool) -> Result<Vec<MemoryRegion>, MapsError> {
        (**self).regions(include_executable)
    }

    fn read_bounded(&self, address: usize, buffer: &mut [u8]) -> Result<(), ReadMemoryError> {
        (**self).read_bounded(address, buffer)
    }

    fn write(&self, address: usize, data: &[u8]) -> Result<(), WriteMemoryError> {
        (**self).write(address, data)
    }
}
