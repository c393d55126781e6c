//! In-memory stand-in for a target process.

use std::cell::RefCell;

use crate::maps::{MapsError, MemoryRegion, Permissions};

use super::read::ReadMemoryError;
use super::write::WriteMemoryError;
use super::RemoteProcess;

pub struct FakeProcess {
    regions: Vec<MemoryRegion>,
    memory: RefCell<Vec<Vec<u8>>>,
    reads: RefCell<Vec<(usize, usize)>>,
    failing_reads: Vec<usize>,
    detached: bool,
}

impl FakeProcess {
    pub fn new() -> Self {
        Self {
            regions: Vec::new(),
            memory: RefCell::new(Vec::new()),
            reads: RefCell::new(Vec::new()),
            failing_reads: Vec::new(),
            detached: false,
        }
    }

    pub fn with_region(start: usize, bytes: Vec<u8>) -> Self {
        Self::new().region(start, Permissions::READ | Permissions::WRITE, bytes)
    }

    pub fn region(mut self, start: usize, permissions: Permissions, bytes: Vec<u8>) -> Self {
        self.regions.push(MemoryRegion {
            start,
            length: bytes.len(),
            permissions: permissions | Permissions::PRIVATE,
            offset: 0,
            device: (0, 0),
            inode: 0,
            name: None,
        });
        self.memory.get_mut().push(bytes);
        self
    }

    /// Any read starting at `address` fails.
    pub fn fail_reads_at(mut self, address: usize) -> Self {
        self.failing_reads.push(address);
        self
    }

    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }

    pub fn reads(&self) -> Vec<(usize, usize)> {
        self.reads.borrow().clone()
    }

    pub fn clear_reads(&self) {
        self.reads.borrow_mut().clear();
    }

    pub fn bytes(&self, address: usize, len: usize) -> Vec<u8> {
        let (index, offset) = self.locate(address).expect("address is mapped");
        self.memory.borrow()[index][offset..offset + len].to_vec()
    }

    pub fn poke(&self, address: usize, data: &[u8]) {
        let (index, offset) = self.locate(address).expect("address is mapped");
        self.memory.borrow_mut()[index][offset..offset + data.len()].copy_from_slice(data);
    }

    fn locate(&self, address: usize) -> Option<(usize, usize)> {
        self.regions
            .iter()
            .position(|region| region.contains(address))
            .map(|index| (index, address - self.regions[index].start))
    }
}

impl RemoteProcess for FakeProcess {
    fn pid(&self) -> i32 {
        4242
    }

    fn regions(&self, include_executable: bool) -> Result<Vec<MemoryRegion>, MapsError> {
        if self.detached {
            return Err(MapsError::Attach {
                pid: self.pid(),
                reason: "No such process".to_string(),
            });
        }

        Ok(self
            .regions
            .iter()
            .filter(|region| include_executable || !region.is_executable())
            .cloned()
            .collect())
    }

    fn read_bounded(&self, address: usize, buffer: &mut [u8]) -> Result<(), ReadMemoryError> {
        self.reads.borrow_mut().push((address, buffer.len()));

        if self.failing_reads.contains(&address) {
            return Err(ReadMemoryError::Os {
                address,
                reason: "Bad address".to_string(),
            });
        }

        let Some((index, offset)) = self.locate(address) else {
            return Err(ReadMemoryError::Os {
                address,
                reason: "Bad address".to_string(),
            });
        };

        let memory = self.memory.borrow();
        let available = memory[index].len() - offset;
        if available < buffer.len() {
            return Err(ReadMemoryError::PartialRead {
                address,
                expected: buffer.len(),
                actual: available,
            });
        }

        buffer.copy_from_slice(&memory[index][offset..offset + buffer.len()]);
        Ok(())
    }

    fn write(&self, address: usize, data: &[u8]) -> Result<(), WriteMemoryError> {
        let Some((index, offset)) = self.locate(address) else {
            return Err(WriteMemoryError::Os {
                address,
                reason: "Bad address".to_string(),
            });
        };

        let mut memory = self.memory.borrow_mut();
        let available = memory[index].len() - offset;
        if available < data.len() {
            return Err(WriteMemoryError::PartialWrite {
                address,
                expected: data.len(),
                actual: available,
            });
        }

        memory[index][offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}
