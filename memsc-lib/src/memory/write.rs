use thiserror::Error;

use super::RemoteProcess;

#[cfg(target_os = "linux")]
mod platform {
    use libc::{c_void, iovec, pid_t, process_vm_writev};

    use super::WriteMemoryError;

    // One call, no splitting: `data` must fit a single vectored transfer.
    pub fn write_os_memory(pid: i32, address: usize, data: &[u8]) -> Result<(), WriteMemoryError> {
        let size = data.len();
        if size == 0 {
            return Ok(());
        }

        let local_iov = iovec {
            iov_base: data.as_ptr() as *mut c_void,
            iov_len: size,
        };

        let remote_iov = iovec {
            iov_base: address as *mut c_void,
            iov_len: size,
        };

        let result = unsafe { process_vm_writev(pid as pid_t, &local_iov, 1, &remote_iov, 1, 0) };
        if result == -1 {
            let err = std::io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::EPERM) | Some(libc::ESRCH) => WriteMemoryError::Attach {
                    pid,
                    reason: err.to_string(),
                },
                _ => WriteMemoryError::Os {
                    address,
                    reason: err.to_string(),
                },
            });
        }

        if result as usize != size {
            return Err(WriteMemoryError::PartialWrite {
                address,
                expected: size,
                actual: result as usize,
            });
        }

        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
mod platform {
    use super::WriteMemoryError;

    pub fn write_os_memory(pid: i32, _address: usize, _data: &[u8]) -> Result<(), WriteMemoryError> {
        Err(WriteMemoryError::Attach {
            pid,
            reason: "cross-process writes are only supported on linux".to_string(),
        })
    }
}

pub(crate) use platform::write_os_memory;

#[derive(Error, Debug)]
pub enum WriteMemoryError {
    #[error("cannot access process {pid}: {reason}")]
    Attach { pid: i32, reason: String },
    #[error("partial write at {address:#x}: expected {expected} bytes, wrote {actual}")]
    PartialWrite {
        address: usize,
        expected: usize,
        actual: usize,
    },
    #[error("write of {requested} bytes exceeds the {limit} byte single-call limit")]
    TooLarge { requested: usize, limit: usize },
    #[error("failed to write memory at {address:#x}: {reason}")]
    Os { address: usize, reason: String },
}

/// Writes `data` with one transfer. Writes are never split, so anything over
/// `max_write_size` is refused rather than partially applied.
pub fn write_bounded<P: RemoteProcess + ?Sized>(
    process: &P,
    address: usize,
    data: &[u8],
    max_write_size: usize,
) -> Result<(), WriteMemoryError> {
    if data.len() > max_write_size {
        return Err(WriteMemoryError::TooLarge {
            requested: data.len(),
            limit: max_write_size,
        });
    }

    process.write(address, data)
}
