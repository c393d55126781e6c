use byteorder::LittleEndian;
use byteorder::ReadBytesExt;
use thiserror::Error;

use super::RemoteProcess;

#[cfg(target_os = "linux")]
mod platform {
    use libc::{c_void, iovec, pid_t, process_vm_readv};

    use super::ReadMemoryError;

    pub fn read_os_memory(
        pid: i32,
        address: usize,
        buffer: &mut [u8],
    ) -> Result<(), ReadMemoryError> {
        let size = buffer.len();
        if size == 0 {
            return Ok(());
        }

        let local_iov = iovec {
            iov_base: buffer.as_mut_ptr() as *mut c_void,
            iov_len: size,
        };

        let remote_iov = iovec {
            iov_base: address as *mut c_void,
            iov_len: size,
        };

        let result = unsafe { process_vm_readv(pid as pid_t, &local_iov, 1, &remote_iov, 1, 0) };
        if result == -1 {
            let err = std::io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::EPERM) | Some(libc::ESRCH) => ReadMemoryError::Attach {
                    pid,
                    reason: err.to_string(),
                },
                _ => ReadMemoryError::Os {
                    address,
                    reason: err.to_string(),
                },
            });
        }

        if result as usize != size {
            return Err(ReadMemoryError::PartialRead {
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
    use super::ReadMemoryError;

    pub fn read_os_memory(
        pid: i32,
        _address: usize,
        _buffer: &mut [u8],
    ) -> Result<(), ReadMemoryError> {
        Err(ReadMemoryError::Attach {
            pid,
            reason: "cross-process reads are only supported on linux".to_string(),
        })
    }
}

pub(crate) use platform::read_os_memory;

#[derive(Error, Debug)]
pub enum ReadMemoryError {
    #[error("cannot access process {pid}: {reason}")]
    Attach { pid: i32, reason: String },
    #[error("partial read at {address:#x}: expected {expected} bytes, got {actual}")]
    PartialRead {
        address: usize,
        expected: usize,
        actual: usize,
    },
    #[error("read of {requested} bytes exceeds the {limit} byte limit")]
    TooLarge { requested: usize, limit: usize },
    #[error("range of {length} bytes at {address:#x} wraps the address space")]
    OutOfRange { address: usize, length: usize },
    #[error("cannot allocate a {requested} byte read buffer")]
    Allocation { requested: usize },
    #[error("failed to read memory at {address:#x}: {reason}")]
    Os { address: usize, reason: String },
    #[error("failed to decode memory: {0}")]
    DecodeFailure(String),
}

/// Reads `size` bytes with one transfer, refusing anything over `max_read_size`.
pub fn read_bounded<P: RemoteProcess + ?Sized>(
    process: &P,
    address: usize,
    size: usize,
    max_read_size: usize,
) -> Result<Vec<u8>, ReadMemoryError> {
    if size > max_read_size {
        return Err(ReadMemoryError::TooLarge {
            requested: size,
            limit: max_read_size,
        });
    }

    let mut data = vec![0; size];
    process.read_bounded(address, &mut data)?;

    Ok(data)
}

/// Splits `[address, address + length)` into `(address, len)` spans of at
/// most `max_read_size` bytes. Only the last span may be shorter.
pub fn chunk_spans(
    address: usize,
    length: usize,
    max_read_size: usize,
) -> impl Iterator<Item = (usize, usize)> {
    let step = max_read_size.max(1);
    (0..length)
        .step_by(step)
        .map(move |offset| (address + offset, step.min(length - offset)))
}

/// Reads `length` bytes as a sequence of bounded transfers. The buffer is
/// only allocated once the range is known to be addressable.
pub fn read_chunked<P: RemoteProcess + ?Sized>(
    process: &P,
    address: usize,
    length: usize,
    max_read_size: usize,
) -> Result<Vec<u8>, ReadMemoryError> {
    if address.checked_add(length).is_none() {
        return Err(ReadMemoryError::OutOfRange { address, length });
    }

    let mut data = Vec::new();
    data.try_reserve_exact(length)
        .map_err(|_| ReadMemoryError::Allocation { requested: length })?;
    data.resize(length, 0);

    for (chunk_address, chunk_len) in chunk_spans(address, length, max_read_size) {
        let offset = chunk_address - address;
        process.read_bounded(chunk_address, &mut data[offset..offset + chunk_len])?;
    }

    Ok(data)
}

fn read_memory<P: RemoteProcess + ?Sized>(
    process: &P,
    address: usize,
    size: usize,
) -> Result<Vec<u8>, ReadMemoryError> {
    let mut data = vec![0; size];
    process.read_bounded(address, &mut data)?;
    Ok(data)
}

pub fn read_u8<P: RemoteProcess + ?Sized>(process: &P, address: usize) -> Result<u8, ReadMemoryError> {
    let memory = read_memory(process, address, 1)?;

    memory
        .as_slice()
        .read_u8()
        .map_err(|_| ReadMemoryError::DecodeFailure("failed to decode u8".to_string()))
}

macro_rules! create_read_primitive {
    ($type:ty) => {
        paste::paste! {
            pub fn [<read_ $type>]<P: RemoteProcess + ?Sized>(process: &P, address: usize) -> Result<$type, ReadMemoryError> {
                let memory = read_memory(process, address, std::mem::size_of::<$type>())?;

                memory
                    .as_slice()
                    .[<read_ $type>]::<LittleEndian>()
                    .map_err(|_| ReadMemoryError::DecodeFailure(concat!("failed to decode ", stringify!($type)).to_string()))
            }
        }
    };
}

create_read_primitive!(u16);
create_read_primitive!(u32);
create_read_primitive!(i32);
create_read_primitive!(u64);
create_read_primitive!(f32);
create_read_primitive!(f64);

/// Reads a pointer-sized value, for following pointer chains by hand.
pub fn read_ptr<P: RemoteProcess + ?Sized>(process: &P, address: usize) -> Result<usize, ReadMemoryError> {
    let ptr = read_u64(process, address)?;
    usize::try_from(ptr)
        .map_err(|_| ReadMemoryError::DecodeFailure(format!("pointer {ptr:#x} does not fit usize")))
}
