pub mod config;
pub mod filter;
pub mod maps;
pub mod memory;
pub mod process;
pub mod scan;
pub mod value;

pub use config::{ScanConfig, Settings};
pub use filter::Scannable;
pub use maps::{MemoryRegion, Permissions};
pub use memory::{LinuxProcess, RemoteProcess};
pub use scan::{Match, ScanError, ScanHandle, ScanMode, ScanReport, Scanner};
pub use value::{ScanValue, ValueKind};
