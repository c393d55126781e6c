use serde::Serialize;
use sysinfo::{Pid, ProcessExt, System, SystemExt};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("process not found with criteria {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessEntry {
    pub pid: i32,
    pub name: String,
}

fn to_pid(pid: i32) -> Option<Pid> {
    usize::try_from(pid).ok().map(Pid::from)
}

/// Whether `pid` names a live process right now.
pub fn exists(pid: i32) -> bool {
    let Some(pid) = to_pid(pid) else {
        return false;
    };

    let mut sys = System::new();
    sys.refresh_process(pid)
}

pub fn process_name(pid: i32) -> Result<String, ProcessError> {
    let not_found = || ProcessError::NotFound(pid.to_string());
    let sys_pid = to_pid(pid).ok_or_else(not_found)?;

    let mut sys = System::new();
    if !sys.refresh_process(sys_pid) {
        return Err(not_found());
    }

    sys.process(sys_pid)
        .map(|process| process.name().to_string())
        .ok_or_else(not_found)
}

/// Running processes ordered by pid, optionally narrowed to names containing
/// `filter` (case-insensitive).
pub fn list_processes(filter: Option<&str>) -> Vec<ProcessEntry> {
    let mut sys = System::new();
    sys.refresh_processes();

    let filter = filter.map(str::to_lowercase);
    let mut entries: Vec<ProcessEntry> = sys
        .processes()
        .iter()
        .filter_map(|(pid, process)| {
            let pid = i32::try_from(usize::from(*pid)).ok()?;
            Some(ProcessEntry {
                pid,
                name: process.name().to_string(),
            })
        })
        .filter(|entry| match &filter {
            Some(filter) => entry.name.to_lowercase().contains(filter.as_str()),
            None => true,
        })
        .collect();

    entries.sort_by_key(|entry| entry.pid);
    entries
}
