//! The scan session: an initial pass over the whole address space, then
//! narrowing passes over the addresses that still hold the searched value.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::config::{self, ConfigError, ScanConfig};
use crate::filter::{self, Scannable};
use crate::maps::{self, MapsError, MemoryRegion};
use crate::memory::read::{self, chunk_spans, ReadMemoryError};
use crate::memory::write::{self, WriteMemoryError};
use crate::memory::{LinuxProcess, RemoteProcess};
use crate::value::{self, ScanValue, ValueKind};

pub type ProgressCallback = Box<dyn FnMut(usize, usize) + Send>;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error(transparent)]
    Attach(#[from] MapsError),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error(transparent)]
    Read(#[from] ReadMemoryError),
    #[error(transparent)]
    Write(#[from] WriteMemoryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// An address found by a scan, tagged with the kind it was found as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Match {
    pub address: usize,
    pub kind: ValueKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanMode {
    /// Walk every readable region.
    Initial,
    /// Re-check the current matches only.
    Refine,
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanMode::Initial => f.write_str("initial"),
            ScanMode::Refine => f.write_str("refine"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub mode: ScanMode,
    pub matches: usize,
    pub bytes_scanned: usize,
    pub total_bytes: usize,
    /// Regions abandoned after a read failure.
    pub skipped_regions: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
}

/// Observes and cancels a scan from another thread.
#[derive(Debug, Clone)]
pub struct ScanHandle {
    busy: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
}

impl ScanHandle {
    pub fn is_scanning(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Asks a running initial scan to stop before its next region.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }
}

struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Default)]
struct InitialPass {
    found: Vec<usize>,
    bytes_scanned: usize,
    total_bytes: usize,
    skipped_regions: usize,
    cancelled: bool,
}

/// Scan state for one attached process.
///
/// The match list is not locked: while a scan runs nothing else may read it.
/// Watch [`ScanHandle::is_scanning`] and take a [`Scanner::snapshot`] when a
/// display needs to refresh alongside scanning.
pub struct Scanner<P = LinuxProcess> {
    process: Option<P>,
    matches: Vec<usize>,
    kind: Option<ValueKind>,
    config: ScanConfig,
    busy: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    progress: Option<ProgressCallback>,
}

impl<P> Default for Scanner<P> {
    fn default() -> Self {
        Self {
            process: None,
            matches: Vec::new(),
            kind: None,
            config: ScanConfig::default(),
            busy: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
            progress: None,
        }
    }
}

impl Scanner<LinuxProcess> {
    /// Attaches to `pid` if such a process exists. Any previous matches are
    /// dropped.
    pub fn attach(&mut self, pid: i32) -> bool {
        match LinuxProcess::open(pid) {
            Ok(process) => {
                self.attach_process(process);
                true
            }
            Err(e) => {
                warn!(pid, "could not attach: {e}");
                false
            }
        }
    }
}

impl<P: RemoteProcess> Scanner<P> {
    pub fn new(config: ScanConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::default()
        })
    }

    pub fn attach_process(&mut self, process: P) {
        info!(pid = process.pid(), "attached");
        self.process = Some(process);
        self.reset();
    }

    pub fn detach(&mut self) {
        self.process = None;
        self.reset();
    }

    pub fn pid(&self) -> Option<i32> {
        self.process.as_ref().map(RemoteProcess::pid)
    }

    pub fn process(&self) -> Option<&P> {
        self.process.as_ref()
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn set_max_read_size(&mut self, size: usize) -> Result<(), ScanError> {
        self.ensure_idle()?;
        config::check_max_read_size(size)?;
        self.config.max_read_size = size;
        Ok(())
    }

    pub fn set_epsilon(&mut self, epsilon: f64) -> Result<(), ScanError> {
        self.ensure_idle()?;
        config::check_epsilon(epsilon)?;
        self.config.epsilon = epsilon;
        Ok(())
    }

    pub fn set_include_executable(&mut self, include: bool) -> Result<(), ScanError> {
        self.ensure_idle()?;
        self.config.include_executable = include;
        Ok(())
    }

    /// Installs a callback receiving `(bytes_scanned, total_bytes)` after
    /// each region of an initial scan. It runs on the scanning thread.
    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: FnMut(usize, usize) + Send + 'static,
    {
        self.progress = Some(Box::new(callback));
    }

    pub fn clear_progress_callback(&mut self) {
        self.progress = None;
    }

    pub fn handle(&self) -> ScanHandle {
        ScanHandle {
            busy: Arc::clone(&self.busy),
            cancel: Arc::clone(&self.cancel),
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Addresses in insertion order; refining keeps the survivors' order.
    pub fn matches(&self) -> &[usize] {
        &self.matches
    }

    pub fn match_entries(&self) -> impl Iterator<Item = Match> + '_ {
        let kind = self.kind;
        self.matches
            .iter()
            .filter_map(move |&address| kind.map(|kind| Match { address, kind }))
    }

    /// An owned copy of the matches for display while another scan runs.
    pub fn snapshot(&self) -> Vec<Match> {
        self.match_entries().collect()
    }

    /// Kind of the current matches, if any.
    pub fn value_kind(&self) -> Option<ValueKind> {
        self.kind
    }

    /// Forgets all matches; the next scan is an initial one.
    pub fn reset(&mut self) {
        self.matches = Vec::new();
        self.kind = None;
    }

    /// Runs an initial scan when there are no matches, otherwise narrows the
    /// existing ones to those still holding `value`.
    pub fn scan<T: Scannable>(&mut self, value: T) -> Result<ScanReport, ScanError> {
        let _busy = BusyGuard::acquire(&self.busy)
            .ok_or_else(|| ScanError::InvalidState("a scan is already running".to_string()))?;

        if !self.matches.is_empty() && self.kind != Some(T::KIND) {
            return Err(ScanError::InvalidState(format!(
                "current matches are {}, reset before scanning for {}",
                self.kind.map_or("untyped", ValueKind::name),
                T::KIND
            )));
        }

        let Self {
            process,
            matches,
            kind,
            config,
            cancel,
            progress,
            ..
        } = self;
        let process = process.as_ref().ok_or_else(not_attached)?;
        cancel.store(false, Ordering::Release);

        let started = Instant::now();
        let report = if matches.is_empty() {
            let pass = initial_scan(process, config, value, cancel, progress)?;
            *matches = pass.found;
            ScanReport {
                mode: ScanMode::Initial,
                matches: matches.len(),
                bytes_scanned: pass.bytes_scanned,
                total_bytes: pass.total_bytes,
                skipped_regions: pass.skipped_regions,
                cancelled: pass.cancelled,
                elapsed: started.elapsed(),
            }
        } else {
            let checked = matches.len();
            refine(process, matches, value, config.epsilon);
            ScanReport {
                mode: ScanMode::Refine,
                matches: matches.len(),
                bytes_scanned: checked * std::mem::size_of::<T>(),
                total_bytes: checked * std::mem::size_of::<T>(),
                skipped_regions: 0,
                cancelled: false,
                elapsed: started.elapsed(),
            }
        };

        *kind = if matches.is_empty() { None } else { Some(T::KIND) };

        info!(
            pid = process.pid(),
            mode = %report.mode,
            kind = %T::KIND,
            matches = report.matches,
            bytes = report.bytes_scanned,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "scan finished"
        );

        Ok(report)
    }

    /// [`Scanner::scan`] for a value whose kind is only known at runtime.
    pub fn scan_value(&mut self, value: ScanValue) -> Result<ScanReport, ScanError> {
        match value {
            ScanValue::U8(v) => self.scan(v),
            ScanValue::U16(v) => self.scan(v),
            ScanValue::U32(v) => self.scan(v),
            ScanValue::I32(v) => self.scan(v),
            ScanValue::U64(v) => self.scan(v),
            ScanValue::F32(v) => self.scan(v),
            ScanValue::F64(v) => self.scan(v),
        }
    }

    /// Current address map of the attached process.
    pub fn regions(&self) -> Result<Vec<MemoryRegion>, ScanError> {
        let process = self.attached()?;
        Ok(process.regions(true)?)
    }

    /// Reads `length` bytes in bounded chunks.
    pub fn read(&self, address: usize, length: usize) -> Result<Vec<u8>, ScanError> {
        let process = self.attached()?;
        Ok(read::read_chunked(process, address, length, self.config.max_read_size)?)
    }

    pub fn read_value<T: Scannable>(&self, address: usize) -> Result<T, ScanError> {
        let process = self.attached()?;
        let mut element = [T::default()];
        process.read_bounded(address, filter::as_bytes_mut(&mut element))?;
        Ok(element[0])
    }

    /// Reads the value at `address` as `kind`, for refreshing displays.
    pub fn read_scan_value(&self, address: usize, kind: ValueKind) -> Result<ScanValue, ScanError> {
        let process = self.attached()?;
        Ok(value::read_scan_value(process, address, kind)?)
    }

    /// Writes `data` with a single transfer of at most `max_read_size` bytes.
    pub fn write(&self, address: usize, data: &[u8]) -> Result<(), ScanError> {
        let process = self.attached()?;
        write::write_bounded(process, address, data, self.config.max_read_size)?;
        debug!(pid = process.pid(), address, len = data.len(), "wrote memory");
        Ok(())
    }

    pub fn write_value<T: Scannable>(&self, address: usize, value: T) -> Result<(), ScanError> {
        self.write(address, filter::as_bytes(&[value]))
    }

    pub fn write_scan_value(&self, address: usize, value: ScanValue) -> Result<(), ScanError> {
        self.write(address, &value.to_bytes())
    }

    fn attached(&self) -> Result<&P, ScanError> {
        self.process.as_ref().ok_or_else(not_attached)
    }

    fn ensure_idle(&self) -> Result<(), ScanError> {
        if self.is_scanning() {
            return Err(ScanError::InvalidState("a scan is running".to_string()));
        }
        Ok(())
    }
}

fn not_attached() -> ScanError {
    ScanError::InvalidState("no process attached".to_string())
}

fn initial_scan<P: RemoteProcess, T: Scannable>(
    process: &P,
    config: &ScanConfig,
    target: T,
    cancel: &AtomicBool,
    progress: &mut Option<ProgressCallback>,
) -> Result<InitialPass, ScanError> {
    let regions = process.regions(config.include_executable)?;
    let mut pass = InitialPass {
        total_bytes: maps::scannable_size(&regions, config.include_executable),
        ..InitialPass::default()
    };

    let width = std::mem::size_of::<T>();
    let chunk_elements = config.max_read_size / width;
    let largest_region = regions
        .iter()
        .filter(|region| region.is_readable())
        .map(|region| region.length / width)
        .max()
        .unwrap_or(0);
    let mut buf = vec![T::default(); chunk_elements.min(largest_region)];

    debug!(
        pid = process.pid(),
        regions = regions.len(),
        total_bytes = pass.total_bytes,
        accelerated = filter::accelerated(),
        "starting initial scan"
    );

    for region in regions.iter().filter(|region| region.is_readable()) {
        if cancel.load(Ordering::Acquire) {
            pass.cancelled = true;
            info!(pid = process.pid(), "initial scan cancelled");
            break;
        }

        if let Err(e) = scan_region(process, region, target, config, &mut buf, &mut pass.found) {
            warn!(region = %region, "skipping rest of region: {e}");
            pass.skipped_regions += 1;
        }

        pass.bytes_scanned += region.length;
        if let Some(callback) = progress.as_mut() {
            callback(pass.bytes_scanned, pass.total_bytes);
        }
    }

    Ok(pass)
}

/// Streams the whole elements of `region` through the filter. On a failed
/// read, matches from earlier chunks stay in `found`.
fn scan_region<P: RemoteProcess, T: Scannable>(
    process: &P,
    region: &MemoryRegion,
    target: T,
    config: &ScanConfig,
    buf: &mut [T],
    found: &mut Vec<usize>,
) -> Result<(), ReadMemoryError> {
    let width = std::mem::size_of::<T>();
    let whole_bytes = region.length / width * width;
    let chunk_bytes = buf.len() * width;
    if whole_bytes == 0 || chunk_bytes == 0 {
        return Ok(());
    }

    trace!(region = %region, "scanning region");

    for (address, len) in chunk_spans(region.start, whole_bytes, chunk_bytes) {
        let chunk = &mut buf[..len / width];
        process.read_bounded(address, filter::as_bytes_mut(chunk))?;

        found.reserve(filter::expected_hits(chunk.len()));
        T::filter_into(chunk, address, target, config.epsilon, found);
    }

    Ok(())
}

/// Keeps the matches that can still be read and still hold `target`.
fn refine<P: RemoteProcess, T: Scannable>(process: &P, matches: &mut Vec<usize>, target: T, epsilon: f64) {
    let mut element = [T::default()];

    matches.retain(|&address| match process.read_bounded(address, filter::as_bytes_mut(&mut element)) {
        Ok(()) => T::matches(element[0], target, epsilon),
        Err(e) => {
            trace!(address, "dropping unreadable match: {e}");
            false
        }
    });
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use proptest::prelude::*;

    use super::*;
    use crate::maps::Permissions;
    use crate::memory::fake::FakeProcess;

    const RW: Permissions = Permissions::READ.union(Permissions::WRITE);

    fn put<T: Scannable>(bytes: &mut [u8], offset: usize, value: T) {
        let mut element = [value];
        let raw = filter::as_bytes_mut(&mut element);
        bytes[offset..offset + raw.len()].copy_from_slice(raw);
    }

    fn scanner(process: FakeProcess, max_read_size: usize) -> Scanner<FakeProcess> {
        let mut scanner = Scanner::new(ScanConfig {
            max_read_size,
            ..ScanConfig::default()
        })
        .unwrap();
        scanner.attach_process(process);
        scanner
    }

    fn two_regions() -> FakeProcess {
        let mut first = vec![0u8; 0x100];
        put(&mut first, 0x10, 0x1234u32);
        put(&mut first, 0xfc, 0x1234u32);
        let mut second = vec![0u8; 0x40];
        put(&mut second, 0x08, 0x1234u32);

        FakeProcess::new()
            .region(0x1000, RW, first)
            .region(0x3000, RW, second)
    }

    #[test]
    fn initial_scan_collects_matches_in_address_order() {
        let mut scanner = scanner(two_regions(), 0x1000);

        let report = scanner.scan(0x1234u32).unwrap();

        assert_eq!(report.mode, ScanMode::Initial);
        assert_eq!(scanner.matches(), &[0x1010, 0x10fc, 0x3008]);
        assert_eq!(report.bytes_scanned, 0x140);
        assert_eq!(report.total_bytes, 0x140);
        assert_eq!(scanner.value_kind(), Some(ValueKind::U32));
        assert!(scanner
            .match_entries()
            .all(|m| m.kind == ValueKind::U32));
    }

    #[test]
    fn progress_is_reported_per_region() {
        let mut scanner = scanner(two_regions(), 0x1000);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        scanner.set_progress_callback(move |done, total| sink.lock().unwrap().push((done, total)));

        scanner.scan(0x1234u32).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(0x100, 0x140), (0x140, 0x140)]);
    }

    #[test]
    fn regions_are_read_in_bounded_chunks() {
        let process = FakeProcess::with_region(0x1000, vec![0; 0x100]);
        let mut scanner = scanner(process, 0x40);

        scanner.scan(1u32).unwrap();

        assert_eq!(
            scanner.process().unwrap().reads(),
            vec![(0x1000, 0x40), (0x1040, 0x40), (0x1080, 0x40), (0x10c0, 0x40)]
        );
    }

    #[test]
    fn short_region_yields_only_whole_elements() {
        let mut bytes = vec![0xffu8; 10];
        put(&mut bytes, 0, 7u64);
        let process = FakeProcess::with_region(0x2000, bytes);
        let mut scanner = scanner(process, 0x1000);

        scanner.scan(7u64).unwrap();

        assert_eq!(scanner.matches(), &[0x2000]);
        assert_eq!(scanner.process().unwrap().reads(), vec![(0x2000, 8)]);
    }

    #[test]
    fn region_smaller_than_element_is_not_read() {
        let process = FakeProcess::with_region(0x2000, vec![0; 6]);
        let mut scanner = scanner(process, 0x1000);

        let report = scanner.scan(0u64).unwrap();

        assert_eq!(report.matches, 0);
        assert!(scanner.process().unwrap().reads().is_empty());
    }

    #[test]
    fn failed_chunk_keeps_earlier_matches_and_skips_rest_of_region() {
        let mut first = vec![0u8; 0x100];
        put(&mut first, 0x10, 9u32);
        put(&mut first, 0x90, 9u32);
        let mut second = vec![0u8; 0x10];
        put(&mut second, 0x4, 9u32);
        let process = FakeProcess::new()
            .region(0x1000, RW, first)
            .region(0x2000, RW, second)
            .fail_reads_at(0x1080);
        let mut scanner = scanner(process, 0x40);

        let report = scanner.scan(9u32).unwrap();

        assert_eq!(scanner.matches(), &[0x1010, 0x2004]);
        assert_eq!(report.skipped_regions, 1);
        assert!(!scanner.process().unwrap().reads().contains(&(0x10c0, 0x40)));
    }

    #[test]
    fn unreadable_and_executable_regions_are_left_out() {
        let mut data = vec![0u8; 0x10];
        put(&mut data, 0, 5u32);
        let process = FakeProcess::new()
            .region(0x1000, Permissions::WRITE, data.clone())
            .region(0x2000, Permissions::READ | Permissions::EXECUTE, data.clone())
            .region(0x3000, RW, data);
        let mut scanner = scanner(process, 0x1000);

        scanner.scan(5u32).unwrap();
        assert_eq!(scanner.matches(), &[0x3000]);

        scanner.reset();
        scanner.set_include_executable(true).unwrap();
        scanner.scan(5u32).unwrap();
        assert_eq!(scanner.matches(), &[0x2000, 0x3000]);
    }

    #[test]
    fn refine_drops_changed_values_and_keeps_order() {
        let mut scanner = scanner(two_regions(), 0x1000);
        scanner.scan(0x1234u32).unwrap();

        scanner.process().unwrap().poke(0x10fc, &0x5678u32.to_ne_bytes());
        scanner.process().unwrap().clear_reads();
        let report = scanner.scan(0x1234u32).unwrap();

        assert_eq!(report.mode, ScanMode::Refine);
        assert_eq!(scanner.matches(), &[0x1010, 0x3008]);
        assert_eq!(
            scanner.process().unwrap().reads(),
            vec![(0x1010, 4), (0x10fc, 4), (0x3008, 4)]
        );
    }

    #[test]
    fn refine_drops_unreadable_addresses() {
        let process = two_regions().fail_reads_at(0x3008);
        let mut scanner = scanner(process, 0x1000);
        scanner.scan(0x1234u32).unwrap();
        assert_eq!(scanner.matches().len(), 3);

        let report = scanner.scan(0x1234u32).unwrap();

        assert_eq!(report.matches, 2);
        assert_eq!(scanner.matches(), &[0x1010, 0x10fc]);
    }

    #[test]
    fn refine_to_nothing_returns_to_initial_mode() {
        let mut scanner = scanner(two_regions(), 0x1000);
        scanner.scan(0x1234u32).unwrap();

        scanner.scan(0x9999u32).unwrap();
        assert!(scanner.matches().is_empty());
        assert_eq!(scanner.value_kind(), None);

        let report = scanner.scan(0x1234u32).unwrap();
        assert_eq!(report.mode, ScanMode::Initial);
        assert_eq!(scanner.matches().len(), 3);
    }

    #[test]
    fn changing_kind_requires_reset() {
        let mut scanner = scanner(two_regions(), 0x1000);
        scanner.scan(0x1234u32).unwrap();

        let err = scanner.scan(0x1234u64).unwrap_err();
        assert!(matches!(err, ScanError::InvalidState(_)));
        assert_eq!(scanner.matches().len(), 3);

        scanner.reset();
        assert!(scanner.scan(0x1234u16).is_ok());
    }

    #[test]
    fn busy_scanner_rejects_scans() {
        let mut scanner = scanner(two_regions(), 0x1000);
        scanner.busy.store(true, Ordering::Release);

        assert!(matches!(scanner.scan(1u32), Err(ScanError::InvalidState(_))));
        assert!(scanner.process().unwrap().reads().is_empty());
    }

    #[test]
    fn busy_flag_is_cleared_after_scans() {
        let mut scanner = scanner(two_regions().detached(), 0x1000);
        let handle = scanner.handle();

        assert!(scanner.scan(1u32).is_err());
        assert!(!handle.is_scanning());
    }

    #[test]
    fn busy_flag_is_visible_during_scan() {
        let mut scanner = scanner(two_regions(), 0x1000);
        let handle = scanner.handle();
        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&observed);
        scanner.set_progress_callback(move |_, _| sink.lock().unwrap().push(handle.is_scanning()));

        scanner.scan(0x1234u32).unwrap();

        assert_eq!(*observed.lock().unwrap(), vec![true, true]);
        assert!(!scanner.is_scanning());
    }

    #[test]
    fn scanning_requires_a_process() {
        let mut scanner: Scanner<FakeProcess> = Scanner::default();

        assert!(matches!(scanner.scan(1u8), Err(ScanError::InvalidState(_))));
        assert!(matches!(scanner.read(0x1000, 4), Err(ScanError::InvalidState(_))));
    }

    #[test]
    fn attach_failure_aborts_the_scan() {
        let mut scanner = scanner(two_regions().detached(), 0x1000);

        assert!(matches!(scanner.scan(0x1234u32), Err(ScanError::Attach(_))));
        assert!(scanner.matches().is_empty());
    }

    #[test]
    fn cancel_stops_between_regions() {
        let mut scanner = scanner(two_regions(), 0x1000);
        let handle = scanner.handle();
        scanner.set_progress_callback(move |_, _| handle.cancel());

        let report = scanner.scan(0x1234u32).unwrap();

        assert!(report.cancelled);
        assert_eq!(scanner.matches(), &[0x1010, 0x10fc]);
        assert_eq!(report.bytes_scanned, 0x100);
    }

    #[test]
    fn floats_narrow_within_epsilon() {
        let mut bytes = vec![0u8; 0x20];
        put(&mut bytes, 0x0, 3.5f32);
        put(&mut bytes, 0x8, 3.500_001f32);
        put(&mut bytes, 0x10, 7.0f32);
        let mut scanner = scanner(FakeProcess::with_region(0x4000, bytes), 0x1000);
        scanner.set_epsilon(1e-3).unwrap();

        scanner.scan(3.5f32).unwrap();
        assert_eq!(scanner.matches(), &[0x4000, 0x4008]);

        scanner.process().unwrap().poke(0x4008, &3.6f32.to_ne_bytes());
        scanner.scan(3.5f32).unwrap();
        assert_eq!(scanner.matches(), &[0x4000]);
    }

    #[test]
    fn scan_value_dispatches_on_kind() {
        let mut scanner = scanner(two_regions(), 0x1000);

        scanner.scan_value(ScanValue::parse(ValueKind::U32, "0x1234").unwrap()).unwrap();

        assert_eq!(scanner.matches().len(), 3);
        assert_eq!(
            scanner.read_scan_value(0x3008, ValueKind::U32).unwrap(),
            ScanValue::U32(0x1234)
        );
    }

    #[test]
    fn configuration_is_validated() {
        let mut scanner = scanner(two_regions(), 0x1000);

        assert!(matches!(scanner.set_max_read_size(4), Err(ScanError::Config(_))));
        assert!(matches!(scanner.set_epsilon(-1.0), Err(ScanError::Config(_))));
        assert!(Scanner::<FakeProcess>::new(ScanConfig {
            max_read_size: 0,
            ..ScanConfig::default()
        })
        .is_err());
        assert_eq!(scanner.config().max_read_size, 0x1000);
    }

    #[test]
    fn reads_and_writes_go_through_the_process() {
        let scanner = scanner(two_regions(), 0x10);

        scanner.write_scan_value(0x1020, ScanValue::U16(0xbeef)).unwrap();
        assert_eq!(scanner.read_value::<u16>(0x1020).unwrap(), 0xbeef);
        scanner.write_value(0x1030, -2.5f64).unwrap();
        assert_eq!(scanner.read_value::<f64>(0x1030).unwrap(), -2.5);

        let data = scanner.read(0x1000, 0x25).unwrap();
        assert_eq!(data.len(), 0x25);
        assert_eq!(&data[0x20..0x22], &0xbeefu16.to_ne_bytes());

        assert!(matches!(
            scanner.write(0x1000, &[0; 0x11]),
            Err(ScanError::Write(WriteMemoryError::TooLarge { .. }))
        ));
    }

    #[test]
    fn huge_reads_are_errors() {
        let scanner = scanner(two_regions(), 0x1000);

        assert!(matches!(
            scanner.read(0x1000, usize::MAX),
            Err(ScanError::Read(ReadMemoryError::OutOfRange { .. }))
        ));
        assert!(scanner.process().unwrap().reads().is_empty());

        let mut live: Scanner = Scanner::default();
        assert!(live.attach(std::process::id() as i32));
        assert!(matches!(
            live.read(0x1000, usize::MAX),
            Err(ScanError::Read(ReadMemoryError::OutOfRange { .. }))
        ));
        assert!(matches!(
            live.read(0, usize::MAX),
            Err(ScanError::Read(ReadMemoryError::Allocation { .. }))
        ));
    }

    #[test]
    fn reattach_clears_matches() {
        let mut scanner = scanner(two_regions(), 0x1000);
        scanner.scan(0x1234u32).unwrap();

        scanner.attach_process(two_regions());

        assert!(scanner.matches().is_empty());
        assert_eq!(scanner.value_kind(), None);
    }

    proptest! {
        #[test]
        fn refining_never_adds_matches(
            values in proptest::collection::vec(0u32..4, 1..256),
            changes in proptest::collection::vec((0usize..256, 0u32..4), 0..64),
            target in 0u32..4,
        ) {
            let mut bytes = vec![0u8; values.len() * 4];
            for (i, value) in values.iter().enumerate() {
                put(&mut bytes, i * 4, *value);
            }
            let mut scanner = scanner(FakeProcess::with_region(0x10000, bytes), 0x40);

            scanner.scan(target).unwrap();
            let before = scanner.matches().to_vec();

            for (index, value) in changes {
                let index = index % values.len();
                scanner.process().unwrap().poke(0x10000 + index * 4, &value.to_ne_bytes());
            }
            if !before.is_empty() {
                scanner.scan(target).unwrap();
            }
            let after = scanner.matches().to_vec();

            prop_assert!(after.iter().all(|address| before.contains(address)));
            prop_assert!(after.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
