// Progress and serving counters: download/extract progress for the host UI, request counts for diagnostics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    Idle,
    ResolvingManifest,
    Downloading,
    Extracting,
    Swapping,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub phase: UpdatePhase,
    pub downloaded_bytes: u64,
    /// Announced archive size, when the host sent one.
    pub total_bytes: Option<u64>,
    pub extracted_entries: u64,
    pub total_entries: u64,
    /// Percentage of the current phase, when computable.
    pub percent: Option<u8>,
    pub error: Option<String>,
}

struct PhaseState {
    phase: UpdatePhase,
    total_bytes: Option<u64>,
    error: Option<String>,
}

pub struct UpdateProgress {
    downloaded_bytes: AtomicU64,
    extracted_entries: AtomicU64,
    total_entries: AtomicU64,
    state: Mutex<PhaseState>,
}

impl UpdateProgress {
    pub fn new() -> Self {
        Self {
            downloaded_bytes: AtomicU64::new(0),
            extracted_entries: AtomicU64::new(0),
            total_entries: AtomicU64::new(0),
            state: Mutex::new(PhaseState {
                phase: UpdatePhase::Idle,
                total_bytes: None,
                error: None,
            }),
        }
    }

    /// Clear all counters for a new update run.
    pub fn reset(&self) {
        self.downloaded_bytes.store(0, Ordering::Relaxed);
        self.extracted_entries.store(0, Ordering::Relaxed);
        self.total_entries.store(0, Ordering::Relaxed);
        let mut state = self.state.lock();
        state.phase = UpdatePhase::Idle;
        state.total_bytes = None;
        state.error = None;
    }

    pub fn set_phase(&self, phase: UpdatePhase) {
        self.state.lock().phase = phase;
    }

    pub fn begin_download(&self, total_bytes: Option<u64>) {
        let mut state = self.state.lock();
        state.phase = UpdatePhase::Downloading;
        state.total_bytes = total_bytes;
    }

    pub fn record_downloaded(&self, bytes: u64) {
        self.downloaded_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn begin_extract(&self, total_entries: u64) {
        self.total_entries.store(total_entries, Ordering::Relaxed);
        self.extracted_entries.store(0, Ordering::Relaxed);
        self.set_phase(UpdatePhase::Extracting);
    }

    pub fn record_extracted(&self) {
        self.extracted_entries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fail(&self, message: String) {
        let mut state = self.state.lock();
        state.phase = UpdatePhase::Failed;
        state.error = Some(message);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let downloaded = self.downloaded_bytes.load(Ordering::Relaxed);
        let extracted = self.extracted_entries.load(Ordering::Relaxed);
        let total_entries = self.total_entries.load(Ordering::Relaxed);
        let state = self.state.lock();

        let percent = match state.phase {
            UpdatePhase::Downloading => state
                .total_bytes
                .filter(|t| *t > 0)
                .map(|t| ((downloaded.min(t) * 100) / t) as u8),
            UpdatePhase::Extracting if total_entries > 0 => {
                Some(((extracted.min(total_entries) * 100) / total_entries) as u8)
            }
            UpdatePhase::Swapping | UpdatePhase::Done => Some(100),
            _ => None,
        };

        ProgressSnapshot {
            phase: state.phase,
            downloaded_bytes: downloaded,
            total_bytes: state.total_bytes,
            extracted_entries: extracted,
            total_entries,
            percent,
            error: state.error.clone(),
        }
    }
}

impl Default for UpdateProgress {
    fn default() -> Self {
        Self::new()
    }
}

struct ServeSample {
    at: Instant,
    bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ServeSnapshot {
    pub requests: u64,
    pub bytes_served: u64,
    pub not_found: u64,
    pub errors: u64,
    pub serve_bps: u64,
}

pub struct ServeStats {
    requests: AtomicU64,
    bytes_served: AtomicU64,
    not_found: AtomicU64,
    errors: AtomicU64,
    last_sample: Mutex<ServeSample>,
}

impl ServeStats {
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            bytes_served: AtomicU64::new(0),
            not_found: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_sample: Mutex::new(ServeSample {
                at: Instant::now(),
                bytes: 0,
            }),
        }
    }

    /// A file was found and its body handed to the connection.
    pub fn record_served(&self, bytes: u64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.bytes_served.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_not_found(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ServeSnapshot {
        let now = Instant::now();
        let current = self.bytes_served.load(Ordering::Relaxed);

        let serve_bps = {
            let mut sample = self.last_sample.lock();
            let elapsed = now.duration_since(sample.at).as_secs_f64();
            let bps = if elapsed > 0.1 {
                ((current - sample.bytes) as f64 / elapsed) as u64
            } else {
                0
            };
            sample.at = now;
            sample.bytes = current;
            bps
        };

        ServeSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            bytes_served: current,
            not_found: self.not_found.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            serve_bps,
        }
    }
}

impl Default for ServeStats {
    fn default() -> Self {
        Self::new()
    }
}
