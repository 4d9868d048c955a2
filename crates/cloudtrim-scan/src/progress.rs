//! Scan progress reporting.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

/// Terminal snapshots older than this are reported as idle.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// A snapshot is pushed to subscribers every this many classified files.
pub const PROGRESS_INTERVAL: u64 = 100;

const CHANNEL_SIZE: usize = 100;

/// Phase of the scan lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    /// No scan has run recently.
    Idle,
    /// A scan was accepted and is validating its root.
    Initializing,
    /// Counting files to estimate the total.
    Estimating,
    /// Walking and classifying files.
    Scanning,
    /// The last scan finished successfully.
    Complete,
    /// The last scan failed.
    Failed,
}

impl ScanPhase {
    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Initializing => "Initializing",
            Self::Estimating => "Estimating total files...",
            Self::Scanning => "Scanning",
            Self::Complete => "Scan complete",
            Self::Failed => "Scan failed",
        }
    }

    /// Whether a scan has finished in this phase.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// Progress information for the current or last scan.
#[derive(Debug, Clone)]
pub struct ScanProgress {
    /// Lifecycle phase.
    pub phase: ScanPhase,
    /// Human-readable status line.
    pub status: String,
    /// Number of files classified so far.
    pub files_processed: u64,
    /// Estimated number of files in the scan. Never below `files_processed`.
    pub total_estimate: u64,
    /// Last file touched by a worker.
    pub current_path: PathBuf,
    /// Completion percentage in [0, 100].
    pub progress_percent: f64,
    /// Non-fatal warnings encountered so far.
    pub warnings_count: u64,
    /// Failure reason for failed scans.
    pub error: Option<String>,
    /// Time elapsed since the scan started.
    pub elapsed: Duration,
}

impl ScanProgress {
    /// Quiescent snapshot reported when no scan is running.
    pub fn idle() -> Self {
        Self {
            phase: ScanPhase::Idle,
            status: ScanPhase::Idle.label().to_string(),
            files_processed: 0,
            total_estimate: 0,
            current_path: PathBuf::new(),
            progress_percent: 0.0,
            warnings_count: 0,
            error: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Whether a scan is running.
    pub fn is_active(&self) -> bool {
        !self.phase.is_terminal() && self.phase != ScanPhase::Idle
    }

    /// Calculate scan rate in files per second.
    pub fn files_per_second(&self) -> f64 {
        if self.elapsed.as_secs_f64() > 0.0 {
            self.files_processed as f64 / self.elapsed.as_secs_f64()
        } else {
            0.0
        }
    }
}

impl Default for ScanProgress {
    fn default() -> Self {
        Self::idle()
    }
}

#[derive(Debug)]
struct PhaseState {
    phase: ScanPhase,
    error: Option<String>,
    started: Option<Instant>,
    finished: Option<Instant>,
}

/// Shared progress state written by the coordinator and its workers.
///
/// Counters are atomics so concurrent workers never lose updates; the phase
/// and current path sit behind short-lived locks.
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    state: Mutex<PhaseState>,
    current_path: Mutex<PathBuf>,
    files_processed: AtomicU64,
    total_estimate: AtomicU64,
    warnings: AtomicU64,
    idle_timeout: Duration,
    tx: broadcast::Sender<ScanProgress>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProgressTracker {
    pub fn new(idle_timeout: Duration) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_SIZE);
        Self {
            state: Mutex::new(PhaseState {
                phase: ScanPhase::Idle,
                error: None,
                started: None,
                finished: None,
            }),
            current_path: Mutex::new(PathBuf::new()),
            files_processed: AtomicU64::new(0),
            total_estimate: AtomicU64::new(0),
            warnings: AtomicU64::new(0),
            idle_timeout,
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanProgress> {
        self.tx.subscribe()
    }

    /// Zero everything and enter `Initializing`.
    pub fn reset(&self) {
        {
            let mut state = lock(&self.state);
            state.phase = ScanPhase::Initializing;
            state.error = None;
            state.started = Some(Instant::now());
            state.finished = None;
        }
        self.files_processed.store(0, Ordering::SeqCst);
        self.total_estimate.store(0, Ordering::SeqCst);
        self.warnings.store(0, Ordering::SeqCst);
        lock(&self.current_path).clear();
        self.publish();
    }

    pub fn set_phase(&self, phase: ScanPhase) {
        lock(&self.state).phase = phase;
        self.publish();
    }

    pub fn set_current_path(&self, path: &Path) {
        *lock(&self.current_path) = path.to_path_buf();
    }

    pub fn set_estimate(&self, estimate: u64) {
        self.total_estimate.fetch_max(estimate, Ordering::SeqCst);
    }

    /// Count one classified file. Returns the new count.
    pub fn record_file(&self, path: &Path) -> u64 {
        let count = self.files_processed.fetch_add(1, Ordering::SeqCst) + 1;
        self.total_estimate.fetch_max(count, Ordering::SeqCst);
        self.set_current_path(path);
        if count % PROGRESS_INTERVAL == 0 {
            self.publish();
        }
        count
    }

    pub fn record_warning(&self) {
        self.warnings.fetch_add(1, Ordering::SeqCst);
    }

    /// Enter `Complete`, pinning the counters to the final file count.
    pub fn complete(&self, total_files: u64) {
        self.files_processed.store(total_files, Ordering::SeqCst);
        self.total_estimate.store(total_files, Ordering::SeqCst);
        self.finish(ScanPhase::Complete, None);
    }

    pub fn fail(&self, message: impl Into<String>) {
        self.finish(ScanPhase::Failed, Some(message.into()));
    }

    fn finish(&self, phase: ScanPhase, error: Option<String>) {
        {
            let mut state = lock(&self.state);
            state.phase = phase;
            state.error = error;
            state.finished = Some(Instant::now());
        }
        self.publish();
    }

    fn publish(&self) {
        if self.tx.receiver_count() > 0 {
            let _ = self.tx.send(self.snapshot());
        }
    }

    pub fn snapshot(&self) -> ScanProgress {
        let (phase, error, elapsed) = {
            let state = lock(&self.state);
            if state.phase.is_terminal()
                && state
                    .finished
                    .is_some_and(|at| at.elapsed() > self.idle_timeout)
            {
                return ScanProgress::idle();
            }
            let elapsed = match (state.started, state.finished) {
                (Some(start), Some(end)) => end.duration_since(start),
                (Some(start), None) => start.elapsed(),
                _ => Duration::ZERO,
            };
            (state.phase, state.error.clone(), elapsed)
        };

        let files_processed = self.files_processed.load(Ordering::SeqCst);
        let total_estimate = self
            .total_estimate
            .load(Ordering::SeqCst)
            .max(files_processed);

        let progress_percent = match phase {
            ScanPhase::Complete => 100.0,
            ScanPhase::Idle | ScanPhase::Initializing | ScanPhase::Estimating => 0.0,
            _ if total_estimate == 0 => 0.0,
            // Capped below 100 until the coordinator declares completion
            _ => (files_processed as f64 / total_estimate as f64 * 100.0).clamp(0.0, 99.0),
        };

        let status = match phase {
            ScanPhase::Scanning => {
                format!("Processing file {files_processed} of ~{total_estimate}")
            }
            other => other.label().to_string(),
        };

        ScanProgress {
            phase,
            status,
            files_processed,
            total_estimate,
            current_path: lock(&self.current_path).clone(),
            progress_percent,
            warnings_count: self.warnings.load(Ordering::SeqCst),
            error,
            elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fresh_tracker_is_idle() {
        let tracker = ProgressTracker::new(DEFAULT_IDLE_TIMEOUT);
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.phase, ScanPhase::Idle);
        assert_eq!(snapshot.status, "Idle");
        assert_eq!(snapshot.progress_percent, 0.0);
        assert_eq!(snapshot.files_per_second(), 0.0);
    }

    #[test]
    fn test_files_per_second() {
        let snapshot = ScanProgress {
            files_processed: 300,
            elapsed: Duration::from_secs(2),
            ..ScanProgress::idle()
        };
        assert_eq!(snapshot.files_per_second(), 150.0);
    }

    #[test]
    fn test_lifecycle() {
        let tracker = ProgressTracker::new(DEFAULT_IDLE_TIMEOUT);
        tracker.reset();
        assert_eq!(tracker.snapshot().status, "Initializing");

        tracker.set_phase(ScanPhase::Scanning);
        tracker.set_estimate(10);
        for i in 0..5 {
            tracker.record_file(Path::new(&format!("/f{i}")));
        }
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.files_processed, 5);
        assert_eq!(snapshot.progress_percent, 50.0);
        assert_eq!(snapshot.current_path, PathBuf::from("/f4"));
        assert!(snapshot.status.contains("5 of ~10"));
        assert!(snapshot.is_active());

        tracker.complete(5);
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.status, "Scan complete");
        assert_eq!(snapshot.progress_percent, 100.0);
    }

    #[test]
    fn test_estimate_never_below_processed() {
        let tracker = ProgressTracker::new(DEFAULT_IDLE_TIMEOUT);
        tracker.reset();
        tracker.set_phase(ScanPhase::Scanning);
        tracker.set_estimate(2);
        for i in 0..4 {
            tracker.record_file(Path::new(&format!("/f{i}")));
        }
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.total_estimate, 4);
        assert!(snapshot.progress_percent <= 99.0);
    }

    #[test]
    fn test_failure() {
        let tracker = ProgressTracker::new(DEFAULT_IDLE_TIMEOUT);
        tracker.reset();
        tracker.fail("root vanished");
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.phase, ScanPhase::Failed);
        assert_eq!(snapshot.status, "Scan failed");
        assert_eq!(snapshot.error.as_deref(), Some("root vanished"));
    }

    #[test]
    fn test_stale_terminal_state_reads_idle() {
        let tracker = ProgressTracker::new(Duration::ZERO);
        tracker.reset();
        tracker.complete(3);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(tracker.snapshot().phase, ScanPhase::Idle);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let tracker = Arc::new(ProgressTracker::new(DEFAULT_IDLE_TIMEOUT));
        tracker.reset();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        tracker.record_file(Path::new(&format!("/t{t}/f{i}")));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tracker.snapshot().files_processed, 4000);
    }

    #[test]
    fn test_subscribers_receive_phase_changes() {
        let tracker = ProgressTracker::new(DEFAULT_IDLE_TIMEOUT);
        let mut rx = tracker.subscribe();
        tracker.reset();
        tracker.complete(0);

        assert_eq!(rx.try_recv().unwrap().phase, ScanPhase::Initializing);
        assert_eq!(rx.try_recv().unwrap().phase, ScanPhase::Complete);
    }
}
