//! Scan coordinator: owns progress and cache, runs one scan at a time.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{info, warn};

use cloudtrim_core::{AttributeProbe, ScanConfig, ScanError, ScanResult};

use crate::cache::{CacheKey, DEFAULT_CACHE_TTL, ScanCache};
use crate::classify::ClassificationPool;
use crate::progress::{DEFAULT_IDLE_TIMEOUT, ProgressTracker, ScanPhase, ScanProgress};
use crate::walker::{ESTIMATE_CAP, Walker};

/// Coordinator state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    /// No scan in flight; the cache may serve results.
    Idle,
    /// A scan of `root` is running.
    Scanning { root: PathBuf },
}

/// Runs scans and owns the shared progress and cache state.
///
/// Only one scan runs at a time. A request arriving while a scan is in
/// flight is rejected with [`ScanError::Busy`].
pub struct ScanEngine {
    probe: Arc<dyn AttributeProbe>,
    cache: ScanCache,
    progress: Arc<ProgressTracker>,
    state: Mutex<EngineState>,
}

/// Returns the engine to `Idle` when dropped, including on unwind.
struct ScanGuard<'a> {
    state: &'a Mutex<EngineState>,
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        *lock(self.state) = EngineState::Idle;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScanEngine {
    /// Create an engine using `probe` with the default cache TTL.
    pub fn new(probe: Arc<dyn AttributeProbe>) -> Self {
        Self {
            probe,
            cache: ScanCache::new(Some(DEFAULT_CACHE_TTL)),
            progress: Arc::new(ProgressTracker::new(DEFAULT_IDLE_TIMEOUT)),
            state: Mutex::new(EngineState::Idle),
        }
    }

    /// Set how long cached results stay fresh (None = until invalidated).
    pub fn with_cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.cache = ScanCache::new(ttl);
        self
    }

    /// Set how long a finished scan's progress stays visible before reading idle.
    pub fn with_progress_idle_timeout(mut self, timeout: Duration) -> Self {
        self.progress = Arc::new(ProgressTracker::new(timeout));
        self
    }

    /// The attribute probe used for classification.
    pub fn probe(&self) -> Arc<dyn AttributeProbe> {
        Arc::clone(&self.probe)
    }

    /// Shared handle to the scan cache.
    pub fn cache(&self) -> &ScanCache {
        &self.cache
    }

    /// Subscribe to pushed progress snapshots.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanProgress> {
        self.progress.subscribe()
    }

    /// Snapshot of the current or last scan. Safe to call at any time.
    pub fn poll_progress(&self) -> ScanProgress {
        self.progress.snapshot()
    }

    /// Current coordinator state.
    pub fn state(&self) -> EngineState {
        lock(&self.state).clone()
    }

    /// The last completed result, fresh or not.
    pub fn cached(&self) -> Option<ScanResult> {
        self.cache.snapshot()
    }

    /// Force the next scan to run even without `force_rescan`.
    pub fn invalidate_cache(&self) {
        self.cache.invalidate();
    }

    fn enter(&self, root: &std::path::Path) -> Result<ScanGuard<'_>, ScanError> {
        let mut state = lock(&self.state);
        if let EngineState::Scanning { root } = &*state {
            return Err(ScanError::Busy { root: root.clone() });
        }
        *state = EngineState::Scanning {
            root: root.to_path_buf(),
        };
        Ok(ScanGuard { state: &self.state })
    }

    /// Scan `config.root`, or serve a fresh cached result.
    ///
    /// Fatal errors leave the cache untouched; the previous result stays
    /// available through [`cached`](Self::cached).
    pub fn start_scan(&self, config: &ScanConfig) -> Result<ScanResult, ScanError> {
        let _guard = self.enter(&config.root)?;
        self.progress.reset();

        let outcome = self.run(config);
        match &outcome {
            Ok(result) => self.progress.complete(result.stats.total_files),
            Err(err) => {
                warn!(root = %config.root.display(), error = %err, "scan failed");
                self.progress.fail(err.to_string());
            }
        }
        outcome
    }

    fn run(&self, config: &ScanConfig) -> Result<ScanResult, ScanError> {
        if config.max_workers == 0 {
            return Err(ScanError::InvalidConfig {
                message: "max_workers must be at least 1".into(),
            });
        }

        let root = config
            .root
            .canonicalize()
            .map_err(|e| ScanError::io(&config.root, e))?;
        if !root.is_dir() {
            return Err(ScanError::NotADirectory { path: root });
        }
        // The walker only reports errors below the root
        std::fs::read_dir(&root).map_err(|e| ScanError::io(&root, e))?;

        let key = CacheKey::new(&root, config.max_depth);
        if !config.force_rescan {
            if let Some(cached) = self.cache.get_fresh(&key) {
                info!(root = %root.display(), files = cached.stats.total_files, "serving cached scan");
                return Ok(cached);
            }
        }

        let start = Instant::now();
        let walker = Walker::from_config(&root, config)?;
        let pool = ClassificationPool::new(config.worker_count(), self.probe())?;

        self.progress.set_phase(ScanPhase::Estimating);
        self.progress.set_estimate(walker.estimate(ESTIMATE_CAP));

        self.progress.set_phase(ScanPhase::Scanning);
        info!(
            root = %root.display(),
            max_depth = ?config.max_depth,
            workers = pool.workers(),
            "scan started"
        );
        let classified = pool.classify(&root, walker.walk(), &self.progress);

        let result = ScanResult::new(
            classified.records,
            root,
            config.max_depth,
            start.elapsed(),
            classified.warnings,
        );
        debug_assert!(result.stats.is_consistent());

        info!(
            total = result.stats.total_files,
            local = result.stats.local_files,
            remote = result.stats.remote_files,
            local_size = %result.stats.human_local_size,
            warnings = result.warnings.len(),
            elapsed_ms = result.scan_duration.as_millis() as u64,
            "scan complete"
        );

        self.cache.store(result.clone());
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use cloudtrim_core::MemoryProbe;
    use tempfile::TempDir;

    #[test]
    fn test_idle_engine() {
        let engine = ScanEngine::new(Arc::new(MemoryProbe::new()));
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.poll_progress().phase, ScanPhase::Idle);
        assert!(engine.cached().is_none());
    }

    #[test]
    fn test_busy_guard() {
        let engine = ScanEngine::new(Arc::new(MemoryProbe::new()));
        let guard = engine.enter(std::path::Path::new("/cloud")).unwrap();
        assert!(matches!(
            engine.state(),
            EngineState::Scanning { .. }
        ));

        let err = engine
            .start_scan(&ScanConfig::new("/cloud"))
            .unwrap_err();
        assert!(err.is_busy());

        drop(guard);
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn test_scan_returns_to_idle() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "abc").unwrap();

        let engine = ScanEngine::new(Arc::new(MemoryProbe::new()));
        let result = engine.start_scan(&ScanConfig::new(temp.path())).unwrap();

        assert_eq!(result.stats.total_files, 1);
        assert_eq!(engine.state(), EngineState::Idle);
        let progress = engine.poll_progress();
        assert_eq!(progress.phase, ScanPhase::Complete);
        assert_eq!(progress.files_processed, 1);
        assert_eq!(progress.progress_percent, 100.0);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let temp = TempDir::new().unwrap();
        let engine = ScanEngine::new(Arc::new(MemoryProbe::new()));
        let mut config = ScanConfig::new(temp.path());
        config.max_workers = 0;

        let err = engine.start_scan(&config).unwrap_err();
        assert!(matches!(err, ScanError::InvalidConfig { .. }));
        assert_eq!(engine.poll_progress().phase, ScanPhase::Failed);
    }
}
