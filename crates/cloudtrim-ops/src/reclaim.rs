//! Reclaiming local space by converting files into placeholders.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use cloudtrim_core::{AttributeProbe, FileStatus, ProbeError, format_size};
use cloudtrim_scan::{Claim, ScanCache, ScanEngine};

use crate::progress::ReclaimProgress;

/// Default wait between state changes and re-probing them.
pub const DEFAULT_VERIFY_DELAY: Duration = Duration::from_secs(2);

const NOT_FOUND: &str = "File not found";
const STILL_LOCAL: &str = "State change was accepted but the file is still local";

/// Reclamation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimConfig {
    /// Re-probe reclaimed files once the batch is done.
    pub verify: bool,
    /// How long to wait before re-probing.
    pub verify_delay: Duration,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            verify: true,
            verify_delay: DEFAULT_VERIFY_DELAY,
        }
    }
}

impl ReclaimConfig {
    /// Skip verification entirely.
    pub fn without_verification() -> Self {
        Self {
            verify: false,
            ..Self::default()
        }
    }

    /// Verify after `delay`.
    pub fn with_verify_delay(delay: Duration) -> Self {
        Self {
            verify: true,
            verify_delay: delay,
        }
    }
}

/// Outcome of reclaiming one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReclaimOutcome {
    /// The state change was accepted; `bytes` were freed.
    Reclaimed { bytes: u64 },
    /// Nothing to do, the file is already a placeholder.
    AlreadyCloudOnly,
    /// Another reclamation of the same file is in flight.
    InProgress,
    /// The state change failed; nothing was modified.
    Failed { reason: String },
}

impl ReclaimOutcome {
    fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Whether the file ends up (or already was) cloud-only.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Reclaimed { .. } | Self::AlreadyCloudOnly)
    }

    /// Whether the path was skipped because it is already being reclaimed.
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::InProgress)
    }

    /// Human-readable description.
    pub fn message(&self) -> String {
        match self {
            Self::Reclaimed { .. } => "Successfully made file cloud-only".into(),
            Self::AlreadyCloudOnly => "File is already cloud-only".into(),
            Self::InProgress => "Reclamation already in progress".into(),
            Self::Failed { reason } => reason.clone(),
        }
    }
}

/// Per-path entry of a batch report.
#[derive(Debug, Clone, Serialize)]
pub struct ReclaimEntry {
    pub path: PathBuf,
    pub success: bool,
    pub message: String,
    pub outcome: ReclaimOutcome,
    /// Re-probed state: `Some(true)` confirmed cloud-only, `Some(false)`
    /// still local, `None` when not verified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    /// Set when verification disagreed or could not run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl ReclaimEntry {
    pub(crate) fn new(path: PathBuf, outcome: ReclaimOutcome) -> Self {
        Self {
            path,
            success: outcome.is_success(),
            message: outcome.message(),
            outcome,
            verified: None,
            warning: None,
        }
    }

    /// Bytes this entry freed, discounting changes verification disproved.
    pub fn bytes_reclaimed(&self) -> u64 {
        match (&self.outcome, self.verified) {
            (_, Some(false)) => 0,
            (ReclaimOutcome::Reclaimed { bytes }, _) => *bytes,
            _ => 0,
        }
    }
}

/// Result of reclaiming a batch of paths.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub results: Vec<ReclaimEntry>,
    pub succeeded: usize,
    pub failed: usize,
    /// Paths skipped because a reclamation was already running.
    pub skipped: usize,
    pub bytes_reclaimed: u64,
}

impl BatchReport {
    /// Tally a list of finished entries.
    pub fn from_entries(results: Vec<ReclaimEntry>) -> Self {
        let succeeded = results.iter().filter(|e| e.success).count();
        let skipped = results.iter().filter(|e| e.outcome.is_skipped()).count();
        let failed = results.len() - succeeded - skipped;
        let bytes_reclaimed = results.iter().map(ReclaimEntry::bytes_reclaimed).sum();
        Self {
            results,
            succeeded,
            failed,
            skipped,
            bytes_reclaimed,
        }
    }

    /// At least one path succeeded.
    pub fn success(&self) -> bool {
        self.succeeded > 0
    }

    /// Entries that carry a verification warning.
    pub fn warnings(&self) -> impl Iterator<Item = &ReclaimEntry> {
        self.results.iter().filter(|e| e.warning.is_some())
    }

    /// Get a human-readable summary of the batch.
    pub fn summary(&self) -> String {
        let freed = format_size(self.bytes_reclaimed);
        if self.failed == 0 {
            format!("Reclaimed {} files, freed {}", self.succeeded, freed)
        } else {
            format!(
                "Reclaimed {} files, {} failed, freed {}",
                self.succeeded, self.failed, freed
            )
        }
    }
}

/// Response for a single-path request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReclaimResponse {
    pub success: bool,
    pub message: String,
    /// Re-probed state, when verification ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_cloud_only: Option<bool>,
}

/// Runs reclamations against a scan cache and an attribute probe.
#[derive(Clone)]
pub struct Reclaimer {
    cache: ScanCache,
    probe: Arc<dyn AttributeProbe>,
    config: ReclaimConfig,
}

impl std::fmt::Debug for Reclaimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reclaimer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reclaimer {
    /// Create a reclaimer with default settings.
    pub fn new(cache: ScanCache, probe: Arc<dyn AttributeProbe>) -> Self {
        Self {
            cache,
            probe,
            config: ReclaimConfig::default(),
        }
    }

    /// Share the cache and probe of `engine`.
    pub fn for_engine(engine: &ScanEngine) -> Self {
        Self::new(engine.cache().clone(), engine.probe())
    }

    /// Replace the settings.
    pub fn with_config(mut self, config: ReclaimConfig) -> Self {
        self.config = config;
        self
    }

    /// Current settings.
    pub fn config(&self) -> ReclaimConfig {
        self.config
    }

    /// The cache this reclaimer updates.
    pub fn cache(&self) -> &ScanCache {
        &self.cache
    }

    /// Convert one file into a placeholder, without verification.
    ///
    /// Tracked records are claimed atomically, so two callers on the same
    /// path never both reach the probe. Aggregates only change when the
    /// probe accepts the change.
    pub fn reclaim(&self, path: &Path) -> ReclaimOutcome {
        if !path.exists() {
            return ReclaimOutcome::failed(NOT_FOUND);
        }

        match self.cache.try_claim(path) {
            Claim::AlreadyCloudOnly => ReclaimOutcome::AlreadyCloudOnly,
            Claim::InProgress => ReclaimOutcome::InProgress,
            Claim::Claimed(guard) => {
                let size = guard.size();
                match self.probe.set_cloud_only(path) {
                    Ok(()) => {
                        if let Some(change) = guard.commit_cloud_only() {
                            debug!(path = %path.display(), from = %change.previous, "record marked cloud-only");
                        }
                        ReclaimOutcome::Reclaimed { bytes: size }
                    }
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "reclamation failed");
                        ReclaimOutcome::failed(err.to_string())
                    }
                }
            }
            Claim::Untracked => self.reclaim_untracked(path),
        }
    }

    fn reclaim_untracked(&self, path: &Path) -> ReclaimOutcome {
        if let Ok(true) = self.probe.is_cloud_only(path) {
            return ReclaimOutcome::AlreadyCloudOnly;
        }
        let bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        match self.probe.set_cloud_only(path) {
            Ok(()) => {
                debug!(path = %path.display(), "reclaimed file outside the cached scan");
                ReclaimOutcome::Reclaimed { bytes }
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "reclamation failed");
                ReclaimOutcome::failed(err.to_string())
            }
        }
    }

    /// Reclaim a single path, verifying it when enabled.
    pub fn reclaim_one(&self, path: &Path) -> ReclaimResponse {
        let report = self.reclaim_batch(&[path.to_path_buf()]);
        match report.results.into_iter().next() {
            Some(entry) => ReclaimResponse {
                success: entry.success,
                message: entry.warning.unwrap_or(entry.message),
                is_cloud_only: entry.verified,
            },
            None => ReclaimResponse {
                success: false,
                message: NOT_FOUND.into(),
                is_cloud_only: None,
            },
        }
    }

    /// Reclaim every path; one failure never stops the batch.
    pub fn reclaim_batch(&self, paths: &[PathBuf]) -> BatchReport {
        self.reclaim_batch_with(paths, |_| {})
    }

    /// Alias of [`reclaim_batch`](Self::reclaim_batch).
    pub fn reclaim_many(&self, paths: &[PathBuf]) -> BatchReport {
        self.reclaim_batch(paths)
    }

    /// Reclaim every path, calling `on_progress` after each one.
    pub fn reclaim_batch_with(
        &self,
        paths: &[PathBuf],
        mut on_progress: impl FnMut(&ReclaimProgress),
    ) -> BatchReport {
        let mut progress = ReclaimProgress::new(paths.len());
        let mut entries = Vec::with_capacity(paths.len());

        for path in paths {
            let entry = ReclaimEntry::new(path.clone(), self.reclaim(path));
            progress.record(&entry);
            on_progress(&progress);
            entries.push(entry);
        }

        if self.needs_verification(&entries) {
            std::thread::sleep(self.config.verify_delay);
            self.verify_entries(&mut entries);
        }

        self.finish(entries)
    }

    pub(crate) fn needs_verification(&self, entries: &[ReclaimEntry]) -> bool {
        self.config.verify
            && entries
                .iter()
                .any(|e| matches!(e.outcome, ReclaimOutcome::Reclaimed { .. }))
    }

    pub(crate) fn finish(&self, entries: Vec<ReclaimEntry>) -> BatchReport {
        let report = BatchReport::from_entries(entries);
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            freed = %format_size(report.bytes_reclaimed),
            "reclamation batch complete"
        );
        report
    }

    /// Re-probe every reclaimed entry and reconcile the cache with what the
    /// probe reports.
    pub fn verify_entries(&self, entries: &mut [ReclaimEntry]) {
        for entry in entries
            .iter_mut()
            .filter(|e| matches!(e.outcome, ReclaimOutcome::Reclaimed { .. }))
        {
            match self.verify_status(&entry.path) {
                Ok(status) => {
                    let cloud_only = status.is_cloud_only();
                    entry.verified = Some(cloud_only);
                    if !cloud_only {
                        entry.warning = Some(STILL_LOCAL.into());
                    }
                }
                Err(err) => {
                    warn!(path = %entry.path.display(), error = %err, "verification failed");
                    entry.warning = Some(format!("Could not verify: {err}"));
                }
            }
        }
    }

    /// Re-probe one path and reconcile its cached record.
    ///
    /// Never changes the file itself. Returns the observed status.
    pub fn verify_status(&self, path: &Path) -> Result<FileStatus, ProbeError> {
        if !path.exists() {
            return Err(ProbeError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let observed = FileStatus::from_cloud_only(self.probe.is_cloud_only(path)?);
        if let Some(change) = self.cache.set_status(path, observed) {
            warn!(
                path = %path.display(),
                cached = %change.previous,
                observed = %change.current,
                "cached status disagreed with the file, reconciled"
            );
        }
        Ok(observed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    use cloudtrim_core::MemoryProbe;
    use cloudtrim_scan::ScanConfig;
    use tempfile::TempDir;

    fn scanned(sizes: &[u64]) -> (TempDir, Arc<MemoryProbe>, ScanEngine, Vec<PathBuf>) {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        let paths: Vec<PathBuf> = sizes
            .iter()
            .enumerate()
            .map(|(i, size)| {
                let path = root.join(format!("file{i}.bin"));
                File::create(&path).unwrap().set_len(*size).unwrap();
                path
            })
            .collect();

        let probe = Arc::new(MemoryProbe::new());
        let engine = ScanEngine::new(probe.clone()).with_cache_ttl(None);
        engine.start_scan(&ScanConfig::new(&root)).unwrap();
        (temp, probe, engine, paths)
    }

    #[test]
    fn test_outcome_messages() {
        assert!(ReclaimOutcome::Reclaimed { bytes: 1 }.is_success());
        assert!(ReclaimOutcome::AlreadyCloudOnly.is_success());
        assert!(!ReclaimOutcome::InProgress.is_success());
        assert!(ReclaimOutcome::InProgress.is_skipped());
        assert_eq!(ReclaimOutcome::failed("boom").message(), "boom");
    }

    #[test]
    fn test_reclaim_updates_record() {
        let (_temp, probe, engine, paths) = scanned(&[400, 100]);
        let reclaimer = Reclaimer::for_engine(&engine);

        let outcome = reclaimer.reclaim(&paths[0]);
        assert_eq!(outcome, ReclaimOutcome::Reclaimed { bytes: 400 });
        assert_eq!(probe.set_calls(), 1);

        let stats = engine.cache().stats().unwrap();
        assert_eq!(stats.local_files, 1);
        assert_eq!(stats.remote_files, 1);
        assert_eq!(stats.local_size, 100);
        assert!(!engine.cache().record(&paths[0]).unwrap().is_processing);
    }

    #[test]
    fn test_missing_path_fails() {
        let (temp, _probe, engine, _paths) = scanned(&[1]);
        let reclaimer = Reclaimer::for_engine(&engine);
        let outcome = reclaimer.reclaim(&temp.path().join("nope"));
        assert_eq!(outcome, ReclaimOutcome::failed("File not found"));
    }

    #[test]
    fn test_untracked_path_is_probed_without_touching_stats() {
        let (temp, probe, engine, _paths) = scanned(&[10]);
        let extra = temp.path().canonicalize().unwrap().join("late.bin");
        File::create(&extra).unwrap().set_len(64).unwrap();
        let before = engine.cache().stats().unwrap();

        let reclaimer = Reclaimer::for_engine(&engine);
        assert_eq!(
            reclaimer.reclaim(&extra),
            ReclaimOutcome::Reclaimed { bytes: 64 }
        );
        assert_eq!(probe.set_calls(), 1);
        assert_eq!(engine.cache().stats().unwrap(), before);

        assert_eq!(reclaimer.reclaim(&extra), ReclaimOutcome::AlreadyCloudOnly);
        assert_eq!(probe.set_calls(), 1);
    }

    #[test]
    fn test_batch_summary() {
        let report = BatchReport::from_entries(vec![
            ReclaimEntry::new("/a".into(), ReclaimOutcome::Reclaimed { bytes: 2048 }),
            ReclaimEntry::new("/b".into(), ReclaimOutcome::failed("denied")),
            ReclaimEntry::new("/c".into(), ReclaimOutcome::InProgress),
        ]);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
        assert!(report.success());
        assert_eq!(report.summary(), "Reclaimed 1 files, 1 failed, freed 2 KB");
    }

    #[test]
    fn test_disproved_entry_frees_nothing() {
        let mut entry = ReclaimEntry::new("/a".into(), ReclaimOutcome::Reclaimed { bytes: 10 });
        assert_eq!(entry.bytes_reclaimed(), 10);
        entry.verified = Some(false);
        assert_eq!(entry.bytes_reclaimed(), 0);
    }

    #[test]
    fn test_reclaim_one_without_verification() {
        let (_temp, _probe, engine, paths) = scanned(&[5]);
        let reclaimer =
            Reclaimer::for_engine(&engine).with_config(ReclaimConfig::without_verification());

        let response = reclaimer.reclaim_one(&paths[0]);
        assert!(response.success);
        assert_eq!(response.message, "Successfully made file cloud-only");
        assert_eq!(response.is_cloud_only, None);
    }
}
