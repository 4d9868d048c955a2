//! Bounded worker pool that classifies walked files.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use cloudtrim_core::{AttributeProbe, FileRecord, FileStatus, ScanError, ScanWarning};

use crate::progress::ProgressTracker;
use crate::walker::WalkItem;

/// Result of classifying a single path.
#[derive(Debug)]
pub enum Classification {
    /// The file was classified. Unverified records carry a warning.
    Record(FileRecord, Option<ScanWarning>),
    /// The file could not be stat'ed and was left out.
    Skipped(ScanWarning),
}

/// Records and warnings gathered by one pool run.
#[derive(Debug, Default)]
pub struct Classified {
    /// Classified files, in completion order.
    pub records: Vec<FileRecord>,
    /// Warnings from the walk and from classification.
    pub warnings: Vec<ScanWarning>,
}

/// Stat and probe one file.
///
/// A failed stat drops the file; a failed probe keeps it as unverified.
pub fn classify_file(probe: &dyn AttributeProbe, root: &Path, path: PathBuf) -> Classification {
    let metadata = match std::fs::metadata(&path) {
        Ok(m) => m,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "skipping file, stat failed");
            return Classification::Skipped(ScanWarning::metadata_error(path, &err));
        }
    };

    let modified: DateTime<Utc> = metadata
        .modified()
        .unwrap_or(std::time::UNIX_EPOCH)
        .into();

    match probe.is_cloud_only(&path) {
        Ok(cloud_only) => {
            let status = FileStatus::from_cloud_only(cloud_only);
            debug!(path = %path.display(), %status, "classified");
            Classification::Record(
                FileRecord::new(path, root, metadata.len(), modified, status),
                None,
            )
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "probe failed, keeping file as unverified");
            let warning = ScanWarning::probe_failed(&path, &err);
            let record = FileRecord::new(path, root, metadata.len(), modified, FileStatus::Local)
                .with_probe_error(err.to_string());
            Classification::Record(record, Some(warning))
        }
    }
}

const QUEUE_DEPTH_PER_WORKER: usize = 64;

/// A fixed-size pool of classification workers.
///
/// A pool of one worker is the sequential mode: the probe is never called
/// from two threads at once.
pub struct ClassificationPool {
    pool: rayon::ThreadPool,
    workers: usize,
    probe: Arc<dyn AttributeProbe>,
}

impl ClassificationPool {
    /// Build a pool with `workers` threads (at least one).
    pub fn new(workers: usize, probe: Arc<dyn AttributeProbe>) -> Result<Self, ScanError> {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("cloudtrim-classify-{i}"))
            .build()
            .map_err(|e| ScanError::Other {
                message: format!("failed to start classification pool: {e}"),
            })?;

        Ok(Self {
            pool,
            workers,
            probe,
        })
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Paths the walk may queue ahead of the workers.
    pub fn queue_capacity(&self) -> usize {
        self.workers * QUEUE_DEPTH_PER_WORKER
    }

    /// Classify every file produced by `items`.
    ///
    /// The walk is driven on the calling thread and feeds a bounded queue
    /// drained by the workers; it blocks while the queue is full. Returns
    /// once every queued file has been classified.
    pub(crate) fn classify(
        &self,
        root: &Path,
        items: impl Iterator<Item = WalkItem>,
        progress: &ProgressTracker,
    ) -> Classified {
        let records = Mutex::new(Vec::new());
        let warnings = Mutex::new(Vec::new());
        let (tx, rx) = mpsc::sync_channel::<PathBuf>(self.queue_capacity());

        self.pool.in_place_scope(|scope| {
            let rx = Arc::new(Mutex::new(rx));
            for _ in 0..self.workers {
                let rx = Arc::clone(&rx);
                let probe = self.probe.as_ref();
                let records = &records;
                let warnings = &warnings;
                scope.spawn(move |_| {
                    while let Some(path) = next_path(&rx) {
                        match classify_file(probe, root, path) {
                            Classification::Record(record, warning) => {
                                if let Some(warning) = warning {
                                    progress.record_warning();
                                    push(warnings, warning);
                                }
                                progress.record_file(&record.path);
                                push(records, record);
                            }
                            Classification::Skipped(warning) => {
                                progress.record_warning();
                                push(warnings, warning);
                            }
                        }
                    }
                });
            }
            // Workers own the receiver; if they all die, sends fail
            drop(rx);

            for item in items {
                match item {
                    WalkItem::Warning(warning) => {
                        warn!(path = %warning.path.display(), "{}", warning.message);
                        progress.record_warning();
                        push(&warnings, warning);
                    }
                    WalkItem::File(path) => {
                        progress.set_current_path(&path);
                        if tx.send(path).is_err() {
                            break;
                        }
                    }
                }
            }
            drop(tx);
        });

        Classified {
            records: records.into_inner().unwrap_or_else(PoisonError::into_inner),
            warnings: warnings.into_inner().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

fn next_path(rx: &Mutex<Receiver<PathBuf>>) -> Option<PathBuf> {
    rx.lock().unwrap_or_else(PoisonError::into_inner).recv().ok()
}

fn push<T>(list: &Mutex<Vec<T>>, item: T) {
    list.lock().unwrap_or_else(PoisonError::into_inner).push(item);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    use cloudtrim_core::{MemoryProbe, ProbeError};
    use tempfile::TempDir;

    use crate::progress::DEFAULT_IDLE_TIMEOUT;
    use crate::walker::Walker;

    fn create_flat_tree(count: usize) -> TempDir {
        let temp = TempDir::new().unwrap();
        for i in 0..count {
            fs::write(temp.path().join(format!("f{i}.dat")), vec![0u8; i + 1]).unwrap();
        }
        temp
    }

    #[test]
    fn test_classify_file_local_and_cloud() {
        let temp = create_flat_tree(2);
        let probe = MemoryProbe::new();
        probe.set_state(temp.path().join("f1.dat"), true);

        match classify_file(&probe, temp.path(), temp.path().join("f0.dat")) {
            Classification::Record(record, None) => {
                assert_eq!(record.status, FileStatus::Local);
                assert_eq!(record.size, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        match classify_file(&probe, temp.path(), temp.path().join("f1.dat")) {
            Classification::Record(record, None) => assert!(record.is_cloud_only()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_classify_missing_file_is_skipped() {
        let temp = TempDir::new().unwrap();
        let probe = MemoryProbe::new();
        let outcome = classify_file(&probe, temp.path(), temp.path().join("gone"));
        assert!(matches!(outcome, Classification::Skipped(_)));
        assert_eq!(probe.status_calls(), 0);
    }

    #[test]
    fn test_classify_probe_failure_is_unverified() {
        let temp = create_flat_tree(1);
        let path = temp.path().join("f0.dat");
        let probe = MemoryProbe::new();
        probe.fail_status(&path, ProbeError::PermissionDenied { path: path.clone() });

        match classify_file(&probe, temp.path(), path) {
            Classification::Record(record, Some(warning)) => {
                assert_eq!(record.status, FileStatus::Unverified);
                assert!(record.probe_error.is_some());
                assert_eq!(warning.kind, cloudtrim_core::WarningKind::ProbeFailed);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_pool_classifies_every_file() {
        let temp = create_flat_tree(40);
        let probe = Arc::new(MemoryProbe::new());
        let pool = ClassificationPool::new(4, probe.clone()).unwrap();
        let progress = ProgressTracker::new(DEFAULT_IDLE_TIMEOUT);

        let walker = Walker::new(temp.path(), Some(0));
        let classified = pool.classify(temp.path(), walker.walk(), &progress);

        assert_eq!(classified.records.len(), 40);
        assert!(classified.warnings.is_empty());
        assert_eq!(probe.status_calls(), 40);
        assert_eq!(progress.snapshot().files_processed, 40);
    }

    #[test]
    fn test_single_worker_never_probes_concurrently() {
        let temp = create_flat_tree(12);
        let probe = Arc::new(MemoryProbe::new().with_latency(Duration::from_millis(2)));
        let pool = ClassificationPool::new(1, probe.clone()).unwrap();
        let progress = ProgressTracker::new(DEFAULT_IDLE_TIMEOUT);

        let walker = Walker::new(temp.path(), None);
        let classified = pool.classify(temp.path(), walker.walk(), &progress);

        assert_eq!(classified.records.len(), 12);
        assert_eq!(probe.max_concurrency(), 1);
    }

    #[test]
    fn test_walk_waits_for_workers() {
        let temp = create_flat_tree(400);
        let probe = Arc::new(MemoryProbe::new().with_latency(Duration::from_millis(1)));
        let pool = ClassificationPool::new(2, probe.clone()).unwrap();
        let progress = ProgressTracker::new(DEFAULT_IDLE_TIMEOUT);

        let produced = std::cell::Cell::new(0usize);
        let max_ahead = std::cell::Cell::new(0usize);
        let walker = Walker::new(temp.path(), Some(0));
        let items = walker.walk().inspect(|_| {
            produced.set(produced.get() + 1);
            let ahead = produced.get().saturating_sub(probe.status_calls());
            max_ahead.set(max_ahead.get().max(ahead));
        });
        let classified = pool.classify(temp.path(), items, &progress);

        assert_eq!(classified.records.len(), 400);
        // Queued paths plus one held by each worker and the one being sent
        assert!(max_ahead.get() <= pool.queue_capacity() + pool.workers() + 1);
    }

    #[test]
    fn test_zero_workers_is_clamped() {
        let pool = ClassificationPool::new(0, Arc::new(MemoryProbe::new())).unwrap();
        assert_eq!(pool.workers(), 1);
    }
}
