//! Cache of the most recent completed scan.
//!
//! An entry is fresh while it is younger than the cache TTL and has not been
//! invalidated. Reclamation updates individual records in place through
//! [`ScanCache::try_claim`] and [`ClaimGuard`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tracing::debug;

use cloudtrim_core::{FileRecord, FileStatus, ScanResult, ScanStats};

/// Default time a cached scan stays fresh.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Identifies a cache entry: canonical root plus depth limit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub root: PathBuf,
    pub max_depth: Option<u32>,
}

impl CacheKey {
    pub fn new(root: impl Into<PathBuf>, max_depth: Option<u32>) -> Self {
        Self {
            root: root.into(),
            max_depth,
        }
    }
}

#[derive(Debug)]
struct CacheSlot {
    key: CacheKey,
    result: ScanResult,
    index: HashMap<PathBuf, usize>,
    stored_at: Instant,
    invalidated: bool,
}

impl CacheSlot {
    fn record_mut(&mut self, path: &Path) -> Option<&mut FileRecord> {
        let idx = *self.index.get(path)?;
        self.result.files.get_mut(idx)
    }
}

/// Outcome of trying to claim a record for reclamation.
#[derive(Debug)]
pub enum Claim {
    /// No cached record for this path.
    Untracked,
    /// The record is already a placeholder.
    AlreadyCloudOnly,
    /// Another reclamation holds the record.
    InProgress,
    /// The record is now marked processing; the guard releases it.
    Claimed(ClaimGuard),
}

/// Change applied to a record when reconciling with an observed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub previous: FileStatus,
    pub current: FileStatus,
    pub size: u64,
}

/// Shared handle to the scan cache.
#[derive(Debug, Clone)]
pub struct ScanCache {
    slot: Arc<RwLock<Option<CacheSlot>>>,
    ttl: Option<Duration>,
}

impl ScanCache {
    /// Create a cache whose entries expire after `ttl` (None = never).
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            slot: Arc::new(RwLock::new(None)),
            ttl,
        }
    }

    /// The configured TTL.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<CacheSlot>> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<CacheSlot>> {
        self.slot.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot_is_fresh(&self, slot: &CacheSlot) -> bool {
        !slot.invalidated && self.ttl.is_none_or(|ttl| slot.stored_at.elapsed() < ttl)
    }

    /// Whether a fresh entry exists for `key`.
    pub fn is_fresh(&self, key: &CacheKey) -> bool {
        self.read()
            .as_ref()
            .is_some_and(|slot| slot.key == *key && self.slot_is_fresh(slot))
    }

    /// Return the cached result for `key` if it is fresh.
    pub fn get_fresh(&self, key: &CacheKey) -> Option<ScanResult> {
        let guard = self.read();
        let slot = guard.as_ref()?;
        (slot.key == *key && self.slot_is_fresh(slot)).then(|| slot.result.clone())
    }

    /// Replace the cached entry with a new result.
    pub fn store(&self, result: ScanResult) {
        let key = CacheKey::new(&result.root_path, result.max_depth);
        let index = result
            .files
            .iter()
            .enumerate()
            .map(|(i, f)| (f.path.clone(), i))
            .collect();
        debug!(root = %key.root.display(), files = result.files.len(), "caching scan result");
        *self.write() = Some(CacheSlot {
            key,
            result,
            index,
            stored_at: Instant::now(),
            invalidated: false,
        });
    }

    /// Mark the current entry stale. It stays readable via [`snapshot`](Self::snapshot).
    pub fn invalidate(&self) {
        if let Some(slot) = self.write().as_mut() {
            slot.invalidated = true;
        }
    }

    /// The last completed result regardless of freshness.
    pub fn snapshot(&self) -> Option<ScanResult> {
        self.read().as_ref().map(|slot| slot.result.clone())
    }

    /// Current aggregate stats, if anything is cached.
    pub fn stats(&self) -> Option<ScanStats> {
        self.read().as_ref().map(|slot| slot.result.stats.clone())
    }

    /// A copy of the cached record for `path`.
    pub fn record(&self, path: &Path) -> Option<FileRecord> {
        let guard = self.read();
        let slot = guard.as_ref()?;
        let idx = *slot.index.get(path)?;
        slot.result.files.get(idx).cloned()
    }

    /// Atomically check a record and mark it processing.
    ///
    /// Check and set happen under one write lock, so two callers racing on
    /// the same path cannot both claim it.
    pub fn try_claim(&self, path: &Path) -> Claim {
        let mut guard = self.write();
        let Some(record) = guard.as_mut().and_then(|slot| slot.record_mut(path)) else {
            return Claim::Untracked;
        };
        if record.is_cloud_only() {
            return Claim::AlreadyCloudOnly;
        }
        if record.is_processing {
            return Claim::InProgress;
        }
        record.is_processing = true;
        Claim::Claimed(ClaimGuard {
            cache: self.clone(),
            path: path.to_path_buf(),
            size: record.size,
            released: false,
        })
    }

    /// Set a record to `observed`, adjusting aggregates.
    ///
    /// Returns the change when the cached state differed.
    pub fn set_status(&self, path: &Path, observed: FileStatus) -> Option<StatusChange> {
        let mut guard = self.write();
        let slot = guard.as_mut()?;
        let record = slot.record_mut(path)?;
        let previous = record.status;
        if previous == observed {
            return None;
        }
        record.status = observed;
        if observed != FileStatus::Unverified {
            record.probe_error = None;
        }
        let size = record.size;
        slot.result.stats.transition(previous, observed, size);
        Some(StatusChange {
            previous,
            current: observed,
            size,
        })
    }

    fn release(&self, path: &Path) {
        if let Some(record) = self.write().as_mut().and_then(|slot| slot.record_mut(path)) {
            record.is_processing = false;
        }
    }
}

impl Default for ScanCache {
    fn default() -> Self {
        Self::new(Some(DEFAULT_CACHE_TTL))
    }
}

/// Exclusive claim on a cached record during reclamation.
///
/// Dropping the guard clears `is_processing`, including on unwind.
#[derive(Debug)]
pub struct ClaimGuard {
    cache: ScanCache,
    path: PathBuf,
    size: u64,
    released: bool,
}

impl ClaimGuard {
    /// Path of the claimed record.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the claimed record at scan time.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Record a successful conversion and release the claim.
    pub fn commit_cloud_only(mut self) -> Option<StatusChange> {
        let change = self.cache.set_status(&self.path, FileStatus::CloudOnly);
        self.cache.release(&self.path);
        self.released = true;
        change
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if !self.released {
            self.cache.release(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn result(root: &str, depth: Option<u32>) -> ScanResult {
        let root_path = PathBuf::from(root);
        let files = vec![
            FileRecord::new(
                root_path.join("a.bin"),
                &root_path,
                100,
                Utc::now(),
                FileStatus::Local,
            ),
            FileRecord::new(
                root_path.join("b.bin"),
                &root_path,
                50,
                Utc::now(),
                FileStatus::CloudOnly,
            ),
        ];
        ScanResult::new(files, root_path, depth, Duration::ZERO, Vec::new())
    }

    #[test]
    fn test_fresh_hit_and_key_mismatch() {
        let cache = ScanCache::new(None);
        cache.store(result("/cloud", Some(2)));

        assert!(cache.get_fresh(&CacheKey::new("/cloud", Some(2))).is_some());
        assert!(cache.get_fresh(&CacheKey::new("/cloud", Some(3))).is_none());
        assert!(cache.get_fresh(&CacheKey::new("/other", Some(2))).is_none());
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = ScanCache::new(Some(Duration::ZERO));
        cache.store(result("/cloud", None));
        assert!(!cache.is_fresh(&CacheKey::new("/cloud", None)));
        assert!(cache.snapshot().is_some());
    }

    #[test]
    fn test_invalidate_keeps_snapshot() {
        let cache = ScanCache::new(None);
        cache.store(result("/cloud", None));
        cache.invalidate();

        assert!(!cache.is_fresh(&CacheKey::new("/cloud", None)));
        assert_eq!(cache.snapshot().unwrap().files.len(), 2);
    }

    #[test]
    fn test_claim_lifecycle() {
        let cache = ScanCache::new(None);
        cache.store(result("/cloud", None));
        let path = Path::new("/cloud/a.bin");

        let Claim::Claimed(guard) = cache.try_claim(path) else {
            panic!("expected claim");
        };
        assert!(cache.record(path).unwrap().is_processing);
        assert!(matches!(cache.try_claim(path), Claim::InProgress));

        let change = guard.commit_cloud_only().unwrap();
        assert_eq!(change.previous, FileStatus::Local);
        assert_eq!(change.size, 100);

        let record = cache.record(path).unwrap();
        assert!(record.is_cloud_only());
        assert!(!record.is_processing);
        assert!(matches!(cache.try_claim(path), Claim::AlreadyCloudOnly));

        let stats = cache.stats().unwrap();
        assert_eq!(stats.local_files, 0);
        assert_eq!(stats.remote_files, 2);
        assert_eq!(stats.local_size, 0);
    }

    #[test]
    fn test_dropped_claim_releases_record() {
        let cache = ScanCache::new(None);
        cache.store(result("/cloud", None));
        let path = Path::new("/cloud/a.bin");

        match cache.try_claim(path) {
            Claim::Claimed(guard) => drop(guard),
            other => panic!("unexpected {other:?}"),
        }
        let record = cache.record(path).unwrap();
        assert!(!record.is_processing);
        assert_eq!(record.status, FileStatus::Local);
    }

    #[test]
    fn test_untracked_path() {
        let cache = ScanCache::new(None);
        assert!(matches!(cache.try_claim(Path::new("/x")), Claim::Untracked));
        cache.store(result("/cloud", None));
        assert!(matches!(
            cache.try_claim(Path::new("/cloud/zzz")),
            Claim::Untracked
        ));
    }

    #[test]
    fn test_set_status_reconciles_stats() {
        let cache = ScanCache::new(None);
        cache.store(result("/cloud", None));

        let change = cache
            .set_status(Path::new("/cloud/b.bin"), FileStatus::Local)
            .unwrap();
        assert_eq!(change.previous, FileStatus::CloudOnly);
        let stats = cache.stats().unwrap();
        assert_eq!(stats.local_files, 2);
        assert_eq!(stats.local_size, 150);
        assert!(stats.is_consistent());

        assert!(cache
            .set_status(Path::new("/cloud/b.bin"), FileStatus::Local)
            .is_none());
    }
}
