//! In-memory attribute probe for simulation and tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::{DashMap, DashSet};

use super::AttributeProbe;
use crate::error::ProbeError;

/// Attribute probe that keeps placeholder state in memory.
///
/// Files never registered are reported as local. Failures can be injected
/// per path, calls are counted, and the highest number of simultaneous
/// calls is recorded so callers can assert on concurrency.
#[derive(Debug, Default)]
pub struct MemoryProbe {
    cloud_only: DashSet<PathBuf>,
    status_failures: DashMap<PathBuf, ProbeError>,
    set_failures: DashMap<PathBuf, ProbeError>,
    /// Paths whose state change is acknowledged but never applied.
    ignored_sets: DashSet<PathBuf>,
    latency: Duration,
    status_calls: AtomicUsize,
    set_calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MemoryProbe {
    /// Create an empty probe.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Mark a path as a cloud-only placeholder (or local again).
    pub fn set_state(&self, path: impl Into<PathBuf>, cloud_only: bool) {
        let path = path.into();
        if cloud_only {
            self.cloud_only.insert(path);
        } else {
            self.cloud_only.remove(&path);
        }
    }

    /// Make status queries for `path` fail with `error`.
    pub fn fail_status(&self, path: impl Into<PathBuf>, error: ProbeError) {
        self.status_failures.insert(path.into(), error);
    }

    /// Make state changes for `path` fail with `error`.
    pub fn fail_set(&self, path: impl Into<PathBuf>, error: ProbeError) {
        self.set_failures.insert(path.into(), error);
    }

    /// Accept state changes for `path` without applying them.
    pub fn ignore_set(&self, path: impl Into<PathBuf>) {
        self.ignored_sets.insert(path.into());
    }

    /// Number of status queries served so far.
    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Number of state change requests served so far.
    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were in flight at the same time.
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn enter(&self) -> ActiveCall<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        ActiveCall(&self.active)
    }
}

struct ActiveCall<'a>(&'a AtomicUsize);

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AttributeProbe for MemoryProbe {
    fn is_cloud_only(&self, path: &Path) -> Result<bool, ProbeError> {
        let _call = self.enter();
        self.status_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self.status_failures.get(path) {
            return Err(error.clone());
        }
        Ok(self.cloud_only.contains(path))
    }

    fn set_cloud_only(&self, path: &Path) -> Result<(), ProbeError> {
        let _call = self.enter();
        self.set_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self.set_failures.get(path) {
            return Err(error.clone());
        }
        if !self.ignored_sets.contains(path) {
            self.cloud_only.insert(path.to_path_buf());
        }
        Ok(())
    }
}
