//! Progress reporting types for reclamation batches.

use std::path::PathBuf;

use serde::Serialize;

use crate::reclaim::{BatchReport, ReclaimEntry};

/// Progress of an ongoing reclamation batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReclaimProgress {
    /// Number of paths handled so far.
    pub completed: usize,
    /// Total number of paths in the batch.
    pub total: usize,
    /// Paths converted or already cloud-only.
    pub succeeded: usize,
    /// Paths that could not be converted.
    pub failed: usize,
    /// Bytes freed so far, before verification.
    pub bytes_reclaimed: u64,
    /// The path handled most recently.
    pub current_file: Option<PathBuf>,
}

impl ReclaimProgress {
    /// Create progress for a batch of `total` paths.
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    /// Get the progress as a percentage (0.0 to 100.0).
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.completed as f64 / self.total as f64) * 100.0
    }

    /// Whether every path has been handled.
    pub fn is_done(&self) -> bool {
        self.completed >= self.total
    }

    pub(crate) fn record(&mut self, entry: &ReclaimEntry) {
        self.completed += 1;
        if entry.success {
            self.succeeded += 1;
        } else if !entry.outcome.is_skipped() {
            self.failed += 1;
        }
        self.bytes_reclaimed += entry.bytes_reclaimed();
        self.current_file = Some(entry.path.clone());
    }
}

/// Event sent through the channel by [`start_reclaim`](crate::start_reclaim).
#[derive(Debug)]
pub enum ReclaimEvent {
    /// One more path was handled.
    Progress(ReclaimProgress),
    /// The batch finished, including verification.
    Complete(BatchReport),
}
