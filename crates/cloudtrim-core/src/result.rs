//! Scan results and aggregate statistics.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use humansize::{FixedAt, FormatSizeOptions, WINDOWS};
use serde::{Deserialize, Serialize};

use crate::error::ScanWarning;
use crate::record::{FileRecord, FileStatus};

const PB: u64 = 1 << 50;

fn tb_capped() -> FormatSizeOptions {
    FormatSizeOptions::from(WINDOWS).fixed_at(Some(FixedAt::Tera))
}

/// Format a byte count with base-1024 scaling (B, KB, MB, GB, TB).
///
/// At most two decimals, trailing zeros dropped. Sizes past the terabyte
/// range stay in TB.
pub fn format_size(bytes: u64) -> String {
    let options = if bytes >= PB { tb_capped() } else { WINDOWS };
    let formatted = humansize::format_size(bytes, options);
    let (value, unit) = formatted
        .split_once(' ')
        .unwrap_or((formatted.as_str(), ""));

    let value = if value.contains('.') {
        value.trim_end_matches('0').trim_end_matches('.')
    } else {
        value
    };
    let unit = if unit == "kB" { "KB" } else { unit };
    format!("{value} {unit}")
}

/// Aggregate counts for a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    /// Number of classified files.
    pub total_files: u64,
    /// Files occupying local space (includes unverified files).
    pub local_files: u64,
    /// Cloud-only placeholders.
    pub remote_files: u64,
    /// Files whose probe failed; a subset of `local_files`.
    pub unverified_files: u64,
    /// Sum of all file sizes.
    pub total_size: u64,
    /// Sum of local file sizes.
    pub local_size: u64,
    /// `total_size`, human-readable.
    pub human_total_size: String,
    /// `local_size`, human-readable.
    pub human_local_size: String,
    /// Space freed if every local file became cloud-only.
    pub potential_savings: String,
}

impl Default for ScanStats {
    fn default() -> Self {
        let mut stats = Self {
            total_files: 0,
            local_files: 0,
            remote_files: 0,
            unverified_files: 0,
            total_size: 0,
            local_size: 0,
            human_total_size: String::new(),
            human_local_size: String::new(),
            potential_savings: String::new(),
        };
        stats.refresh_human_sizes();
        stats
    }
}

impl ScanStats {
    /// Create new empty stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregate stats over a set of records in one pass.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a FileRecord>) -> Self {
        let mut stats = Self::new();
        for record in records {
            stats.record(record.status, record.size);
        }
        stats.refresh_human_sizes();
        stats
    }

    /// Count one file. Call [`refresh_human_sizes`](Self::refresh_human_sizes) afterwards.
    pub fn record(&mut self, status: FileStatus, size: u64) {
        self.total_files += 1;
        self.total_size += size;
        match status {
            FileStatus::CloudOnly => self.remote_files += 1,
            FileStatus::Local => {
                self.local_files += 1;
                self.local_size += size;
            }
            FileStatus::Unverified => {
                self.local_files += 1;
                self.unverified_files += 1;
                self.local_size += size;
            }
        }
    }

    /// Move one file of `size` bytes from `from` to `to`.
    ///
    /// Totals stay unchanged; only the local/remote split moves.
    pub fn transition(&mut self, from: FileStatus, to: FileStatus, size: u64) {
        if from == to {
            return;
        }
        match from {
            FileStatus::CloudOnly => self.remote_files = self.remote_files.saturating_sub(1),
            FileStatus::Local | FileStatus::Unverified => {
                self.local_files = self.local_files.saturating_sub(1);
                self.local_size = self.local_size.saturating_sub(size);
                if from == FileStatus::Unverified {
                    self.unverified_files = self.unverified_files.saturating_sub(1);
                }
            }
        }
        match to {
            FileStatus::CloudOnly => self.remote_files += 1,
            FileStatus::Local | FileStatus::Unverified => {
                self.local_files += 1;
                self.local_size += size;
                if to == FileStatus::Unverified {
                    self.unverified_files += 1;
                }
            }
        }
        self.refresh_human_sizes();
    }

    /// Recompute the human-readable fields from the byte counts.
    pub fn refresh_human_sizes(&mut self) {
        self.human_total_size = format_size(self.total_size);
        self.human_local_size = format_size(self.local_size);
        self.potential_savings = self.human_local_size.clone();
    }

    /// Check the accounting invariants.
    pub fn is_consistent(&self) -> bool {
        self.local_files + self.remote_files == self.total_files
            && self.local_size <= self.total_size
            && self.unverified_files <= self.local_files
    }
}

/// Outcome of one completed scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    /// Classified files in completion order.
    pub files: Vec<FileRecord>,

    /// Aggregate counts.
    pub stats: ScanStats,

    /// When the scan finished.
    pub scanned_at: DateTime<Utc>,

    /// Canonical root that was scanned.
    pub root_path: PathBuf,

    /// Depth limit used (None = unlimited).
    pub max_depth: Option<u32>,

    /// Duration of the scan.
    pub scan_duration: Duration,

    /// Warnings encountered during the scan.
    pub warnings: Vec<ScanWarning>,
}

impl ScanResult {
    /// Create a result, aggregating stats from `files`.
    pub fn new(
        files: Vec<FileRecord>,
        root_path: PathBuf,
        max_depth: Option<u32>,
        scan_duration: Duration,
        warnings: Vec<ScanWarning>,
    ) -> Self {
        let stats = ScanStats::from_records(&files);
        Self {
            files,
            stats,
            scanned_at: Utc::now(),
            root_path,
            max_depth,
            scan_duration,
            warnings,
        }
    }

    /// Find a record by path.
    pub fn find(&self, path: &std::path::Path) -> Option<&FileRecord> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Local files, largest first.
    pub fn largest_local(&self, limit: usize) -> Vec<&FileRecord> {
        let mut local: Vec<_> = self.files.iter().filter(|f| f.is_local()).collect();
        local.sort_by(|a, b| b.size.cmp(&a.size));
        local.truncate(limit);
        local
    }

    /// Check if there were any warnings during scanning.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}
