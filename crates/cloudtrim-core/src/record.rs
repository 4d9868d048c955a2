//! Classified file records.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Materialization state of a file as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Content is stored on the local disk.
    Local,
    /// Placeholder only; content lives in the cloud.
    CloudOnly,
    /// The probe failed. Counted as local for space accounting.
    Unverified,
}

impl FileStatus {
    /// Map a probe answer to a status.
    pub fn from_cloud_only(cloud_only: bool) -> Self {
        if cloud_only {
            Self::CloudOnly
        } else {
            Self::Local
        }
    }

    /// Whether this file is a cloud-only placeholder.
    pub fn is_cloud_only(self) -> bool {
        self == Self::CloudOnly
    }

    /// Whether this file occupies local space (including unverified files).
    pub fn uses_local_space(self) -> bool {
        !self.is_cloud_only()
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::CloudOnly => write!(f, "cloud-only"),
            Self::Unverified => write!(f, "unverified"),
        }
    }
}

/// One classified file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute path. Identity key of the record.
    pub path: PathBuf,

    /// File name (not full path).
    pub name: CompactString,

    /// Name of the directory containing the file.
    pub parent_folder: CompactString,

    /// Containing folder relative to the scan root ("" for the root itself).
    pub relative_folder: String,

    /// Lower-cased extension without the dot.
    pub extension: CompactString,

    /// Size in bytes at scan time.
    pub size: u64,

    /// Modification time at scan time.
    pub last_modified: DateTime<Utc>,

    /// Last observed materialization state.
    pub status: FileStatus,

    /// Why the probe failed, for unverified records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_error: Option<String>,

    /// Set while a reclamation is in flight for this file.
    #[serde(default)]
    pub is_processing: bool,
}

impl FileRecord {
    /// Build a record, deriving the display fields from `path` and `root`.
    pub fn new(
        path: PathBuf,
        root: &Path,
        size: u64,
        last_modified: DateTime<Utc>,
        status: FileStatus,
    ) -> Self {
        let name = path
            .file_name()
            .map(|n| CompactString::new(n.to_string_lossy()))
            .unwrap_or_default();
        let parent_folder = path
            .parent()
            .and_then(Path::file_name)
            .map(|n| CompactString::new(n.to_string_lossy()))
            .unwrap_or_default();
        let relative_folder = path
            .parent()
            .and_then(|parent| parent.strip_prefix(root).ok())
            .map(|rel| rel.to_string_lossy().into_owned())
            .unwrap_or_else(|| parent_folder.to_string());
        let extension = path
            .extension()
            .map(|e| CompactString::new(e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();

        Self {
            path,
            name,
            parent_folder,
            relative_folder,
            extension,
            size,
            last_modified,
            status,
            probe_error: None,
            is_processing: false,
        }
    }

    /// Mark the record unverified because the probe failed.
    pub fn with_probe_error(mut self, reason: impl Into<String>) -> Self {
        self.status = FileStatus::Unverified;
        self.probe_error = Some(reason.into());
        self
    }

    /// Whether the file was last seen as a placeholder.
    pub fn is_cloud_only(&self) -> bool {
        self.status.is_cloud_only()
    }

    /// Whether the file was last seen occupying local space.
    pub fn is_local(&self) -> bool {
        self.status.uses_local_space()
    }

    /// Number of directory levels between the scan root and this file.
    pub fn depth_below(&self, root: &Path) -> Option<usize> {
        let rel = self.path.strip_prefix(root).ok()?;
        Some(rel.components().count().saturating_sub(1))
    }
}
