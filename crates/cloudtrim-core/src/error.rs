//! Error types for scanning and probing.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fatal errors that abort a scan.
///
/// Per-file problems never surface as a `ScanError`; they are collected as
/// [`ScanWarning`]s on the result instead.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Permission denied for the scan root.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Scan root not found.
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Root path is not a directory.
    #[error("Root path is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Another scan is already running.
    #[error("A scan is already in progress for {root}")]
    Busy { root: PathBuf },

    /// Other error.
    #[error("{message}")]
    Other { message: String },
}

impl ScanError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }

    /// Whether this error means the engine was busy rather than the scan failing.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }
}

/// Errors reported by an [`AttributeProbe`](crate::AttributeProbe).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    /// Permission was denied reading or changing the attribute.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// The file does not exist.
    #[error("File not found: {path}")]
    NotFound { path: PathBuf },

    /// The operation is not available on this platform or probe.
    #[error("Not supported: {reason}")]
    Unsupported { reason: String },

    /// An external command exited unsuccessfully.
    #[error("Command failed ({status}): {stderr}")]
    Command { status: String, stderr: String },

    /// Any other I/O failure.
    #[error("I/O error at {path}: {message}")]
    Io { path: PathBuf, message: String },
}

impl ProbeError {
    /// Map an I/O error to a probe error with path context.
    pub fn io(path: impl Into<PathBuf>, source: &std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io {
                path,
                message: source.to_string(),
            },
        }
    }
}

/// Kind of scan warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    /// Permission was denied.
    PermissionDenied,
    /// A directory could not be listed.
    ReadError,
    /// A file could not be stat'ed; it was left out of the result.
    MetadataError,
    /// The attribute probe failed; the file was kept as unverified.
    ProbeFailed,
}

/// Non-fatal warning encountered during a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanWarning {
    /// Path where the warning occurred.
    pub path: PathBuf,
    /// Human-readable message.
    pub message: String,
    /// Kind of warning.
    pub kind: WarningKind,
}

impl ScanWarning {
    /// Create a new scan warning.
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>, kind: WarningKind) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            kind,
        }
    }

    /// Create a warning for an unreadable directory entry.
    pub fn read_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        let path = path.into();
        let message = message.into();
        let kind = if message.contains("ermission denied") {
            WarningKind::PermissionDenied
        } else {
            WarningKind::ReadError
        };
        Self {
            message: format!("Read error: {message}"),
            path,
            kind,
        }
    }

    /// Create a warning for a file whose metadata could not be read.
    pub fn metadata_error(path: impl Into<PathBuf>, error: &std::io::Error) -> Self {
        Self {
            path: path.into(),
            message: format!("Metadata error: {error}"),
            kind: WarningKind::MetadataError,
        }
    }

    /// Create a warning for a failed status probe.
    pub fn probe_failed(path: impl Into<PathBuf>, error: &ProbeError) -> Self {
        Self {
            path: path.into(),
            message: format!("Probe failed: {error}"),
            kind: WarningKind::ProbeFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_error_io() {
        let err = ScanError::io(
            "/test/path",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, ScanError::PermissionDenied { .. }));

        let err = ScanError::io(
            "/test/path",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, ScanError::NotFound { .. }));
    }

    #[test]
    fn test_busy_error() {
        let err = ScanError::Busy {
            root: PathBuf::from("/cloud"),
        };
        assert!(err.is_busy());
        assert!(err.to_string().contains("/cloud"));
    }

    #[test]
    fn test_probe_error_io() {
        let err = ProbeError::io(
            "/file",
            &std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(
            err,
            ProbeError::PermissionDenied {
                path: PathBuf::from("/file")
            }
        );
    }

    #[test]
    fn test_warning_kinds() {
        let warning = ScanWarning::read_error("/dir", "Permission denied (os error 13)");
        assert_eq!(warning.kind, WarningKind::PermissionDenied);

        let warning = ScanWarning::probe_failed(
            "/file",
            &ProbeError::Unsupported {
                reason: "test".into(),
            },
        );
        assert_eq!(warning.kind, WarningKind::ProbeFailed);
        assert!(warning.message.contains("Probe failed"));
    }
}
