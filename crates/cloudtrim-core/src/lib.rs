//! Core types and traits for cloudtrim.
//!
//! This crate provides the data structures shared by the scan engine and
//! the reclamation operations: classified file records, aggregate stats,
//! scan configuration, the error taxonomy, and the [`AttributeProbe`] seam
//! through which placeholder state is read and changed.

mod config;
mod error;
pub mod probe;
mod record;
mod result;

pub use config::{DEFAULT_MAX_WORKERS, ScanConfig, ScanConfigBuilder};
pub use error::{ProbeError, ScanError, ScanWarning, WarningKind};
pub use probe::{AttributeProbe, MemoryProbe, NativeProbe};
pub use record::{FileRecord, FileStatus};
pub use result::{ScanResult, ScanStats, format_size};
