//! Scan engine for cloudtrim.
//!
//! This crate walks a cloud-synced folder, classifies every file as
//! materialized or cloud-only through an [`AttributeProbe`], and keeps the
//! most recent result in a cache that reclamation operations update.
//!
//! # Overview
//!
//! - **Depth-bounded traversal** via jwalk ([`Walker`])
//! - **Bounded classification pool** on rayon ([`ClassificationPool`]);
//!   sequential mode is a pool of one worker
//! - **Pull-based progress** via [`ScanEngine::poll_progress`], with
//!   optional push through a broadcast channel
//! - **Result cache** keyed by root and depth with a TTL ([`ScanCache`])
//! - **Single-flight scans**: concurrent requests are rejected as busy
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cloudtrim_scan::{NativeProbe, ScanConfig, ScanEngine};
//!
//! let engine = ScanEngine::new(Arc::new(NativeProbe::new()));
//! let config = ScanConfig::new("/home/me/OneDrive").with_max_depth(Some(2));
//! let result = engine.start_scan(&config).unwrap();
//!
//! println!("{} of {} files are local", result.stats.local_files, result.stats.total_files);
//! println!("Potential savings: {}", result.stats.potential_savings);
//! ```
//!
//! # Progress Monitoring
//!
//! Poll from any thread while a scan runs:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cloudtrim_scan::{MemoryProbe, ScanEngine};
//!
//! let engine = Arc::new(ScanEngine::new(Arc::new(MemoryProbe::new())));
//! let progress = engine.poll_progress();
//! println!("{} ({:.0}%)", progress.status, progress.progress_percent);
//! ```

mod cache;
mod classify;
mod engine;
mod progress;
mod walker;

pub use cache::{CacheKey, Claim, ClaimGuard, DEFAULT_CACHE_TTL, ScanCache, StatusChange};
pub use classify::{Classification, Classified, ClassificationPool, classify_file};
pub use engine::{EngineState, ScanEngine};
pub use progress::{DEFAULT_IDLE_TIMEOUT, PROGRESS_INTERVAL, ScanPhase, ScanProgress};
pub use walker::{ESTIMATE_CAP, WalkItem, Walker, build_ignore_set};

// Re-export core types for convenience
pub use cloudtrim_core::{
    AttributeProbe, FileRecord, FileStatus, MemoryProbe, NativeProbe, ProbeError, ScanConfig,
    ScanError, ScanResult, ScanStats, ScanWarning, WarningKind,
};
