//! Scan configuration types.

use std::path::PathBuf;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Default number of classification workers.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Configuration for a single scan request.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ScanConfig {
    /// Root of the synced folder to scan.
    pub root: PathBuf,

    /// Maximum directory levels to descend (None = unlimited, 0 = root only).
    #[builder(default)]
    #[serde(default)]
    pub max_depth: Option<u32>,

    /// Classify files on a worker pool. When false, exactly one worker runs.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub use_threads: bool,

    /// Size of the classification pool when `use_threads` is set.
    #[builder(default = "DEFAULT_MAX_WORKERS")]
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Ignore any cached result and rescan.
    #[builder(default = "false")]
    #[serde(default)]
    pub force_rescan: bool,

    /// Include hidden files (starting with .).
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub include_hidden: bool,

    /// Glob patterns matched against entry names; matches are skipped.
    #[builder(default)]
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

impl ScanConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        match self.root {
            Some(ref root) if root.as_os_str().is_empty() => {
                return Err("Root path cannot be empty".to_string());
            }
            None => return Err("Root path is required".to_string()),
            _ => {}
        }
        if self.max_workers == Some(0) {
            return Err("max_workers must be at least 1".to_string());
        }
        Ok(())
    }
}

impl ScanConfig {
    /// Create a new scan config builder.
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::default()
    }

    /// Create a simple config for scanning a path with unlimited depth.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_depth: None,
            use_threads: true,
            max_workers: DEFAULT_MAX_WORKERS,
            force_rescan: false,
            include_hidden: true,
            ignore_patterns: Vec::new(),
        }
    }

    /// Set the maximum depth.
    pub fn with_max_depth(mut self, max_depth: Option<u32>) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Force a rescan, bypassing the cache.
    pub fn with_force_rescan(mut self, force: bool) -> Self {
        self.force_rescan = force;
        self
    }

    /// Classify sequentially on a single worker.
    pub fn sequential(mut self) -> Self {
        self.use_threads = false;
        self
    }

    /// Number of classification workers this config asks for.
    ///
    /// Sequential mode is a pool of one.
    pub fn worker_count(&self) -> usize {
        if self.use_threads {
            self.max_workers.max(1)
        } else {
            1
        }
    }

    /// Check if hidden files should be skipped.
    pub fn should_skip_hidden(&self, name: &str) -> bool {
        !self.include_hidden && name.starts_with('.')
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::new(".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ScanConfig::builder()
            .root("/home/user/OneDrive")
            .max_workers(8usize)
            .max_depth(Some(2u32))
            .build()
            .unwrap();

        assert_eq!(config.root, PathBuf::from("/home/user/OneDrive"));
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.max_depth, Some(2));
        assert!(config.use_threads);
        assert!(!config.force_rescan);
    }

    #[test]
    fn test_builder_rejects_zero_workers() {
        let result = ScanConfig::builder().root("/x").max_workers(0usize).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_requires_root() {
        assert!(ScanConfig::builder().build().is_err());
        assert!(ScanConfig::builder().root("").build().is_err());
    }

    #[test]
    fn test_worker_count() {
        let config = ScanConfig::new("/x");
        assert_eq!(config.worker_count(), DEFAULT_MAX_WORKERS);
        assert_eq!(config.sequential().worker_count(), 1);
    }

    #[test]
    fn test_should_skip_hidden() {
        let mut config = ScanConfig::new("/test");
        assert!(!config.should_skip_hidden(".git"));

        config.include_hidden = false;
        assert!(config.should_skip_hidden(".git"));
        assert!(!config.should_skip_hidden("src"));
    }
}
