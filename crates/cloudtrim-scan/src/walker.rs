//! Depth-bounded directory traversal built on jwalk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use jwalk::{Parallelism, WalkDir};
use tracing::debug;

use cloudtrim_core::{ScanConfig, ScanError, ScanWarning};

/// Upper bound on the quick file count used for progress estimates.
pub const ESTIMATE_CAP: u64 = 5000;

/// One item produced by a walk.
#[derive(Debug, Clone)]
pub enum WalkItem {
    /// A regular file to classify.
    File(PathBuf),
    /// An entry or directory that could not be read.
    Warning(ScanWarning),
}

/// Enumerates files below a root.
///
/// Each call to [`walk`](Self::walk) performs a fresh traversal. Depth 0
/// yields only the files directly inside the root; `None` is unlimited.
#[derive(Debug, Clone)]
pub struct Walker {
    root: PathBuf,
    max_depth: Option<u32>,
    include_hidden: bool,
    ignore: Arc<GlobSet>,
    threads: usize,
}

impl Walker {
    /// Create a walker with default options.
    pub fn new(root: impl Into<PathBuf>, max_depth: Option<u32>) -> Self {
        Self {
            root: root.into(),
            max_depth,
            include_hidden: true,
            ignore: Arc::new(GlobSet::empty()),
            threads: 1,
        }
    }

    /// Create a walker for `root` using the traversal options of `config`.
    pub fn from_config(root: &Path, config: &ScanConfig) -> Result<Self, ScanError> {
        Ok(Self {
            root: root.to_path_buf(),
            max_depth: config.max_depth,
            include_hidden: config.include_hidden,
            ignore: Arc::new(build_ignore_set(&config.ignore_patterns)?),
            threads: config.worker_count(),
        })
    }

    /// Read directories on this many threads (1 = serial).
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Root of the walk.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily enumerate files under the root.
    ///
    /// Unreadable directories are reported as [`WalkItem::Warning`] and the
    /// walk continues. No ordering is guaranteed.
    pub fn walk(&self) -> impl Iterator<Item = WalkItem> + use<> {
        self.build(self.threads).into_iter().filter_map(|entry| match entry {
            Ok(entry) => {
                if let Some(err) = &entry.read_children_error {
                    return Some(WalkItem::Warning(ScanWarning::read_error(
                        entry.path(),
                        err.to_string(),
                    )));
                }
                if entry.file_type().is_file() {
                    Some(WalkItem::File(entry.path()))
                } else {
                    None
                }
            }
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                debug!(path = %path.display(), error = %err, "walk error");
                Some(WalkItem::Warning(ScanWarning::read_error(path, err.to_string())))
            }
        })
    }

    /// Count files serially, stopping at `cap`.
    pub fn estimate(&self, cap: u64) -> u64 {
        self.build(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .take(cap as usize)
            .count() as u64
    }

    fn build(&self, threads: usize) -> WalkDir {
        let parallelism = match threads {
            0 | 1 => Parallelism::Serial,
            n => Parallelism::RayonNewPool(n),
        };

        // jwalk counts the root as depth 0, so files directly inside it sit at depth 1
        let max_depth = self
            .max_depth
            .map(|d| (d as usize).saturating_add(1))
            .unwrap_or(usize::MAX);

        let ignore = Arc::clone(&self.ignore);
        WalkDir::new(&self.root)
            .parallelism(parallelism)
            .skip_hidden(!self.include_hidden)
            .follow_links(false)
            .min_depth(1)
            .max_depth(max_depth)
            .process_read_dir(move |_depth, _path, _state, children| {
                if !ignore.is_empty() {
                    children.retain(|child| match child {
                        Ok(entry) => !ignore.is_match(&entry.file_name),
                        Err(_) => true,
                    });
                }
            })
    }
}

/// Compile ignore patterns into a glob set.
pub fn build_ignore_set(patterns: &[String]) -> Result<GlobSet, ScanError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| ScanError::InvalidConfig {
            message: format!("invalid ignore pattern '{pattern}': {e}"),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| ScanError::InvalidConfig {
        message: format!("invalid ignore patterns: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        fs::create_dir_all(root.join("dir1/subdir")).unwrap();
        fs::create_dir(root.join("dir2")).unwrap();

        fs::write(root.join("file1.txt"), "hello").unwrap();
        fs::write(root.join(".hidden"), "secret").unwrap();
        fs::write(root.join("dir1/file2.txt"), "world world world").unwrap();
        fs::write(root.join("dir1/subdir/file3.log"), "test").unwrap();
        fs::write(root.join("dir2/file4.txt"), "another file here").unwrap();

        temp
    }

    fn files(walker: &Walker) -> HashSet<PathBuf> {
        walker
            .walk()
            .filter_map(|item| match item {
                WalkItem::File(path) => Some(path),
                WalkItem::Warning(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_unlimited_depth() {
        let temp = create_test_tree();
        let found = files(&Walker::new(temp.path(), None));
        assert_eq!(found.len(), 5);
        assert!(found.contains(&temp.path().join("dir1/subdir/file3.log")));
    }

    #[test]
    fn test_depth_zero_is_root_only() {
        let temp = create_test_tree();
        let found = files(&Walker::new(temp.path(), Some(0)));
        assert_eq!(found.len(), 2);
        assert!(found.contains(&temp.path().join("file1.txt")));
    }

    #[test]
    fn test_depth_one() {
        let temp = create_test_tree();
        let found = files(&Walker::new(temp.path(), Some(1)));
        assert_eq!(found.len(), 4);
        assert!(!found.contains(&temp.path().join("dir1/subdir/file3.log")));
    }

    #[test]
    fn test_parallel_matches_serial() {
        let temp = create_test_tree();
        let serial = files(&Walker::new(temp.path(), None));
        let parallel = files(&Walker::new(temp.path(), None).with_threads(4));
        assert_eq!(serial, parallel);
    }

    #[test]
    fn test_hidden_and_ignore_patterns() {
        let temp = create_test_tree();
        let mut config = ScanConfig::new(temp.path());
        config.include_hidden = false;
        config.ignore_patterns = vec!["*.log".to_string(), "dir2".to_string()];

        let found = files(&Walker::from_config(temp.path(), &config).unwrap());
        assert_eq!(found.len(), 2);
        assert!(!found.contains(&temp.path().join(".hidden")));
        assert!(!found.contains(&temp.path().join("dir2/file4.txt")));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = build_ignore_set(&["[".to_string()]).unwrap_err();
        assert!(matches!(err, ScanError::InvalidConfig { .. }));
    }

    #[test]
    fn test_estimate_respects_cap() {
        let temp = create_test_tree();
        let walker = Walker::new(temp.path(), None);
        assert_eq!(walker.estimate(ESTIMATE_CAP), 5);
        assert_eq!(walker.estimate(3), 3);
    }

    #[test]
    fn test_each_walk_is_fresh() {
        let temp = create_test_tree();
        let walker = Walker::new(temp.path(), Some(0));
        assert_eq!(files(&walker).len(), 2);

        fs::write(temp.path().join("late.txt"), "x").unwrap();
        assert_eq!(files(&walker).len(), 3);
    }
}
