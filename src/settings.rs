//! Persistent application settings.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::eyre::{Context, Result, bail, eyre};
use serde::{Deserialize, Serialize};

use cloudtrim_core::DEFAULT_MAX_WORKERS;

/// Settings stored as TOML in the user's config directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Synced folder used when a command is given no path.
    pub root: Option<PathBuf>,
    /// Depth used by `scan` without `--depth` or `--all`.
    pub default_max_depth: u32,
    /// Classify on a worker pool by default.
    pub default_use_threads: bool,
    /// Pool size used by default.
    pub default_max_workers: usize,
    /// How long a scan result may be reused.
    pub cache_ttl_secs: u64,
    /// Wait before re-probing reclaimed files.
    pub verify_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root: None,
            default_max_depth: 2,
            default_use_threads: true,
            default_max_workers: DEFAULT_MAX_WORKERS,
            cache_ttl_secs: 300,
            verify_delay_ms: 2000,
        }
    }
}

impl Settings {
    /// Default settings file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("cloudtrim").join("config.toml"))
    }

    /// Resolve an explicit path or fall back to the default location.
    pub fn resolve_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
        explicit
            .or_else(Self::default_path)
            .ok_or_else(|| eyre!("No config directory found; pass --config <FILE>"))
    }

    /// Load settings from `path`, writing defaults there when it does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let settings = Self::default();
            settings.save(path)?;
            return Ok(settings);
        }

        let content = fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).wrap_err_with(|| format!("Invalid settings in {}", path.display()))
    }

    /// Save settings to `path`, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .wrap_err_with(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).wrap_err("Failed to encode settings")?;
        fs::write(path, content).wrap_err_with(|| format!("Failed to write {}", path.display()))
    }

    /// Point the settings at a new synced folder. It must be an existing directory.
    pub fn set_root(&mut self, root: &Path) -> Result<()> {
        if !root.is_dir() {
            bail!("Invalid or non-existent directory path: {}", root.display());
        }
        self.root = Some(
            root.canonicalize()
                .wrap_err_with(|| format!("Failed to resolve {}", root.display()))?,
        );
        Ok(())
    }

    /// The given path, or the configured root.
    pub fn root_or(&self, path: Option<PathBuf>) -> Result<PathBuf> {
        path.or_else(|| self.root.clone()).ok_or_else(|| {
            eyre!("No folder configured. Pass a path or run `cloudtrim config set-root <PATH>`")
        })
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn verify_delay(&self) -> Duration {
        Duration::from_millis(self.verify_delay_ms)
    }
}
