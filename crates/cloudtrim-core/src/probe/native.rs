//! Platform attribute probe.

use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::AttributeProbe;
use crate::error::ProbeError;

/// Probe backed by the host's file attributes.
///
/// On Windows the Cloud Files attributes decide the state and `attrib +U -P`
/// requests dehydration. Elsewhere a non-empty file with no allocated blocks
/// is treated as a placeholder, and state changes are unsupported.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeProbe;

impl NativeProbe {
    /// Create a new native probe.
    pub fn new() -> Self {
        Self
    }
}

/// Upper bound for one `attrib` invocation.
#[cfg(windows)]
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg_attr(not(windows), allow(dead_code))]
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Run `command` to completion, killing it once `timeout` elapses.
#[cfg_attr(not(windows), allow(dead_code))]
fn run_with_timeout(
    command: &mut Command,
    path: &Path,
    timeout: Duration,
) -> Result<Output, ProbeError> {
    let mut child = command
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ProbeError::io(path, &e))?;

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => {
                return child
                    .wait_with_output()
                    .map_err(|e| ProbeError::io(path, &e));
            }
            Ok(None) if Instant::now() >= deadline => {
                warn!(path = %path.display(), ?timeout, "command timed out, killing it");
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProbeError::Command {
                    status: format!("timed out after {}s", timeout.as_secs_f64()),
                    stderr: String::new(),
                });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => return Err(ProbeError::io(path, &e)),
        }
    }
}

#[cfg(windows)]
mod attrs {
    pub const OFFLINE: u32 = 0x0000_1000;
    pub const RECALL_ON_OPEN: u32 = 0x0004_0000;
    pub const PINNED: u32 = 0x0008_0000;
    pub const UNPINNED: u32 = 0x0010_0000;
    pub const RECALL_ON_DATA_ACCESS: u32 = 0x0040_0000;

    /// Decide placeholder state from a raw attribute word.
    pub fn is_placeholder(attributes: u32) -> bool {
        if attributes & (RECALL_ON_DATA_ACCESS | RECALL_ON_OPEN | OFFLINE) != 0 {
            return true;
        }
        attributes & UNPINNED != 0 && attributes & PINNED == 0
    }
}

#[cfg(windows)]
impl AttributeProbe for NativeProbe {
    fn is_cloud_only(&self, path: &Path) -> Result<bool, ProbeError> {
        use std::os::windows::fs::MetadataExt;

        let metadata = std::fs::metadata(path).map_err(|e| ProbeError::io(path, &e))?;
        Ok(attrs::is_placeholder(metadata.file_attributes()))
    }

    fn set_cloud_only(&self, path: &Path) -> Result<(), ProbeError> {
        debug!(path = %path.display(), "running attrib +U -P");
        let output = run_with_timeout(
            Command::new("attrib").args(["+U", "-P"]).arg(path),
            path,
            COMMAND_TIMEOUT,
        )?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ProbeError::Command {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[cfg(unix)]
impl AttributeProbe for NativeProbe {
    fn is_cloud_only(&self, path: &Path) -> Result<bool, ProbeError> {
        use std::os::unix::fs::MetadataExt;

        let metadata = std::fs::metadata(path).map_err(|e| ProbeError::io(path, &e))?;
        Ok(metadata.len() > 0 && metadata.blocks() == 0)
    }

    fn set_cloud_only(&self, path: &Path) -> Result<(), ProbeError> {
        debug!(path = %path.display(), "placeholder conversion requested on unix");
        if !path.exists() {
            return Err(ProbeError::NotFound {
                path: path.to_path_buf(),
            });
        }
        Err(ProbeError::Unsupported {
            reason: "converting files to placeholders is only supported on Windows".into(),
        })
    }
}

#[cfg(not(any(unix, windows)))]
impl AttributeProbe for NativeProbe {
    fn is_cloud_only(&self, path: &Path) -> Result<bool, ProbeError> {
        std::fs::metadata(path).map_err(|e| ProbeError::io(path, &e))?;
        Ok(false)
    }

    fn set_cloud_only(&self, _path: &Path) -> Result<(), ProbeError> {
        Err(ProbeError::Unsupported {
            reason: "no placeholder support on this platform".into(),
        })
    }
}
