//! The attribute probe seam.
//!
//! Reading and flipping a file's placeholder flag is a single OS call or
//! process invocation. The scan engine only sees it through
//! [`AttributeProbe`], so it can be swapped for [`MemoryProbe`] in tests.

mod memory;
mod native;

use std::path::Path;

pub use memory::MemoryProbe;
pub use native::NativeProbe;

use crate::error::ProbeError;

/// Reads and changes a file's local/cloud materialization state.
///
/// Both calls may block for tens of milliseconds and may fail.
/// Implementations must be safe to call from several worker threads, but
/// callers are free to serialize calls when the host does not tolerate
/// concurrency.
pub trait AttributeProbe: Send + Sync {
    /// Returns `true` when the file is a cloud-only placeholder.
    fn is_cloud_only(&self, path: &Path) -> Result<bool, ProbeError>;

    /// Requests that the file become a cloud-only placeholder.
    ///
    /// The OS may apply the change some time after this returns.
    fn set_cloud_only(&self, path: &Path) -> Result<(), ProbeError>;
}

impl<P: AttributeProbe + ?Sized> AttributeProbe for std::sync::Arc<P> {
    fn is_cloud_only(&self, path: &Path) -> Result<bool, ProbeError> {
        (**self).is_cloud_only(path)
    }

    fn set_cloud_only(&self, path: &Path) -> Result<(), ProbeError> {
        (**self).set_cloud_only(path)
    }
}
