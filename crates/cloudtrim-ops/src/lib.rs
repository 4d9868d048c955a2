//! Space reclamation for cloudtrim.
//!
//! Converts materialized files into cloud-only placeholders through the
//! [`AttributeProbe`](cloudtrim_core::AttributeProbe), keeping the cached
//! scan result and its aggregates in step. Batches run synchronously via
//! [`Reclaimer::reclaim_batch`] or in the background via [`start_reclaim`],
//! which reports progress over a channel.

mod progress;
mod reclaim;
mod task;

pub use progress::{ReclaimEvent, ReclaimProgress};
pub use reclaim::{
    BatchReport, DEFAULT_VERIFY_DELAY, ReclaimConfig, ReclaimEntry, ReclaimOutcome,
    ReclaimResponse, Reclaimer,
};
pub use task::start_reclaim;

/// Default channel buffer size for reclamation progress updates.
pub const RECLAIM_CHANNEL_SIZE: usize = 100;
