//! Background reclamation with progress reporting.

use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::warn;

use crate::RECLAIM_CHANNEL_SIZE;
use crate::progress::{ReclaimEvent, ReclaimProgress};
use crate::reclaim::{ReclaimEntry, ReclaimOutcome, Reclaimer};

/// Start an async reclamation of `paths`.
///
/// Each path is handled on the blocking pool. A `Progress` event follows
/// every path and a single `Complete` event ends the stream, after the
/// verification delay when verification is enabled.
pub fn start_reclaim(reclaimer: Reclaimer, paths: Vec<PathBuf>) -> mpsc::Receiver<ReclaimEvent> {
    let (tx, rx) = mpsc::channel(RECLAIM_CHANNEL_SIZE);

    tokio::spawn(async move {
        reclaim_impl(reclaimer, paths, tx).await;
    });

    rx
}

/// Internal implementation of a background batch.
async fn reclaim_impl(reclaimer: Reclaimer, paths: Vec<PathBuf>, tx: mpsc::Sender<ReclaimEvent>) {
    let mut progress = ReclaimProgress::new(paths.len());
    let mut entries = Vec::with_capacity(paths.len());

    for path in paths {
        let worker = reclaimer.clone();
        let target = path.clone();
        let outcome = tokio::task::spawn_blocking(move || worker.reclaim(&target))
            .await
            .unwrap_or_else(|e| ReclaimOutcome::Failed {
                reason: format!("Task failed: {e}"),
            });

        let entry = ReclaimEntry::new(path, outcome);
        progress.record(&entry);
        entries.push(entry);

        // A dropped receiver does not cancel the batch; reclaimed records
        // still have to be verified.
        let _ = tx.send(ReclaimEvent::Progress(progress.clone())).await;
    }

    if reclaimer.needs_verification(&entries) {
        tokio::time::sleep(reclaimer.config().verify_delay).await;
        let verifier = reclaimer.clone();
        let unverified = entries.clone();
        entries = match tokio::task::spawn_blocking(move || {
            verifier.verify_entries(&mut entries);
            entries
        })
        .await
        {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "verification task failed");
                unverified
            }
        };
    }

    let report = reclaimer.finish(entries);
    let _ = tx.send(ReclaimEvent::Complete(report)).await;
}
