//! Store-and-forward delivery of buffered records.
//!
//! A sync cycle drains the unsynced backlog oldest first. Each record gets
//! exactly one attempt per cycle, bounded by the submit timeout. Records the
//! endpoint acknowledged are marked synced; everything else stays in the
//! backlog for the next cycle, so retry is unbounded and its cadence is the
//! collection interval.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hivewatch_core::ErrorSink;
use hivewatch_store::Store;

use crate::uploader::{SubmitError, Submitter};

/// Outcome of one sync cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Records a submit was started for.
    pub attempted: usize,
    /// Records acknowledged and marked synced.
    pub succeeded: usize,
    /// Records left unsynced after a failed submit.
    pub failed: usize,
    /// The cycle stopped early because shutdown was requested.
    pub cancelled: bool,
}

/// Drains the unsynced backlog of a [`Store`] into a [`Submitter`].
pub struct SyncEngine<'a> {
    store: &'a Mutex<Store>,
    sink: &'a dyn ErrorSink,
    submit_timeout: Duration,
}

impl<'a> SyncEngine<'a> {
    pub fn new(store: &'a Mutex<Store>, sink: &'a dyn ErrorSink, submit_timeout: Duration) -> Self {
        Self {
            store,
            sink,
            submit_timeout,
        }
    }

    /// Run one sync cycle.
    ///
    /// The store lock is held only for individual queries, never across a
    /// submit. Cancellation is checked between records, so an in-flight
    /// submit always completes or fails before the cycle returns.
    ///
    /// # Errors
    ///
    /// Returns a store error if the backlog cannot be read or a delivered
    /// record cannot be marked. The record stays unsynced and will be
    /// delivered again next cycle.
    pub async fn run_sync_cycle(
        &self,
        submitter: &dyn Submitter,
        cancel: &CancellationToken,
    ) -> hivewatch_store::Result<SyncReport> {
        let backlog = self.store.lock().await.fetch_unsynced()?;
        let mut report = SyncReport::default();

        if backlog.is_empty() {
            debug!("Sync cycle: nothing to deliver");
            return Ok(report);
        }
        debug!("Sync cycle: {} unsynced records", backlog.len());

        for record in &backlog {
            if cancel.is_cancelled() {
                info!(
                    "Sync cycle cancelled with {} records pending",
                    backlog.len() - report.attempted
                );
                report.cancelled = true;
                break;
            }

            report.attempted += 1;
            let result = match tokio::time::timeout(self.submit_timeout, submitter.submit(record))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(SubmitError::Timeout(self.submit_timeout)),
            };

            match result {
                Ok(()) => {
                    self.store.lock().await.mark_synced(record.id)?;
                    report.succeeded += 1;
                }
                Err(e) => {
                    warn!("Record {} not delivered: {}", record.id, e);
                    self.sink
                        .record(e.code(), &format!("record {}: {}", record.id, e));
                    report.failed += 1;
                }
            }
        }

        info!(
            "Sync cycle: {}/{} records delivered",
            report.succeeded, report.attempted
        );
        Ok(report)
    }
}
