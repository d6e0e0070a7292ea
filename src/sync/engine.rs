//! Queue flushing.
//!
//! A flush walks the queue oldest first and delivers each entry on its own.
//! A failed entry stays queued with its attempt count bumped and the pass
//! moves on, so one bad entry never blocks the rest.

use crate::point::now_epoch_millis;
use crate::store::{SyncStateStore, UploadQueue};
use crate::sync::connectivity::ConnectivityProbe;
use crate::sync::sink::{DeliveryError, DeliverySink};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

/// How a flush pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushStatus {
    /// Every queued entry was attempted.
    #[default]
    Completed,
    /// Another pass was running; this one did nothing.
    AlreadyRunning,
    /// No delivery endpoint; entries were left untouched.
    NotConfigured,
}

/// Summary of one flush pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// How the pass ended.
    pub status: FlushStatus,
    /// Ids confirmed delivered, in delivery order.
    pub delivered: Vec<u64>,
    /// Entries that failed and stay queued.
    pub failed: usize,
    /// Entries still queued after the pass.
    pub remaining: usize,
}

/// Clears the flush flag when dropped.
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Delivers queued points and records the last confirmed delivery.
pub struct SyncEngine {
    queue: Arc<UploadQueue>,
    sync_state: Arc<SyncStateStore>,
    sink: Arc<dyn DeliverySink>,
    connectivity: Arc<dyn ConnectivityProbe>,
    flushing: AtomicBool,
}

impl SyncEngine {
    /// Create a sync engine.
    pub fn new(
        queue: Arc<UploadQueue>,
        sync_state: Arc<SyncStateStore>,
        sink: Arc<dyn DeliverySink>,
        connectivity: Arc<dyn ConnectivityProbe>,
    ) -> Self {
        Self {
            queue,
            sync_state,
            sink,
            connectivity,
            flushing: AtomicBool::new(false),
        }
    }

    /// Whether the connectivity probe reports the network as usable.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Attempt every queued entry now.
    ///
    /// Each outcome is stamped with the wall clock at the moment its
    /// delivery finished.
    pub async fn flush(&self) -> FlushReport {
        self.flush_with_clock(now_epoch_millis).await
    }

    /// Attempt every queued entry, stamping successes and failures with `now_ms`.
    pub async fn flush_at(&self, now_ms: u64) -> FlushReport {
        self.flush_with_clock(|| now_ms).await
    }

    async fn flush_with_clock(&self, clock: impl Fn() -> u64) -> FlushReport {
        if self
            .flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(category = "SYNC", "flush already running, ignoring trigger");
            return FlushReport {
                status: FlushStatus::AlreadyRunning,
                remaining: self.queue.len(),
                ..FlushReport::default()
            };
        }
        let _guard = FlushGuard(&self.flushing);

        let pending = self.queue.snapshot();
        if pending.is_empty() {
            return FlushReport::default();
        }
        info!(category = "SYNC", pending = pending.len(), "syncing offline points");

        let mut report = FlushReport::default();
        for entry in pending {
            let point_id = entry.point.id;
            let delivered = self.sink.deliver(&entry.point).await;
            let now_ms = clock();
            match delivered {
                Ok(()) => {
                    if let Err(e) = self.queue.mark_delivered(point_id) {
                        error!(category = "SYNC", point_id, error = %e, "cannot dequeue delivered point");
                    }
                    if let Err(e) = self.sync_state.record_upload_success(now_ms) {
                        error!(category = "SYNC", error = %e, "cannot persist upload time");
                    }
                    info!(category = "SHEETS", point_id, "sent to sheets");
                    report.delivered.push(point_id);
                }
                Err(DeliveryError::NotConfigured) => {
                    warn!(category = "SHEETS", "sheets URL not configured, skipping upload");
                    report.status = FlushStatus::NotConfigured;
                    break;
                }
                Err(e) => {
                    let attempts = entry.attempts.saturating_add(1);
                    warn!(category = "SHEETS", point_id, attempts, error = %e, "upload failed");
                    if let Err(persist) = self.queue.mark_failed(point_id, &e.to_string(), now_ms) {
                        error!(category = "SYNC", point_id, error = %persist, "cannot record failed attempt");
                    }
                    report.failed += 1;
                }
            }
        }

        report.remaining = self.queue.len();
        info!(
            category = "SYNC",
            delivered = report.delivered.len(),
            failed = report.failed,
            remaining = report.remaining,
            "sync pass finished"
        );
        report
    }
}
