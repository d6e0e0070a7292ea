//! Delivery staleness watchdog.
//!
//! Purely observational: each tick compares the persisted last-delivery time
//! against a threshold and hands an alert to the dispatcher. It never
//! captures or delivers.

use crate::config::WatchdogConfig;
use crate::point::now_epoch_millis;
use crate::store::SyncStateStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MILLIS_PER_HOUR: u64 = 3_600_000;

/// Raised when no delivery was confirmed for longer than the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleAlert {
    /// Last confirmed delivery (epoch milliseconds).
    pub last_successful_upload_at: u64,
    /// Time elapsed since then.
    pub elapsed_ms: u64,
    /// Whole hours elapsed.
    pub hours_since_upload: u64,
    /// Configured threshold in hours.
    pub threshold_hours: u64,
    /// When the check ran (epoch milliseconds).
    pub checked_at: u64,
}

/// Out-of-band alert transport (SMS, notification, ...).
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    /// Deliver `alert`.
    async fn dispatch(&self, alert: &StaleAlert) -> anyhow::Result<()>;
}

/// Dispatcher that only writes the alert to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertDispatcher;

#[async_trait]
impl AlertDispatcher for LogAlertDispatcher {
    async fn dispatch(&self, alert: &StaleAlert) -> anyhow::Result<()> {
        warn!(
            category = "SMS_CHECK",
            hours = alert.hours_since_upload,
            threshold = alert.threshold_hours,
            "no upload within threshold"
        );
        Ok(())
    }
}

/// Periodic staleness check.
pub struct StalenessWatchdog {
    sync_state: Arc<SyncStateStore>,
    dispatcher: Arc<dyn AlertDispatcher>,
    threshold_hours: u64,
    check_interval: Duration,
}

impl StalenessWatchdog {
    /// Create a watchdog from the `[watchdog]` section.
    pub fn new(
        sync_state: Arc<SyncStateStore>,
        dispatcher: Arc<dyn AlertDispatcher>,
        config: &WatchdogConfig,
    ) -> Self {
        Self {
            sync_state,
            dispatcher,
            threshold_hours: config.stale_threshold_hours,
            check_interval: Duration::from_secs(config.check_interval_secs.max(1)),
        }
    }

    /// Alert due at `now_ms`, if any. Strictly more than the threshold alerts.
    #[must_use]
    pub fn evaluate_at(&self, now_ms: u64) -> Option<StaleAlert> {
        let last = self.sync_state.snapshot().last_successful_upload_at;
        let elapsed_ms = now_ms.saturating_sub(last);
        let hours_since_upload = elapsed_ms / MILLIS_PER_HOUR;
        debug!(category = "SMS_CHECK", hours = hours_since_upload, "hours since last upload");

        let threshold_ms = self.threshold_hours.saturating_mul(MILLIS_PER_HOUR);
        (elapsed_ms > threshold_ms).then_some(StaleAlert {
            last_successful_upload_at: last,
            elapsed_ms,
            hours_since_upload,
            threshold_hours: self.threshold_hours,
            checked_at: now_ms,
        })
    }

    /// Run one check at `now_ms` and dispatch the alert if due.
    pub async fn check_at(&self, now_ms: u64) -> Option<StaleAlert> {
        let alert = self.evaluate_at(now_ms)?;
        info!(
            category = "SMS_CHECK",
            hours = alert.hours_since_upload,
            "upload stale, raising alert"
        );
        if let Err(e) = self.dispatcher.dispatch(&alert).await {
            error!(category = "SMS_CHECK", error = %e, "alert dispatch failed");
        }
        Some(alert)
    }

    /// Tick loop. The first check runs immediately.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.check_at(now_epoch_millis()).await;
                }
            }
        }
        debug!(category = "SMS_CHECK", "watchdog stopped");
    }
}
