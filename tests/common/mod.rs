//! Test doubles shared by the integration tests.
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;
use traceract::capture::{CaptureDeps, CaptureEvent, CaptureScheduler};
use traceract::config::CaptureConfig;
use traceract::context::NoContext;
use traceract::dedup::DedupFilter;
use traceract::lifecycle::RestartScheduler;
use traceract::point::CapturedPoint;
use traceract::position::{CaptureError, PositionFix, PositionProvider};
use traceract::store::{HistoryStore, SyncStateStore, UploadQueue};
use traceract::sync::{DeliveryError, DeliverySink};
use traceract::tracker_dirs::StorePaths;
use traceract::watchdog::{AlertDispatcher, StaleAlert};

pub const T0: u64 = 1_700_000_000_000;

pub fn fix(latitude: f64, longitude: f64) -> PositionFix {
    PositionFix {
        latitude,
        longitude,
        accuracy_m: 8.0,
        fix_timestamp_ms: 0,
    }
}

/// Provider answering from a queue of fixes, optionally held behind a gate.
#[derive(Default)]
pub struct QueuedProvider {
    fixes: Mutex<VecDeque<Result<PositionFix, CaptureError>>>,
    calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
}

impl QueuedProvider {
    pub fn new(fixes: Vec<Result<PositionFix, CaptureError>>) -> Self {
        Self {
            fixes: Mutex::new(fixes.into()),
            ..Self::default()
        }
    }

    pub fn gated(fixes: Vec<Result<PositionFix, CaptureError>>, gate: Arc<Notify>) -> Self {
        Self {
            fixes: Mutex::new(fixes.into()),
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PositionProvider for QueuedProvider {
    async fn get_position(&self, _timeout: Duration) -> Result<PositionFix, CaptureError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.fixes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(fix(30.0 + call as f64 * 0.01, 40.0)))
    }
}

/// Sink that fails every delivery while `network_down` is set.
#[derive(Default)]
pub struct SwitchableSink {
    network_down: AtomicBool,
    delivered: Mutex<Vec<u64>>,
}

impl SwitchableSink {
    pub fn set_network_down(&self, down: bool) {
        self.network_down.store(down, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<u64> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliverySink for SwitchableSink {
    async fn deliver(&self, point: &CapturedPoint) -> Result<(), DeliveryError> {
        if self.network_down.load(Ordering::SeqCst) {
            return Err(DeliveryError::Network("connection refused".to_owned()));
        }
        self.delivered.lock().unwrap().push(point.id);
        Ok(())
    }
}

#[derive(Default)]
pub struct CollectingAlerts {
    alerts: Mutex<Vec<StaleAlert>>,
}

impl CollectingAlerts {
    pub fn alerts(&self) -> Vec<StaleAlert> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertDispatcher for CollectingAlerts {
    async fn dispatch(&self, alert: &StaleAlert) -> anyhow::Result<()> {
        self.alerts.lock().unwrap().push(*alert);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingRestarts {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingRestarts {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl RestartScheduler for RecordingRestarts {
    async fn schedule_restart(&self, delay: Duration) -> anyhow::Result<()> {
        self.delays.lock().unwrap().push(delay);
        Ok(())
    }
}

/// Durable stores inside a temporary directory.
pub struct Stores {
    pub dir: TempDir,
    pub paths: StorePaths,
    pub history: Arc<HistoryStore>,
    pub queue: Arc<UploadQueue>,
    pub sync_state: Arc<SyncStateStore>,
}

impl Stores {
    pub fn new(now_ms: u64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::in_dir(dir.path());
        let history = Arc::new(HistoryStore::open(&paths.history, &paths.history_backup, 50));
        let queue = Arc::new(UploadQueue::open(&paths.queue).unwrap());
        let sync_state = Arc::new(SyncStateStore::open(&paths.sync_state, 300, now_ms).unwrap());
        Self {
            dir,
            paths,
            history,
            queue,
            sync_state,
        }
    }

    /// Scheduler over these stores with default guards.
    pub fn scheduler(
        &self,
        provider: Arc<dyn PositionProvider>,
    ) -> (CaptureScheduler, tokio::sync::mpsc::UnboundedReceiver<CaptureEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let config = CaptureConfig::default();
        let scheduler = CaptureScheduler::new(
            CaptureDeps {
                provider,
                context: Arc::new(NoContext),
                history: Arc::clone(&self.history),
                queue: Arc::clone(&self.queue),
                sync_state: Arc::clone(&self.sync_state),
            },
            &config,
            DedupFilter::new(1e-5, 45_000),
            tx,
        );
        (scheduler, rx)
    }
}
