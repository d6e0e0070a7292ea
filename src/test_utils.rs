//! Shared test doubles used across unit test modules.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::point::CapturedPoint;
use crate::position::{CaptureError, PositionFix, PositionProvider};
use crate::store::{HistoryStore, SyncStateStore, UploadQueue};
use crate::sync::{DeliveryError, DeliverySink};
use crate::tracker_dirs::StorePaths;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

/// Fix at the given coordinates.
pub fn fix(latitude: f64, longitude: f64) -> PositionFix {
    PositionFix {
        latitude,
        longitude,
        accuracy_m: 12.0,
        fix_timestamp_ms: 0,
    }
}

/// Point with `captured_at == id`.
pub fn point(id: u64, latitude: f64, longitude: f64) -> CapturedPoint {
    CapturedPoint {
        id,
        latitude,
        longitude,
        accuracy: 12.0,
        captured_at: id,
        context: None,
    }
}

/// Provider replaying a script of outcomes; once exhausted it keeps
/// returning fresh fixes moving north by 0.01 degrees per call.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<PositionFix, CaptureError>>>,
    calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<PositionFix, CaptureError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    /// Every request blocks until `gate` is notified.
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PositionProvider for ScriptedProvider {
    async fn get_position(&self, _timeout: Duration) -> Result<PositionFix, CaptureError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(fix(10.0 + call as f64 * 0.01, 20.0)))
    }
}

/// Sink recording delivered ids and answering from a script.
#[derive(Default)]
pub struct RecordingSink {
    pub delivered: Mutex<Vec<u64>>,
    failures: Mutex<VecDeque<DeliveryError>>,
    offline: std::sync::atomic::AtomicBool,
}

impl RecordingSink {
    /// Fail the next deliveries with these errors, in order.
    pub fn fail_next(&self, errors: Vec<DeliveryError>) {
        self.failures.lock().unwrap().extend(errors);
    }

    /// Fail every delivery with a network error while `offline` is set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<u64> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn deliver(&self, point: &CapturedPoint) -> Result<(), DeliveryError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(DeliveryError::Network("offline".to_owned()));
        }
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.delivered.lock().unwrap().push(point.id);
        Ok(())
    }
}

/// Stores rooted in a fresh temp directory.
pub struct TempStores {
    pub dir: TempDir,
    pub paths: StorePaths,
    pub history: Arc<HistoryStore>,
    pub queue: Arc<UploadQueue>,
    pub sync_state: Arc<SyncStateStore>,
}

impl TempStores {
    pub fn new(capacity: usize, now_ms: u64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::in_dir(dir.path());
        let history = Arc::new(HistoryStore::open(
            &paths.history,
            &paths.history_backup,
            capacity,
        ));
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
}
