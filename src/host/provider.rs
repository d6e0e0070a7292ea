//! Collaborators backed by the host process.
//!
//! Sensor access and process relaunch live in the host app. The engine asks
//! for them through events on the bridge and the host answers with commands.

use crate::host::contract::EventEnvelope;
use crate::lifecycle::RestartScheduler;
use crate::position::{CaptureError, PositionFix, PositionProvider};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

type FixReply = Result<PositionFix, CaptureError>;

struct PendingRequest {
    request_id: String,
    reply: oneshot::Sender<FixReply>,
}

/// Position provider that asks the host for a fix via `position.requested`
/// and waits for `position.fix` or `position.error`.
pub struct HostPositionProvider {
    events: broadcast::Sender<EventEnvelope>,
    pending: Mutex<Option<PendingRequest>>,
}

impl HostPositionProvider {
    /// Create a provider publishing requests on `events`.
    #[must_use]
    pub fn new(events: broadcast::Sender<EventEnvelope>) -> Self {
        Self {
            events,
            pending: Mutex::new(None),
        }
    }

    /// Answer the outstanding request.
    ///
    /// With `request_id` set, only a matching request is answered. Returns
    /// `false` when nothing was waiting.
    pub fn resolve(&self, request_id: Option<&str>, reply: FixReply) -> bool {
        let pending = match self.pending.lock() {
            Ok(mut slot) => {
                let matches = match (slot.as_ref(), request_id) {
                    (Some(p), Some(id)) => p.request_id == id,
                    (Some(_), None) => true,
                    (None, _) => false,
                };
                if matches { slot.take() } else { None }
            }
            Err(_) => None,
        };
        match pending {
            Some(p) => p.reply.send(reply).is_ok(),
            None => {
                debug!(category = "LOCATION", ?request_id, "no position request waiting");
                false
            }
        }
    }

    /// Id of the request currently waiting for the host, if any.
    #[must_use]
    pub fn pending_request_id(&self) -> Option<String> {
        self.pending
            .lock()
            .ok()
            .and_then(|p| p.as_ref().map(|p| p.request_id.clone()))
    }

    fn clear_if(&self, request_id: &str) {
        if let Ok(mut slot) = self.pending.lock() {
            if slot.as_ref().is_some_and(|p| p.request_id == request_id) {
                slot.take();
            }
        }
    }
}

#[async_trait]
impl PositionProvider for HostPositionProvider {
    async fn get_position(&self, timeout: Duration) -> Result<PositionFix, CaptureError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let (reply, rx) = oneshot::channel();
        if let Ok(mut slot) = self.pending.lock() {
            *slot = Some(PendingRequest {
                request_id: request_id.clone(),
                reply,
            });
        }

        let requested = EventEnvelope::new(
            "position.requested",
            serde_json::json!({
                "request_id": request_id,
                "timeout_ms": timeout.as_millis() as u64,
            }),
        );
        if self.events.send(requested).is_err() {
            self.clear_if(&request_id);
            return Err(CaptureError::ProviderUnavailable(
                "no host listening for position requests".to_owned(),
            ));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(CaptureError::ProviderUnavailable(
                "position request superseded".to_owned(),
            )),
            Err(_) => {
                self.clear_if(&request_id);
                Err(CaptureError::Timeout)
            }
        }
    }
}

/// Restart scheduler that asks the host to relaunch the engine.
pub struct HostRestartScheduler {
    events: broadcast::Sender<EventEnvelope>,
}

impl HostRestartScheduler {
    /// Create a scheduler publishing on `events`.
    #[must_use]
    pub fn new(events: broadcast::Sender<EventEnvelope>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl RestartScheduler for HostRestartScheduler {
    async fn schedule_restart(&self, delay: Duration) -> anyhow::Result<()> {
        let event = EventEnvelope::new(
            "restart.requested",
            serde_json::json!({ "delay_ms": delay.as_millis() as u64 }),
        );
        if self.events.send(event).is_err() {
            warn!(category = "SERVICE", "no host listening for restart requests");
            anyhow::bail!("host event channel has no listeners");
        }
        Ok(())
    }
}
