//! Production host command handler wrapping a [`TrackerEngine`].

use crate::capture::TriggerOutcome;
use crate::context::SharedContext;
use crate::engine::TrackerEngine;
use crate::error::{Result, TrackerError};
use crate::host::channel::CommandHandler;
use crate::host::contract::{
    CommandEnvelope, CommandName, EVENT_VERSION, EventEnvelope, ResponseEnvelope,
};
use crate::host::provider::HostPositionProvider;
use crate::lifecycle::{LifecycleSignal, SupervisorAction};
use crate::point::{PointContext, now_epoch_millis};
use crate::position::{CaptureError, PositionFix};
use crate::sync::ConnectivityFlag;
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Routes bridge commands into the engine and its host-backed collaborators.
pub struct TrackerHostHandler {
    engine: Arc<TrackerEngine>,
    provider: Arc<HostPositionProvider>,
    context: Arc<SharedContext>,
    connectivity: Arc<ConnectivityFlag>,
    event_tx: broadcast::Sender<EventEnvelope>,
}

#[derive(Debug, Default, Deserialize)]
struct IntervalPayload {
    interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LimitPayload {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct FixPayload {
    request_id: Option<String>,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    accuracy_m: f64,
    fix_timestamp_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FixErrorPayload {
    request_id: Option<String>,
    kind: String,
    #[serde(default)]
    message: String,
}

impl TrackerHostHandler {
    /// Create a handler. `event_tx` must be the same channel the provider
    /// and restart scheduler publish on.
    pub fn new(
        engine: Arc<TrackerEngine>,
        provider: Arc<HostPositionProvider>,
        context: Arc<SharedContext>,
        connectivity: Arc<ConnectivityFlag>,
        event_tx: broadcast::Sender<EventEnvelope>,
    ) -> Self {
        Self {
            engine,
            provider,
            context,
            connectivity,
            event_tx,
        }
    }

    /// Forward engine events to the host event channel until the engine's
    /// event channel closes.
    pub fn spawn_event_relay(&self) -> JoinHandle<()> {
        let mut engine_rx = self.engine.subscribe();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            loop {
                match engine_rx.recv().await {
                    Ok(event) => {
                        let _ = event_tx.send(EventEnvelope::new(event.name(), event.payload()));
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(lagged = n, "engine event relay lagged; some events were dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn handle_tracking_start(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let payload: IntervalPayload = parse_payload(envelope)?;
        let interval_secs = self.engine.start_tracking(payload.interval_secs)?;
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            json!({"tracking_active": true, "interval_secs": interval_secs}),
        ))
    }

    fn handle_tracking_set_interval(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let payload: IntervalPayload = parse_payload(envelope)?;
        let interval_secs = payload
            .interval_secs
            .ok_or_else(|| invalid_payload(envelope, "missing interval_secs"))?;
        self.engine.set_interval(interval_secs)?;
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            json!({"interval_secs": interval_secs}),
        ))
    }

    async fn handle_capture_now(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let outcome = self.engine.capture_now().await;
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            outcome_json(&outcome),
        ))
    }

    fn handle_history_list(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let payload: LimitPayload = parse_payload(envelope)?;
        let mut entries = self.engine.history();
        if let Some(limit) = payload.limit {
            entries.truncate(limit);
        }
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            json!({"entries": entries}),
        ))
    }

    async fn handle_connectivity_restored(
        &self,
        envelope: &CommandEnvelope,
    ) -> Result<ResponseEnvelope> {
        self.connectivity.set_online(true);
        let report = self.engine.connectivity_restored().await;
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            json!({"online": true, "flush": report}),
        ))
    }

    async fn handle_signal(
        &self,
        envelope: &CommandEnvelope,
        signal: LifecycleSignal,
    ) -> Result<ResponseEnvelope> {
        let action = self.engine.handle_signal(signal).await?;
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            action_json(action),
        ))
    }

    fn handle_context_set(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let context: PointContext = parse_payload(envelope)?;
        self.context.set(context);
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            json!({"accepted": true}),
        ))
    }

    fn handle_position_fix(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let payload: FixPayload = parse_required(envelope)?;
        let fix = PositionFix {
            latitude: payload.latitude,
            longitude: payload.longitude,
            accuracy_m: payload.accuracy_m,
            fix_timestamp_ms: payload.fix_timestamp_ms.unwrap_or_else(now_epoch_millis),
        };
        let consumed = self.provider.resolve(payload.request_id.as_deref(), Ok(fix));
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            json!({"consumed": consumed}),
        ))
    }

    fn handle_position_error(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let payload: FixErrorPayload = parse_required(envelope)?;
        let error = match payload.kind.as_str() {
            "timeout" => CaptureError::Timeout,
            "permission_denied" => CaptureError::PermissionDenied,
            "unavailable" => CaptureError::ProviderUnavailable(payload.message),
            other => {
                return Err(invalid_payload(envelope, &format!("unknown error kind `{other}`")));
            }
        };
        let consumed = self.provider.resolve(payload.request_id.as_deref(), Err(error));
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            json!({"consumed": consumed}),
        ))
    }
}

#[async_trait]
impl CommandHandler for TrackerHostHandler {
    async fn handle(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let id = envelope.request_id.clone();
        match envelope.command {
            CommandName::HostPing => Ok(ResponseEnvelope::ok(id, json!({"pong": true}))),
            CommandName::HostVersion => Ok(ResponseEnvelope::ok(
                id,
                json!({
                    "contract_version": EVENT_VERSION,
                    "engine_version": env!("CARGO_PKG_VERSION"),
                }),
            )),
            CommandName::TrackingStart => self.handle_tracking_start(envelope),
            CommandName::TrackingStop => {
                self.engine.stop_tracking()?;
                Ok(ResponseEnvelope::ok(id, json!({"tracking_active": false})))
            }
            CommandName::TrackingSetInterval => self.handle_tracking_set_interval(envelope),
            CommandName::TrackingStatus => Ok(ResponseEnvelope::ok(
                id,
                serde_json::to_value(self.engine.status()).unwrap_or(Value::Null),
            )),
            CommandName::TrackingCaptureNow => self.handle_capture_now(envelope).await,
            CommandName::HistoryList => self.handle_history_list(envelope),
            CommandName::HistoryClear => {
                self.engine.clear_history()?;
                Ok(ResponseEnvelope::ok(id, json!({"cleared": true})))
            }
            CommandName::QueueList => Ok(ResponseEnvelope::ok(
                id,
                json!({"entries": self.engine.pending()}),
            )),
            CommandName::QueueFlush => {
                let report = self.engine.flush_now().await;
                Ok(ResponseEnvelope::ok(id, json!({"flush": report})))
            }
            CommandName::SignalConnectivityRestored => {
                self.handle_connectivity_restored(envelope).await
            }
            CommandName::SignalConnectivityLost => {
                self.connectivity.set_online(false);
                info!(category = "SYNC", "connectivity lost");
                Ok(ResponseEnvelope::ok(id, json!({"online": false})))
            }
            CommandName::SignalBootCompleted => {
                self.handle_signal(envelope, LifecycleSignal::BootCompleted)
                    .await
            }
            CommandName::SignalTerminating => {
                self.handle_signal(envelope, LifecycleSignal::TerminationImminent)
                    .await
            }
            CommandName::ContextSet => self.handle_context_set(envelope),
            CommandName::PositionFix => self.handle_position_fix(envelope),
            CommandName::PositionError => self.handle_position_error(envelope),
        }
    }
}

/// Parse an optional payload; a missing payload yields the default.
fn parse_payload<T: DeserializeOwned + Default>(envelope: &CommandEnvelope) -> Result<T> {
    if envelope.payload.is_null() {
        return Ok(T::default());
    }
    parse_required(envelope)
}

fn parse_required<T: DeserializeOwned>(envelope: &CommandEnvelope) -> Result<T> {
    serde_json::from_value(envelope.payload.clone())
        .map_err(|e| invalid_payload(envelope, &e.to_string()))
}

fn invalid_payload(envelope: &CommandEnvelope, reason: &str) -> TrackerError {
    TrackerError::Channel(format!(
        "invalid payload for {}: {reason}",
        envelope.command.as_str()
    ))
}

fn outcome_json(outcome: &TriggerOutcome) -> Value {
    match outcome {
        TriggerOutcome::Accepted(point) => json!({"outcome": "accepted", "point": point}),
        TriggerOutcome::SkippedInFlight => json!({"outcome": "skipped_in_flight"}),
        TriggerOutcome::SkippedTooSoon { since_last_ms } => {
            json!({"outcome": "skipped_too_soon", "since_last_ms": since_last_ms})
        }
        TriggerOutcome::Duplicate(reason) => {
            json!({"outcome": "duplicate", "reason": format!("{reason:?}")})
        }
        TriggerOutcome::Transient(e) => json!({"outcome": "transient", "error": e.to_string()}),
        TriggerOutcome::PermissionDenied => json!({"outcome": "permission_denied"}),
    }
}

fn action_json(action: SupervisorAction) -> Value {
    match action {
        SupervisorAction::Resumed { interval_secs } => {
            json!({"action": "resumed", "interval_secs": interval_secs})
        }
        SupervisorAction::AlreadyRunning => json!({"action": "already_running"}),
        SupervisorAction::StayedIdle => json!({"action": "stayed_idle"}),
        SupervisorAction::AwaitingPermission => json!({"action": "awaiting_permission"}),
        SupervisorAction::RestartScheduled { delay } => {
            json!({"action": "restart_scheduled", "delay_ms": delay.as_millis() as u64})
        }
        SupervisorAction::NoRestartNeeded => json!({"action": "no_restart_needed"}),
    }
}
