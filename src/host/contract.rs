//! Versioned host command/event envelopes.

use serde::{Deserialize, Serialize};

/// Contract version for host command/event envelopes.
pub const EVENT_VERSION: u32 = 1;

/// Commands accepted from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandName {
    #[serde(rename = "host.ping")]
    HostPing,
    #[serde(rename = "host.version")]
    HostVersion,
    #[serde(rename = "tracking.start")]
    TrackingStart,
    #[serde(rename = "tracking.stop")]
    TrackingStop,
    #[serde(rename = "tracking.set_interval")]
    TrackingSetInterval,
    #[serde(rename = "tracking.status")]
    TrackingStatus,
    #[serde(rename = "tracking.capture_now")]
    TrackingCaptureNow,
    #[serde(rename = "history.list")]
    HistoryList,
    #[serde(rename = "history.clear")]
    HistoryClear,
    #[serde(rename = "queue.list")]
    QueueList,
    #[serde(rename = "queue.flush")]
    QueueFlush,
    #[serde(rename = "signal.connectivity_restored")]
    SignalConnectivityRestored,
    #[serde(rename = "signal.connectivity_lost")]
    SignalConnectivityLost,
    #[serde(rename = "signal.boot_completed")]
    SignalBootCompleted,
    #[serde(rename = "signal.terminating")]
    SignalTerminating,
    #[serde(rename = "context.set")]
    ContextSet,
    #[serde(rename = "position.fix")]
    PositionFix,
    #[serde(rename = "position.error")]
    PositionError,
}

impl CommandName {
    /// Every command, in documentation order.
    pub const ALL: [CommandName; 18] = [
        Self::HostPing,
        Self::HostVersion,
        Self::TrackingStart,
        Self::TrackingStop,
        Self::TrackingSetInterval,
        Self::TrackingStatus,
        Self::TrackingCaptureNow,
        Self::HistoryList,
        Self::HistoryClear,
        Self::QueueList,
        Self::QueueFlush,
        Self::SignalConnectivityRestored,
        Self::SignalConnectivityLost,
        Self::SignalBootCompleted,
        Self::SignalTerminating,
        Self::ContextSet,
        Self::PositionFix,
        Self::PositionError,
    ];

    /// Render command name to wire format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HostPing => "host.ping",
            Self::HostVersion => "host.version",
            Self::TrackingStart => "tracking.start",
            Self::TrackingStop => "tracking.stop",
            Self::TrackingSetInterval => "tracking.set_interval",
            Self::TrackingStatus => "tracking.status",
            Self::TrackingCaptureNow => "tracking.capture_now",
            Self::HistoryList => "history.list",
            Self::HistoryClear => "history.clear",
            Self::QueueList => "queue.list",
            Self::QueueFlush => "queue.flush",
            Self::SignalConnectivityRestored => "signal.connectivity_restored",
            Self::SignalConnectivityLost => "signal.connectivity_lost",
            Self::SignalBootCompleted => "signal.boot_completed",
            Self::SignalTerminating => "signal.terminating",
            Self::ContextSet => "context.set",
            Self::PositionFix => "position.fix",
            Self::PositionError => "position.error",
        }
    }

    /// Parse a command name from wire format.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == raw)
    }
}

/// A versioned command envelope from host -> engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub v: u32,
    pub request_id: String,
    pub command: CommandName,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl CommandEnvelope {
    /// Build a v1 command envelope.
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        command: CommandName,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            command,
            payload,
        }
    }

    /// Validate envelope version and required identifiers.
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.v != EVENT_VERSION {
            return Err(ContractError::UnsupportedVersion {
                got: self.v,
                expected: EVENT_VERSION,
            });
        }
        if self.request_id.trim().is_empty() {
            return Err(ContractError::InvalidEnvelope(
                "request_id cannot be empty".to_owned(),
            ));
        }
        Ok(())
    }
}

/// A versioned response envelope from engine -> host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub v: u32,
    pub request_id: String,
    pub ok: bool,
    pub payload: serde_json::Value,
    pub error: Option<String>,
}

impl ResponseEnvelope {
    /// Build a successful response envelope.
    #[must_use]
    pub fn ok(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: true,
            payload,
            error: None,
        }
    }

    /// Build an error response envelope.
    #[must_use]
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: false,
            payload: serde_json::Value::Null,
            error: Some(message.into()),
        }
    }
}

/// A versioned event envelope from engine -> host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub v: u32,
    pub event_id: String,
    pub event: String,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Build a v1 event envelope with a fresh id.
    #[must_use]
    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            v: EVENT_VERSION,
            event_id: uuid::Uuid::new_v4().to_string(),
            event: event.into(),
            payload,
        }
    }
}

/// Envelope validation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractError {
    #[error("unsupported contract version {got}; expected {expected}")]
    UnsupportedVersion { got: u32, expected: u32 },
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),
}
