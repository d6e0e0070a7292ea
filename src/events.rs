//! Engine notifications for observers (host bridge, UI).

use crate::point::CapturedPoint;
use crate::watchdog::StaleAlert;
use serde::Serialize;

/// Something observable happened inside the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EngineEvent {
    /// A capture was accepted and stored.
    PointCaptured(CapturedPoint),
    /// A queued point was acknowledged by the sink.
    PointDelivered {
        /// Delivered point id.
        point_id: u64,
    },
    /// The staleness watchdog fired.
    StaleAlert(StaleAlert),
    /// Capture stopped because location permission is gone.
    PermissionDenied {
        /// Whether the user still has tracking switched on.
        tracking_active: bool,
    },
}

impl EngineEvent {
    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::PointCaptured(_) => "point.captured",
            Self::PointDelivered { .. } => "point.delivered",
            Self::StaleAlert(_) => "alert.stale",
            Self::PermissionDenied { .. } => "capture.permission_denied",
        }
    }

    /// Event body as JSON.
    #[must_use]
    pub fn payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_the_bare_body() {
        let event = EngineEvent::PointDelivered { point_id: 42 };
        assert_eq!(event.name(), "point.delivered");
        assert_eq!(event.payload(), serde_json::json!({"point_id": 42}));
    }

    #[test]
    fn captured_payload_carries_point_fields() {
        let event = EngineEvent::PointCaptured(CapturedPoint {
            id: 7,
            latitude: 1.5,
            longitude: 2.5,
            accuracy: 3.0,
            captured_at: 7,
            context: None,
        });
        let payload = event.payload();
        assert_eq!(payload["id"], 7);
        assert_eq!(payload["latitude"], 1.5);
        assert!(payload.get("context").is_none());
    }
}
