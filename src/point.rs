//! Captured position records.

use serde::{Deserialize, Serialize};

/// Free-form metadata collected alongside a capture.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointContext {
    /// Battery level in percent (0-100).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery: Option<u8>,
    /// Mobile carrier name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carrier: Option<String>,
    /// Human-readable device label, overriding the configured device name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_label: Option<String>,
}

impl PointContext {
    /// Returns `true` when no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.battery.is_none() && self.carrier.is_none() && self.device_label.is_none()
    }
}

/// One accepted position sample.
///
/// Created once by the capture scheduler and never mutated afterwards. The
/// `id` is the capture time in epoch milliseconds, made strictly increasing
/// within a process so it doubles as identity and sort key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedPoint {
    /// Monotonic capture time (epoch milliseconds).
    pub id: u64,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Horizontal accuracy in meters.
    pub accuracy: f64,
    /// Wall-clock capture time (epoch milliseconds).
    pub captured_at: u64,
    /// Optional capture metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<PointContext>,
}

impl CapturedPoint {
    /// Absolute time distance to `other` in milliseconds.
    #[must_use]
    pub fn millis_apart(&self, other: &CapturedPoint) -> u64 {
        self.captured_at.abs_diff(other.captured_at)
    }

    /// Returns `true` when both coordinates lie within `epsilon_deg` of `other`.
    #[must_use]
    pub fn same_place(&self, other: &CapturedPoint, epsilon_deg: f64) -> bool {
        (self.latitude - other.latitude).abs() <= epsilon_deg
            && (self.longitude - other.longitude).abs() <= epsilon_deg
    }
}

/// Current epoch time in milliseconds.
#[must_use]
pub fn now_epoch_millis() -> u64 {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(duration) => u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        Err(_) => 0,
    }
}
