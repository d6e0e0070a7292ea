//! JSON body posted for each delivered point.

use crate::config::SyncConfig;
use crate::point::CapturedPoint;
use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

/// One delivery request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryPayload {
    /// Device label shown in the remote sheet.
    pub device_name: String,
    /// English weekday name, e.g. `Monday`.
    pub day: String,
    /// `dd/MM/yyyy`.
    pub date: String,
    /// `hh:mm:ss AM|PM`.
    pub time: String,
    /// Latitude, 6 decimals.
    pub latitude: f64,
    /// Longitude, 6 decimals.
    pub longitude: f64,
    /// Battery percent, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<u8>,
    /// Carrier name, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carrier: Option<String>,
}

/// Renders points into [`DeliveryPayload`]s.
#[derive(Debug, Clone)]
pub struct WireFormat {
    device_name: String,
    offset: FixedOffset,
}

impl WireFormat {
    /// Build a formatter. An out-of-range offset falls back to UTC.
    #[must_use]
    pub fn new(device_name: impl Into<String>, utc_offset_minutes: i32) -> Self {
        let offset = utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix());
        Self {
            device_name: device_name.into(),
            offset,
        }
    }

    /// Build a formatter from the `[sync]` config section.
    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.device_name.clone(), config.utc_offset_minutes)
    }

    /// Payload for `point`. A context device label overrides the configured name.
    #[must_use]
    pub fn payload(&self, point: &CapturedPoint) -> DeliveryPayload {
        let local = DateTime::<Utc>::from_timestamp_millis(
            i64::try_from(point.captured_at).unwrap_or(i64::MAX),
        )
        .unwrap_or_default()
        .with_timezone(&self.offset);

        let context = point.context.as_ref();
        DeliveryPayload {
            device_name: context
                .and_then(|c| c.device_label.clone())
                .unwrap_or_else(|| self.device_name.clone()),
            day: local.format("%A").to_string(),
            date: local.format("%d/%m/%Y").to_string(),
            time: local.format("%I:%M:%S %p").to_string(),
            latitude: round6(point.latitude),
            longitude: round6(point.longitude),
            battery: context.and_then(|c| c.battery),
            carrier: context.and_then(|c| c.carrier.clone()),
        }
    }
}

fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}
