//! Delivery sinks.

use crate::config::SyncConfig;
use crate::error::{Result, TrackerError};
use crate::point::CapturedPoint;
use crate::sync::wire::WireFormat;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Why a single delivery did not count as confirmed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The sink answered with a status other than 200 or 302.
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    /// Transport failure before a response arrived.
    #[error("network error: {0}")]
    Network(String),
    /// No response within the request timeout.
    #[error("delivery timed out")]
    Timeout,
    /// No endpoint configured.
    #[error("delivery endpoint not configured")]
    NotConfigured,
}

/// Remote destination for captured points.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Deliver one point. `Ok` means the sink acknowledged it.
    async fn deliver(&self, point: &CapturedPoint) -> std::result::Result<(), DeliveryError>;
}

/// Returns `true` for statuses the remote endpoint uses to acknowledge a row.
///
/// The spreadsheet web app answers a successful POST with a 302 to its
/// result page, so the redirect itself is the acknowledgement.
#[must_use]
pub fn is_acknowledged(status: u16) -> bool {
    status == 200 || status == 302
}

/// JSON-over-HTTP POST sink.
pub struct HttpSink {
    endpoint_url: String,
    wire: WireFormat,
    client: reqwest::Client,
}

impl HttpSink {
    /// Build a sink from the `[sync]` section.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Delivery`] if the HTTP client cannot be built.
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.request_timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| TrackerError::Delivery(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            endpoint_url: config.endpoint_url.trim().to_owned(),
            wire: WireFormat::from_config(config),
            client,
        })
    }
}

#[async_trait]
impl DeliverySink for HttpSink {
    async fn deliver(&self, point: &CapturedPoint) -> std::result::Result<(), DeliveryError> {
        if self.endpoint_url.is_empty() {
            return Err(DeliveryError::NotConfigured);
        }

        let payload = self.wire.payload(point);
        let response = self
            .client
            .post(&self.endpoint_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout
                } else {
                    DeliveryError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        debug!(category = "SHEETS", point_id = point.id, status, "sheets response");
        if is_acknowledged(status) {
            Ok(())
        } else {
            Err(DeliveryError::Status(status))
        }
    }
}
