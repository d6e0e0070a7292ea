//! Position provider boundary.
//!
//! Raw sensor access lives outside the engine. The capture scheduler only
//! sees a [`PositionProvider`] that either yields a [`PositionFix`] or one
//! of the expected [`CaptureError`] outcomes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A position fix as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Horizontal accuracy in meters.
    pub accuracy_m: f64,
    /// Time the fix was taken (epoch milliseconds).
    pub fix_timestamp_ms: u64,
}

/// Expected failure outcomes of a position request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    /// No fix arrived within the request timeout.
    #[error("position request timed out")]
    Timeout,
    /// Location permission is not granted. Capturing cannot continue.
    #[error("location permission denied")]
    PermissionDenied,
    /// The provider is disabled or reported a transient fault.
    #[error("position provider unavailable: {0}")]
    ProviderUnavailable(String),
}

impl CaptureError {
    /// Returns `true` for outcomes the scheduler recovers from on its own.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::PermissionDenied)
    }
}

/// Source of position fixes.
#[async_trait]
pub trait PositionProvider: Send + Sync {
    /// Request a single fix, giving up after `timeout`.
    ///
    /// Implementations should honour `timeout` themselves; the scheduler also
    /// wraps the call and reports [`CaptureError::Timeout`] if it overruns.
    async fn get_position(&self, timeout: Duration) -> Result<PositionFix, CaptureError>;
}
