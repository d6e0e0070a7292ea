//! Error types for the traceract engine.

/// Top-level error type for the capture-store-sync engine.
///
/// Expected capture outcomes (timeouts, permission denial) are not errors at
/// this level; see [`crate::position::CaptureError`].
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// History or sync-state persistence error (write, verify, parse).
    #[error("storage error: {0}")]
    Storage(String),

    /// Offline upload queue persistence error.
    #[error("queue error: {0}")]
    Queue(String),

    /// Delivery sink construction or transport error.
    #[error("delivery error: {0}")]
    Delivery(String),

    /// Capture scheduler error (invalid cadence, timer state).
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Lifecycle supervisor error (restart request failed).
    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, TrackerError>;
