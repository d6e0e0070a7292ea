//! Periodic position capture.

pub mod scheduler;

pub use scheduler::{CaptureDeps, CaptureEvent, CaptureScheduler, TriggerOutcome};
