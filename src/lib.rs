//! Traceract: durable capture-store-sync engine for periodic location tracking.
//!
//! The engine samples device position on a fixed cadence, keeps a bounded
//! local history, queues every accepted point for delivery to a remote
//! HTTP endpoint and retries until the endpoint acknowledges it.
//!
//! # Architecture
//!
//! - **Capture**: timer-driven scheduler with single-flight and min-gap guards
//! - **Dedup**: rejects repeated ids and near-identical fixes within a window
//! - **Store**: history with primary/backup slots, offline queue, sync state
//! - **Sync**: FIFO queue flushing through a [`sync::DeliverySink`]
//! - **Watchdog**: alerts when deliveries have stalled for too long
//! - **Lifecycle**: resumes tracking after restarts and reboots
//! - **Host**: JSON command/event bridge for the embedding app

pub mod capture;
pub mod config;
pub mod context;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod events;
pub mod host;
pub mod lifecycle;
pub mod logging;
pub mod point;
pub mod position;
pub mod store;
pub mod sync;
pub mod tracker_dirs;
pub mod watchdog;

#[cfg(test)]
mod test_utils;

pub use config::TrackerConfig;
pub use engine::{EngineParts, TrackerEngine, TrackerStatus};
pub use error::{Result, TrackerError};
pub use events::EngineEvent;
pub use point::{CapturedPoint, PointContext};
pub use position::{CaptureError, PositionFix, PositionProvider};
