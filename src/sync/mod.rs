//! Offline-first delivery of captured points.

pub mod connectivity;
pub mod engine;
pub mod sink;
pub mod wire;

pub use connectivity::{ConnectivityFlag, ConnectivityProbe};
pub use engine::{FlushReport, FlushStatus, SyncEngine};
pub use sink::{DeliveryError, DeliverySink, HttpSink, is_acknowledged};
pub use wire::{DeliveryPayload, WireFormat};
