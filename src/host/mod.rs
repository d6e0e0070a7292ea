//! Host-facing command bridge for the native app that embeds the engine.

pub mod channel;
pub mod contract;
pub mod handler;
pub mod provider;
pub mod stdio;

pub use channel::{CommandHandler, HostCommandClient, HostCommandServer, command_channel};
pub use contract::{CommandEnvelope, CommandName, EVENT_VERSION, EventEnvelope, ResponseEnvelope};
pub use handler::TrackerHostHandler;
pub use provider::{HostPositionProvider, HostRestartScheduler};
pub use stdio::{run_bridge, run_stdio_bridge};
