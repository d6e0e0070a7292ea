//! Headless engine binary speaking newline-delimited JSON on stdin/stdout.
//!
//! The embedding app sends `CommandEnvelope` lines and receives
//! `ResponseEnvelope` and `EventEnvelope` lines. Position fixes, context
//! updates and connectivity changes arrive as commands; position requests
//! and restart requests leave as events.
//!
//! All tracing/diagnostic output goes to stderr so that stdout remains a
//! clean JSON protocol channel.

use std::sync::Arc;
use tokio::sync::broadcast;
use traceract::config::TrackerConfig;
use traceract::context::SharedContext;
use traceract::engine::{EngineParts, TrackerEngine};
use traceract::host::{
    HostPositionProvider, HostRestartScheduler, TrackerHostHandler, run_stdio_bridge,
};
use traceract::lifecycle::LifecycleSignal;
use traceract::logging::init_logging;
use traceract::sync::{ConnectivityFlag, HttpSink};
use traceract::tracker_dirs::{StorePaths, logs_dir};
use traceract::watchdog::LogAlertDispatcher;

const EVENT_CAPACITY: usize = 128;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_logging(Some(&logs_dir()));

    let config_path = TrackerConfig::default_config_path();
    let config = TrackerConfig::load_or_default(&config_path)
        .map_err(|e| anyhow::anyhow!("cannot load {}: {e}", config_path.display()))?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        sink_configured = config.sync.is_configured(),
        "traceract-host starting"
    );

    // Subscribed before the engine starts: a resumed capture asks the host
    // for a position right away.
    let (event_tx, event_rx) = broadcast::channel(EVENT_CAPACITY);
    let provider = Arc::new(HostPositionProvider::new(event_tx.clone()));
    let context = Arc::new(SharedContext::default());
    let connectivity = Arc::new(ConnectivityFlag::default());
    let sink = Arc::new(HttpSink::new(&config.sync)?);

    let engine = Arc::new(TrackerEngine::open(
        config,
        &StorePaths::default_layout(),
        EngineParts {
            provider: provider.clone(),
            context: context.clone(),
            sink,
            connectivity: connectivity.clone(),
            alerts: Arc::new(LogAlertDispatcher),
            restarter: Arc::new(HostRestartScheduler::new(event_tx.clone())),
        },
    )?);

    let handler = Arc::new(TrackerHostHandler::new(
        Arc::clone(&engine),
        provider,
        context,
        connectivity,
        event_tx,
    ));
    let relay = handler.spawn_event_relay();

    engine.start_background();
    let action = engine.handle_signal(LifecycleSignal::ProcessStarted).await?;
    tracing::info!(?action, "startup recovery finished");

    let result = run_stdio_bridge(handler, event_rx).await;

    engine.shutdown().await;
    relay.abort();

    result.map_err(|e| {
        tracing::error!(error = %e, "traceract-host exited with error");
        anyhow::anyhow!("traceract-host failed: {e}")
    })?;
    tracing::info!("traceract-host shut down cleanly");
    Ok(())
}
