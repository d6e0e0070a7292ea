//! Top-level wiring of the capture-store-sync engine.
//!
//! [`TrackerEngine`] owns the stores and components and runs three background
//! paths: the capture event pump, the periodic flush and the staleness
//! watchdog. Captures and deliveries run on separate tasks so a hung request
//! never delays the next capture trigger.

use crate::capture::{CaptureDeps, CaptureEvent, CaptureScheduler, TriggerOutcome};
use crate::config::{TrackerConfig, is_recognized_interval};
use crate::context::ContextSource;
use crate::dedup::DedupFilter;
use crate::error::{Result, TrackerError};
use crate::events::EngineEvent;
use crate::lifecycle::{LifecycleSignal, LifecycleSupervisor, RestartScheduler, SupervisorAction};
use crate::point::{CapturedPoint, now_epoch_millis};
use crate::position::PositionProvider;
use crate::store::{HistoryStore, QueueEntry, SyncStateStore, UploadQueue};
use crate::sync::{ConnectivityProbe, DeliverySink, FlushReport, SyncEngine};
use crate::tracker_dirs::StorePaths;
use crate::watchdog::{AlertDispatcher, StaleAlert, StalenessWatchdog};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 128;

/// External collaborators the engine talks to.
pub struct EngineParts {
    /// Position source.
    pub provider: Arc<dyn PositionProvider>,
    /// Capture metadata source.
    pub context: Arc<dyn ContextSource>,
    /// Remote sink.
    pub sink: Arc<dyn DeliverySink>,
    /// Network availability.
    pub connectivity: Arc<dyn ConnectivityProbe>,
    /// Staleness alert transport.
    pub alerts: Arc<dyn AlertDispatcher>,
    /// Deferred relaunch primitive.
    pub restarter: Arc<dyn RestartScheduler>,
}

/// Point-in-time engine summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerStatus {
    /// Persisted user intent.
    pub tracking_active: bool,
    /// Whether the capture timer is running in this process.
    pub capture_running: bool,
    /// Capture is held off until location permission is granted again.
    pub capture_blocked: bool,
    /// Persisted cadence.
    pub interval_secs: u64,
    /// Entries in history.
    pub history_len: usize,
    /// Entries awaiting delivery.
    pub queue_len: usize,
    /// Last confirmed delivery (epoch milliseconds).
    pub last_successful_upload_at: u64,
    /// Whole hours since the last confirmed delivery.
    pub hours_since_upload: u64,
}

/// Forwards alerts to the configured dispatcher and to engine subscribers.
struct AlertFanout {
    inner: Arc<dyn AlertDispatcher>,
    events: broadcast::Sender<EngineEvent>,
}

#[async_trait]
impl AlertDispatcher for AlertFanout {
    async fn dispatch(&self, alert: &StaleAlert) -> anyhow::Result<()> {
        let _ = self.events.send(EngineEvent::StaleAlert(*alert));
        self.inner.dispatch(alert).await
    }
}

/// The capture-store-sync engine.
pub struct TrackerEngine {
    config: TrackerConfig,
    history: Arc<HistoryStore>,
    queue: Arc<UploadQueue>,
    sync_state: Arc<SyncStateStore>,
    scheduler: CaptureScheduler,
    sync: Arc<SyncEngine>,
    watchdog: Arc<StalenessWatchdog>,
    supervisor: LifecycleSupervisor,
    events: broadcast::Sender<EngineEvent>,
    capture_rx: Mutex<Option<mpsc::UnboundedReceiver<CaptureEvent>>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TrackerEngine {
    /// Open the durable stores under `paths` and assemble the engine.
    ///
    /// Nothing runs until [`TrackerEngine::start_background`] and a lifecycle
    /// signal (or [`TrackerEngine::start_tracking`]) are issued.
    pub fn open(config: TrackerConfig, paths: &StorePaths, parts: EngineParts) -> Result<Self> {
        config.validate()?;
        let now = now_epoch_millis();

        let history = Arc::new(HistoryStore::open(
            &paths.history,
            &paths.history_backup,
            config.history.capacity,
        ));
        let queue = Arc::new(UploadQueue::open(&paths.queue)?);
        let sync_state = Arc::new(SyncStateStore::open(
            &paths.sync_state,
            config.capture.interval_secs,
            now,
        )?);

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (capture_tx, capture_rx) = mpsc::unbounded_channel();

        let scheduler = CaptureScheduler::new(
            CaptureDeps {
                provider: parts.provider,
                context: parts.context,
                history: Arc::clone(&history),
                queue: Arc::clone(&queue),
                sync_state: Arc::clone(&sync_state),
            },
            &config.capture,
            DedupFilter::from_config(&config.dedup),
            capture_tx,
        );
        let sync = Arc::new(SyncEngine::new(
            Arc::clone(&queue),
            Arc::clone(&sync_state),
            parts.sink,
            parts.connectivity,
        ));
        let watchdog = Arc::new(StalenessWatchdog::new(
            Arc::clone(&sync_state),
            Arc::new(AlertFanout {
                inner: parts.alerts,
                events: events.clone(),
            }),
            &config.watchdog,
        ));
        let supervisor = LifecycleSupervisor::new(
            Arc::clone(&sync_state),
            scheduler.clone(),
            parts.restarter,
            Duration::from_millis(config.lifecycle.restart_delay_ms),
            config.capture.interval_secs,
        );

        info!(
            category = "SERVICE",
            history = history.len(),
            pending = queue.len(),
            "engine opened"
        );

        Ok(Self {
            config,
            history,
            queue,
            sync_state,
            scheduler,
            sync,
            watchdog,
            supervisor,
            events,
            capture_rx: Mutex::new(Some(capture_rx)),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Loaded configuration.
    #[must_use]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Subscribe to engine events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Spawn the event pump, the periodic flush and the watchdog.
    ///
    /// Calling this more than once has no effect.
    pub fn start_background(&self) {
        let Some(capture_rx) = self.capture_rx.lock().ok().and_then(|mut rx| rx.take()) else {
            debug!(category = "SERVICE", "background tasks already running");
            return;
        };

        let pump = tokio::spawn(run_capture_pump(
            capture_rx,
            Arc::clone(&self.sync),
            Arc::clone(&self.sync_state),
            self.events.clone(),
            self.cancel.clone(),
        ));
        let flusher = tokio::spawn(run_periodic_flush(
            Arc::clone(&self.sync),
            self.events.clone(),
            Duration::from_secs(self.config.sync.flush_interval_secs.max(1)),
            self.cancel.clone(),
        ));
        let watchdog = tokio::spawn(Arc::clone(&self.watchdog).run(self.cancel.clone()));

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.extend([pump, flusher, watchdog]);
        }
        info!(category = "SERVICE", "background tasks started");
    }

    /// Forward a host lifecycle signal to the supervisor.
    pub async fn handle_signal(&self, signal: LifecycleSignal) -> Result<SupervisorAction> {
        self.supervisor.handle(signal).await
    }

    /// Switch tracking on (durably) and start capturing.
    ///
    /// `interval_secs` defaults to the persisted cadence. Returns the cadence
    /// in use. An explicit start also lifts a permission block.
    pub fn start_tracking(&self, interval_secs: Option<u64>) -> Result<u64> {
        let interval_secs = interval_secs.unwrap_or(self.sync_state.snapshot().interval_secs);
        if !is_recognized_interval(interval_secs) {
            return Err(TrackerError::Scheduler(format!(
                "unrecognized capture interval {interval_secs}s"
            )));
        }
        self.sync_state.set_interval(interval_secs)?;
        self.sync_state.set_tracking(true)?;
        if self.sync_state.snapshot().capture_blocked {
            self.sync_state.set_capture_blocked(false)?;
        }
        self.scheduler.start(interval_secs)?;
        info!(category = "SERVICE", interval_secs, "tracking started");
        Ok(interval_secs)
    }

    /// Switch tracking off (durably) and stop the capture timer.
    pub fn stop_tracking(&self) -> Result<()> {
        self.sync_state.set_tracking(false)?;
        self.scheduler.stop();
        info!(category = "SERVICE", "tracking stopped");
        Ok(())
    }

    /// Change the cadence. Persisted immediately, applied live if running.
    pub fn set_interval(&self, interval_secs: u64) -> Result<()> {
        self.scheduler.set_interval(interval_secs)
    }

    /// Capture once now, outside the timer.
    pub async fn capture_now(&self) -> TriggerOutcome {
        self.scheduler.trigger_now().await
    }

    /// Flush the queue now and publish deliveries.
    pub async fn flush_now(&self) -> FlushReport {
        flush_and_publish(&self.sync, &self.events).await
    }

    /// The network came back: retry everything queued.
    pub async fn connectivity_restored(&self) -> FlushReport {
        info!(category = "SYNC", "connectivity restored, flushing queue");
        self.flush_now().await
    }

    /// History, most recent first.
    #[must_use]
    pub fn history(&self) -> Vec<CapturedPoint> {
        self.history.snapshot()
    }

    /// Entries awaiting delivery, oldest first.
    #[must_use]
    pub fn pending(&self) -> Vec<QueueEntry> {
        self.queue.snapshot()
    }

    /// Empty the history. Queued deliveries are untouched.
    pub fn clear_history(&self) -> Result<()> {
        self.history.clear()?;
        info!(category = "STORAGE", "history cleared");
        Ok(())
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> TrackerStatus {
        self.status_at(now_epoch_millis())
    }

    /// Status as seen at `now_ms`.
    #[must_use]
    pub fn status_at(&self, now_ms: u64) -> TrackerStatus {
        let state = self.sync_state.snapshot();
        TrackerStatus {
            tracking_active: state.tracking_active,
            capture_running: self.scheduler.is_running(),
            capture_blocked: state.capture_blocked,
            interval_secs: state.interval_secs,
            history_len: self.history.len(),
            queue_len: self.queue.len(),
            last_successful_upload_at: state.last_successful_upload_at,
            hours_since_upload: now_ms.saturating_sub(state.last_successful_upload_at) / 3_600_000,
        }
    }

    /// Stop timers and background tasks without touching the persisted
    /// tracking flag.
    pub async fn shutdown(&self) {
        self.scheduler.stop();
        self.cancel.cancel();
        let tasks = self
            .tasks
            .lock()
            .map(|mut tasks| std::mem::take(&mut *tasks))
            .unwrap_or_default();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(category = "SERVICE", error = %e, "background task ended abnormally");
            }
        }
        info!(category = "SERVICE", "engine shut down");
    }
}

async fn flush_and_publish(
    sync: &SyncEngine,
    events: &broadcast::Sender<EngineEvent>,
) -> FlushReport {
    let report = sync.flush().await;
    for point_id in &report.delivered {
        let _ = events.send(EngineEvent::PointDelivered {
            point_id: *point_id,
        });
    }
    report
}

async fn run_capture_pump(
    mut capture_rx: mpsc::UnboundedReceiver<CaptureEvent>,
    sync: Arc<SyncEngine>,
    sync_state: Arc<SyncStateStore>,
    events: broadcast::Sender<EngineEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = capture_rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            CaptureEvent::Accepted(point) => {
                let _ = events.send(EngineEvent::PointCaptured(point));
                if sync.is_online() {
                    let sync = Arc::clone(&sync);
                    let events = events.clone();
                    tokio::spawn(async move {
                        flush_and_publish(&sync, &events).await;
                    });
                } else {
                    debug!(category = "SYNC", "offline, point left in queue");
                }
            }
            CaptureEvent::PermissionDenied => {
                let _ = events.send(EngineEvent::PermissionDenied {
                    tracking_active: sync_state.snapshot().tracking_active,
                });
            }
        }
    }
    debug!(category = "SERVICE", "capture event pump stopped");
}

async fn run_periodic_flush(
    sync: Arc<SyncEngine>,
    events: broadcast::Sender<EngineEvent>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if sync.is_online() {
                    flush_and_publish(&sync, &events).await;
                } else {
                    debug!(category = "SYNC", "offline, periodic flush skipped");
                }
            }
        }
    }
    debug!(category = "SYNC", "periodic flush stopped");
}
