//! Capture cadence, single-flight guard and accept pipeline.
//!
//! The timer only fires triggers. Each trigger runs in its own task so that
//! stopping the timer never aborts a capture that is already in flight.

use crate::config::{CaptureConfig, is_recognized_interval};
use crate::context::ContextSource;
use crate::dedup::{DedupFilter, DuplicateReason};
use crate::error::{Result, TrackerError};
use crate::point::{CapturedPoint, now_epoch_millis};
use crate::position::{CaptureError, PositionProvider};
use crate::store::{HistoryStore, SyncStateStore, UploadQueue};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Notifications emitted by the capture path.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// A point passed every guard and was handed to history and queue.
    Accepted(CapturedPoint),
    /// The provider refused access; the timer has been stopped.
    PermissionDenied,
}

/// Result of a single trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    /// Another capture was still running; the trigger was dropped.
    SkippedInFlight,
    /// The previous accepted capture is too recent.
    SkippedTooSoon {
        /// Time since the last accepted capture.
        since_last_ms: u64,
    },
    /// The fix duplicated a stored point.
    Duplicate(DuplicateReason),
    /// Timeout or provider fault; scheduling continues.
    Transient(CaptureError),
    /// Location permission is gone; the timer was stopped.
    PermissionDenied,
    /// Stored and queued.
    Accepted(CapturedPoint),
}

/// Shared components the scheduler feeds.
pub struct CaptureDeps {
    /// Position source.
    pub provider: Arc<dyn PositionProvider>,
    /// Metadata attached at accept time.
    pub context: Arc<dyn ContextSource>,
    /// Bounded history.
    pub history: Arc<HistoryStore>,
    /// Offline upload queue.
    pub queue: Arc<UploadQueue>,
    /// Persisted flags (cadence, permission block).
    pub sync_state: Arc<SyncStateStore>,
}

struct TimerHandle {
    cancel: CancellationToken,
    interval_secs: u64,
}

struct CaptureInner {
    deps: CaptureDeps,
    dedup: DedupFilter,
    min_gap_ms: u64,
    position_timeout: Duration,
    in_flight: AtomicBool,
    /// Epoch millis of the last accepted capture, 0 if none.
    last_accepted_at: AtomicU64,
    last_id: AtomicU64,
    timer: Mutex<Option<TimerHandle>>,
    events: mpsc::UnboundedSender<CaptureEvent>,
}

/// Releases the single-flight flag when dropped.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Periodic capture driver. Cheap to clone.
#[derive(Clone)]
pub struct CaptureScheduler {
    inner: Arc<CaptureInner>,
}

impl CaptureScheduler {
    /// Create an idle scheduler.
    ///
    /// The minimum-gap guard and id sequence are seeded from the newest
    /// history entry so a restart cannot double-capture.
    pub fn new(
        deps: CaptureDeps,
        config: &CaptureConfig,
        dedup: DedupFilter,
        events: mpsc::UnboundedSender<CaptureEvent>,
    ) -> Self {
        let (last_at, last_id) = deps
            .history
            .latest()
            .map_or((0, 0), |p| (p.captured_at, p.id));
        Self {
            inner: Arc::new(CaptureInner {
                deps,
                dedup,
                min_gap_ms: u64::try_from(config.min_capture_gap().as_millis())
                    .unwrap_or(u64::MAX),
                position_timeout: config.position_timeout(),
                in_flight: AtomicBool::new(false),
                last_accepted_at: AtomicU64::new(last_at),
                last_id: AtomicU64::new(last_id),
                timer: Mutex::new(None),
                events,
            }),
        }
    }

    /// Start the timer: one trigger now, then one every `interval_secs`.
    ///
    /// Starting at the cadence already running is a no-op. Any other running
    /// cadence is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Scheduler`] for an unrecognized cadence.
    pub fn start(&self, interval_secs: u64) -> Result<()> {
        self.inner.start(interval_secs)
    }

    /// Cancel pending timer firings. An in-flight capture still completes.
    pub fn stop(&self) {
        if self.inner.stop_timer() {
            info!(category = "LOCATION", "capture timer stopped");
        }
    }

    /// Persist a new cadence and, if running, restart the timer with it.
    pub fn set_interval(&self, interval_secs: u64) -> Result<()> {
        validate_interval(interval_secs)?;
        self.inner.deps.sync_state.set_interval(interval_secs)?;
        if self.is_running() {
            self.inner.start(interval_secs)?;
        }
        info!(category = "LOCATION", interval_secs, "capture interval updated");
        Ok(())
    }

    /// Whether the timer is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.timer.lock().map(|t| t.is_some()).unwrap_or(false)
    }

    /// Cadence of the running timer.
    #[must_use]
    pub fn interval_secs(&self) -> Option<u64> {
        self.inner
            .timer
            .lock()
            .ok()
            .and_then(|t| t.as_ref().map(|h| h.interval_secs))
    }

    /// Run one capture attempt now.
    pub async fn trigger_now(&self) -> TriggerOutcome {
        self.inner.trigger_at(now_epoch_millis()).await
    }

    /// Run one capture attempt as if the trigger fired at `now_ms`.
    pub async fn trigger_at(&self, now_ms: u64) -> TriggerOutcome {
        self.inner.trigger_at(now_ms).await
    }
}

fn validate_interval(interval_secs: u64) -> Result<()> {
    if is_recognized_interval(interval_secs) {
        Ok(())
    } else {
        Err(TrackerError::Scheduler(format!(
            "unrecognized capture interval {interval_secs}s"
        )))
    }
}

impl CaptureInner {
    fn start(self: &Arc<Self>, interval_secs: u64) -> Result<()> {
        validate_interval(interval_secs)?;
        let mut timer = self
            .timer
            .lock()
            .map_err(|_| TrackerError::Scheduler("timer lock poisoned".to_owned()))?;

        if let Some(current) = timer.as_ref() {
            if current.interval_secs == interval_secs {
                debug!(category = "LOCATION", interval_secs, "capture timer already running");
                return Ok(());
            }
        }
        if let Some(previous) = timer.take() {
            previous.cancel.cancel();
        }

        let cancel = CancellationToken::new();
        let inner = Arc::clone(self);
        let token = cancel.clone();
        tokio::spawn(async move {
            inner.run_timer(interval_secs, token).await;
        });
        *timer = Some(TimerHandle {
            cancel,
            interval_secs,
        });
        info!(category = "LOCATION", interval_secs, "capture timer started");
        Ok(())
    }

    fn stop_timer(&self) -> bool {
        let handle = match self.timer.lock() {
            Ok(mut timer) => timer.take(),
            Err(_) => None,
        };
        match handle {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    async fn run_timer(self: Arc<Self>, interval_secs: u64, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let inner = Arc::clone(&self);
                    tokio::spawn(async move {
                        inner.trigger_at(now_epoch_millis()).await;
                    });
                }
            }
        }
        debug!(category = "LOCATION", interval_secs, "capture timer loop exited");
    }

    async fn trigger_at(&self, now_ms: u64) -> TriggerOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(category = "LOCATION", "capture already in progress, skipping");
            return TriggerOutcome::SkippedInFlight;
        }
        let _guard = InFlightGuard(&self.in_flight);

        let last = self.last_accepted_at.load(Ordering::Acquire);
        if last != 0 {
            if let Some(since_last_ms) = now_ms.checked_sub(last) {
                if since_last_ms < self.min_gap_ms {
                    debug!(
                        category = "LOCATION",
                        since_last_ms,
                        min_gap_ms = self.min_gap_ms,
                        "too soon since last capture, skipping"
                    );
                    return TriggerOutcome::SkippedTooSoon { since_last_ms };
                }
            }
        }

        let requested = tokio::time::timeout(
            self.position_timeout,
            self.deps.provider.get_position(self.position_timeout),
        )
        .await
        .unwrap_or(Err(CaptureError::Timeout));

        let fix = match requested {
            Ok(fix) => fix,
            Err(e) if e.is_transient() => {
                warn!(category = "LOCATION", error = %e, "position request failed");
                return TriggerOutcome::Transient(e);
            }
            Err(_) => {
                error!(category = "LOCATION", "location permission denied, stopping capture");
                self.stop_timer();
                if let Err(e) = self.deps.sync_state.set_capture_blocked(true) {
                    error!(category = "LOCATION", error = %e, "cannot persist capture block");
                }
                self.emit(CaptureEvent::PermissionDenied);
                return TriggerOutcome::PermissionDenied;
            }
        };

        let point = CapturedPoint {
            id: self.next_id(now_ms),
            latitude: fix.latitude,
            longitude: fix.longitude,
            accuracy: fix.accuracy_m.max(0.0),
            captured_at: now_ms,
            context: self.deps.context.collect(),
        };

        let recent = self.deps.history.snapshot();
        if let Some(reason) = self.dedup.rejection(&point, &recent) {
            debug!(category = "LOCATION", point_id = point.id, ?reason, "duplicate capture dropped");
            return TriggerOutcome::Duplicate(reason);
        }
        self.last_accepted_at.store(now_ms, Ordering::Release);

        info!(
            category = "LOCATION",
            point_id = point.id,
            lat = point.latitude,
            lng = point.longitude,
            accuracy = point.accuracy,
            "location captured"
        );

        // Both stores fsync under their locks; keep that off the runtime workers.
        let history = Arc::clone(&self.deps.history);
        let queue = Arc::clone(&self.deps.queue);
        let stored = point.clone();
        let persisted = tokio::task::spawn_blocking(move || {
            // History failure is already logged by the store and must not
            // keep the point out of the queue.
            let _ = history.append(stored.clone());
            queue.enqueue(stored, now_ms)
        })
        .await;
        match persisted {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                error!(category = "SYNC", point_id = point.id, error = %e, "cannot queue point");
            }
            Err(e) => {
                error!(category = "STORAGE", point_id = point.id, error = %e, "capture persistence task failed");
            }
        }

        self.emit(CaptureEvent::Accepted(point.clone()));
        TriggerOutcome::Accepted(point)
    }

    fn next_id(&self, now_ms: u64) -> u64 {
        let mut assigned = now_ms;
        let _ = self
            .last_id
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                assigned = now_ms.max(last.saturating_add(1));
                Some(assigned)
            });
        assigned
    }

    fn emit(&self, event: CaptureEvent) {
        if self.events.send(event).is_err() {
            debug!(category = "LOCATION", "capture event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::context::NoContext;
    use crate::test_utils::{ScriptedProvider, TempStores, fix, point};
    use tokio::sync::Notify;

    const T0: u64 = 1_700_000_000_000;

    struct Rig {
        stores: TempStores,
        scheduler: CaptureScheduler,
        events: mpsc::UnboundedReceiver<CaptureEvent>,
    }

    fn rig(provider: Arc<dyn PositionProvider>) -> Rig {
        let stores = TempStores::new(50, T0);
        let (tx, events) = mpsc::unbounded_channel();
        let scheduler = CaptureScheduler::new(
            CaptureDeps {
                provider,
                context: Arc::new(NoContext),
                history: Arc::clone(&stores.history),
                queue: Arc::clone(&stores.queue),
                sync_state: Arc::clone(&stores.sync_state),
            },
            &CaptureConfig::default(),
            DedupFilter::new(1e-5, 45_000),
            tx,
        );
        Rig {
            stores,
            scheduler,
            events,
        }
    }

    #[tokio::test]
    async fn three_captures_land_in_history_and_queue() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(fix(12.0, 77.0)),
            Ok(fix(12.1, 77.0)),
            Ok(fix(12.2, 77.0)),
        ]));
        let rig = rig(provider);
        for step in 0..3 {
            let outcome = rig.scheduler.trigger_at(T0 + step * 300_000).await;
            assert!(matches!(outcome, TriggerOutcome::Accepted(_)), "{outcome:?}");
        }

        let history: Vec<u64> = rig.stores.history.snapshot().iter().map(|p| p.id).collect();
        assert_eq!(history, vec![T0 + 600_000, T0 + 300_000, T0]);
        let queued: Vec<u64> = rig.stores.queue.snapshot().iter().map(|e| e.point.id).collect();
        assert_eq!(queued, vec![T0, T0 + 300_000, T0 + 600_000]);
    }

    #[tokio::test]
    async fn trigger_inside_min_gap_is_skipped() {
        let rig = rig(Arc::new(ScriptedProvider::default()));
        assert!(matches!(
            rig.scheduler.trigger_at(T0).await,
            TriggerOutcome::Accepted(_)
        ));
        assert_eq!(
            rig.scheduler.trigger_at(T0 + 2_000).await,
            TriggerOutcome::SkippedTooSoon {
                since_last_ms: 2_000
            }
        );
        assert_eq!(rig.stores.history.len(), 1);
    }

    #[tokio::test]
    async fn overlapping_trigger_is_dropped_while_in_flight() {
        let gate = Arc::new(Notify::new());
        let provider = Arc::new(ScriptedProvider::gated(Arc::clone(&gate)));
        let rig = rig(Arc::clone(&provider) as Arc<dyn PositionProvider>);

        let first = {
            let scheduler = rig.scheduler.clone();
            tokio::spawn(async move { scheduler.trigger_at(T0).await })
        };
        while provider.calls() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            rig.scheduler.trigger_at(T0 + 2_000).await,
            TriggerOutcome::SkippedInFlight
        );

        gate.notify_one();
        assert!(matches!(first.await.unwrap(), TriggerOutcome::Accepted(_)));
        assert_eq!(provider.calls(), 1);
        assert_eq!(rig.stores.queue.len(), 1);
    }

    #[tokio::test]
    async fn transient_errors_keep_timer_running() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(CaptureError::Timeout),
            Err(CaptureError::ProviderUnavailable("gps off".to_owned())),
        ]));
        let rig = rig(Arc::clone(&provider) as Arc<dyn PositionProvider>);
        rig.scheduler.start(300).unwrap();
        while provider.calls() == 0 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rig.scheduler.is_running());

        assert_eq!(
            rig.scheduler.trigger_at(T0).await,
            TriggerOutcome::Transient(CaptureError::ProviderUnavailable("gps off".to_owned()))
        );
        assert!(rig.scheduler.is_running());
        assert!(rig.stores.queue.is_empty());
        rig.scheduler.stop();
    }

    #[tokio::test]
    async fn permission_denied_stops_timer_and_notifies() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(
            CaptureError::PermissionDenied,
        )]));
        let mut rig = rig(provider);
        rig.scheduler.start(60).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rig.events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, CaptureEvent::PermissionDenied);
        assert!(!rig.scheduler.is_running());
        assert!(rig.stores.queue.is_empty());
        assert!(rig.stores.sync_state.snapshot().capture_blocked);
    }

    #[tokio::test]
    async fn start_fires_immediately_and_emits_accepted() {
        let mut rig = rig(Arc::new(ScriptedProvider::default()));
        rig.scheduler.start(300).unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), rig.events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, CaptureEvent::Accepted(_)));
        assert_eq!(rig.scheduler.interval_secs(), Some(300));
        rig.scheduler.stop();
        assert!(!rig.scheduler.is_running());
    }

    #[tokio::test]
    async fn start_rejects_unrecognized_interval() {
        let rig = rig(Arc::new(ScriptedProvider::default()));
        assert!(rig.scheduler.start(45).is_err());
        assert!(!rig.scheduler.is_running());
    }

    #[tokio::test]
    async fn set_interval_persists_and_restarts() {
        let rig = rig(Arc::new(ScriptedProvider::default()));
        rig.scheduler.start(300).unwrap();
        rig.scheduler.set_interval(900).unwrap();
        assert_eq!(rig.scheduler.interval_secs(), Some(900));
        assert_eq!(rig.stores.sync_state.snapshot().interval_secs, 900);
        rig.scheduler.stop();
    }

    #[tokio::test]
    async fn interval_change_keeps_in_flight_capture() {
        let gate = Arc::new(Notify::new());
        let provider = Arc::new(ScriptedProvider::gated(Arc::clone(&gate)));
        let mut rig = rig(Arc::clone(&provider) as Arc<dyn PositionProvider>);
        rig.scheduler.start(300).unwrap();
        while provider.calls() == 0 {
            tokio::task::yield_now().await;
        }

        rig.scheduler.set_interval(900).unwrap();
        assert_eq!(rig.scheduler.interval_secs(), Some(900));
        gate.notify_one();

        let event = tokio::time::timeout(Duration::from_secs(5), rig.events.recv())
            .await
            .unwrap()
            .unwrap();
        let CaptureEvent::Accepted(point) = event else {
            panic!("unexpected event: {event:?}");
        };
        assert_eq!(rig.stores.history.latest(), Some(point.clone()));
        assert_eq!(rig.stores.queue.snapshot()[0].point, point);
        assert_eq!(provider.calls(), 1);
        assert_eq!(rig.scheduler.interval_secs(), Some(900));
        assert_eq!(rig.stores.sync_state.snapshot().interval_secs, 900);
        rig.scheduler.stop();
    }

    #[tokio::test]
    async fn stop_does_not_abort_in_flight_capture() {
        let gate = Arc::new(Notify::new());
        let provider = Arc::new(ScriptedProvider::gated(Arc::clone(&gate)));
        let mut rig = rig(Arc::clone(&provider) as Arc<dyn PositionProvider>);
        rig.scheduler.start(300).unwrap();
        while provider.calls() == 0 {
            tokio::task::yield_now().await;
        }
        rig.scheduler.stop();
        gate.notify_one();

        let event = tokio::time::timeout(Duration::from_secs(5), rig.events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, CaptureEvent::Accepted(_)));
        assert_eq!(rig.stores.history.len(), 1);
    }

    #[tokio::test]
    async fn near_duplicate_fix_is_rejected() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(fix(12.0, 77.0)),
            Ok(fix(12.0, 77.0)),
        ]));
        let rig = rig(provider);
        rig.scheduler.trigger_at(T0).await;
        let outcome = rig.scheduler.trigger_at(T0 + 30_000).await;
        assert_eq!(
            outcome,
            TriggerOutcome::Duplicate(DuplicateReason::NearDuplicate { existing_id: T0 })
        );
        assert_eq!(rig.stores.queue.len(), 1);
    }

    #[tokio::test]
    async fn guard_is_seeded_from_persisted_history() {
        let stores = TempStores::new(50, T0);
        stores.history.append(point(T0, 1.0, 1.0)).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let scheduler = CaptureScheduler::new(
            CaptureDeps {
                provider: Arc::new(ScriptedProvider::default()),
                context: Arc::new(NoContext),
                history: Arc::clone(&stores.history),
                queue: Arc::clone(&stores.queue),
                sync_state: Arc::clone(&stores.sync_state),
            },
            &CaptureConfig::default(),
            DedupFilter::new(1e-5, 45_000),
            tx,
        );
        assert!(matches!(
            scheduler.trigger_at(T0 + 5_000).await,
            TriggerOutcome::SkippedTooSoon { .. }
        ));
        match scheduler.trigger_at(T0 + 60_000).await {
            TriggerOutcome::Accepted(p) => assert!(p.id > T0),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn ids_are_strictly_increasing_even_if_clock_repeats() {
        let stores = TempStores::new(50, T0);
        stores.history.append(point(T0 + 100_000, 1.0, 1.0)).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let scheduler = CaptureScheduler::new(
            CaptureDeps {
                provider: Arc::new(ScriptedProvider::default()),
                context: Arc::new(NoContext),
                history: Arc::clone(&stores.history),
                queue: Arc::clone(&stores.queue),
                sync_state: Arc::clone(&stores.sync_state),
            },
            &CaptureConfig::default(),
            DedupFilter::new(1e-5, 45_000),
            tx,
        );
        // Wall clock behind the stored head.
        match scheduler.trigger_at(T0).await {
            TriggerOutcome::Accepted(p) => assert_eq!(p.id, T0 + 100_001),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
