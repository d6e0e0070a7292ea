//! Restart-after-death supervision.
//!
//! The persisted `tracking_active` flag decides whether capture resumes, so a
//! user stop is durable across process deaths and reboots. A persisted
//! permission block holds capture off until the user starts tracking again.

use crate::capture::CaptureScheduler;
use crate::config::is_recognized_interval;
use crate::error::{Result, TrackerError};
use crate::store::SyncStateStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Lifecycle notifications from the host environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// This process just started.
    ProcessStarted,
    /// The device finished booting.
    BootCompleted,
    /// The host is about to tear this process down.
    TerminationImminent,
}

/// What the supervisor did in response to a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorAction {
    /// Capture was started at the persisted cadence.
    Resumed {
        /// Cadence used.
        interval_secs: u64,
    },
    /// Capture was already running at the persisted cadence.
    AlreadyRunning,
    /// Tracking is off; nothing started.
    StayedIdle,
    /// Tracking is on but location permission was refused; nothing started.
    AwaitingPermission,
    /// A deferred restart was requested from the host.
    RestartScheduled {
        /// Delay handed to the restart scheduler.
        delay: Duration,
    },
    /// Tracking is off; no restart requested.
    NoRestartNeeded,
}

/// Host primitive that relaunches the engine after this process is gone.
#[async_trait]
pub trait RestartScheduler: Send + Sync {
    /// Ask the host to start the engine again after `delay`.
    async fn schedule_restart(&self, delay: Duration) -> anyhow::Result<()>;
}

/// Resumes capture on start and boot, requests a restart on teardown.
pub struct LifecycleSupervisor {
    sync_state: Arc<SyncStateStore>,
    scheduler: CaptureScheduler,
    restarter: Arc<dyn RestartScheduler>,
    restart_delay: Duration,
    fallback_interval_secs: u64,
}

impl LifecycleSupervisor {
    /// Create a supervisor.
    ///
    /// `fallback_interval_secs` replaces a persisted cadence that is not a
    /// recognized value.
    pub fn new(
        sync_state: Arc<SyncStateStore>,
        scheduler: CaptureScheduler,
        restarter: Arc<dyn RestartScheduler>,
        restart_delay: Duration,
        fallback_interval_secs: u64,
    ) -> Self {
        Self {
            sync_state,
            scheduler,
            restarter,
            restart_delay,
            fallback_interval_secs,
        }
    }

    /// React to `signal`.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Lifecycle`] if capture cannot be started or the
    /// restart request is refused.
    pub async fn handle(&self, signal: LifecycleSignal) -> Result<SupervisorAction> {
        match signal {
            LifecycleSignal::ProcessStarted | LifecycleSignal::BootCompleted => {
                info!(category = "SERVICE", ?signal, "checking persisted tracking state");
                self.resume_if_active()
            }
            LifecycleSignal::TerminationImminent => self.request_restart().await,
        }
    }

    /// Start capture if the persisted flag says tracking was on.
    pub fn resume_if_active(&self) -> Result<SupervisorAction> {
        let state = self.sync_state.snapshot();
        if !state.tracking_active {
            info!(category = "SERVICE", "tracking inactive, staying idle");
            return Ok(SupervisorAction::StayedIdle);
        }
        if state.capture_blocked {
            warn!(
                category = "SERVICE",
                "location permission was refused, waiting for an explicit start"
            );
            return Ok(SupervisorAction::AwaitingPermission);
        }

        let interval_secs = if is_recognized_interval(state.interval_secs) {
            state.interval_secs
        } else {
            warn!(
                category = "SERVICE",
                persisted = state.interval_secs,
                fallback = self.fallback_interval_secs,
                "persisted interval not recognized"
            );
            self.fallback_interval_secs
        };

        if self.scheduler.interval_secs() == Some(interval_secs) {
            return Ok(SupervisorAction::AlreadyRunning);
        }
        self.scheduler
            .start(interval_secs)
            .map_err(|e| TrackerError::Lifecycle(format!("cannot resume tracking: {e}")))?;
        info!(category = "SERVICE", interval_secs, "tracking resumed");
        Ok(SupervisorAction::Resumed { interval_secs })
    }

    async fn request_restart(&self) -> Result<SupervisorAction> {
        if !self.sync_state.snapshot().tracking_active {
            info!(category = "SERVICE", "process ending with tracking off");
            return Ok(SupervisorAction::NoRestartNeeded);
        }
        self.restarter
            .schedule_restart(self.restart_delay)
            .await
            .map_err(|e| TrackerError::Lifecycle(format!("restart request failed: {e}")))?;
        info!(
            category = "SERVICE",
            delay_ms = self.restart_delay.as_millis() as u64,
            "service restart scheduled"
        );
        Ok(SupervisorAction::RestartScheduled {
            delay: self.restart_delay,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::capture::{CaptureDeps, CaptureScheduler};
    use crate::config::CaptureConfig;
    use crate::context::NoContext;
    use crate::dedup::DedupFilter;
    use crate::position::{CaptureError, PositionProvider};
    use crate::test_utils::{ScriptedProvider, TempStores};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct RecordingRestarter {
        requests: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl RestartScheduler for RecordingRestarter {
        async fn schedule_restart(&self, delay: Duration) -> anyhow::Result<()> {
            self.requests.lock().unwrap().push(delay);
            Ok(())
        }
    }

    struct Rig {
        stores: TempStores,
        scheduler: CaptureScheduler,
        restarter: Arc<RecordingRestarter>,
        supervisor: LifecycleSupervisor,
    }

    fn rig() -> Rig {
        rig_with(Arc::new(ScriptedProvider::default()))
    }

    fn rig_with(provider: Arc<dyn PositionProvider>) -> Rig {
        let stores = TempStores::new(50, 0);
        let (tx, _rx) = mpsc::unbounded_channel();
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
        let restarter = Arc::new(RecordingRestarter::default());
        let supervisor = LifecycleSupervisor::new(
            Arc::clone(&stores.sync_state),
            scheduler.clone(),
            Arc::clone(&restarter) as Arc<dyn RestartScheduler>,
            Duration::from_millis(1000),
            300,
        );
        Rig {
            stores,
            scheduler,
            restarter,
            supervisor,
        }
    }

    #[tokio::test]
    async fn inactive_tracking_never_starts() {
        let rig = rig();
        for signal in [LifecycleSignal::ProcessStarted, LifecycleSignal::BootCompleted] {
            assert_eq!(
                rig.supervisor.handle(signal).await.unwrap(),
                SupervisorAction::StayedIdle
            );
        }
        assert!(!rig.scheduler.is_running());
    }

    #[tokio::test]
    async fn active_tracking_resumes_at_persisted_interval() {
        let rig = rig();
        rig.stores.sync_state.set_tracking(true).unwrap();
        rig.stores.sync_state.set_interval(600).unwrap();

        assert_eq!(
            rig.supervisor.handle(LifecycleSignal::BootCompleted).await.unwrap(),
            SupervisorAction::Resumed { interval_secs: 600 }
        );
        assert_eq!(rig.scheduler.interval_secs(), Some(600));
        assert_eq!(
            rig.supervisor.handle(LifecycleSignal::ProcessStarted).await.unwrap(),
            SupervisorAction::AlreadyRunning
        );
        rig.scheduler.stop();
    }

    #[tokio::test]
    async fn unrecognized_persisted_interval_uses_fallback() {
        let rig = rig();
        rig.stores.sync_state.set_tracking(true).unwrap();
        rig.stores.sync_state.set_interval(7).unwrap();
        assert_eq!(
            rig.supervisor.resume_if_active().unwrap(),
            SupervisorAction::Resumed { interval_secs: 300 }
        );
        rig.scheduler.stop();
    }

    #[tokio::test]
    async fn termination_schedules_restart_only_when_active() {
        let rig = rig();
        assert_eq!(
            rig.supervisor
                .handle(LifecycleSignal::TerminationImminent)
                .await
                .unwrap(),
            SupervisorAction::NoRestartNeeded
        );
        assert!(rig.restarter.requests.lock().unwrap().is_empty());

        rig.stores.sync_state.set_tracking(true).unwrap();
        assert_eq!(
            rig.supervisor
                .handle(LifecycleSignal::TerminationImminent)
                .await
                .unwrap(),
            SupervisorAction::RestartScheduled {
                delay: Duration::from_millis(1000)
            }
        );
        assert_eq!(
            *rig.restarter.requests.lock().unwrap(),
            vec![Duration::from_millis(1000)]
        );
    }

    #[tokio::test]
    async fn permission_refusal_blocks_resume_on_boot() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(
            CaptureError::PermissionDenied,
        )]));
        let rig = rig_with(provider);
        rig.stores.sync_state.set_tracking(true).unwrap();

        assert_eq!(
            rig.scheduler.trigger_at(1_000).await,
            crate::capture::TriggerOutcome::PermissionDenied
        );
        let state = rig.stores.sync_state.snapshot();
        assert!(state.tracking_active);
        assert!(state.capture_blocked);

        for signal in [LifecycleSignal::BootCompleted, LifecycleSignal::ProcessStarted] {
            assert_eq!(
                rig.supervisor.handle(signal).await.unwrap(),
                SupervisorAction::AwaitingPermission
            );
        }
        assert!(!rig.scheduler.is_running());
    }
}
