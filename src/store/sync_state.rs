//! Process-wide persisted sync state.
//!
//! This is the only record the lifecycle supervisor consults on restart, so
//! every mutation is written through before it returns.

use crate::error::{Result, TrackerError};
use crate::store::slot::{JsonSlot, SlotRead};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{info, warn};

/// Durable engine flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Last confirmed delivery (epoch milliseconds).
    pub last_successful_upload_at: u64,
    /// Whether the user left tracking switched on.
    pub tracking_active: bool,
    /// Capture cadence in seconds.
    pub interval_secs: u64,
    /// Location permission was refused. Only an explicit start clears it.
    #[serde(default)]
    pub capture_blocked: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct SyncStateDocument {
    #[serde(default = "default_state_version")]
    version: u8,
    #[serde(flatten)]
    state: SyncState,
}

fn default_state_version() -> u8 {
    1
}

/// Shared handle to the persisted [`SyncState`].
pub struct SyncStateStore {
    slot: JsonSlot,
    state: Mutex<SyncState>,
}

impl SyncStateStore {
    /// Load the state at `path`.
    ///
    /// A missing or unreadable file yields tracking off, `default_interval_secs`
    /// and `last_successful_upload_at = now_ms`.
    pub fn open(path: impl Into<PathBuf>, default_interval_secs: u64, now_ms: u64) -> Result<Self> {
        let slot = JsonSlot::new(path);
        let fresh = SyncState {
            last_successful_upload_at: now_ms,
            tracking_active: false,
            interval_secs: default_interval_secs,
            capture_blocked: false,
        };
        let state = match slot.read::<SyncStateDocument>()? {
            SlotRead::Loaded(doc) => doc.state,
            SlotRead::Missing => fresh,
            SlotRead::Corrupt(reason) => {
                warn!(category = "SERVICE", %reason, "sync state unreadable, using defaults");
                fresh
            }
        };
        Ok(Self {
            slot,
            state: Mutex::new(state),
        })
    }

    /// Current state.
    #[must_use]
    pub fn snapshot(&self) -> SyncState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Persist the tracking flag.
    pub fn set_tracking(&self, active: bool) -> Result<()> {
        self.update(|s| s.tracking_active = active)?;
        info!(category = "SERVICE", tracking_active = active, "tracking state saved");
        Ok(())
    }

    /// Persist whether capture is blocked on a permission refusal.
    pub fn set_capture_blocked(&self, blocked: bool) -> Result<()> {
        self.update(|s| s.capture_blocked = blocked)?;
        info!(category = "SERVICE", capture_blocked = blocked, "capture block saved");
        Ok(())
    }

    /// Persist the capture cadence.
    pub fn set_interval(&self, interval_secs: u64) -> Result<()> {
        self.update(|s| s.interval_secs = interval_secs)
    }

    /// Persist a confirmed delivery time. Older timestamps never win.
    pub fn record_upload_success(&self, at_ms: u64) -> Result<()> {
        self.update(|s| {
            s.last_successful_upload_at = s.last_successful_upload_at.max(at_ms);
        })
    }

    fn update(&self, mutate: impl FnOnce(&mut SyncState)) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| TrackerError::Storage("sync state lock poisoned".to_owned()))?;
        mutate(&mut state);
        let doc = SyncStateDocument {
            version: default_state_version(),
            state: *state,
        };
        self.slot.write(&doc).map(|_| ())
    }
}
