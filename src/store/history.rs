//! Bounded, most-recent-first capture history with redundant persistence.
//!
//! Every append rewrites the whole log to a primary and a backup slot and
//! then re-reads the primary to verify it byte for byte. Loading prefers the
//! primary and falls back to the backup when the primary is absent or
//! unreadable.

use crate::error::{Result, TrackerError};
use crate::point::CapturedPoint;
use crate::store::slot::{JsonSlot, SlotRead};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{debug, error, warn};

/// Default number of entries kept.
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct HistoryDocument {
    #[serde(default = "default_history_version")]
    version: u8,
    #[serde(default)]
    entries: Vec<CapturedPoint>,
}

fn default_history_version() -> u8 {
    1
}

/// Which slot a load was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    /// Primary slot was readable.
    Primary,
    /// Primary was absent or corrupt; backup was used.
    Backup,
    /// Neither slot was readable.
    Empty,
}

/// Size-bounded capture log.
///
/// The in-memory log is the source of truth for the running session; disk
/// failures are logged and reported but never roll it back.
pub struct HistoryStore {
    primary: JsonSlot,
    backup: JsonSlot,
    capacity: usize,
    entries: Mutex<Vec<CapturedPoint>>,
}

impl HistoryStore {
    /// Open the store and seed the in-memory log from disk.
    pub fn open(
        primary: impl Into<std::path::PathBuf>,
        backup: impl Into<std::path::PathBuf>,
        capacity: usize,
    ) -> Self {
        let store = Self {
            primary: JsonSlot::new(primary),
            backup: JsonSlot::new(backup),
            capacity: capacity.max(1),
            entries: Mutex::new(Vec::new()),
        };
        let (entries, source) = store.load_with_source();
        debug!(
            category = "STORAGE",
            entries = entries.len(),
            ?source,
            "history loaded"
        );
        if let Ok(mut guard) = store.entries.lock() {
            *guard = entries;
        }
        store
    }

    /// Read the persisted log. Does not touch the in-memory log.
    pub fn load(&self) -> Vec<CapturedPoint> {
        self.load_with_source().0
    }

    /// Read the persisted log and report which slot served it.
    pub fn load_with_source(&self) -> (Vec<CapturedPoint>, LoadSource) {
        match self.read_slot(&self.primary) {
            Some(entries) => return (self.bounded(entries), LoadSource::Primary),
            None => {
                if self.primary.path().exists() {
                    warn!(
                        category = "STORAGE",
                        path = %self.primary.path().display(),
                        "primary history slot unreadable, trying backup"
                    );
                }
            }
        }

        match self.read_slot(&self.backup) {
            Some(entries) => {
                warn!(
                    category = "STORAGE",
                    entries = entries.len(),
                    "history restored from backup slot"
                );
                (self.bounded(entries), LoadSource::Backup)
            }
            None => (Vec::new(), LoadSource::Empty),
        }
    }

    fn read_slot(&self, slot: &JsonSlot) -> Option<Vec<CapturedPoint>> {
        match slot.read::<HistoryDocument>() {
            Ok(SlotRead::Loaded(doc)) => Some(doc.entries),
            Ok(SlotRead::Missing) => None,
            Ok(SlotRead::Corrupt(reason)) => {
                warn!(
                    category = "STORAGE",
                    path = %slot.path().display(),
                    %reason,
                    "history slot is corrupt"
                );
                None
            }
            Err(e) => {
                warn!(category = "STORAGE", error = %e, "cannot read history slot");
                None
            }
        }
    }

    fn bounded(&self, mut entries: Vec<CapturedPoint>) -> Vec<CapturedPoint> {
        entries.truncate(self.capacity);
        entries
    }

    /// Consistent copy of the in-memory log, most recent first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CapturedPoint> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Most recent entry, if any.
    #[must_use]
    pub fn latest(&self) -> Option<CapturedPoint> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.first().cloned())
    }

    /// Number of entries in memory.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Returns `true` if the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert `point` at the head, evict past capacity, persist and verify.
    ///
    /// The in-memory log is updated even if persistence fails.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Storage`] when either slot write fails or the
    /// primary does not read back identically.
    pub fn append(&self, point: CapturedPoint) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| TrackerError::Storage("history lock poisoned".to_owned()))?;

        let point_id = point.id;
        entries.insert(0, point);
        if entries.len() > self.capacity {
            let evicted = entries.len() - self.capacity;
            entries.truncate(self.capacity);
            debug!(category = "STORAGE", evicted, "history evicted oldest entries");
        }

        let doc = HistoryDocument {
            version: default_history_version(),
            entries: entries.clone(),
        };
        self.persist(&doc).inspect_err(|e| {
            error!(category = "STORAGE", point_id, error = %e, "history persist failed");
        })?;

        debug!(
            category = "STORAGE",
            point_id,
            len = entries.len(),
            "saved to local storage"
        );
        Ok(())
    }

    /// Empty the log and both slots (primary first, then backup).
    pub fn clear(&self) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| TrackerError::Storage("history lock poisoned".to_owned()))?;
        entries.clear();
        let doc = HistoryDocument {
            version: default_history_version(),
            entries: Vec::new(),
        };
        self.primary.write(&doc)?;
        self.backup.write(&doc)?;
        Ok(())
    }

    fn persist(&self, doc: &HistoryDocument) -> Result<()> {
        let written = self.primary.write(doc)?;
        self.backup.write_bytes(&written)?;

        match self.primary.read_bytes()? {
            Some(read_back) if read_back == written => Ok(()),
            Some(_) => Err(TrackerError::Storage(
                "primary history slot verification mismatch".to_owned(),
            )),
            None => Err(TrackerError::Storage(
                "primary history slot vanished after write".to_owned(),
            )),
        }
    }
}
