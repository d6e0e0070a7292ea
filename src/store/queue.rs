//! Durable FIFO of points awaiting confirmed delivery.

use crate::error::{Result, TrackerError};
use crate::point::CapturedPoint;
use crate::store::slot::{JsonSlot, SlotRead};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, error, warn};

/// A captured point plus its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// The point to deliver.
    pub point: CapturedPoint,
    /// Failed delivery attempts so far.
    #[serde(default)]
    pub attempts: u32,
    /// When the point entered the queue (epoch milliseconds).
    pub enqueued_at: u64,
    /// Last delivery error, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Time of the last failed attempt (epoch milliseconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueDocument {
    #[serde(default = "default_queue_version")]
    version: u8,
    #[serde(default)]
    entries: Vec<QueueEntry>,
}

fn default_queue_version() -> u8 {
    1
}

/// Offline upload queue.
///
/// Entries leave only through [`UploadQueue::mark_delivered`]. Every mutation
/// is written through to disk before the call returns.
pub struct UploadQueue {
    slot: JsonSlot,
    entries: Mutex<Vec<QueueEntry>>,
}

impl UploadQueue {
    /// Open the queue at `path`, loading any entries left by a previous process.
    ///
    /// An unparseable file is moved aside to `*.corrupt` and the queue starts
    /// empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let slot = JsonSlot::new(path);
        let entries = match slot.read::<QueueDocument>()? {
            SlotRead::Loaded(doc) => doc.entries,
            SlotRead::Missing => Vec::new(),
            SlotRead::Corrupt(reason) => {
                let aside = slot.quarantine()?;
                error!(
                    category = "SYNC",
                    %reason,
                    moved_to = %aside.display(),
                    "offline queue unreadable, starting empty"
                );
                Vec::new()
            }
        };
        if !entries.is_empty() {
            debug!(category = "SYNC", pending = entries.len(), "offline queue restored");
        }
        Ok(Self {
            slot,
            entries: Mutex::new(entries),
        })
    }

    /// Append `point` unless an entry with the same id is already queued.
    ///
    /// Returns `false` for a duplicate id.
    pub fn enqueue(&self, point: CapturedPoint, now_ms: u64) -> Result<bool> {
        let mut entries = self.lock()?;
        if entries.iter().any(|e| e.point.id == point.id) {
            warn!(category = "SYNC", point_id = point.id, "point already queued");
            return Ok(false);
        }
        let point_id = point.id;
        entries.push(QueueEntry {
            point,
            attempts: 0,
            enqueued_at: now_ms,
            last_error: None,
            last_attempt_at: None,
        });
        self.persist(&entries)?;
        debug!(category = "SYNC", point_id, pending = entries.len(), "queued for upload");
        Ok(true)
    }

    /// Copy of every pending entry, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<QueueEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Returns `true` if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove the entry for `point_id` after a confirmed delivery.
    ///
    /// Returns `false` if no such entry was queued.
    pub fn mark_delivered(&self, point_id: u64) -> Result<bool> {
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|e| e.point.id != point_id);
        if entries.len() == before {
            return Ok(false);
        }
        self.persist(&entries)?;
        Ok(true)
    }

    /// Record a failed attempt for `point_id`. The entry stays queued.
    pub fn mark_failed(&self, point_id: u64, reason: &str, now_ms: u64) -> Result<()> {
        let mut entries = self.lock()?;
        let Some(entry) = entries.iter_mut().find(|e| e.point.id == point_id) else {
            return Ok(());
        };
        entry.attempts = entry.attempts.saturating_add(1);
        entry.last_error = Some(reason.to_owned());
        entry.last_attempt_at = Some(now_ms);
        self.persist(&entries)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<QueueEntry>>> {
        self.entries
            .lock()
            .map_err(|_| TrackerError::Queue("queue lock poisoned".to_owned()))
    }

    fn persist(&self, entries: &[QueueEntry]) -> Result<()> {
        let doc = QueueDocument {
            version: default_queue_version(),
            entries: entries.to_vec(),
        };
        self.slot
            .write(&doc)
            .map(|_| ())
            .map_err(|e| TrackerError::Queue(e.to_string()))
    }
}
