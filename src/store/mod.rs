//! Durable state: capture history, offline queue and sync flags.

pub mod history;
pub mod queue;
pub mod slot;
pub mod sync_state;

pub use history::{DEFAULT_HISTORY_CAPACITY, HistoryStore, LoadSource};
pub use queue::{QueueEntry, UploadQueue};
pub use slot::{JsonSlot, SlotRead};
pub use sync_state::{SyncState, SyncStateStore};
