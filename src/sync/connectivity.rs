//! Network availability as reported by the host.

use std::sync::atomic::{AtomicBool, Ordering};

/// Answers whether a delivery attempt is worth making right now.
pub trait ConnectivityProbe: Send + Sync {
    /// Returns `true` if the network looks usable.
    fn is_online(&self) -> bool;
}

/// Connectivity flag flipped by host signals. Starts online.
#[derive(Debug)]
pub struct ConnectivityFlag {
    online: AtomicBool,
}

impl Default for ConnectivityFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivityFlag {
    /// Create a flag with the given initial state.
    #[must_use]
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    /// Record a state change. Returns `true` if the network just came back.
    pub fn set_online(&self, online: bool) -> bool {
        let was = self.online.swap(online, Ordering::AcqRel);
        online && !was
    }
}

impl ConnectivityProbe for ConnectivityFlag {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }
}
