//! Capture metadata sources (battery, carrier, device label).

use crate::point::PointContext;
use std::sync::Mutex;

/// Carrier name reported when the platform returns nothing.
pub const UNKNOWN_CARRIER: &str = "Unknown";

/// Provides metadata attached to each accepted capture.
pub trait ContextSource: Send + Sync {
    /// Collect the current context. `None` means "attach nothing".
    fn collect(&self) -> Option<PointContext>;
}

/// Context source that never attaches metadata.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoContext;

impl ContextSource for NoContext {
    fn collect(&self) -> Option<PointContext> {
        None
    }
}

/// Context source holding the latest values pushed by the host platform.
#[derive(Debug, Default)]
pub struct SharedContext {
    current: Mutex<PointContext>,
}

impl SharedContext {
    /// Create a source seeded with `initial`.
    #[must_use]
    pub fn new(initial: PointContext) -> Self {
        Self {
            current: Mutex::new(normalize(initial)),
        }
    }

    /// Replace the stored context.
    pub fn set(&self, context: PointContext) {
        if let Ok(mut current) = self.current.lock() {
            *current = normalize(context);
        }
    }
}

impl ContextSource for SharedContext {
    fn collect(&self) -> Option<PointContext> {
        let current = self.current.lock().ok()?.clone();
        if current.is_empty() {
            None
        } else {
            Some(current)
        }
    }
}

/// Clamp battery to 0-100 and map a blank carrier name to [`UNKNOWN_CARRIER`].
fn normalize(mut context: PointContext) -> PointContext {
    context.battery = context.battery.map(|b| b.min(100));
    if let Some(carrier) = context.carrier.as_mut() {
        let trimmed = carrier.trim();
        if trimmed.is_empty() {
            *carrier = UNKNOWN_CARRIER.to_owned();
        } else if trimmed.len() != carrier.len() {
            *carrier = trimmed.to_owned();
        }
    }
    context.device_label = context
        .device_label
        .map(|label| label.trim().to_owned())
        .filter(|label| !label.is_empty());
    context
}
