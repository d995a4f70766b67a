use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative interruption source for the simulation driver.
///
/// The caller keeps a clone (typically wired to a signal handler) and raises
/// it; the driver polls between cycles, finishes the cycle in flight, and
/// returns cleanly.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    raised: Arc<AtomicBool>,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.raised.store(true, Ordering::Relaxed);
    }

    pub fn is_interrupted(&self) -> bool {
        self.raised.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.raised.store(false, Ordering::Relaxed);
    }
}
