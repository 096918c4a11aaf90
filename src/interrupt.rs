use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide barge-in flag.
///
/// Set by the wake listener when the wake phrase is heard during a session,
/// polled by the session, cleared once the session is torn down. Clones share
/// the same flag.
#[derive(Debug, Clone, Default)]
pub struct InterruptSignal {
    flag: Arc<AtomicBool>,
}

impl InterruptSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        if !self.flag.swap(true, Ordering::AcqRel) {
            log::debug!("Interrupt requested");
        }
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
