use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;

/// Process-wide single-flight flag for sync attempts.
#[derive(Debug, Clone, Default)]
pub struct SyncGuard {
    held: Arc<AtomicBool>,
}

impl SyncGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the guard if nobody holds it. Never waits.
    #[must_use]
    pub fn try_acquire(&self) -> Option<SyncTicket> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncTicket {
                held: Arc::clone(&self.held),
            })
    }

    #[must_use]
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Proof of holding the guard. Dropping it releases the guard, so every exit
/// path of a sync attempt releases exactly once.
#[derive(Debug)]
pub struct SyncTicket {
    held: Arc<AtomicBool>,
}

impl SyncTicket {
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for SyncTicket {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
        debug!("Sync guard released");
    }
}
