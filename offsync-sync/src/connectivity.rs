//! Online/offline signal.

use std::sync::atomic::{AtomicBool, Ordering};

/// Answers whether the device believes it has network access.
///
/// Implementations must be cheap; the orchestrator asks before every cycle.
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

/// A connectivity signal flipped by the host platform.
#[derive(Debug)]
pub struct ConnectivityFlag {
    online: AtomicBool,
}

impl ConnectivityFlag {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Default for ConnectivityFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for ConnectivityFlag {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
