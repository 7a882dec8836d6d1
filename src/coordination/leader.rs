//! Leadership capability.

use std::sync::atomic::{AtomicBool, Ordering};

pub trait LeaderLatch: Send + Sync {
    fn has_leadership(&self) -> bool;

    /// Give up leadership. Called during graceful shutdown.
    fn close(&self);
}

/// Leadership fixed by configuration, revocable by `close`.
#[derive(Debug)]
pub struct StaticLeaderLatch {
    leader: AtomicBool,
}

impl StaticLeaderLatch {
    pub fn new(leader: bool) -> Self {
        Self {
            leader: AtomicBool::new(leader),
        }
    }

    pub fn set_leadership(&self, leader: bool) {
        self.leader.store(leader, Ordering::SeqCst);
    }
}

impl LeaderLatch for StaticLeaderLatch {
    fn has_leadership(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.leader.swap(false, Ordering::SeqCst) {
            tracing::info!("Leadership released");
        }
    }
}
