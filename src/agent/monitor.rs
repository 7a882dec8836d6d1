//! Coordinator connection probing.
//!
//! The agent polls `GET /state-version`. Failed probes move the connection to
//! SUSPENDED and, after enough of them, LOST. The first good probe after that
//! is RECONNECTED, which triggers a bootstrap because changes may have been
//! missed while the agent was cut off. A failed resync either aborts the
//! process or is retried on every following good probe until it succeeds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use crate::agent::bootstrap::Bootstrapper;
use crate::agent::state::AgentShared;
use crate::coordination::ConnectionState;
use crate::datastore::StateDatastore;
use crate::lifecycle::AbortHandle;
use crate::observability::metrics;

/// Next connection state after a probe.
///
/// `failures` is the number of consecutive failed probes including this one.
pub fn next_state(current: Option<ConnectionState>, probe_ok: bool, failures: u32, lost_after: u32) -> ConnectionState {
    match (current, probe_ok) {
        (Some(ConnectionState::Suspended | ConnectionState::Lost), true) => ConnectionState::Reconnected,
        (_, true) => ConnectionState::Connected,
        (Some(ConnectionState::Lost), false) => ConnectionState::Lost,
        (_, false) if failures >= lost_after => ConnectionState::Lost,
        (_, false) => ConnectionState::Suspended,
    }
}

pub struct ConnectionMonitor {
    shared: Arc<AgentShared>,
    state: Arc<dyn StateDatastore>,
    bootstrapper: Arc<Bootstrapper>,
    interval: Duration,
    lost_after: u32,
    abort: Option<AbortHandle>,
    resync_pending: AtomicBool,
}

impl ConnectionMonitor {
    pub fn new(
        shared: Arc<AgentShared>,
        state: Arc<dyn StateDatastore>,
        bootstrapper: Arc<Bootstrapper>,
        interval: Duration,
        lost_after: u32,
    ) -> Self {
        Self {
            shared,
            state,
            bootstrapper,
            interval,
            lost_after,
            abort: None,
            resync_pending: AtomicBool::new(false),
        }
    }

    /// Make a failed resync fatal for the process.
    pub fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = Some(abort);
        self
    }

    pub fn resync_pending(&self) -> bool {
        self.resync_pending.load(Ordering::SeqCst)
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = 0;
        loop {
            tokio::select! {
                _ = ticker.tick() => { self.probe(&mut failures).await; }
                _ = shutdown.recv() => {
                    tracing::debug!("Connection monitor stopped");
                    break;
                }
            }
        }
    }

    /// One probe. Returns the new connection state.
    pub async fn probe(&self, failures: &mut u32) -> ConnectionState {
        let probe = self.state.get_state_version().await;
        let ok = probe.is_ok();
        match &probe {
            Ok(_) => *failures = 0,
            Err(e) => {
                *failures += 1;
                tracing::debug!(error = %e, failures = *failures, "Coordinator probe failed");
            }
        }

        let previous = self.shared.connection.current();
        let next = next_state(previous, ok, *failures, self.lost_after);
        self.shared.connection.set(next);
        metrics::record_connection_state(next.is_connected());
        if previous != Some(next) {
            tracing::info!(from = ?previous, to = %next, "Coordinator connection state changed");
        }

        if next == ConnectionState::Reconnected {
            tracing::info!("Reconnected to coordinator, re-running bootstrap");
            self.resync().await;
        } else if ok && self.resync_pending() {
            tracing::info!("Retrying bootstrap after an earlier failed resync");
            self.resync().await;
        }
        next
    }

    async fn resync(&self) {
        let failed = self.bootstrapper.run_or_abort(self.abort.as_ref()).await.is_err();
        if failed && self.abort.is_none() {
            tracing::warn!("Resync failed, retrying on the next successful probe");
        }
        self.resync_pending.store(failed, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use ConnectionState::*;
        assert_eq!(next_state(None, true, 0, 3), Connected);
        assert_eq!(next_state(Some(Connected), false, 1, 3), Suspended);
        assert_eq!(next_state(Some(Suspended), false, 3, 3), Lost);
        assert_eq!(next_state(Some(Lost), false, 1, 3), Lost);
        assert_eq!(next_state(Some(Lost), true, 0, 3), Reconnected);
        assert_eq!(next_state(Some(Suspended), true, 0, 3), Reconnected);
        assert_eq!(next_state(Some(Reconnected), true, 0, 3), Connected);
    }
}
