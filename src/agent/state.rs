//! Process-wide agent state shared by the gate, bootstrap, monitor and status.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use dashmap::{DashMap, DashSet};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

use crate::coordination::ConnectionStateTracker;
use crate::models::{now_millis, AgentMetadata, AgentState, BasicServiceContext, ServiceContext};

#[derive(Debug, Error)]
#[error("apply lock not acquired within {0:?}")]
pub struct LockTimeout(pub Duration);

/// The single lock serializing apply, revert and bootstrap on one agent.
pub struct ApplyLock {
    inner: Mutex<()>,
    timeout: Duration,
}

impl ApplyLock {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(()),
            timeout,
        }
    }

    /// Wait at most the configured timeout for the lock.
    pub async fn acquire(&self) -> Result<MutexGuard<'_, ()>, LockTimeout> {
        tokio::time::timeout(self.timeout, self.inner.lock())
            .await
            .map_err(|_| LockTimeout(self.timeout))
    }

    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

pub struct AgentShared {
    pub metadata: AgentMetadata,
    pub group: String,
    pub apply_lock: ApplyLock,
    pub connection: ConnectionStateTracker,
    state: AtomicU8,
    most_recent_request_id: ArcSwapOption<String>,
    config_error: ArcSwapOption<String>,
    directory_watch_error: ArcSwapOption<String>,
    state_errors: DashSet<String>,
    cache: DashMap<String, BasicServiceContext>,
    bootstrap_version: ArcSwapOption<u64>,
    last_local_write: AtomicU64,
}

impl AgentShared {
    pub fn new(metadata: AgentMetadata, group: &str, lock_timeout: Duration) -> Self {
        Self {
            metadata,
            group: group.to_string(),
            apply_lock: ApplyLock::new(lock_timeout),
            connection: ConnectionStateTracker::default(),
            state: AtomicU8::new(AgentState::Bootstrapping as u8),
            most_recent_request_id: ArcSwapOption::empty(),
            config_error: ArcSwapOption::empty(),
            directory_watch_error: ArcSwapOption::empty(),
            state_errors: DashSet::new(),
            cache: DashMap::new(),
            bootstrap_version: ArcSwapOption::empty(),
            last_local_write: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> AgentState {
        AgentState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: AgentState) {
        let previous = AgentState::from(self.state.swap(state as u8, Ordering::SeqCst));
        if previous != state {
            tracing::info!(from = ?previous, to = ?state, "Agent state changed");
        }
    }

    pub fn most_recent_request_id(&self) -> Option<String> {
        self.most_recent_request_id.load_full().map(|id| id.as_ref().clone())
    }

    pub fn set_most_recent_request_id(&self, request_id: &str) {
        self.most_recent_request_id.store(Some(Arc::new(request_id.to_string())));
    }

    pub fn config_error(&self) -> Option<String> {
        self.config_error.load_full().map(|e| e.as_ref().clone())
    }

    pub fn set_config_error(&self, error: Option<String>) {
        self.config_error.store(error.map(Arc::new));
    }

    pub fn directory_watch_error(&self) -> Option<String> {
        self.directory_watch_error.load_full().map(|e| e.as_ref().clone())
    }

    pub fn set_directory_watch_error(&self, error: Option<String>) {
        self.directory_watch_error.store(error.map(Arc::new));
    }

    pub fn record_state_error(&self, error: String) {
        self.state_errors.insert(error);
    }

    pub fn clear_state_errors(&self) {
        self.state_errors.clear();
    }

    /// State errors in stable order.
    pub fn state_errors(&self) -> Vec<String> {
        let mut errors: Vec<String> = self.state_errors.iter().map(|e| e.key().clone()).collect();
        errors.sort();
        errors
    }

    /// Mirror what was just written for a service.
    pub fn cache_service(&self, context: &ServiceContext) {
        if context.present {
            self.cache
                .insert(context.service_id().to_string(), BasicServiceContext::from(context));
        } else {
            self.cache.remove(context.service_id());
        }
    }

    pub fn cached_service(&self, service_id: &str) -> Option<BasicServiceContext> {
        self.cache.get(service_id).map(|r| r.value().clone())
    }

    pub fn cached_service_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.cache.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn bootstrap_version(&self) -> Option<u64> {
        self.bootstrap_version.load_full().map(|v| *v)
    }

    pub fn set_bootstrap_version(&self, version: Option<u64>) {
        self.bootstrap_version.store(version.map(Arc::new));
    }

    /// Note that this process is about to touch the config directory.
    pub fn mark_local_write(&self) {
        self.last_local_write.store(now_millis(), Ordering::SeqCst);
    }

    pub fn wrote_within(&self, window: Duration) -> bool {
        let last = self.last_local_write.load(Ordering::SeqCst);
        last != 0 && now_millis().saturating_sub(last) <= window.as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Service, UpstreamInfo};

    fn shared(lock_timeout_ms: u64) -> AgentShared {
        let metadata = AgentMetadata {
            agent_id: "a1".to_string(),
            base_agent_uri: "http://127.0.0.1:8882".to_string(),
            domain: None,
        };
        AgentShared::new(metadata, "lb1", Duration::from_millis(lock_timeout_ms))
    }

    #[tokio::test]
    async fn test_lock_times_out_while_held() {
        let shared = shared(20);
        let guard = shared.apply_lock.acquire().await.unwrap();
        assert!(shared.apply_lock.is_held());
        assert!(shared.apply_lock.acquire().await.is_err());
        drop(guard);
        assert!(shared.apply_lock.acquire().await.is_ok());
    }

    #[test]
    fn test_cache_mirrors_presence() {
        let shared = shared(20);
        let service = Service::new("svc1", &["lb1"]);
        let present = ServiceContext::present(service.clone(), vec![UpstreamInfo::new("10.0.0.1:80", None)], 1);
        shared.cache_service(&present);
        assert_eq!(shared.cached_service("svc1").unwrap().upstreams.len(), 1);

        shared.cache_service(&ServiceContext::removal(service, 2));
        assert!(shared.cached_service("svc1").is_none());
    }

    #[test]
    fn test_starts_bootstrapping() {
        let shared = shared(20);
        assert_eq!(shared.state(), AgentState::Bootstrapping);
        shared.set_state(AgentState::Accepting);
        assert_eq!(shared.state(), AgentState::Accepting);
        assert!(shared.most_recent_request_id().is_none());
    }
}
