//! Coordinator role: owns the request queue and the authoritative state.
//!
//! # Data Flow
//! ```text
//! POST /request ──▶ queue.rs (RequestManager) ──▶ worker.rs (leader only)
//!                                                     │
//!                           registry.rs ◀── agents ───┤
//!                                                     ▼
//!                                   dispatch.rs ──POST/DELETE {agent}/request/{id}
//!                                                     │
//!                         all 2xx: MemoryDatastore::commit_request
//!                         else:    revert every agent, FAILURE
//! ```

pub mod api;
pub mod dispatch;
pub mod queue;
pub mod registry;
pub mod worker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::FleetConfig;
use crate::coordination::{LeaderLatch, StaticLeaderLatch};
use crate::datastore::{DatastoreError, MemoryDatastore};
use crate::http::AuthKey;

pub use dispatch::{AgentDispatcher, DispatchAction};
pub use queue::RequestManager;
pub use registry::{AgentRegistry, RegisteredAgent};
pub use worker::RequestWorker;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("failed to load state: {0}")]
    Datastore(#[from] DatastoreError),

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

pub struct Coordinator {
    config: FleetConfig,
    requests: Arc<RequestManager>,
    datastore: Arc<MemoryDatastore>,
    registry: Arc<AgentRegistry>,
    worker: Arc<RequestWorker>,
    leader: Arc<dyn LeaderLatch>,
}

impl Coordinator {
    pub fn new(config: &FleetConfig) -> Result<Self, CoordinatorError> {
        let datastore = match &config.coordinator.state_file {
            Some(path) => MemoryDatastore::load_from_file(&PathBuf::from(path))?,
            None => MemoryDatastore::new(None),
        };
        let leader = Arc::new(StaticLeaderLatch::new(config.coordinator.leader));
        Self::with_parts(config, Arc::new(datastore), leader)
    }

    pub fn with_parts(
        config: &FleetConfig,
        datastore: Arc<MemoryDatastore>,
        leader: Arc<dyn LeaderLatch>,
    ) -> Result<Self, CoordinatorError> {
        let coordinator = &config.coordinator;
        let requests = Arc::new(RequestManager::new(Duration::from_secs(coordinator.response_retention_secs)));
        let registry = Arc::new(AgentRegistry::new(coordinator));
        let worker = Arc::new(RequestWorker::new(
            requests.clone(),
            datastore.clone(),
            registry.clone(),
            AgentDispatcher::new(config)?,
            leader.clone(),
            Duration::from_millis(coordinator.poll_interval_ms),
            coordinator.max_batch_size,
        ));
        Ok(Self {
            config: config.clone(),
            requests,
            datastore,
            registry,
            worker,
            leader,
        })
    }

    pub fn requests(&self) -> &Arc<RequestManager> {
        &self.requests
    }

    pub fn datastore(&self) -> &Arc<MemoryDatastore> {
        &self.datastore
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn worker(&self) -> &Arc<RequestWorker> {
        &self.worker
    }

    pub fn router(&self) -> Router {
        let state = api::CoordinatorApiState {
            requests: self.requests.clone(),
            datastore: self.datastore.clone(),
            registry: self.registry.clone(),
            leader: self.leader.clone(),
        };
        api::router(state, AuthKey::new(self.config.auth.key.as_deref()))
    }

    pub fn spawn_worker(&self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.worker.clone().run(shutdown))
    }

    /// Release leadership and write a final snapshot.
    pub fn shutdown(&self) {
        self.leader.close();
        if let Err(e) = self.datastore.save_to_file() {
            tracing::error!(error = %e, "Failed to save state snapshot on shutdown");
        }
    }
}
