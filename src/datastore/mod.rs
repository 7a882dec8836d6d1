//! Authoritative state access.
//!
//! # Data Flow
//! ```text
//! coordinator: RequestWorker ──commit──▶ MemoryDatastore ──snapshot──▶ state file (JSON)
//!                                              │
//!                                    GET /state, /state-version
//!                                              ▼
//! agent:       ApplyGate / Bootstrapper ──▶ RemoteDatastore (HTTP)
//! ```
//!
//! Agents never author global state; only the coordinator commits.

pub mod memory;
pub mod remote;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{ChangeRequest, Service, ServiceState, UpstreamMap};

pub use memory::MemoryDatastore;
pub use remote::RemoteDatastore;

#[derive(Debug, Error)]
pub enum DatastoreError {
    #[error("state unavailable: {0}")]
    Unavailable(String),

    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Read access to services, upstreams and the global state version.
#[async_trait]
pub trait StateDatastore: Send + Sync {
    async fn list_services(&self) -> Result<Vec<Service>, DatastoreError>;

    async fn get_service(&self, service_id: &str) -> Result<Option<Service>, DatastoreError>;

    /// Upstreams of a service keyed by upstream id. Unknown services yield an empty map.
    async fn get_upstreams_map(&self, service_id: &str) -> Result<UpstreamMap, DatastoreError>;

    /// Monotonic counter bumped on every commit. `None` if the store has no version yet.
    async fn get_state_version(&self) -> Result<Option<u64>, DatastoreError>;

    /// Every service with its full upstream set.
    async fn get_global_state(&self) -> Result<Vec<ServiceState>, DatastoreError>;
}

/// Lookup of submitted change requests by id.
#[async_trait]
pub trait RequestDatastore: Send + Sync {
    async fn get_request(&self, request_id: &str) -> Result<Option<ChangeRequest>, DatastoreError>;
}
