//! Wire and domain types shared by the coordinator and the agents.
//!
//! # Data Flow
//! ```text
//! operator ──ChangeRequest──▶ coordinator queue ──QueuedRequestId──▶ worker
//!                                   │
//!                                   ▼
//!                            ChangeResponse (one per request id)
//!
//! agent: ChangeRequest + authoritative upstreams ──▶ ServiceContext ──▶ applier
//!        applied ServiceContext ──▶ BasicServiceContext (local cache)
//! ```
//!
//! All types serialize with camelCase field names.

pub mod agent;
pub mod request;
pub mod service;

pub use agent::{AgentMetadata, AgentState, AgentStatus, CheckInResponse, TrafficSourceState};
pub use request::{AgentResponse, ChangeRequest, ChangeResponse, QueuedRequestId, RequestStatus};
pub use service::{BasicServiceContext, Service, ServiceContext, ServiceState, UpstreamInfo, UpstreamMap};

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
