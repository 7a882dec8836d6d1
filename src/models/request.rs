//! Change requests, queue identities and terminal responses.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::models::service::Service;

/// An operator-submitted change to the upstreams of one service.
///
/// `request_id` is the idempotency key: submitting the same id twice never
/// produces a second queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequest {
    pub request_id: String,
    pub load_balancer_service: Service,
    #[serde(default)]
    pub add_upstreams: Vec<String>,
    #[serde(default)]
    pub remove_upstreams: BTreeSet<String>,
}

impl ChangeRequest {
    pub fn service_id(&self) -> &str {
        &self.load_balancer_service.service_id
    }
}

/// A request that is waiting for, or undergoing, processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRequestId {
    pub request_id: String,
    pub service_id: String,
    /// Enqueue time in milliseconds since epoch.
    pub enqueued_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Success,
    Failure,
    InProgress,
    Cancelled,
    NotExist,
}

impl RequestStatus {
    /// Terminal statuses never change once recorded.
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Success | RequestStatus::Failure | RequestStatus::Cancelled)
    }
}

/// Outcome of one apply/revert call against one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    /// HTTP status returned by the agent, `None` when no response arrived.
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Number of attempts made (1-based).
    pub attempt: u32,
}

impl AgentResponse {
    pub fn is_success(&self) -> bool {
        matches!(self.status_code, Some(code) if (200..300).contains(&code))
    }
}

/// The single definitive outcome for a request id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeResponse {
    pub request_id: String,
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Per-agent outcomes keyed by agent id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub agent_responses: BTreeMap<String, AgentResponse>,
}

impl ChangeResponse {
    fn new(request_id: &str, status: RequestStatus, message: Option<String>) -> Self {
        Self {
            request_id: request_id.to_string(),
            status,
            message,
            agent_responses: BTreeMap::new(),
        }
    }

    pub fn in_progress(request_id: &str) -> Self {
        Self::new(request_id, RequestStatus::InProgress, None)
    }

    pub fn success(request_id: &str, message: Option<String>) -> Self {
        Self::new(request_id, RequestStatus::Success, message)
    }

    pub fn failure(request_id: &str, message: impl Into<String>) -> Self {
        Self::new(request_id, RequestStatus::Failure, Some(message.into()))
    }

    pub fn cancelled(request_id: &str) -> Self {
        Self::new(request_id, RequestStatus::Cancelled, Some("Request cancelled before dispatch".to_string()))
    }

    pub fn not_exist(request_id: &str) -> Self {
        Self::new(
            request_id,
            RequestStatus::NotExist,
            Some(format!("Request {} does not exist", request_id)),
        )
    }

    pub fn with_agent_responses(mut self, agent_responses: BTreeMap<String, AgentResponse>) -> Self {
        self.agent_responses = agent_responses;
        self
    }
}
