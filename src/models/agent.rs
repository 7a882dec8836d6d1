//! Agent identity, process state and check-in types.

use serde::{Deserialize, Serialize};

/// Process-wide agent state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    Bootstrapping = 0,
    Accepting = 1,
}

impl From<u8> for AgentState {
    fn from(val: u8) -> Self {
        match val {
            1 => AgentState::Accepting,
            _ => AgentState::Bootstrapping,
        }
    }
}

/// How an agent identifies itself to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetadata {
    pub agent_id: String,
    /// Base URI the coordinator uses to reach this agent's HTTP surface.
    pub base_agent_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrafficSourceState {
    Waiting,
    Done,
}

/// Reply to an agent check-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInResponse {
    pub state: TrafficSourceState,
    /// How long the agent should wait before polling again, in milliseconds.
    #[serde(default)]
    pub wait_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_message: Option<String>,
}

impl CheckInResponse {
    pub fn done() -> Self {
        Self {
            state: TrafficSourceState::Done,
            wait_time: 0,
            exception_message: None,
        }
    }

    pub fn waiting(wait_time: u64) -> Self {
        Self {
            state: TrafficSourceState::Waiting,
            wait_time,
            exception_message: None,
        }
    }
}

/// Snapshot served by the agent's `GET /status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub group: String,
    pub valid_config: bool,
    pub error_message: Option<String>,
    pub leader: bool,
    pub most_recent_request_id: Option<String>,
    pub connection_state: String,
    pub agent_info: AgentMetadata,
    pub agent_state: AgentState,
    pub state_errors: Vec<String>,
    pub directory_watch_error: Option<String>,
}
