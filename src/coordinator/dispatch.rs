//! Fan-out of apply and revert calls to agents.

use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use reqwest::Method;
use thiserror::Error;
use url::Url;

use crate::config::FleetConfig;
use crate::coordinator::registry::RegisteredAgent;
use crate::models::AgentResponse;
use crate::observability::metrics;
use crate::resilience::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchAction {
    Apply,
    Revert,
}

impl DispatchAction {
    pub fn as_str(self) -> &'static str {
        match self {
            DispatchAction::Apply => "apply",
            DispatchAction::Revert => "revert",
        }
    }

    fn method(self) -> Method {
        match self {
            DispatchAction::Apply => Method::POST,
            DispatchAction::Revert => Method::DELETE,
        }
    }
}

/// A failed call to one agent.
#[derive(Debug, Error)]
#[error("{message}")]
struct CallError {
    status: Option<u16>,
    message: String,
    retryable: bool,
}

impl CallError {
    /// Conflicts, server errors and transport failures are worth retrying.
    fn from_status(status: u16, body: String) -> Self {
        let message = if body.trim().is_empty() {
            format!("HTTP {}", status)
        } else {
            body
        };
        Self {
            status: Some(status),
            message,
            retryable: status == 409 || status >= 500,
        }
    }
}

pub struct AgentDispatcher {
    http: reqwest::Client,
    auth_key: Option<String>,
    apply_policy: RetryPolicy,
    revert_policy: RetryPolicy,
    concurrency: usize,
}

impl AgentDispatcher {
    pub fn new(config: &FleetConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.http.request_timeout_ms))
            .connect_timeout(Duration::from_millis(config.http.connect_timeout_ms))
            .build()?;
        let coordinator = &config.coordinator;
        Ok(Self {
            http,
            auth_key: config.auth.key.clone(),
            apply_policy: RetryPolicy::new(coordinator.apply_attempts, &config.retries),
            revert_policy: RetryPolicy::new(coordinator.revert_attempts, &config.retries),
            concurrency: coordinator.max_concurrent_dispatch.max(1),
        })
    }

    /// Call every agent, at most `max_concurrent_dispatch` at a time.
    ///
    /// Returns one outcome per agent id.
    pub async fn dispatch_all(
        &self,
        action: DispatchAction,
        request_id: &str,
        agents: &[RegisteredAgent],
    ) -> BTreeMap<String, AgentResponse> {
        let calls: Vec<_> = agents
            .iter()
            .map(move |agent| async move {
                let response = self.call(action, request_id, agent).await;
                (agent.agent_id.clone(), response)
            })
            .collect();
        stream::iter(calls)
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }

    async fn call(&self, action: DispatchAction, request_id: &str, agent: &RegisteredAgent) -> AgentResponse {
        let policy = match action {
            DispatchAction::Apply => self.apply_policy,
            DispatchAction::Revert => self.revert_policy,
        };
        let what = format!("{} {} on {}", action.as_str(), request_id, agent.agent_id);
        let result = policy
            .run_if(
                &what,
                move |attempt| self.send_once(action, request_id, agent, attempt),
                |e: &CallError| e.retryable,
            )
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => AgentResponse {
                status_code: e.last.status,
                message: Some(e.last.message),
                attempt: e.attempts,
            },
        };
        metrics::record_agent_call(action.as_str(), response.is_success());
        response
    }

    async fn send_once(
        &self,
        action: DispatchAction,
        request_id: &str,
        agent: &RegisteredAgent,
        attempt: u32,
    ) -> Result<AgentResponse, CallError> {
        let url = agent_request_url(&agent.base_agent_uri, request_id).ok_or_else(|| CallError {
            status: None,
            message: format!("invalid agent URI '{}'", agent.base_agent_uri),
            retryable: false,
        })?;

        let mut builder = self.http.request(action.method(), url);
        if let Some(key) = &self.auth_key {
            builder = builder.query(&[("authkey", key)]);
        }

        let response = builder.send().await.map_err(|e| CallError {
            status: None,
            message: e.to_string(),
            retryable: true,
        })?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(CallError::from_status(status.as_u16(), body));
        }
        Ok(AgentResponse {
            status_code: Some(status.as_u16()),
            message: None,
            attempt,
        })
    }
}

/// `{base}/request/{id}`, with the id escaped as one path segment.
pub fn agent_request_url(base: &str, request_id: &str) -> Option<Url> {
    let mut url = Url::parse(base).ok()?;
    url.path_segments_mut().ok()?.pop_if_empty().extend(["request", request_id]);
    Some(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_request_url() {
        let url = agent_request_url("http://10.0.0.5:8882", "r 1").unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.5:8882/request/r%201");
        assert!(agent_request_url("not a uri", "r1").is_none());
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(CallError::from_status(409, String::new()).retryable);
        assert!(CallError::from_status(503, String::new()).retryable);
        assert!(!CallError::from_status(400, "bad config".into()).retryable);
        assert!(!CallError::from_status(404, String::new()).retryable);
        assert_eq!(CallError::from_status(500, String::new()).message, "HTTP 500");
    }
}
