//! Agents known to the coordinator, by load balancer group.

use std::collections::BTreeSet;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{CoordinatorConfig, StaticAgentConfig};
use crate::models::{now_millis, AgentMetadata, CheckInResponse};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredAgent {
    pub group: String,
    pub agent_id: String,
    pub base_agent_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown check-in action '{0}'")]
    UnknownAction(String),
}

type AgentKey = (String, String);

pub struct AgentRegistry {
    agents: DashMap<AgentKey, RegisteredAgent>,
    /// Drain start per agent that announced shutdown.
    draining: DashMap<AgentKey, u64>,
    drain_wait_ms: u64,
    drain_poll_ms: u64,
}

impl AgentRegistry {
    pub fn new(config: &CoordinatorConfig) -> Self {
        let registry = Self {
            agents: DashMap::new(),
            draining: DashMap::new(),
            drain_wait_ms: config.drain_wait_ms,
            drain_poll_ms: config.drain_poll_ms.max(1),
        };
        for agent in &config.agents {
            registry.register_static(agent);
        }
        registry
    }

    fn register_static(&self, agent: &StaticAgentConfig) {
        self.register(
            &agent.group,
            &AgentMetadata {
                agent_id: agent.agent_id.clone(),
                base_agent_uri: agent.base_agent_uri.clone(),
                domain: None,
            },
        );
    }

    pub fn register(&self, group: &str, metadata: &AgentMetadata) {
        let key = (group.to_string(), metadata.agent_id.clone());
        self.draining.remove(&key);
        let agent = RegisteredAgent {
            group: group.to_string(),
            agent_id: metadata.agent_id.clone(),
            base_agent_uri: metadata.base_agent_uri.clone(),
            domain: metadata.domain.clone(),
        };
        if self.agents.insert(key, agent).is_none() {
            tracing::info!(group = %group, agent_id = %metadata.agent_id, uri = %metadata.base_agent_uri, "Agent registered");
        }
    }

    /// Agents serving any of the given groups, ordered by group then id.
    pub fn agents_for_groups(&self, groups: &BTreeSet<String>) -> Vec<RegisteredAgent> {
        let mut agents: Vec<RegisteredAgent> = self
            .agents
            .iter()
            .filter(|r| groups.contains(&r.group))
            .map(|r| r.value().clone())
            .collect();
        agents.sort_by(|a, b| (&a.group, &a.agent_id).cmp(&(&b.group, &b.agent_id)));
        agents
    }

    pub fn all(&self) -> Vec<RegisteredAgent> {
        let mut agents: Vec<RegisteredAgent> = self.agents.iter().map(|r| r.value().clone()).collect();
        agents.sort_by(|a, b| (&a.group, &a.agent_id).cmp(&(&b.group, &b.agent_id)));
        agents
    }

    /// Handle `POST /checkin/{group}/{action}`.
    pub fn check_in(&self, group: &str, action: &str, metadata: &AgentMetadata) -> Result<CheckInResponse, RegistryError> {
        match action {
            "startup" => {
                self.register(group, metadata);
                Ok(CheckInResponse::done())
            }
            "shutdown" => Ok(self.drain(group, metadata)),
            other => Err(RegistryError::UnknownAction(other.to_string())),
        }
    }

    fn drain(&self, group: &str, metadata: &AgentMetadata) -> CheckInResponse {
        let key = (group.to_string(), metadata.agent_id.clone());
        if self.agents.remove(&key).is_some() {
            tracing::info!(group = %group, agent_id = %metadata.agent_id, "Agent removed from dispatch, draining");
        }

        let now = now_millis();
        let started = *self.draining.entry(key.clone()).or_insert(now);
        let elapsed = now.saturating_sub(started);
        if elapsed >= self.drain_wait_ms {
            self.draining.remove(&key);
            return CheckInResponse::done();
        }
        CheckInResponse::waiting((self.drain_wait_ms - elapsed).min(self.drain_poll_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrafficSourceState;

    fn metadata(id: &str) -> AgentMetadata {
        AgentMetadata {
            agent_id: id.to_string(),
            base_agent_uri: format!("http://{}:8882", id),
            domain: None,
        }
    }

    fn registry(drain_wait_ms: u64) -> AgentRegistry {
        AgentRegistry::new(&CoordinatorConfig {
            drain_wait_ms,
            drain_poll_ms: 50,
            ..CoordinatorConfig::default()
        })
    }

    #[test]
    fn test_startup_registers_by_group() {
        let registry = registry(0);
        registry.check_in("lb1", "startup", &metadata("a1")).unwrap();
        registry.check_in("lb2", "startup", &metadata("a2")).unwrap();

        let groups: BTreeSet<String> = ["lb1".to_string()].into_iter().collect();
        let agents = registry.agents_for_groups(&groups);
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].agent_id, "a1");
    }

    #[test]
    fn test_shutdown_drains_before_done() {
        let registry = registry(60_000);
        registry.check_in("lb1", "startup", &metadata("a1")).unwrap();

        let first = registry.check_in("lb1", "shutdown", &metadata("a1")).unwrap();
        assert_eq!(first.state, TrafficSourceState::Waiting);
        assert_eq!(first.wait_time, 50);
        assert!(registry.all().is_empty());
    }

    #[test]
    fn test_shutdown_without_drain_wait() {
        let registry = registry(0);
        let response = registry.check_in("lb1", "shutdown", &metadata("a1")).unwrap();
        assert_eq!(response.state, TrafficSourceState::Done);
    }

    #[test]
    fn test_unknown_action() {
        assert!(registry(0).check_in("lb1", "restart", &metadata("a1")).is_err());
    }
}
