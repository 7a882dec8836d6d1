//! Services, upstreams and the desired-state snapshots built from them.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Upstreams of one service keyed by upstream id.
pub type UpstreamMap = BTreeMap<String, UpstreamInfo>;

/// Identity of a load-balanced service and the groups serving it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub service_id: String,
    #[serde(default)]
    pub service_base_path: String,
    #[serde(default)]
    pub load_balancer_groups: BTreeSet<String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl Service {
    pub fn new(service_id: &str, groups: &[&str]) -> Self {
        Self {
            service_id: service_id.to_string(),
            service_base_path: "/".to_string(),
            load_balancer_groups: groups.iter().map(|g| g.to_string()).collect(),
            options: BTreeMap::new(),
        }
    }

    /// True if the given load balancer group serves this service.
    pub fn in_group(&self, group: &str) -> bool {
        self.load_balancer_groups.contains(group)
    }
}

/// A backend endpoint registered under a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamInfo {
    /// host:port of the backend.
    pub upstream: String,
    /// Request that last added this upstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl UpstreamInfo {
    pub fn new(upstream: &str, request_id: Option<&str>) -> Self {
        Self {
            upstream: upstream.to_string(),
            request_id: request_id.map(str::to_string),
        }
    }
}

/// Authoritative state of one service, as served by `GET /state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceState {
    pub service: Service,
    #[serde(default)]
    pub upstreams: Vec<UpstreamInfo>,
}

/// Full desired state of a service on one agent.
///
/// Never a delta: `upstreams` is the complete set the config must contain.
/// `present == false` means the service must have no config on this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceContext {
    pub service: Service,
    pub upstreams: Vec<UpstreamInfo>,
    pub timestamp: u64,
    pub present: bool,
}

impl ServiceContext {
    pub fn present(service: Service, upstreams: impl IntoIterator<Item = UpstreamInfo>, timestamp: u64) -> Self {
        let mut upstreams: Vec<UpstreamInfo> = upstreams.into_iter().collect();
        upstreams.sort_by(|a, b| a.upstream.cmp(&b.upstream));
        Self {
            service,
            upstreams,
            timestamp,
            present: true,
        }
    }

    pub fn removal(service: Service, timestamp: u64) -> Self {
        Self {
            service,
            upstreams: Vec::new(),
            timestamp,
            present: false,
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service.service_id
    }
}

/// Last successfully applied config for a service on this agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicServiceContext {
    pub service: Service,
    pub upstreams: Vec<UpstreamInfo>,
    pub timestamp: u64,
}

impl From<&ServiceContext> for BasicServiceContext {
    fn from(context: &ServiceContext) -> Self {
        Self {
            service: context.service.clone(),
            upstreams: context.upstreams.clone(),
            timestamp: context.timestamp,
        }
    }
}
