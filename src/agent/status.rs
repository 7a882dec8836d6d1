//! Read-only view of an agent for `GET /status`.

use std::sync::Arc;

use crate::agent::state::AgentShared;
use crate::applier::ConfigApplier;
use crate::coordination::LeaderLatch;
use crate::models::{AgentStatus, BasicServiceContext};

pub struct StatusAggregator {
    shared: Arc<AgentShared>,
    applier: Arc<dyn ConfigApplier>,
    leader: Arc<dyn LeaderLatch>,
}

impl StatusAggregator {
    pub fn new(shared: Arc<AgentShared>, applier: Arc<dyn ConfigApplier>, leader: Arc<dyn LeaderLatch>) -> Self {
        Self {
            shared,
            applier,
            leader,
        }
    }

    /// Current status. `skip_cache` re-runs the config check first.
    pub async fn status(&self, skip_cache: bool) -> AgentStatus {
        if skip_cache {
            let result = self.applier.check_configs().await;
            self.shared.set_config_error(result.err().map(|e| e.to_string()));
        }
        let error_message = self.shared.config_error();
        AgentStatus {
            group: self.shared.group.clone(),
            valid_config: error_message.is_none(),
            error_message,
            leader: self.leader.has_leadership(),
            most_recent_request_id: self.shared.most_recent_request_id(),
            connection_state: self.shared.connection.describe(),
            agent_info: self.shared.metadata.clone(),
            agent_state: self.shared.state(),
            state_errors: self.shared.state_errors(),
            directory_watch_error: self.shared.directory_watch_error(),
        }
    }

    pub fn service(&self, service_id: &str) -> Option<BasicServiceContext> {
        self.shared.cached_service(service_id)
    }
}
