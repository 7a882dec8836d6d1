//! Request worker: turns queued requests into fleet-wide applies.
//!
//! Runs only while this replica holds leadership. Each tick takes a batch
//! from the queue, dispatches every request to its agents and records one
//! terminal response per request.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use crate::coordination::LeaderLatch;
use crate::coordinator::dispatch::{AgentDispatcher, DispatchAction};
use crate::coordinator::queue::RequestManager;
use crate::coordinator::registry::AgentRegistry;
use crate::datastore::MemoryDatastore;
use crate::models::{AgentResponse, ChangeRequest, ChangeResponse};
use crate::observability::metrics;

pub struct RequestWorker {
    requests: Arc<RequestManager>,
    datastore: Arc<MemoryDatastore>,
    registry: Arc<AgentRegistry>,
    dispatcher: AgentDispatcher,
    leader: Arc<dyn LeaderLatch>,
    poll_interval: Duration,
    max_batch: usize,
}

impl RequestWorker {
    pub fn new(
        requests: Arc<RequestManager>,
        datastore: Arc<MemoryDatastore>,
        registry: Arc<AgentRegistry>,
        dispatcher: AgentDispatcher,
        leader: Arc<dyn LeaderLatch>,
        poll_interval: Duration,
        max_batch: usize,
    ) -> Self {
        Self {
            requests,
            datastore,
            registry,
            dispatcher,
            leader,
            poll_interval,
            max_batch: max_batch.max(1),
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(poll_interval = ?self.poll_interval, "Request worker started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.leader.has_leadership() {
                        continue;
                    }
                    self.process_pending().await;
                    self.requests.purge_expired();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Request worker stopped");
                    break;
                }
            }
        }
    }

    /// Process one batch. Returns the number of requests that reached a terminal state.
    pub async fn process_pending(&self) -> usize {
        let batch = self.requests.pending_batch(self.max_batch);
        metrics::record_queue_depth(self.requests.queued_count());
        if batch.is_empty() {
            return 0;
        }
        tracing::debug!(batch = batch.len(), "Dispatching batch");
        let results = join_all(batch.iter().map(|queued| self.process(&queued.request_id))).await;
        results.into_iter().flatten().count()
    }

    /// Dispatch one request. `None` if it was cancelled before dispatch.
    pub async fn process(&self, request_id: &str) -> Option<ChangeResponse> {
        let request = self.requests.begin_dispatch(request_id).await?;
        let span = tracing::info_span!("dispatch", request_id = %request_id, service_id = %request.service_id());
        let response = self.dispatch(&request).instrument(span).await;
        self.requests.complete(request_id, response.clone());
        Some(response)
    }

    async fn dispatch(&self, request: &ChangeRequest) -> ChangeResponse {
        let request_id = request.request_id.as_str();

        let mut groups = request.load_balancer_service.load_balancer_groups.clone();
        if let Some(previous) = self.datastore.service(request.service_id()) {
            groups.extend(previous.load_balancer_groups);
        }
        let agents = self.registry.agents_for_groups(&groups);
        if agents.is_empty() {
            self.datastore.commit_request(request);
            tracing::info!("No agents serve this service, committed directly");
            return ChangeResponse::success(request_id, Some("no agents".to_string()));
        }

        let results = self.dispatcher.dispatch_all(DispatchAction::Apply, request_id, &agents).await;
        if results.values().all(AgentResponse::is_success) {
            let version = self.datastore.commit_request(request);
            tracing::info!(agents = results.len(), version, "Change applied on all agents");
            return ChangeResponse::success(request_id, None).with_agent_responses(results);
        }

        let message = failure_message(&results);
        tracing::warn!(error = %message, "Change failed, reverting agents");
        let reverts = self.dispatcher.dispatch_all(DispatchAction::Revert, request_id, &agents).await;
        for (agent_id, revert) in reverts.iter().filter(|(_, r)| !r.is_success()) {
            tracing::error!(
                agent_id = %agent_id,
                status = ?revert.status_code,
                error = ?revert.message,
                "Revert failed, agent will resync on its next bootstrap"
            );
        }
        ChangeResponse::failure(request_id, message).with_agent_responses(results)
    }
}

/// Union of per-agent failure messages in agent order.
fn failure_message(results: &BTreeMap<String, AgentResponse>) -> String {
    results
        .iter()
        .filter(|(_, r)| !r.is_success())
        .map(|(agent_id, r)| {
            let status = r
                .status_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "no response".to_string());
            format!(
                "agent {} ({}): {}",
                agent_id,
                status,
                r.message.as_deref().unwrap_or("unknown error")
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_message_lists_failed_agents() {
        let mut results = BTreeMap::new();
        results.insert(
            "a1".to_string(),
            AgentResponse {
                status_code: Some(200),
                message: None,
                attempt: 1,
            },
        );
        results.insert(
            "a2".to_string(),
            AgentResponse {
                status_code: Some(400),
                message: Some("invalid configuration: bad".to_string()),
                attempt: 1,
            },
        );
        results.insert(
            "a3".to_string(),
            AgentResponse {
                status_code: None,
                message: Some("connection refused".to_string()),
                attempt: 3,
            },
        );
        assert_eq!(
            failure_message(&results),
            "agent a2 (400): invalid configuration: bad; agent a3 (no response): connection refused"
        );
    }
}
