//! Request queue: one record per request id from enqueue until retention expiry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::datastore::{DatastoreError, RequestDatastore};
use crate::models::{now_millis, ChangeRequest, ChangeResponse, QueuedRequestId, RequestStatus};
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Queued,
    Dispatched,
    Done,
}

struct Record {
    request: ChangeRequest,
    response: ChangeResponse,
    phase: Phase,
    enqueued_at: u64,
    seq: u64,
    completed_at: Option<u64>,
}

impl Record {
    fn queued_id(&self) -> QueuedRequestId {
        QueuedRequestId {
            request_id: self.request.request_id.clone(),
            service_id: self.request.service_id().to_string(),
            enqueued_at: self.enqueued_at,
        }
    }
}

pub struct RequestManager {
    records: DashMap<String, Record>,
    /// Serializes cancellation against the worker's dispatch decision.
    dispatch_gate: Mutex<()>,
    seq: AtomicU64,
    retention: Duration,
}

/// Reject requests that cannot be dispatched.
pub fn validate(request: &ChangeRequest) -> Result<(), String> {
    if request.request_id.trim().is_empty() {
        return Err("requestId must not be empty".to_string());
    }
    if request.service_id().trim().is_empty() {
        return Err("loadBalancerService.serviceId must not be empty".to_string());
    }
    let is_removal = request.add_upstreams.is_empty();
    if request.load_balancer_service.load_balancer_groups.is_empty() && !is_removal {
        return Err("a service with upstreams to add needs at least one load balancer group".to_string());
    }
    if request
        .add_upstreams
        .iter()
        .chain(request.remove_upstreams.iter())
        .any(|u| u.trim().is_empty())
    {
        return Err("upstream ids must not be empty".to_string());
    }
    Ok(())
}

impl RequestManager {
    pub fn new(retention: Duration) -> Self {
        Self {
            records: DashMap::new(),
            dispatch_gate: Mutex::new(()),
            seq: AtomicU64::new(0),
            retention,
        }
    }

    /// Queue a request. Never fails: problems are reported as a FAILURE response.
    ///
    /// A known id returns its stored response, except that a FAILURE is queued
    /// again and reported as IN_PROGRESS.
    pub async fn enqueue(&self, request: ChangeRequest) -> ChangeResponse {
        if let Err(message) = validate(&request) {
            tracing::warn!(request_id = %request.request_id, error = %message, "Rejected change request");
            return ChangeResponse::failure(&request.request_id, message);
        }

        let _gate = self.dispatch_gate.lock().await;
        let request_id = request.request_id.clone();
        if let Some(mut record) = self.records.get_mut(&request_id) {
            if record.response.status != RequestStatus::Failure {
                return record.response.clone();
            }
            tracing::info!(request_id = %request_id, "Re-queueing failed request");
            record.phase = Phase::Queued;
            record.response = ChangeResponse::in_progress(&request_id);
            record.enqueued_at = now_millis();
            record.seq = self.seq.fetch_add(1, Ordering::SeqCst);
            record.completed_at = None;
            metrics::record_request_enqueued();
            return record.response.clone();
        }

        let response = ChangeResponse::in_progress(&request_id);
        tracing::info!(request_id = %request_id, service_id = %request.service_id(), "Change request queued");
        self.records.insert(
            request_id,
            Record {
                request,
                response: response.clone(),
                phase: Phase::Queued,
                enqueued_at: now_millis(),
                seq: self.seq.fetch_add(1, Ordering::SeqCst),
                completed_at: None,
            },
        );
        metrics::record_request_enqueued();
        response
    }

    /// Cancel a request that has not been dispatched yet.
    ///
    /// Once dispatched, the current response is returned instead.
    pub async fn cancel(&self, request_id: &str) -> ChangeResponse {
        let _gate = self.dispatch_gate.lock().await;
        let Some(mut record) = self.records.get_mut(request_id) else {
            return ChangeResponse::not_exist(request_id);
        };
        if record.phase != Phase::Queued {
            return record.response.clone();
        }
        record.phase = Phase::Done;
        record.response = ChangeResponse::cancelled(request_id);
        record.completed_at = Some(now_millis());
        metrics::record_request_completed("CANCELLED");
        tracing::info!(request_id = %request_id, "Change request cancelled");
        record.response.clone()
    }

    /// Claim a queued request for dispatch. `None` if it was cancelled or already claimed.
    pub async fn begin_dispatch(&self, request_id: &str) -> Option<ChangeRequest> {
        let _gate = self.dispatch_gate.lock().await;
        let mut record = self.records.get_mut(request_id)?;
        if record.phase != Phase::Queued {
            return None;
        }
        record.phase = Phase::Dispatched;
        Some(record.request.clone())
    }

    /// Record the terminal response of a dispatched request.
    pub fn complete(&self, request_id: &str, response: ChangeResponse) {
        if let Some(mut record) = self.records.get_mut(request_id) {
            metrics::record_request_completed(match response.status {
                RequestStatus::Success => "SUCCESS",
                RequestStatus::Cancelled => "CANCELLED",
                _ => "FAILURE",
            });
            record.phase = Phase::Done;
            record.response = response;
            record.completed_at = Some(now_millis());
        }
    }

    /// Requests not yet terminal, FIFO by enqueue order.
    pub fn list_queued(&self) -> Vec<QueuedRequestId> {
        let mut open: Vec<(u64, QueuedRequestId)> = self
            .records
            .iter()
            .filter(|r| r.phase != Phase::Done)
            .map(|r| (r.seq, r.queued_id()))
            .collect();
        open.sort_by_key(|(seq, _)| *seq);
        open.into_iter().map(|(_, id)| id).collect()
    }

    /// Next requests to dispatch: FIFO, at most one per service, none for a
    /// service that already has a request in flight.
    pub fn pending_batch(&self, max: usize) -> Vec<QueuedRequestId> {
        let mut open: Vec<(u64, Phase, QueuedRequestId)> = self
            .records
            .iter()
            .filter(|r| r.phase != Phase::Done)
            .map(|r| (r.seq, r.phase, r.queued_id()))
            .collect();
        open.sort_by_key(|(seq, _, _)| *seq);

        let mut busy: std::collections::HashSet<String> = open
            .iter()
            .filter(|(_, phase, _)| *phase == Phase::Dispatched)
            .map(|(_, _, id)| id.service_id.clone())
            .collect();
        let mut batch = Vec::new();
        for (_, phase, id) in open {
            if batch.len() >= max {
                break;
            }
            if phase == Phase::Queued && busy.insert(id.service_id.clone()) {
                batch.push(id);
            }
        }
        batch
    }

    pub fn queued_count(&self) -> usize {
        self.records.iter().filter(|r| r.phase != Phase::Done).count()
    }

    pub fn get_response(&self, request_id: &str) -> Option<ChangeResponse> {
        self.records.get(request_id).map(|r| r.response.clone())
    }

    pub fn get_request(&self, request_id: &str) -> Option<ChangeRequest> {
        self.records.get(request_id).map(|r| r.request.clone())
    }

    /// Drop terminal records older than the retention window. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let cutoff = now_millis().saturating_sub(self.retention.as_millis() as u64);
        let before = self.records.len();
        self.records
            .retain(|_, r| !matches!(r.completed_at, Some(done) if r.phase == Phase::Done && done < cutoff));
        let purged = before.saturating_sub(self.records.len());
        if purged > 0 {
            tracing::debug!(purged, "Purged expired responses");
        }
        purged
    }
}

#[async_trait]
impl RequestDatastore for RequestManager {
    async fn get_request(&self, request_id: &str) -> Result<Option<ChangeRequest>, DatastoreError> {
        Ok(RequestManager::get_request(self, request_id))
    }
}
