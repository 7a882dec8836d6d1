//! Apply gate: the one entry point for mutating local config on request.
//!
//! Both operations hold the apply lock for their whole duration, so at most one
//! apply, revert or bootstrap runs on an agent at a time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::agent::state::{AgentShared, LockTimeout};
use crate::applier::{ApplierError, ConfigApplier};
use crate::config::TestingConfig;
use crate::datastore::{DatastoreError, RequestDatastore, StateDatastore};
use crate::models::{now_millis, ChangeRequest, ServiceContext, UpstreamInfo, UpstreamMap};
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    LockTimeout(#[from] LockTimeout),

    #[error("Request {0} does not exist")]
    NotFound(String),

    #[error("{0}")]
    Applier(#[from] ApplierError),

    #[error("Random testing failure")]
    InjectedFailure,

    #[error(transparent)]
    Datastore(#[from] DatastoreError),
}

impl GateError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GateError::LockTimeout(_) => StatusCode::CONFLICT,
            GateError::NotFound(_) => StatusCode::NOT_FOUND,
            GateError::Applier(_) => StatusCode::BAD_REQUEST,
            GateError::InjectedFailure | GateError::Datastore(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Apply,
    Revert,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Operation::Apply => "apply",
            Operation::Revert => "revert",
        }
    }
}

/// Desired state for applying `request` on top of the current authoritative upstreams.
///
/// Removals run first, so an id present in both lists ends up added.
pub fn desired_for_apply(request: &ChangeRequest, mut current: UpstreamMap, timestamp: u64) -> ServiceContext {
    for id in &request.remove_upstreams {
        current.remove(id);
    }
    for id in &request.add_upstreams {
        current.insert(id.clone(), UpstreamInfo::new(id, Some(&request.request_id)));
    }
    ServiceContext::present(request.load_balancer_service.clone(), current.into_values(), timestamp)
}

pub struct ApplyGate {
    shared: Arc<AgentShared>,
    state: Arc<dyn StateDatastore>,
    requests: Arc<dyn RequestDatastore>,
    applier: Arc<dyn ConfigApplier>,
    testing: TestingConfig,
}

impl ApplyGate {
    pub fn new(
        shared: Arc<AgentShared>,
        state: Arc<dyn StateDatastore>,
        requests: Arc<dyn RequestDatastore>,
        applier: Arc<dyn ConfigApplier>,
        testing: TestingConfig,
    ) -> Self {
        Self {
            shared,
            state,
            requests,
            applier,
            testing,
        }
    }

    /// Apply a change request. Re-applying the same request yields the same files.
    #[tracing::instrument(skip(self), fields(group = %self.shared.group))]
    pub async fn apply(&self, request_id: &str) -> Result<ServiceContext, GateError> {
        self.run(Operation::Apply, request_id).await
    }

    /// Resync the request's service to the current authoritative state.
    ///
    /// Like apply, a failed check puts the previous files back.
    #[tracing::instrument(skip(self), fields(group = %self.shared.group))]
    pub async fn revert(&self, request_id: &str) -> Result<ServiceContext, GateError> {
        self.run(Operation::Revert, request_id).await
    }

    async fn run(&self, operation: Operation, request_id: &str) -> Result<ServiceContext, GateError> {
        let started = Instant::now();
        let result = self.locked(operation, request_id).await;
        metrics::record_apply(operation.as_str(), result.is_ok(), started);
        match &result {
            Ok(context) => tracing::info!(
                operation = operation.as_str(),
                service_id = context.service_id(),
                upstreams = context.upstreams.len(),
                present = context.present,
                "Request applied"
            ),
            Err(e) => tracing::warn!(operation = operation.as_str(), error = %e, "Request rejected"),
        }
        result
    }

    async fn locked(&self, operation: Operation, request_id: &str) -> Result<ServiceContext, GateError> {
        let _guard = self.shared.apply_lock.acquire().await?;

        let request = self
            .requests
            .get_request(request_id)
            .await?
            .ok_or_else(|| GateError::NotFound(request_id.to_string()))?;

        match operation {
            Operation::Apply => self.inject(self.testing.apply_delay_ms, self.testing.apply_fail_rate).await?,
            Operation::Revert => self.inject(self.testing.revert_delay_ms, self.testing.revert_fail_rate).await?,
        }

        let context = match operation {
            Operation::Apply => self.desired_after_apply(&request).await?,
            Operation::Revert => self.desired_after_revert(&request).await?,
        };

        self.shared.mark_local_write();
        if let Err(e) = self.applier.apply(context.clone(), true).await {
            self.shared.set_config_error(Some(e.to_string()));
            return Err(e.into());
        }
        self.shared.set_config_error(None);
        self.shared.cache_service(&context);
        if let Operation::Apply = operation {
            self.shared.set_most_recent_request_id(request_id);
        }
        Ok(context)
    }

    async fn desired_after_apply(&self, request: &ChangeRequest) -> Result<ServiceContext, GateError> {
        let service = &request.load_balancer_service;
        if !service.in_group(&self.shared.group) {
            return Ok(ServiceContext::removal(service.clone(), now_millis()));
        }
        let current = self.state.get_upstreams_map(&service.service_id).await?;
        Ok(desired_for_apply(request, current, now_millis()))
    }

    async fn desired_after_revert(&self, request: &ChangeRequest) -> Result<ServiceContext, GateError> {
        let service_id = request.service_id();
        match self.state.get_service(service_id).await? {
            Some(service) if service.in_group(&self.shared.group) => {
                let upstreams = self.state.get_upstreams_map(service_id).await?;
                Ok(ServiceContext::present(service, upstreams.into_values(), now_millis()))
            }
            _ => Ok(ServiceContext::removal(request.load_balancer_service.clone(), now_millis())),
        }
    }

    async fn inject(&self, delay_ms: u64, fail_rate: f32) -> Result<(), GateError> {
        if !self.testing.enabled {
            return Ok(());
        }
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        if fail_rate > 0.0 && rand::random::<f32>() < fail_rate {
            return Err(GateError::InjectedFailure);
        }
        Ok(())
    }
}
