//! Bringing an agent in line with the fleet's authoritative state.
//!
//! Runs at startup and after the coordinator connection comes back. Services
//! are decided concurrently, written one by one, checked as a batch and, if the
//! batch check fails, re-applied individually so one bad service cannot block
//! the rest.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinSet;

use crate::agent::state::{AgentShared, LockTimeout};
use crate::applier::{ApplierError, ConfigApplier, PlannedApply};
use crate::datastore::{DatastoreError, StateDatastore};
use crate::lifecycle::{AbortHandle, FatalError};
use crate::models::{now_millis, AgentState, ServiceContext};
use crate::observability::metrics;
use crate::resilience::{RetryError, RetryPolicy};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Lock(#[from] LockTimeout),

    #[error("state unavailable: {0}")]
    GlobalState(#[from] RetryError<DatastoreError>),

    #[error(transparent)]
    Applier(#[from] ApplierError),
}

/// What a bootstrap run did, by service id.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub version: Option<u64>,
    pub applied: Vec<String>,
    pub unchanged: Vec<String>,
    pub failed: Vec<String>,
}

pub struct Bootstrapper {
    shared: Arc<AgentShared>,
    state: Arc<dyn StateDatastore>,
    applier: Arc<dyn ConfigApplier>,
    retry: RetryPolicy,
}

impl Bootstrapper {
    pub fn new(
        shared: Arc<AgentShared>,
        state: Arc<dyn StateDatastore>,
        applier: Arc<dyn ConfigApplier>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            shared,
            state,
            applier,
            retry,
        }
    }

    /// Run one bootstrap.
    ///
    /// With an abort handle, a failure is fatal for the process and the agent
    /// stays BOOTSTRAPPING. Without one, the failure is logged and the agent
    /// goes back to ACCEPTING.
    pub async fn run_or_abort(&self, abort: Option<&AbortHandle>) -> Result<BootstrapReport, BootstrapError> {
        match self.run().await {
            Ok(report) => {
                self.shared.set_state(AgentState::Accepting);
                Ok(report)
            }
            Err(e) => {
                match abort {
                    Some(abort) => abort.abort(FatalError::new("bootstrap", e.to_string())),
                    None => {
                        tracing::error!(error = %e, "Bootstrap failed, continuing with current config");
                        self.shared.set_state(AgentState::Accepting);
                    }
                }
                Err(e)
            }
        }
    }

    /// Run one bootstrap, leaving the agent BOOTSTRAPPING.
    pub async fn run(&self) -> Result<BootstrapReport, BootstrapError> {
        self.shared.set_state(AgentState::Bootstrapping);
        let result = self.bootstrap().await;
        metrics::record_bootstrap(result.is_ok());
        if let Ok(report) = &result {
            tracing::info!(
                version = ?report.version,
                applied = report.applied.len(),
                unchanged = report.unchanged.len(),
                failed = report.failed.len(),
                "Bootstrap finished"
            );
        }
        result
    }

    async fn bootstrap(&self) -> Result<BootstrapReport, BootstrapError> {
        let _guard = self.shared.apply_lock.acquire().await?;
        self.shared.clear_state_errors();
        self.shared.set_directory_watch_error(None);

        let mut report = BootstrapReport::default();
        let state = &self.state;
        let global = self
            .retry
            .run("fetch global state", move |_| state.get_global_state())
            .await?;
        report.version = self
            .retry
            .run("fetch state version", move |_| state.get_state_version())
            .await?;
        self.shared.set_bootstrap_version(report.version);
        if global.is_empty() {
            tracing::info!("No services registered, nothing to bootstrap");
            return Ok(report);
        }

        let group = &self.shared.group;
        let timestamp = now_millis();
        let candidates: Vec<ServiceContext> = global
            .into_iter()
            .filter(|s| s.service.in_group(group))
            .map(|s| ServiceContext::present(s.service, s.upstreams, timestamp))
            .collect();
        tracing::info!(candidates = candidates.len(), "Deciding which services need config");

        let mut to_write = self.decide(candidates, &mut report).await;
        to_write.sort_by(|a, b| a.service_id().cmp(b.service_id()));
        if to_write.is_empty() {
            return Ok(report);
        }

        self.shared.mark_local_write();
        let mut written = Vec::with_capacity(to_write.len());
        for planned in to_write {
            match self.applier.write(&planned).await {
                Ok(()) => written.push(planned),
                Err(e) => {
                    // put back anything written before the failure and drop its backups
                    if let Err(restore) = self.applier.restore(&planned).await {
                        tracing::error!(service_id = planned.service_id(), error = %restore, "Failed to restore config");
                    }
                    self.record_failure(&planned, &e, &mut report);
                }
            }
        }

        let applied = self.verify(written, &mut report).await;
        if !applied.is_empty() {
            self.applier.reload().await?;
        }
        for planned in applied {
            self.shared.cache_service(&planned.context);
            report.applied.push(planned.service_id().to_string());
        }
        Ok(report)
    }

    /// Render every candidate and keep the ones whose files differ from disk.
    async fn decide(&self, candidates: Vec<ServiceContext>, report: &mut BootstrapReport) -> Vec<PlannedApply> {
        let mut tasks = JoinSet::new();
        for context in candidates {
            let applier = self.applier.clone();
            tasks.spawn(async move {
                let planned = applier.plan(context);
                let needed = applier.needs_apply(&planned).await;
                (planned, needed)
            });
        }

        let mut to_write = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((planned, Ok(true))) => to_write.push(planned),
                Ok((planned, Ok(false))) => {
                    self.shared.cache_service(&planned.context);
                    report.unchanged.push(planned.service_id().to_string());
                }
                Ok((planned, Err(e))) => self.record_failure(&planned, &e, report),
                Err(e) => tracing::error!(error = %e, "Bootstrap planning task failed"),
            }
        }
        report.unchanged.sort();
        to_write
    }

    /// Batch check; on failure fall back to one synchronous apply per service.
    async fn verify(&self, written: Vec<PlannedApply>, report: &mut BootstrapReport) -> Vec<PlannedApply> {
        if written.is_empty() {
            return written;
        }
        let Err(e) = self.applier.check().await else {
            for planned in &written {
                self.applier.discard_backups(planned);
            }
            return written;
        };

        tracing::warn!(error = %e, services = written.len(), "Batch config check failed, applying services one at a time");
        for planned in &written {
            if let Err(e) = self.applier.restore(planned).await {
                tracing::error!(service_id = planned.service_id(), error = %e, "Failed to restore config");
            }
        }

        let mut applied = Vec::with_capacity(written.len());
        for planned in written {
            match self.applier.apply_sync(&planned).await {
                Ok(()) => applied.push(planned),
                Err(e) => self.record_failure(&planned, &e, report),
            }
        }
        applied
    }

    fn record_failure(&self, planned: &PlannedApply, error: &ApplierError, report: &mut BootstrapReport) {
        tracing::error!(service_id = planned.service_id(), error = %error, "Failed to bootstrap service");
        self.shared
            .record_state_error(format!("{}: {}", planned.service_id(), error));
        report.failed.push(planned.service_id().to_string());
    }
}
