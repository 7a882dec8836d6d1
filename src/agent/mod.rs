//! Agent role: applies coordinator-driven changes to the local load balancer.
//!
//! # Data Flow
//! ```text
//! coordinator ──POST/DELETE /request/{id}──▶ api.rs ──▶ gate.rs ──▶ applier
//!                                                          │
//! startup / reconnect ──▶ bootstrap.rs ──GET /state────────┤
//!                                                          ▼
//!                                               state.rs (AgentShared)
//!                                                          │
//!                              GET /status ◀── status.rs ◀─┘
//!
//! checkin.rs:  startup / shutdown notifications (POST /checkin/{group}/{action})
//! monitor.rs:  GET /state-version probes → connection state → bootstrap on reconnect
//! watcher.rs:  config directory edits outside of an apply → status error
//! ```

pub mod api;
pub mod bootstrap;
pub mod checkin;
pub mod client;
pub mod gate;
pub mod monitor;
pub mod state;
pub mod status;
pub mod watcher;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use notify::RecommendedWatcher;
use tokio::task::JoinHandle;

use crate::applier::{ConfigApplier, FilesystemApplier};
use crate::config::FleetConfig;
use crate::coordination::{LeaderLatch, StaticLeaderLatch};
use crate::datastore::{RemoteDatastore, RequestDatastore, StateDatastore};
use crate::http::AuthKey;
use crate::lifecycle::{AbortHandle, Shutdown};
use crate::models::AgentMetadata;
use crate::resilience::RetryPolicy;

pub use bootstrap::{BootstrapError, BootstrapReport, Bootstrapper};
pub use checkin::{CheckInAction, CheckInLoop, CheckInOutcome};
pub use client::{ClientError, CoordinatorClient};
pub use gate::{ApplyGate, GateError};
pub use monitor::ConnectionMonitor;
pub use state::AgentShared;
pub use status::StatusAggregator;

/// Dependencies an agent can be built from.
pub struct AgentParts {
    pub client: Arc<CoordinatorClient>,
    pub state: Arc<dyn StateDatastore>,
    pub requests: Arc<dyn RequestDatastore>,
    pub applier: Arc<dyn ConfigApplier>,
    pub leader: Arc<dyn LeaderLatch>,
}

pub struct AgentService {
    config: FleetConfig,
    shared: Arc<AgentShared>,
    state: Arc<dyn StateDatastore>,
    gate: Arc<ApplyGate>,
    status: Arc<StatusAggregator>,
    bootstrapper: Arc<Bootstrapper>,
    checkin: CheckInLoop,
    leader: Arc<dyn LeaderLatch>,
}

/// Tasks and handles that must live as long as the agent runs.
pub struct AgentBackground {
    pub monitor: JoinHandle<()>,
    pub watcher: Option<RecommendedWatcher>,
}

impl AgentService {
    /// Build an agent talking to the configured coordinator.
    pub fn new(config: &FleetConfig) -> Result<Self, ClientError> {
        let client = Arc::new(CoordinatorClient::new(&config.agent.base_uris, &config.auth, &config.http)?);
        let remote = Arc::new(RemoteDatastore::new(client.clone()));
        let parts = AgentParts {
            client,
            state: remote.clone(),
            requests: remote,
            applier: Arc::new(FilesystemApplier::new(&config.agent)),
            leader: Arc::new(StaticLeaderLatch::new(config.agent.leader)),
        };
        Ok(Self::with_parts(config, parts))
    }

    pub fn with_parts(config: &FleetConfig, parts: AgentParts) -> Self {
        let agent = &config.agent;
        let metadata = AgentMetadata {
            agent_id: agent.agent_id.clone(),
            base_agent_uri: agent.base_agent_uri.clone(),
            domain: agent.domain.clone(),
        };
        let shared = Arc::new(AgentShared::new(
            metadata.clone(),
            &agent.group,
            Duration::from_millis(agent.lock_timeout_ms),
        ));

        let gate = Arc::new(ApplyGate::new(
            shared.clone(),
            parts.state.clone(),
            parts.requests,
            parts.applier.clone(),
            config.testing.clone(),
        ));
        let status = Arc::new(StatusAggregator::new(shared.clone(), parts.applier.clone(), parts.leader.clone()));
        let bootstrapper = Arc::new(Bootstrapper::new(
            shared.clone(),
            parts.state.clone(),
            parts.applier,
            RetryPolicy::new(agent.max_global_state_attempts, &config.retries),
        ));
        let checkin = CheckInLoop::new(
            parts.client,
            metadata,
            &agent.group,
            RetryPolicy::new(agent.max_notify_attempts, &config.retries),
            Duration::from_millis(agent.check_in_timeout_ms),
        );

        Self {
            config: config.clone(),
            shared,
            state: parts.state,
            gate,
            status,
            bootstrapper,
            checkin,
            leader: parts.leader,
        }
    }

    pub fn shared(&self) -> &Arc<AgentShared> {
        &self.shared
    }

    pub fn gate(&self) -> &Arc<ApplyGate> {
        &self.gate
    }

    pub fn bootstrapper(&self) -> &Arc<Bootstrapper> {
        &self.bootstrapper
    }

    pub fn router(&self) -> Router {
        let state = api::AgentApiState {
            gate: self.gate.clone(),
            status: self.status.clone(),
        };
        api::router(state, AuthKey::new(self.config.auth.key.as_deref()))
    }

    /// Write the state file, bootstrap, then announce the agent to the coordinator.
    ///
    /// A bootstrap failure is returned only when `exit_on_startup_error` is set;
    /// the abort has then already been sent.
    pub async fn startup(&self, abort: &AbortHandle, shutdown: &Shutdown) -> Result<(), BootstrapError> {
        let agent = &self.config.agent;
        if let Some(path) = &agent.state_file {
            if let Err(e) = tokio::fs::write(path, "RUNNING").await {
                tracing::warn!(path = %path, error = %e, "Failed to write state file");
            }
        }

        let abort = agent.exit_on_startup_error.then_some(abort);
        match self.bootstrapper.run_or_abort(abort).await {
            Err(e) if abort.is_some() => return Err(e),
            _ => {}
        }

        if agent.register_on_startup {
            match self
                .checkin
                .notify_service(CheckInAction::Startup, Some(shutdown.subscribe()))
                .await
            {
                Ok(outcome) => tracing::info!(rounds = outcome.rounds, "Registered with coordinator"),
                Err(e) => tracing::error!(error = %e, "Startup check-in failed"),
            }
        }
        Ok(())
    }

    /// Start the connection monitor and, if configured, the directory watcher.
    ///
    /// With `exit_on_startup_error` a failed resync after a reconnect aborts
    /// the process like a failed startup bootstrap does.
    pub fn spawn_background(&self, abort: &AbortHandle, shutdown: &Shutdown) -> AgentBackground {
        let agent = &self.config.agent;
        let mut monitor = monitor::ConnectionMonitor::new(
            self.shared.clone(),
            self.state.clone(),
            self.bootstrapper.clone(),
            Duration::from_millis(agent.connection_poll_interval_ms),
            agent.lost_after_failures,
        );
        if agent.exit_on_startup_error {
            monitor = monitor.with_abort(abort.clone());
        }
        let monitor = tokio::spawn(monitor.run(shutdown.subscribe()));

        let watcher = if agent.watch_config_dir {
            let dir = Path::new(&agent.config_dir);
            match watcher::DirectoryWatcher::new(dir, self.shared.clone()).run() {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to watch config directory");
                    self.shared
                        .set_directory_watch_error(Some(format!("Failed to watch config directory: {}", e)));
                    None
                }
            }
        } else {
            None
        };

        AgentBackground { monitor, watcher }
    }

    /// Graceful shutdown steps. Errors are logged, never returned.
    pub async fn shutdown(&self) {
        let agent = &self.config.agent;
        self.leader.close();
        for path in [&agent.state_file, &agent.remove_file_on_shutdown].into_iter().flatten() {
            match tokio::fs::remove_file(path).await {
                Ok(()) => tracing::info!(path = %path, "Removed file on shutdown"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %path, error = %e, "Failed to remove file on shutdown"),
            }
        }

        if agent.deregister_on_graceful_shutdown {
            match self.checkin.notify_service(CheckInAction::Shutdown, None).await {
                Ok(outcome) => tracing::info!(rounds = outcome.rounds, "Deregistered from coordinator"),
                Err(e) => tracing::warn!(error = %e, "Shutdown check-in failed"),
            }
        }
    }
}
