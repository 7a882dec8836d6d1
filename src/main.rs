//! lbfleet
//!
//! # Architecture Overview
//!
//! ```text
//!   operator / lbfleet-cli
//!          │  POST /request
//!          ▼
//!   ┌──────────────────────────┐        POST/DELETE /request/{id}
//!   │       coordinator        │ ───────────────────────────────────┐
//!   │ queue → worker → commit  │                                    │
//!   │ registry ◀── /checkin    │ ◀──────────── check-in ───────┐    │
//!   │ state ──▶ /state         │ ◀── bootstrap / probes ──┐    │    ▼
//!   └──────────────────────────┘                          │ ┌──────────────────┐
//!                                                         └─│      agent       │
//!                                                           │ gate → applier   │
//!                                                           │ conf.d + reload  │
//!                                                           └──────────────────┘
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::task::JoinHandle;

use lbfleet::agent::AgentService;
use lbfleet::config::{load_config, FleetConfig, ListenerConfig};
use lbfleet::coordinator::Coordinator;
use lbfleet::http::with_common_layers;
use lbfleet::lifecycle::{self, spawn_signal_handler, AbortHandle, FatalError, Shutdown};
use lbfleet::{net, observability};

const LOG_FLUSH_GRACE: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "lbfleet")]
#[command(about = "Coordinator and agent for a fleet of load balancers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand)]
enum Role {
    /// Run the request queue and dispatch worker
    Coordinator {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Run a load balancer agent
    Agent {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let (role, path) = match &cli.role {
        Role::Coordinator { config } => ("coordinator", config),
        Role::Agent { config } => ("agent", config),
    };

    let config = match path {
        Some(path) => load_config(path)?,
        None => FleetConfig::default(),
    };

    if let Err(e) = observability::init_logging(&config.observability) {
        eprintln!("Failed to initialize logging: {}", e);
    }
    tracing::info!(role, version = env!("CARGO_PKG_VERSION"), "lbfleet starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = observability::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());
    let (abort, supervisor) = lifecycle::channel(shutdown.clone(), LOG_FLUSH_GRACE);
    let supervisor = tokio::spawn(supervisor.supervise());

    let result = match cli.role {
        Role::Coordinator { .. } => run_coordinator(&config, &abort, &shutdown).await,
        Role::Agent { .. } => run_agent(&config, &abort, &shutdown).await,
    };
    if let Err(e) = result {
        abort.abort(FatalError::new(role, e));
    }
    drop(abort);

    let fatal = supervisor.await.ok().flatten();
    tracing::info!("Shutdown complete");
    if fatal.is_some() {
        std::process::exit(1);
    }
    Ok(())
}

fn spawn_server(router: axum::Router, listener: &ListenerConfig, shutdown: &Shutdown, abort: &AbortHandle) -> JoinHandle<()> {
    let router = with_common_layers(router, listener);
    let listener = listener.clone();
    let rx = shutdown.subscribe();
    let abort = abort.clone();
    tokio::spawn(async move {
        if let Err(e) = net::serve(router, listener, rx).await {
            abort.abort(FatalError::new("listener", e.to_string()));
        }
    })
}

async fn run_coordinator(config: &FleetConfig, abort: &AbortHandle, shutdown: &Shutdown) -> Result<(), String> {
    let coordinator = Coordinator::new(config).map_err(|e| e.to_string())?;
    tracing::info!(
        bind_address = %config.listener.bind_address,
        leader = config.coordinator.leader,
        static_agents = config.coordinator.agents.len(),
        "Coordinator configured"
    );

    let server = spawn_server(coordinator.router(), &config.listener, shutdown, abort);
    let worker = coordinator.spawn_worker(shutdown.subscribe());

    shutdown.wait().await;
    coordinator.shutdown();
    let _ = worker.await;
    let _ = server.await;
    Ok(())
}

async fn run_agent(config: &FleetConfig, abort: &AbortHandle, shutdown: &Shutdown) -> Result<(), String> {
    let agent = AgentService::new(config).map_err(|e| e.to_string())?;
    tracing::info!(
        bind_address = %config.listener.bind_address,
        group = %config.agent.group,
        agent_id = %config.agent.agent_id,
        coordinator = ?config.agent.base_uris,
        "Agent configured"
    );

    let server = spawn_server(agent.router(), &config.listener, shutdown, abort);
    let background = agent.spawn_background(abort, shutdown);

    // a failed startup has already sent the abort
    let _ = agent.startup(abort, shutdown).await;
    shutdown.wait().await;

    agent.shutdown().await;
    drop(background.watcher);
    let _ = background.monitor.await;
    let _ = server.await;
    Ok(())
}
