//! Shared helpers for the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use lbfleet::agent::{AgentParts, AgentService, CoordinatorClient};
use lbfleet::applier::{ApplierError, ConfigApplier, ConfigFile, FilesystemApplier, PlannedApply};
use lbfleet::config::FleetConfig;
use lbfleet::coordination::{LeaderLatch, StaticLeaderLatch};
use lbfleet::coordinator::Coordinator;
use lbfleet::datastore::{MemoryDatastore, RemoteDatastore};
use lbfleet::models::{ChangeRequest, Service, ServiceContext};

/// Bind an ephemeral port on localhost.
pub async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    (listener, url)
}

pub fn serve_on(listener: TcpListener, router: Router) -> JoinHandle<()> {
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    })
}

/// Serve a router on an ephemeral port and return its base URL.
pub async fn serve(router: Router) -> String {
    let (listener, url) = bind().await;
    serve_on(listener, router);
    url
}

/// Defaults with short delays so retries and drains finish quickly.
pub fn fast_config() -> FleetConfig {
    let mut config = FleetConfig::default();
    config.retries.base_delay_ms = 5;
    config.retries.max_delay_ms = 20;
    config.http.request_timeout_ms = 2000;
    config.http.connect_timeout_ms = 500;
    config.coordinator.apply_attempts = 2;
    config.coordinator.revert_attempts = 2;
    config.coordinator.drain_wait_ms = 0;
    config.agent.max_notify_attempts = 2;
    config.agent.max_global_state_attempts = 2;
    config.agent.check_in_timeout_ms = 2000;
    config
}

pub fn change(request_id: &str, service_id: &str, groups: &[&str], add: &[&str], remove: &[&str]) -> ChangeRequest {
    ChangeRequest {
        request_id: request_id.to_string(),
        load_balancer_service: Service::new(service_id, groups),
        add_upstreams: add.iter().map(|u| u.to_string()).collect(),
        remove_upstreams: remove.iter().map(|u| u.to_string()).collect(),
    }
}

pub struct TestCoordinator {
    pub coordinator: Coordinator,
    pub url: String,
}

pub async fn start_coordinator(config: &FleetConfig) -> TestCoordinator {
    let leader: Arc<dyn LeaderLatch> = Arc::new(StaticLeaderLatch::new(true));
    let coordinator = Coordinator::with_parts(config, Arc::new(MemoryDatastore::new(None)), leader).unwrap();
    let url = serve(coordinator.router()).await;
    TestCoordinator { coordinator, url }
}

pub struct TestAgent {
    pub agent: AgentService,
    pub url: String,
    pub config_dir: tempfile::TempDir,
}

/// Start an agent with a filesystem applier in a fresh directory.
pub async fn start_agent(base: &FleetConfig, coordinator_url: &str, group: &str, agent_id: &str) -> TestAgent {
    let config_dir = tempfile::tempdir().unwrap();
    let (listener, url) = bind().await;

    let mut config = base.clone();
    config.agent.group = group.to_string();
    config.agent.agent_id = agent_id.to_string();
    config.agent.base_agent_uri = url.clone();
    config.agent.base_uris = vec![coordinator_url.to_string()];
    config.agent.config_dir = config_dir.path().display().to_string();

    let agent = AgentService::new(&config).unwrap();
    serve_on(listener, agent.router());
    TestAgent { agent, url, config_dir }
}

/// Start an agent backed by the given applier.
pub async fn start_agent_with(
    config: &FleetConfig,
    coordinator_url: &str,
    applier: Arc<dyn ConfigApplier>,
) -> (AgentService, String) {
    let (listener, url) = bind().await;
    let mut config = config.clone();
    config.agent.base_agent_uri = url.clone();
    config.agent.base_uris = vec![coordinator_url.to_string()];

    let client = Arc::new(CoordinatorClient::new(&config.agent.base_uris, &config.auth, &config.http).unwrap());
    let remote = Arc::new(RemoteDatastore::new(client.clone()));
    let agent = AgentService::with_parts(
        &config,
        AgentParts {
            client,
            state: remote.clone(),
            requests: remote,
            applier,
            leader: Arc::new(StaticLeaderLatch::new(false)),
        },
    );
    serve_on(listener, agent.router());
    (agent, url)
}

pub fn read_conf(agent: &TestAgent, service_id: &str) -> Option<String> {
    let applier = FilesystemApplier::new(&lbfleet::config::AgentConfig {
        config_dir: agent.config_dir.path().display().to_string(),
        ..Default::default()
    });
    std::fs::read_to_string(applier.path_for(service_id)).ok()
}

/// In-memory applier. A config containing `poison` fails the check; a config
/// containing `unwritable` fails its write after the backup was taken.
#[derive(Default)]
pub struct MemoryApplier {
    files: Mutex<HashMap<String, String>>,
    backups: Mutex<HashMap<String, Option<String>>>,
    poison: Option<String>,
    unwritable: Option<String>,
    pub reloads: AtomicU32,
}

impl MemoryApplier {
    pub fn poisoned(marker: &str) -> Self {
        Self {
            poison: Some(marker.to_string()),
            ..Default::default()
        }
    }

    pub fn unwritable(marker: &str) -> Self {
        Self {
            unwritable: Some(marker.to_string()),
            ..Default::default()
        }
    }

    pub fn backup_count(&self) -> usize {
        self.backups.lock().unwrap().len()
    }

    pub fn content(&self, service_id: &str) -> Option<String> {
        self.files.lock().unwrap().get(service_id).cloned()
    }

    pub fn service_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.files.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Change a file behind the agent's back.
    pub fn corrupt(&self, service_id: &str, content: &str) {
        self.set(service_id, Some(content.to_string()));
    }

    pub fn reload_count(&self) -> u32 {
        self.reloads.load(Ordering::SeqCst)
    }

    fn set(&self, key: &str, content: Option<String>) {
        let mut files = self.files.lock().unwrap();
        match content {
            Some(content) => files.insert(key.to_string(), content),
            None => files.remove(key),
        };
    }
}

#[async_trait]
impl ConfigApplier for MemoryApplier {
    fn render(&self, context: &ServiceContext) -> Vec<ConfigFile> {
        let content = (context.present && !context.upstreams.is_empty()).then(|| {
            context
                .upstreams
                .iter()
                .map(|u| u.upstream.as_str())
                .collect::<Vec<_>>()
                .join(",")
        });
        vec![ConfigFile {
            path: context.service_id().into(),
            content,
        }]
    }

    async fn needs_apply(&self, planned: &PlannedApply) -> Result<bool, ApplierError> {
        let files = self.files.lock().unwrap();
        Ok(planned
            .files
            .iter()
            .any(|f| files.get(f.path.to_str().unwrap_or_default()) != f.content.as_ref()))
    }

    async fn write(&self, planned: &PlannedApply) -> Result<(), ApplierError> {
        for file in &planned.files {
            let key = file.path.display().to_string();
            let previous = self.content(&key);
            self.backups.lock().unwrap().entry(key.clone()).or_insert(previous);
            if let (Some(marker), Some(content)) = (&self.unwritable, &file.content) {
                if content.contains(marker.as_str()) {
                    return Err(ApplierError::Write {
                        path: key,
                        source: std::io::Error::other("disk full"),
                    });
                }
            }
            self.set(&key, file.content.clone());
        }
        Ok(())
    }

    async fn restore(&self, planned: &PlannedApply) -> Result<(), ApplierError> {
        for file in &planned.files {
            let key = file.path.display().to_string();
            let previous = self.backups.lock().unwrap().remove(&key);
            if let Some(previous) = previous {
                self.set(&key, previous);
            }
        }
        Ok(())
    }

    fn discard_backups(&self, planned: &PlannedApply) {
        let mut backups = self.backups.lock().unwrap();
        for file in &planned.files {
            backups.remove(&file.path.display().to_string());
        }
    }

    async fn check(&self) -> Result<(), ApplierError> {
        let Some(marker) = &self.poison else {
            return Ok(());
        };
        let files = self.files.lock().unwrap();
        match files.iter().find(|(_, content)| content.contains(marker.as_str())) {
            Some((id, _)) => Err(ApplierError::InvalidConfig(format!("{} contains {}", id, marker))),
            None => Ok(()),
        }
    }

    async fn reload(&self) -> Result<(), ApplierError> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
