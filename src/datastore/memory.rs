//! In-memory authoritative state with optional JSON snapshot persistence.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::datastore::{DatastoreError, StateDatastore};
use crate::models::{ChangeRequest, Service, ServiceState, UpstreamInfo, UpstreamMap};

/// On-disk snapshot layout.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    version: u64,
    services: Vec<ServiceState>,
}

/// Coordinator-owned mapping of service id to service record and upstream set.
#[derive(Default)]
pub struct MemoryDatastore {
    services: DashMap<String, Service>,
    upstreams: DashMap<String, UpstreamMap>,
    version: AtomicU64,
    persistence_path: Option<PathBuf>,
}

impl MemoryDatastore {
    pub fn new(persistence_path: Option<PathBuf>) -> Self {
        Self {
            persistence_path,
            ..Self::default()
        }
    }

    /// Load from the snapshot file if it exists, otherwise start empty.
    pub fn load_from_file(path: &Path) -> Result<Self, DatastoreError> {
        let store = Self::new(Some(path.to_path_buf()));
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            let snapshot: Snapshot = serde_json::from_reader(reader)?;
            for state in snapshot.services {
                store.insert_state(state);
            }
            store.version.store(snapshot.version, Ordering::SeqCst);
            tracing::info!(
                services = store.services.len(),
                version = snapshot.version,
                "Loaded state snapshot"
            );
        }
        Ok(store)
    }

    /// Write the snapshot file. No-op without a persistence path.
    pub fn save_to_file(&self) -> Result<(), DatastoreError> {
        let Some(path) = &self.persistence_path else {
            return Ok(());
        };
        let snapshot = Snapshot {
            version: self.version(),
            services: self.global_state(),
        };
        let tmp = path.with_extension("tmp");
        {
            let writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(writer, &snapshot)?;
        }
        std::fs::rename(&tmp, path)?;
        tracing::debug!(services = snapshot.services.len(), version = snapshot.version, "Saved state snapshot");
        Ok(())
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn service(&self, service_id: &str) -> Option<Service> {
        self.services.get(service_id).map(|r| r.value().clone())
    }

    pub fn upstreams(&self, service_id: &str) -> UpstreamMap {
        self.upstreams
            .get(service_id)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    pub fn service_state(&self, service_id: &str) -> Option<ServiceState> {
        self.service(service_id).map(|service| ServiceState {
            upstreams: self.upstreams(service_id).into_values().collect(),
            service,
        })
    }

    /// All services ordered by id.
    pub fn global_state(&self) -> Vec<ServiceState> {
        let mut ids: Vec<String> = self.services.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids.iter().filter_map(|id| self.service_state(id)).collect()
    }

    /// Replace a service and its upstreams wholesale.
    pub fn put_service_state(&self, state: ServiceState) -> u64 {
        self.insert_state(state);
        self.bump()
    }

    /// Apply a successfully dispatched request to the authoritative state.
    ///
    /// A service whose group set is empty is removed together with its upstreams.
    /// Returns the new state version.
    pub fn commit_request(&self, request: &ChangeRequest) -> u64 {
        let service = &request.load_balancer_service;
        let service_id = service.service_id.clone();

        if service.load_balancer_groups.is_empty() {
            self.services.remove(&service_id);
            self.upstreams.remove(&service_id);
        } else {
            let mut entry = self.upstreams.entry(service_id.clone()).or_default();
            for id in &request.remove_upstreams {
                entry.remove(id);
            }
            for id in &request.add_upstreams {
                entry.insert(id.clone(), UpstreamInfo::new(id, Some(&request.request_id)));
            }
            drop(entry);
            self.services.insert(service_id.clone(), service.clone());
        }

        let version = self.bump();
        tracing::info!(service_id = %service_id, request_id = %request.request_id, version, "Committed change");
        version
    }

    fn insert_state(&self, state: ServiceState) {
        let id = state.service.service_id.clone();
        let map: UpstreamMap = state
            .upstreams
            .into_iter()
            .map(|u| (u.upstream.clone(), u))
            .collect();
        self.upstreams.insert(id.clone(), map);
        self.services.insert(id, state.service);
    }

    fn bump(&self) -> u64 {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        if let Err(e) = self.save_to_file() {
            tracing::error!(error = %e, "Failed to persist state snapshot");
        }
        version
    }
}

#[async_trait]
impl StateDatastore for MemoryDatastore {
    async fn list_services(&self) -> Result<Vec<Service>, DatastoreError> {
        Ok(self.global_state().into_iter().map(|s| s.service).collect())
    }

    async fn get_service(&self, service_id: &str) -> Result<Option<Service>, DatastoreError> {
        Ok(self.service(service_id))
    }

    async fn get_upstreams_map(&self, service_id: &str) -> Result<UpstreamMap, DatastoreError> {
        Ok(self.upstreams(service_id))
    }

    async fn get_state_version(&self) -> Result<Option<u64>, DatastoreError> {
        Ok(Some(self.version()))
    }

    async fn get_global_state(&self) -> Result<Vec<ServiceState>, DatastoreError> {
        Ok(self.global_state())
    }
}
