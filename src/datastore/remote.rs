//! Agent-side view of the authoritative state, read over HTTP.

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::client::{ClientError, CoordinatorClient};
use crate::datastore::{DatastoreError, RequestDatastore, StateDatastore};
use crate::models::{ChangeRequest, Service, ServiceState, UpstreamMap};

impl From<ClientError> for DatastoreError {
    fn from(e: ClientError) -> Self {
        DatastoreError::Unavailable(e.to_string())
    }
}

pub struct RemoteDatastore {
    client: Arc<CoordinatorClient>,
}

impl RemoteDatastore {
    pub fn new(client: Arc<CoordinatorClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StateDatastore for RemoteDatastore {
    async fn list_services(&self) -> Result<Vec<Service>, DatastoreError> {
        let state = self.client.global_state().await?;
        Ok(state.into_iter().map(|s| s.service).collect())
    }

    async fn get_service(&self, service_id: &str) -> Result<Option<Service>, DatastoreError> {
        Ok(self.client.service_state(service_id).await?.map(|s| s.service))
    }

    async fn get_upstreams_map(&self, service_id: &str) -> Result<UpstreamMap, DatastoreError> {
        let upstreams = self
            .client
            .service_state(service_id)
            .await?
            .map(|s| s.upstreams)
            .unwrap_or_default();
        Ok(upstreams.into_iter().map(|u| (u.upstream.clone(), u)).collect())
    }

    async fn get_state_version(&self) -> Result<Option<u64>, DatastoreError> {
        Ok(Some(self.client.state_version().await?))
    }

    async fn get_global_state(&self) -> Result<Vec<ServiceState>, DatastoreError> {
        Ok(self.client.global_state().await?)
    }
}

#[async_trait]
impl RequestDatastore for RemoteDatastore {
    async fn get_request(&self, request_id: &str) -> Result<Option<ChangeRequest>, DatastoreError> {
        Ok(self.client.request_detail(request_id).await?)
    }
}
