//! Typed client for the lbfleet coordinator request API.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

pub type SdkResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub service_id: String,
    #[serde(default)]
    pub service_base_path: String,
    #[serde(default)]
    pub load_balancer_groups: BTreeSet<String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequest {
    pub request_id: String,
    pub load_balancer_service: Service,
    #[serde(default)]
    pub add_upstreams: Vec<String>,
    #[serde(default)]
    pub remove_upstreams: BTreeSet<String>,
}

impl ChangeRequest {
    /// Add upstreams to a service in the given groups.
    pub fn add(request_id: &str, service_id: &str, groups: &[&str], upstreams: &[&str]) -> Self {
        Self {
            request_id: request_id.to_string(),
            load_balancer_service: Service {
                service_id: service_id.to_string(),
                load_balancer_groups: groups.iter().map(|g| g.to_string()).collect(),
                ..Service::default()
            },
            add_upstreams: upstreams.iter().map(|u| u.to_string()).collect(),
            remove_upstreams: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Success,
    Failure,
    InProgress,
    Cancelled,
    NotExist,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Success | RequestStatus::Failure | RequestStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub status_code: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeResponse {
    pub request_id: String,
    pub status: RequestStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub agent_responses: BTreeMap<String, AgentResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRequestId {
    pub request_id: String,
    pub service_id: String,
    pub enqueued_at: u64,
}

pub struct FleetClient {
    client: Client,
    coordinator_url: String,
    auth_key: Option<String>,
}

impl FleetClient {
    pub fn new(coordinator_url: &str) -> Self {
        Self {
            client: Client::new(),
            coordinator_url: coordinator_url.trim_end_matches('/').to_string(),
            auth_key: None,
        }
    }

    pub fn with_auth_key(mut self, key: &str) -> Self {
        self.auth_key = Some(key.to_string());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.coordinator_url, path)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_key {
            Some(key) => builder.query(&[("authkey", key)]),
            None => builder,
        }
    }

    async fn read<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> SdkResult<T> {
        let status = resp.status();
        let text = resp.text().await?;
        // GET /request/{id} answers NOT_EXIST with a 404 and a normal body
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            return Err(format!("Coordinator returned error status {}: {}", status, text).into());
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Submit a change. Resubmitting the same request id is idempotent.
    pub async fn enqueue(&self, request: &ChangeRequest) -> SdkResult<ChangeResponse> {
        let resp = self
            .authorize(self.client.post(self.url("/request")))
            .json(request)
            .send()
            .await?;
        Self::read(resp).await
    }

    pub async fn get(&self, request_id: &str) -> SdkResult<ChangeResponse> {
        let resp = self
            .authorize(self.client.get(self.url(&format!("/request/{}", request_id))))
            .send()
            .await?;
        Self::read(resp).await
    }

    pub async fn list(&self) -> SdkResult<Vec<QueuedRequestId>> {
        let resp = self.authorize(self.client.get(self.url("/request"))).send().await?;
        Self::read(resp).await
    }

    pub async fn cancel(&self, request_id: &str) -> SdkResult<ChangeResponse> {
        let resp = self
            .authorize(self.client.delete(self.url(&format!("/request/{}", request_id))))
            .send()
            .await?;
        Self::read(resp).await
    }

    /// Poll until the request reaches SUCCESS, FAILURE or CANCELLED.
    pub async fn wait_for_terminal(&self, request_id: &str, poll: Duration, timeout: Duration) -> SdkResult<ChangeResponse> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let response = self.get(request_id).await?;
            if response.status.is_terminal() {
                return Ok(response);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(format!("request {} still {:?} after {:?}", request_id, response.status, timeout).into());
            }
            tokio::time::sleep(poll).await;
        }
    }
}
