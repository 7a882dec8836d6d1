//! HTTP client for the coordinator API used by agents.

use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::config::{AuthConfig, HttpClientConfig};
use crate::models::{AgentMetadata, ChangeRequest, CheckInResponse, ServiceState};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no coordinator base URI configured")]
    NoBaseUris,

    #[error("invalid coordinator URI '{0}'")]
    InvalidUri(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("coordinator returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode coordinator response: {0}")]
    Decode(String),
}

/// Body of `GET /state-version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateVersion {
    pub version: u64,
}

/// Talks to the first configured coordinator base URI.
#[derive(Clone)]
pub struct CoordinatorClient {
    http: reqwest::Client,
    base: Url,
    auth_key: Option<String>,
}

impl CoordinatorClient {
    pub fn new(base_uris: &[String], auth: &AuthConfig, http: &HttpClientConfig) -> Result<Self, ClientError> {
        let first = base_uris.first().ok_or(ClientError::NoBaseUris)?;
        let base = Url::parse(first).map_err(|_| ClientError::InvalidUri(first.clone()))?;
        if base.cannot_be_a_base() {
            return Err(ClientError::InvalidUri(first.clone()));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(http.request_timeout_ms))
            .connect_timeout(Duration::from_millis(http.connect_timeout_ms))
            .build()?;
        Ok(Self {
            http,
            base,
            auth_key: auth.key.clone(),
        })
    }

    pub fn base_uri(&self) -> &Url {
        &self.base
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, self.url(segments));
        match &self.auth_key {
            Some(key) => builder.query(&[("authkey", key)]),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: reqwest::RequestBuilder) -> Result<Option<T>, ClientError> {
        let response = builder.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn send_required<T: DeserializeOwned>(&self, builder: reqwest::RequestBuilder) -> Result<T, ClientError> {
        self.send(builder).await?.ok_or(ClientError::Status {
            status: StatusCode::NOT_FOUND.as_u16(),
            body: String::new(),
        })
    }

    /// `POST /checkin/{group}/{action}`.
    pub async fn check_in(
        &self,
        group: &str,
        action: &str,
        status: bool,
        metadata: &AgentMetadata,
    ) -> Result<CheckInResponse, ClientError> {
        let mut builder = self.request(Method::POST, &["checkin", group, action]).json(metadata);
        if status {
            builder = builder.query(&[("status", "true")]);
        }
        self.send_required(builder).await
    }

    pub async fn global_state(&self) -> Result<Vec<ServiceState>, ClientError> {
        self.send_required(self.request(Method::GET, &["state"])).await
    }

    pub async fn state_version(&self) -> Result<u64, ClientError> {
        let body: StateVersion = self.send_required(self.request(Method::GET, &["state-version"])).await?;
        Ok(body.version)
    }

    pub async fn service_state(&self, service_id: &str) -> Result<Option<ServiceState>, ClientError> {
        self.send(self.request(Method::GET, &["state", service_id])).await
    }

    pub async fn request_detail(&self, request_id: &str) -> Result<Option<ChangeRequest>, ClientError> {
        self.send(self.request(Method::GET, &["request", request_id, "detail"])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str, key: Option<&str>) -> CoordinatorClient {
        CoordinatorClient::new(
            &[base.to_string()],
            &AuthConfig {
                key: key.map(str::to_string),
            },
            &HttpClientConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_url_segments_are_escaped() {
        let client = client("http://coordinator:8080/api/", None);
        let url = client.url(&["state", "svc/1"]);
        assert_eq!(url.as_str(), "http://coordinator:8080/api/state/svc%2F1");
    }

    #[test]
    fn test_missing_base_uri() {
        let result = CoordinatorClient::new(&[], &AuthConfig::default(), &HttpClientConfig::default());
        assert!(matches!(result, Err(ClientError::NoBaseUris)));
    }
}
