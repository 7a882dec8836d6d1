//! Coordinator HTTP surface.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::agent::client::StateVersion;
use crate::coordination::LeaderLatch;
use crate::coordinator::queue::RequestManager;
use crate::coordinator::registry::{AgentRegistry, RegisteredAgent};
use crate::datastore::MemoryDatastore;
use crate::http::{authkey_middleware, AuthKey};
use crate::models::{AgentMetadata, ChangeRequest, ChangeResponse, CheckInResponse, QueuedRequestId, ServiceState};

#[derive(Clone)]
pub struct CoordinatorApiState {
    pub requests: Arc<RequestManager>,
    pub datastore: Arc<MemoryDatastore>,
    pub registry: Arc<AgentRegistry>,
    pub leader: Arc<dyn LeaderLatch>,
}

/// Body of the coordinator's `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorStatus {
    pub leader: bool,
    pub queued: usize,
    pub state_version: u64,
    pub agents: Vec<RegisteredAgent>,
}

#[derive(Debug, Default, Deserialize)]
struct CheckInQuery {
    #[serde(default)]
    status: bool,
}

pub fn router(state: CoordinatorApiState, auth: AuthKey) -> Router {
    Router::new()
        .route("/request", post(enqueue).get(list_queued))
        .route("/request/{id}", get(get_response).delete(cancel))
        .route("/request/{id}/detail", get(get_request))
        .route("/state", get(global_state))
        .route("/state-version", get(state_version))
        .route("/state/{service_id}", get(service_state))
        .route("/checkin/{group}/{action}", post(check_in))
        .route("/status", get(status))
        .layer(middleware::from_fn_with_state(auth, authkey_middleware))
        .with_state(state)
}

async fn enqueue(State(state): State<CoordinatorApiState>, Json(request): Json<ChangeRequest>) -> Json<ChangeResponse> {
    Json(state.requests.enqueue(request).await)
}

async fn list_queued(State(state): State<CoordinatorApiState>) -> Json<Vec<QueuedRequestId>> {
    Json(state.requests.list_queued())
}

async fn get_response(State(state): State<CoordinatorApiState>, Path(id): Path<String>) -> Response {
    match state.requests.get_response(&id) {
        Some(response) => Json(response).into_response(),
        None => (StatusCode::NOT_FOUND, Json(ChangeResponse::not_exist(&id))).into_response(),
    }
}

async fn cancel(State(state): State<CoordinatorApiState>, Path(id): Path<String>) -> Json<ChangeResponse> {
    Json(state.requests.cancel(&id).await)
}

async fn get_request(
    State(state): State<CoordinatorApiState>,
    Path(id): Path<String>,
) -> Result<Json<ChangeRequest>, StatusCode> {
    state.requests.get_request(&id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn global_state(State(state): State<CoordinatorApiState>) -> Json<Vec<ServiceState>> {
    Json(state.datastore.global_state())
}

async fn state_version(State(state): State<CoordinatorApiState>) -> Json<StateVersion> {
    Json(StateVersion {
        version: state.datastore.version(),
    })
}

async fn service_state(
    State(state): State<CoordinatorApiState>,
    Path(service_id): Path<String>,
) -> Result<Json<ServiceState>, StatusCode> {
    state.datastore.service_state(&service_id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn check_in(
    State(state): State<CoordinatorApiState>,
    Path((group, action)): Path<(String, String)>,
    Query(query): Query<CheckInQuery>,
    Json(metadata): Json<AgentMetadata>,
) -> Result<Json<CheckInResponse>, (StatusCode, String)> {
    tracing::debug!(group = %group, action = %action, agent_id = %metadata.agent_id, status = query.status, "Agent check-in");
    state
        .registry
        .check_in(&group, &action, &metadata)
        .map(Json)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}

async fn status(State(state): State<CoordinatorApiState>) -> Json<CoordinatorStatus> {
    Json(CoordinatorStatus {
        leader: state.leader.has_leadership(),
        queued: state.requests.queued_count(),
        state_version: state.datastore.version(),
        agents: state.registry.all(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinatorConfig;
    use crate::coordination::StaticLeaderLatch;
    use crate::models::{Service, UpstreamInfo};
    use axum::body::Body;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(key: Option<&str>) -> Router {
        app_with(key, Arc::new(MemoryDatastore::new(None)))
    }

    fn app_with(key: Option<&str>, datastore: Arc<MemoryDatastore>) -> Router {
        let state = CoordinatorApiState {
            requests: Arc::new(RequestManager::new(Duration::from_secs(60))),
            datastore,
            registry: Arc::new(AgentRegistry::new(&CoordinatorConfig::default())),
            leader: Arc::new(StaticLeaderLatch::new(true)),
        };
        router(state, AuthKey::new(key))
    }

    fn get(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_request_is_not_found() {
        let response = app(None).oneshot(get("/request/r9")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app(None).oneshot(get("/request/r9/detail")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_state_version_route() {
        let response = app(None).oneshot(get("/state-version")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let version: StateVersion = serde_json::from_slice(&body).unwrap();
        assert_eq!(version.version, 0);
    }

    #[tokio::test]
    async fn test_any_service_id_reaches_service_route() {
        let datastore = Arc::new(MemoryDatastore::new(None));
        datastore.put_service_state(ServiceState {
            service: Service::new("version", &["lb1"]),
            upstreams: vec![UpstreamInfo::new("10.0.0.1:80", Some("r1"))],
        });

        let response = app_with(None, datastore).oneshot(get("/state/version")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        let state: ServiceState = serde_json::from_slice(&body).unwrap();
        assert_eq!(state.service.service_id, "version");
        assert_eq!(state.upstreams.len(), 1);
    }

    #[tokio::test]
    async fn test_auth_required_when_configured() {
        let response = app(Some("k")).oneshot(get("/state")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = app(Some("k")).oneshot(get("/state?authkey=k")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
