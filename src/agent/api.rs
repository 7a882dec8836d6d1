//! Agent HTTP surface.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::agent::gate::{ApplyGate, GateError};
use crate::agent::status::StatusAggregator;
use crate::http::{authkey_middleware, AuthKey};
use crate::models::{AgentStatus, BasicServiceContext};

#[derive(Clone)]
pub struct AgentApiState {
    pub gate: Arc<ApplyGate>,
    pub status: Arc<StatusAggregator>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusQuery {
    #[serde(default)]
    skip_cache: bool,
}

pub fn router(state: AgentApiState, auth: AuthKey) -> Router {
    let requests = Router::new()
        .route("/request/{id}", post(apply).delete(revert))
        .layer(middleware::from_fn_with_state(auth, authkey_middleware));

    Router::new()
        .route("/status", get(status))
        .route("/status/{service_id}", get(service_status))
        .merge(requests)
        .with_state(state)
}

async fn apply(State(state): State<AgentApiState>, Path(id): Path<String>) -> Result<Json<BasicServiceContext>, GateError> {
    let context = state.gate.apply(&id).await?;
    Ok(Json(BasicServiceContext::from(&context)))
}

async fn revert(State(state): State<AgentApiState>, Path(id): Path<String>) -> Result<Json<BasicServiceContext>, GateError> {
    let context = state.gate.revert(&id).await?;
    Ok(Json(BasicServiceContext::from(&context)))
}

async fn status(State(state): State<AgentApiState>, Query(query): Query<StatusQuery>) -> Json<AgentStatus> {
    Json(state.status.status(query.skip_cache).await)
}

async fn service_status(
    State(state): State<AgentApiState>,
    Path(service_id): Path<String>,
) -> Json<Option<BasicServiceContext>> {
    Json(state.status.service(&service_id))
}
