//! HTTP plumbing shared by the coordinator and agent surfaces.
//!
//! # Data Flow
//! ```text
//! request
//!     → SetRequestId (x-request-id, UUID v4 when absent)
//!     → TraceLayer (span per request)
//!     → TimeoutLayer (listener.request_timeout_secs)
//!     → auth.rs (authkey query parameter, where the router asks for it)
//!     → role handlers (coordinator::api / agent::api)
//!     → PropagateRequestId (echo x-request-id on the response)
//! ```

pub mod auth;

use std::time::Duration;

use axum::http::HeaderName;
use axum::Router;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::ListenerConfig;

pub use auth::{authkey_middleware, AuthKey};

pub const X_REQUEST_ID: &str = "x-request-id";

/// Wrap a role router with the middleware every listener gets.
#[allow(deprecated)]
pub fn with_common_layers(router: Router, listener: &ListenerConfig) -> Router {
    let header = HeaderName::from_static(X_REQUEST_ID);
    router
        .layer(PropagateRequestIdLayer::new(header.clone()))
        .layer(TimeoutLayer::new(Duration::from_secs(listener.request_timeout_secs)))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(header, MakeRequestUuid))
}
