use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};

/// Shared key expected in the `authkey` query parameter. `None` disables the check.
#[derive(Clone, Default)]
pub struct AuthKey(pub Option<Arc<str>>);

impl AuthKey {
    pub fn new(key: Option<&str>) -> Self {
        Self(key.map(Arc::from))
    }
}

fn query_authkey(request: &Request) -> Option<String> {
    let query = request.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(name, _)| name == "authkey")
        .map(|(_, value)| value.into_owned())
}

pub async fn authkey_middleware(State(key): State<AuthKey>, request: Request, next: Next) -> Result<Response, StatusCode> {
    let Some(expected) = key.0.as_deref() else {
        return Ok(next.run(request).await);
    };

    if query_authkey(&request).as_deref() == Some(expected) {
        return Ok(next.run(request).await);
    }

    tracing::warn!(path = %request.uri().path(), "Rejected request with missing or wrong authkey");
    Err(StatusCode::UNAUTHORIZED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware, routing::get, Router};
    use tower::ServiceExt;

    fn app(key: Option<&str>) -> Router {
        Router::new()
            .route("/request", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(AuthKey::new(key), authkey_middleware))
    }

    async fn status(app: Router, uri: &str) -> StatusCode {
        app.oneshot(axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_key_required_when_configured() {
        assert_eq!(status(app(Some("s3cret")), "/request").await, StatusCode::UNAUTHORIZED);
        assert_eq!(status(app(Some("s3cret")), "/request?authkey=wrong").await, StatusCode::UNAUTHORIZED);
        assert_eq!(status(app(Some("s3cret")), "/request?authkey=s3cret").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_open_without_key() {
        assert_eq!(status(app(None), "/request").await, StatusCode::OK);
    }
}
