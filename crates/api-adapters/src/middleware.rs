//! Admission control and request tracing layers.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use domains::DomainError;
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;

use crate::client_ip;
use crate::error::ApiError;
use crate::state::AppState;

/// Withdraws a token for the calling client or answers 429.
pub async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let client = client_ip::from_request(&req);
    if state.limiter.allow(&client) {
        return next.run(req).await;
    }
    debug!(client = %client, path = %req.uri().path(), "rate limited");
    state.metrics.rate_limited();
    ApiError(DomainError::RateLimitExceeded("slow down".into())).into_response()
}

/// Game clients call from arbitrary origins.
pub fn cors_policy() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([axum::http::header::CONTENT_TYPE])
}
