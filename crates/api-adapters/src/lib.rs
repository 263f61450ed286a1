//! api-adapters
//!
//! HTTP surface for game clients. Enable with the `web-axum` feature.

pub mod metrics;

#[cfg(feature = "web-axum")]
pub mod client_ip;
#[cfg(feature = "web-axum")]
pub mod error;
#[cfg(feature = "web-axum")]
pub mod handlers;
#[cfg(feature = "web-axum")]
pub mod middleware;
#[cfg(feature = "web-axum")]
pub mod state;

pub use metrics::ApiMetrics;

#[cfg(feature = "web-axum")]
pub use state::AppState;

#[cfg(feature = "web-axum")]
use axum::routing::{get, post};
#[cfg(feature = "web-axum")]
use axum::Router;

/// Game-facing routes sit behind the rate limiter; `/health` and
/// `/metrics` do not.
#[cfg(feature = "web-axum")]
pub fn build_router(state: AppState) -> Router {
    let limited = Router::new()
        .route("/api/ad", get(handlers::get_ad))
        .route("/api/ad/get", get(handlers::get_ad_by_id))
        .route("/api/view", post(handlers::record_view))
        .route("/api/click", post(handlers::record_click))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .merge(limited)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(middleware::cors_policy())
        .with_state(state)
}
