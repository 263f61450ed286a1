//! # Handlers
//!
//! Thin translation between HTTP and the services: parse the query, call
//! one service, count the outcome.

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use domains::{AdEvent, AdId, DomainError, SlotType, Validation};
use serde::Deserialize;
use serde_json::json;
use services::ServedAd;
use tracing::{error, info};

use crate::error::ApiError;
use crate::metrics::CONTENT_TYPE;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AdQuery {
    #[serde(rename = "type")]
    pub slot: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AdIdQuery {
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuthQuery {
    pub account_id: Option<String>,
    pub authtoken: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EngagementBody {
    pub ad_id: AdId,
    pub user_id: String,
}

/// `GET /api/ad?type=N`
pub async fn get_ad(
    State(state): State<AppState>,
    Query(query): Query<AdQuery>,
) -> Result<Json<ServedAd>, ApiError> {
    let slot: SlotType = query
        .slot
        .as_deref()
        .ok_or_else(|| DomainError::ValidationError("missing type".into()))?
        .parse()?;

    match state.selector.pick_ad(slot, &state.context()).await {
        Ok(served) => {
            state.metrics.ad_served(slot);
            Ok(Json(served))
        }
        Err(err) => {
            if matches!(err, DomainError::NoAdsAvailable(_)) {
                state.metrics.ad_unavailable(slot);
            }
            Err(err.into())
        }
    }
}

/// `GET /api/ad/get?id=N`
pub async fn get_ad_by_id(
    State(state): State<AppState>,
    Query(query): Query<AdIdQuery>,
) -> Result<Json<ServedAd>, ApiError> {
    let raw = query
        .id
        .ok_or_else(|| DomainError::ValidationError("missing id".into()))?;
    let id: AdId = raw
        .trim()
        .parse()
        .map_err(|_| DomainError::ValidationError(format!("invalid ad id '{raw}'")))?;

    let served = state.selector.serve_by_id(id, &state.context()).await?;
    Ok(Json(served))
}

/// `POST /api/view?account_id=..&authtoken=..`
pub async fn record_view(
    State(state): State<AppState>,
    Query(auth): Query<AuthQuery>,
    Json(body): Json<EngagementBody>,
) -> Result<&'static str, ApiError> {
    record(&state, auth, body, AdEvent::View).await?;
    Ok("View registered!")
}

/// `POST /api/click?account_id=..&authtoken=..`
pub async fn record_click(
    State(state): State<AppState>,
    Query(auth): Query<AuthQuery>,
    Json(body): Json<EngagementBody>,
) -> Result<&'static str, ApiError> {
    record(&state, auth, body, AdEvent::Click).await?;
    Ok("Click registered!")
}

async fn record(state: &AppState, auth: AuthQuery, body: EngagementBody, event: AdEvent) -> Result<(), ApiError> {
    let (Some(account), Some(token)) = (auth.account_id, auth.authtoken) else {
        return Err(DomainError::ValidationError("missing account_id or authtoken".into()).into());
    };
    let account_id: i64 = account
        .trim()
        .parse()
        .map_err(|_| DomainError::ValidationError("invalid account_id".into()))?;
    info!(account_id, token_len = token.len(), event = event.as_str(), "engagement report");

    let verdict = state.trust.validate(account_id, &token).await;
    state.metrics.token_validation(verdict.as_ref().ok());
    match verdict? {
        Validation::Valid => {}
        Validation::Invalid { cause } => {
            let reason = if cause.is_empty() { "game token rejected".to_string() } else { cause };
            return Err(DomainError::Unauthorized(reason).into());
        }
    }

    state.engagement.record(body.ad_id, &body.user_id, event).await?;
    Ok(())
}

/// `GET /metrics`
pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(text) => ([(header::CONTENT_TYPE, CONTENT_TYPE)], text).into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `GET /health`
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
