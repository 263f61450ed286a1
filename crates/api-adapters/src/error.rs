//! Maps `DomainError` onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use domains::DomainError;
use serde_json::json;
use tracing::{error, warn};

#[derive(Debug)]
pub struct ApiError(pub DomainError);

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            DomainError::NotFound(..) | DomainError::NoAdsAvailable(_) => StatusCode::NOT_FOUND,
            DomainError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            DomainError::ValidationError(_) => StatusCode::BAD_REQUEST,
            DomainError::Conflict(_) => StatusCode::CONFLICT,
            DomainError::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            DomainError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DomainError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Storage and upstream detail stays in the logs.
        let message = match &self.0 {
            DomainError::Storage(detail) => {
                error!(error = %detail, "request failed on storage");
                "internal error".to_string()
            }
            DomainError::Upstream(detail) => {
                warn!(error = %detail, "request failed on upstream");
                "upstream unavailable".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": message,
            "code": status.as_u16(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_kind() {
        let cases = [
            (DomainError::ad_not_found(1), StatusCode::NOT_FOUND),
            (DomainError::NoAdsAvailable(domains::SlotType::Banner), StatusCode::NOT_FOUND),
            (DomainError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (DomainError::ValidationError("x".into()), StatusCode::BAD_REQUEST),
            (DomainError::Conflict("x".into()), StatusCode::CONFLICT),
            (DomainError::RateLimitExceeded("x".into()), StatusCode::TOO_MANY_REQUESTS),
            (DomainError::Storage("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (DomainError::Upstream("x".into()), StatusCode::BAD_GATEWAY),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).into_response().status(), status);
        }
    }
}
