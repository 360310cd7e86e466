//! API error types

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::services::upstream::{ErrorKind, ExecuteError};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after_seconds: u64 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Upstream(#[from] ExecuteError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Upstream(err) => match err.kind() {
                ErrorKind::NoCredentialAvailable { .. }
                | ErrorKind::RetriesExhausted { .. }
                | ErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::Application { status: 404, .. } => StatusCode::NOT_FOUND,
                ErrorKind::Application { .. } | ErrorKind::MalformedResponse { .. } => {
                    StatusCode::BAD_GATEWAY
                }
            },
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "authentication_error",
            ApiError::RateLimitExceeded { .. } => "rate_limit_error",
            ApiError::InvalidRequest(_) => "invalid_request_error",
            ApiError::Upstream(err) => match err.kind() {
                ErrorKind::NoCredentialAvailable { .. } => "no_credential_error",
                ErrorKind::RetriesExhausted { .. } => "upstream_unavailable_error",
                ErrorKind::Application { status: 404, .. } => "not_found_error",
                ErrorKind::Application { .. } => "upstream_error",
                ErrorKind::MalformedResponse { .. } => "upstream_response_error",
                ErrorKind::Cancelled => "cancelled_error",
            },
        }
    }

    /// Seconds for a `Retry-After` header, if the error carries a hint
    fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            ApiError::RateLimitExceeded {
                retry_after_seconds,
            } => Some(*retry_after_seconds),
            ApiError::Upstream(err) => err.retry_after().map(whole_seconds),
            _ => None,
        }
    }
}

// Rounded up, never 0
fn whole_seconds(duration: Duration) -> u64 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    secs.max(1)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retry_after = self.retry_after_seconds();

        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "Request failed");
        }

        let body = Json(ErrorResponse {
            type_: "error".to_string(),
            error: ErrorDetail {
                type_: self.error_type().to_string(),
                message: self.to_string(),
            },
        });

        let mut response = (status, body).into_response();
        if let Some(seconds) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    #[serde(rename = "type")]
    type_: String,
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    type_: String,
    message: String,
}
