//! Admin authentication middleware
//!
//! Guards the operator endpoints (pool snapshot, reset) with a static token
//! from `ADMIN_TOKEN`. The token is accepted as `x-admin-token` or as
//! `Authorization: Bearer <token>`. With no token configured the guard is
//! open, which `Settings::validate` warns about in production.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::error::ApiError;
use crate::utils::mask_secret;

/// Header carrying the admin token
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

// ============================================================================
// Authentication Errors
// ============================================================================

/// Authentication error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// No token provided in request
    MissingToken,
    /// Token does not match
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match self {
            AuthError::MissingToken => {
                "Missing admin token. Include 'x-admin-token' or 'Authorization: Bearer <token>' header."
            }
            AuthError::InvalidToken => "Invalid admin token.",
        };
        ApiError::Unauthorized(message.to_string()).into_response()
    }
}

// ============================================================================
// Authentication Middleware
// ============================================================================

/// Authentication state required by the middleware
#[derive(Clone, Default)]
pub struct AdminAuthState {
    admin_token: Option<Arc<str>>,
}

impl AdminAuthState {
    pub fn new(admin_token: Option<String>) -> Self {
        Self {
            admin_token: admin_token.map(Arc::from),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.admin_token.is_some()
    }

    fn check(&self, presented: Option<&str>) -> Result<(), AuthError> {
        let Some(expected) = self.admin_token.as_deref() else {
            return Ok(());
        };
        let presented = presented.ok_or(AuthError::MissingToken)?;
        if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
            Ok(())
        } else {
            Err(AuthError::InvalidToken)
        }
    }
}

/// Middleware to require the admin token
///
/// # Errors
/// - 401 Unauthorized: missing or wrong token
pub async fn require_admin_token(
    State(auth_state): State<AdminAuthState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let presented = extract_admin_token(&request);

    if let Err(err) = auth_state.check(presented.as_deref()) {
        tracing::warn!(
            path = %request.uri().path(),
            token = %presented.as_deref().map(mask_secret).unwrap_or_else(|| "-".to_string()),
            reason = ?err,
            "Admin request rejected"
        );
        return Err(err);
    }

    Ok(next.run(request).await)
}

/// Extract the admin token from request headers
pub fn extract_admin_token<B>(request: &Request<B>) -> Option<String> {
    request
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .or_else(|| {
            request
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
}

// Compares every byte so timing does not leak the matching prefix length
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ============================================================================
// Tests
// ============================================================================
