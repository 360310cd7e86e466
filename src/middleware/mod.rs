//! Middleware module
//!
//! Contains HTTP middleware for admin authentication, rate limiting, and logging.

pub mod auth;
pub mod logging;
pub mod rate_limit;

// Re-export commonly used items
pub use auth::{require_admin_token, AdminAuthState, AuthError, ADMIN_TOKEN_HEADER};
pub use logging::{log_request, TraceId, REQUEST_ID_HEADER, TRACE_ID_HEADER};
pub use rate_limit::{client_key, rate_limit, RateLimitError, RateLimitState};
