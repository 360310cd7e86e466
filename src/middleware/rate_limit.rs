//! Rate limiting middleware
//!
//! Token bucket limiting per client IP for the upstream passthrough routes.
//! The client is identified by the first `X-Forwarded-For` entry, then
//! `X-Real-IP`, then the peer address. Each client gets its own limiter,
//! cached in memory and evicted after ten idle minutes.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use moka::future::Cache;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RateLimitConfig;
use crate::error::ApiError;

// ============================================================================
// Types
// ============================================================================

/// Type alias for our rate limiter instance
type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limit state shared across requests
#[derive(Clone)]
pub struct RateLimitState {
    /// `None` when limiting is disabled
    quota: Option<Quota>,
    limit: u32,

    /// Cache of rate limiters per client IP
    pub limiters: Cache<String, Arc<DirectRateLimiter>>,
}

impl RateLimitState {
    /// Create a new rate limit state
    pub fn new(config: &RateLimitConfig) -> Self {
        // Create a cache with 10,000 max entries and 10 minute idle expiry
        let limiters = Cache::builder()
            .max_capacity(10_000)
            .time_to_idle(Duration::from_secs(600))
            .build();

        let quota = if config.enabled {
            quota_for(config.requests_per_window, config.window_seconds)
        } else {
            None
        };

        Self {
            quota,
            limit: config.requests_per_window,
            limiters,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.quota.is_some()
    }

    /// Get or create the limiter for a client
    async fn limiter_for(&self, client: &str, quota: Quota) -> Arc<DirectRateLimiter> {
        self.limiters
            .get_with(client.to_string(), async move {
                Arc::new(RateLimiter::direct(quota))
            })
            .await
    }
}

/// Burst of `requests` replenished evenly over `window_seconds`
fn quota_for(requests: u32, window_seconds: u64) -> Option<Quota> {
    let burst = NonZeroU32::new(requests)?;
    let period = Duration::from_secs(window_seconds) / burst.get();
    Quota::with_period(period).map(|quota| quota.allow_burst(burst))
}

// ============================================================================
// Rate Limit Errors
// ============================================================================

/// Rate limit error with retry information
#[derive(Debug)]
pub struct RateLimitError {
    /// Seconds until the next request is allowed
    pub retry_after_seconds: u64,
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let mut response = ApiError::RateLimitExceeded {
            retry_after_seconds: self.retry_after_seconds,
        }
        .into_response();

        response.headers_mut().insert(
            "x-ratelimit-reset",
            HeaderValue::from(self.retry_after_seconds),
        );
        response
    }
}

// ============================================================================
// Rate Limit Middleware
// ============================================================================

/// Middleware to enforce per-client rate limits
///
/// # Headers
/// On success: `X-RateLimit-Limit`.
/// On rate limit exceeded: `Retry-After` and `X-RateLimit-Reset`, both in
/// seconds.
pub async fn rate_limit(
    State(rate_state): State<RateLimitState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, RateLimitError> {
    let Some(quota) = rate_state.quota else {
        return Ok(next.run(request).await);
    };

    let client = client_key(&request);
    let limiter = rate_state.limiter_for(&client, quota).await;

    match limiter.check() {
        Ok(_) => {
            let mut response = next.run(request).await;
            response
                .headers_mut()
                .insert("x-ratelimit-limit", HeaderValue::from(rate_state.limit));
            Ok(response)
        }
        Err(not_until) => {
            let retry_after = not_until.wait_time_from(DefaultClock::default().now());
            let retry_after_seconds = retry_after.as_secs().max(1);

            tracing::warn!(
                client = %client,
                retry_after_seconds,
                "Rate limit exceeded"
            );

            Err(RateLimitError {
                retry_after_seconds,
            })
        }
    }
}

/// Identify the client a request is counted against
pub fn client_key<B>(request: &Request<B>) -> String {
    let header = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    if let Some(first) = header("x-forwarded-for")
        .and_then(|list| list.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return first.to_string();
    }

    if let Some(real_ip) = header("x-real-ip") {
        return real_ip.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, middleware, routing::get, Router};
    use tower::ServiceExt;

    fn state(limit: i64) -> RateLimitState {
        RateLimitState::new(&RateLimitConfig::from_limit(limit))
    }

    fn app(limit: i64) -> Router {
        Router::new()
            .route("/api/ping", get(|| async { "pong" }))
            .layer(middleware::from_fn_with_state(state(limit), rate_limit))
    }

    fn request_from(ip: &str) -> Request<Body> {
        Request::builder()
            .uri("/api/ping")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_disabled_below_one() {
        assert!(!state(0).is_enabled());
        assert!(!state(-1).is_enabled());
        assert!(state(1).is_enabled());
    }

    #[test]
    fn test_burst_allowance() {
        let quota = quota_for(10, 30).unwrap();
        let limiter = RateLimiter::direct(quota);

        for i in 0..10 {
            assert!(limiter.check().is_ok(), "Request {} should be allowed", i);
        }
        assert!(limiter.check().is_err(), "Request 11 should be rate limited");
    }

    #[test]
    fn test_client_key() {
        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(())
            .unwrap();
        assert_eq!(client_key(&request), "203.0.113.7");

        let request = Request::builder()
            .header("x-real-ip", "198.51.100.2")
            .body(())
            .unwrap();
        assert_eq!(client_key(&request), "198.51.100.2");

        let mut request = Request::builder().body(()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000))));
        assert_eq!(client_key(&request), "192.0.2.1");

        let request = Request::builder().body(()).unwrap();
        assert_eq!(client_key(&request), "unknown");
    }

    #[tokio::test]
    async fn test_limiter_caching() {
        let state = state(5);
        let quota = state.quota.unwrap();
        let first = state.limiter_for("203.0.113.7", quota).await;
        let second = state.limiter_for("203.0.113.7", quota).await;
        let other = state.limiter_for("203.0.113.8", quota).await;

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[tokio::test]
    async fn test_middleware_limits_per_client() {
        let app = app(2);

        for _ in 0..2 {
            let response = app.clone().oneshot(request_from("203.0.113.7")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()["x-ratelimit-limit"], "2");
        }

        let response = app.clone().oneshot(request_from("203.0.113.7")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("retry-after"));
        assert!(response.headers().contains_key("x-ratelimit-reset"));

        // A different client has its own budget
        let response = app.oneshot(request_from("203.0.113.8")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_disabled_passes_through() {
        let app = app(0);
        for _ in 0..20 {
            let response = app.clone().oneshot(request_from("203.0.113.7")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().get("x-ratelimit-limit").is_none());
        }
    }
}
