//! Application routing
//!
//! This module defines all HTTP routes for the application.

use axum::{
    http::HeaderName,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{admin, health, upstream};
use crate::middleware::{
    auth::{require_admin_token, AdminAuthState},
    logging::log_request,
    rate_limit::{rate_limit, RateLimitState},
};
use crate::server::state::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    // Health check routes (no authentication, no rate limiting)
    let health_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness))
        .route("/liveness", get(health::liveness));

    // Operator routes behind the admin token
    let admin_routes = Router::new()
        .route("/credentials", get(admin::credentials_snapshot))
        .route("/credentials/reset", post(admin::reset_credentials))
        .layer(middleware::from_fn_with_state(
            AdminAuthState::new(state.settings.admin_token.clone()),
            require_admin_token,
        ));

    // Upstream passthrough, rate limited per client IP
    let upstream_routes = Router::new()
        .route("/*path", get(upstream::forward))
        .layer(middleware::from_fn_with_state(
            RateLimitState::new(&state.settings.rate_limit),
            rate_limit,
        ));

    Router::new()
        .nest("/admin", admin_routes)
        .nest("/api", upstream_routes)
        .merge(health_routes)
        // Apply middleware layers (last added = outermost = runs first)
        .layer(create_cors_layer())
        // Custom request logging with trace IDs
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// Create CORS layer with permissive settings
fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([
            // Trace ID headers
            HeaderName::from_static("x-trace-id"),
            HeaderName::from_static("x-request-id"),
            // Rate limit headers
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-reset"),
            HeaderName::from_static("retry-after"),
            HeaderName::from_static(upstream::ATTEMPTS_HEADER),
        ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NoCredentialMode, RateLimitConfig, Settings};
    use crate::services::upstream::{Transport, TransportError, TransportRequest, TransportResponse};
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    /// Answers by URL suffix and records what it was asked
    #[derive(Default)]
    struct FakeUpstream {
        seen: Mutex<Vec<(String, Option<String>)>>,
    }

    #[async_trait]
    impl Transport for FakeUpstream {
        async fn send(
            &self,
            request: TransportRequest<'_>,
        ) -> Result<TransportResponse, TransportError> {
            self.seen.lock().unwrap().push((
                request.url.to_string(),
                request.credential.map(str::to_string),
            ));

            let reply = if request.url.contains("/missing") {
                TransportResponse::new(404, r#"{"error":true,"message":"Not found","body":[]}"#)
            } else if request.url.contains("/throttled") {
                TransportResponse::new(429, "Too Many Requests")
            } else {
                TransportResponse::new(
                    200,
                    r#"{"error":false,"message":"","body":{"title":"sunset"}}"#,
                )
            };
            Ok(reply)
        }
    }

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.upstream.base_url = "https://upstream.test".to_string();
        settings.credentials.tokens = vec![
            "session-secret-one".to_string(),
            "session-secret-two".to_string(),
        ];
        settings.credentials.max_retries = 2;
        settings.credentials.no_credential_policy = NoCredentialMode::Fail;
        settings.admin_token = Some("operator-token".to_string());
        settings
    }

    fn app_with(settings: Settings) -> (Router, AppState, Arc<FakeUpstream>) {
        let upstream = Arc::new(FakeUpstream::default());
        let state = AppState::with_transport(settings, upstream.clone()).unwrap();
        (create_router(state.clone()), state, upstream)
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_probes() {
        let (app, _, _) = app_with(settings());

        for path in ["/health", "/ready", "/liveness"] {
            let response = app.clone().oneshot(get_request(path)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{}", path);
            assert!(response.headers().contains_key("x-trace-id"));
        }
    }

    #[tokio::test]
    async fn test_passthrough_unwraps_envelope() {
        let (app, _, upstream) = app_with(settings());

        let response = app
            .oneshot(get_request("/api/ajax/illust/42?lang=en"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[upstream::ATTEMPTS_HEADER], "1");
        assert_eq!(json_body(response).await, serde_json::json!({"title": "sunset"}));

        let seen = upstream.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![(
                "https://upstream.test/ajax/illust/42?lang=en".to_string(),
                Some("session-secret-one".to_string())
            )]
        );
    }

    #[tokio::test]
    async fn test_passthrough_not_found_keeps_credentials_healthy() {
        let (app, state, _) = app_with(settings());

        let response = app.oneshot(get_request("/api/missing/1")).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["error"]["type"], "not_found_error");
        assert_eq!(state.pool.snapshot().quarantined, 0);
    }

    #[tokio::test]
    async fn test_passthrough_throttled_exhausts_retries() {
        let (app, state, upstream) = app_with(settings());

        let response = app.oneshot(get_request("/api/throttled")).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(upstream.seen.lock().unwrap().len(), 2);
        assert_eq!(state.pool.snapshot().quarantined, 2);
    }

    #[tokio::test]
    async fn test_passthrough_rejects_traversal() {
        let (app, _, upstream) = app_with(settings());

        let response = app
            .oneshot(get_request("/api/ajax/../../etc/passwd"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(upstream.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_admin_requires_token() {
        let (app, _, _) = app_with(settings());

        let response = app
            .clone()
            .oneshot(get_request("/admin/credentials"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/admin/credentials")
                    .header("authorization", "Bearer wrong-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_snapshot_and_reset() {
        let (app, state, _) = app_with(settings());

        // Quarantine both credentials
        let response = app.clone().oneshot(get_request("/api/throttled")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/admin/credentials")
                    .header("x-admin-token", "operator-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["total"], 2);
        assert_eq!(body["quarantined"], 2);
        assert!(!body.to_string().contains("session-secret-one"));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/admin/credentials/reset")
                    .header("authorization", "Bearer operator-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["reset"], 2);
        assert_eq!(body["pool"]["good"], 2);
        assert_eq!(state.pool.available_count(), 2);
    }

    #[tokio::test]
    async fn test_ready_reports_drained_pool() {
        let (app, _, _) = app_with(settings());

        let response = app.clone().oneshot(get_request("/api/throttled")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = app.oneshot(get_request("/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(response).await;
        assert_eq!(body["ready"], false);
        assert_eq!(body["checks"]["credentials_available"], 0);
    }

    #[tokio::test]
    async fn test_rate_limit_applies_to_api_only() {
        let mut settings = settings();
        settings.rate_limit = RateLimitConfig::from_limit(1);
        let (app, _, _) = app_with(settings);

        let from_client = |uri: &str| {
            Request::builder()
                .uri(uri)
                .header("x-forwarded-for", "203.0.113.9")
                .body(Body::empty())
                .unwrap()
        };

        let response = app.clone().oneshot(from_client("/api/ajax/user/1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(from_client("/api/ajax/user/1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        // Probes are never limited
        let response = app.oneshot(from_client("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
