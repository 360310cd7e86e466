//! Outbound HTTP transport
//!
//! The executor only needs "send this request, give me status and body".
//! `HttpTransport` does that over a shared `reqwest` client; tests plug in
//! their own `Transport`.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT_LANGUAGE, CONTENT_TYPE, COOKIE, USER_AGENT};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

use super::request::{Method, RequestBody};

/// One outbound request as seen by a transport
#[derive(Debug, Clone, Copy)]
pub struct TransportRequest<'a> {
    pub method: Method,
    pub url: &'a str,
    /// Session secret to present, if any
    pub credential: Option<&'a str>,
    pub body: Option<&'a RequestBody>,
}

/// Raw upstream reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Transport-level failures; all of them are retryable
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("request failed: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_body() || err.is_decode() {
            TransportError::Body(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

/// Capability to perform one HTTP exchange
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest<'_>) -> Result<TransportResponse, TransportError>;
}

// ============================================================================
// reqwest transport
// ============================================================================

/// Settings for the shared HTTP client
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub user_agent: String,
    pub accept_language: String,
    /// Cookie that carries the session credential
    pub session_cookie: String,
    pub connect_timeout: Duration,
    pub max_idle_per_host: usize,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; rv:123.0) Gecko/20100101 Firefox/123.0"
                .to_string(),
            accept_language: "en-US,en;q=0.5".to_string(),
            session_cookie: "PHPSESSID".to_string(),
            connect_timeout: Duration::from_secs(10),
            max_idle_per_host: 20,
        }
    }
}

/// `Transport` backed by a pooled `reqwest::Client`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.max_idle_per_host)
            .build()?;

        Ok(Self { client, config })
    }

    fn session_cookie(&self, secret: &str) -> Result<HeaderValue, TransportError> {
        let mut value = HeaderValue::from_str(&format!("{}={}", self.config.session_cookie, secret))
            .map_err(|_| TransportError::Other("credential is not a valid cookie value".to_string()))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest<'_>) -> Result<TransportResponse, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(request.url),
            Method::Post => self.client.post(request.url),
        }
        .header(USER_AGENT, &self.config.user_agent)
        .header(ACCEPT_LANGUAGE, &self.config.accept_language);

        if let Some(secret) = request.credential {
            builder = builder.header(COOKIE, self.session_cookie(secret)?);
        }

        builder = match request.body {
            Some(RequestBody::Json(value)) => builder.json(value),
            Some(RequestBody::Form(encoded)) => builder
                .header(
                    CONTENT_TYPE,
                    "application/x-www-form-urlencoded; charset=utf-8",
                )
                .body(encoded.clone()),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?;

        tracing::trace!(
            method = %request.method,
            url = %request.url,
            status,
            bytes = body.len(),
            "Upstream exchange complete"
        );

        Ok(TransportResponse { status, body })
    }
}
