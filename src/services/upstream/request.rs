//! Request descriptors and successful results for upstream calls

use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// HTTP method for an upstream call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
        }
    }
}

/// Whether a call needs a pooled credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// Select a credential from the pool and report its outcome
    #[default]
    Authenticated,
    /// Best-effort call; never touches pool health
    Anonymous,
}

/// Outgoing request payload
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(serde_json::Value),
    /// Pre-encoded `application/x-www-form-urlencoded` payload
    Form(String),
}

/// Shape the response body must have to count as a success
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyKind {
    /// Any body; returned as a JSON string
    Raw,
    /// Any valid JSON document
    #[default]
    Json,
    /// `{"error": bool, "message": string, "body": ...}` wrapper; yields `body`
    Envelope,
}

/// One logical upstream call as handed to the executor
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: String,
    pub auth: AuthMode,
    pub body: Option<RequestBody>,
    pub expect: BodyKind,
    /// Caller-side cancellation; firing it aborts the call without retries
    pub cancel: CancellationToken,
}

impl UpstreamRequest {
    /// Authenticated GET expecting JSON
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            auth: AuthMode::Authenticated,
            body: None,
            expect: BodyKind::Json,
            cancel: CancellationToken::new(),
        }
    }

    /// Authenticated POST expecting JSON
    pub fn post(url: impl Into<String>, body: RequestBody) -> Self {
        Self {
            method: Method::Post,
            body: Some(body),
            ..Self::get(url)
        }
    }

    pub fn anonymous(mut self) -> Self {
        self.auth = AuthMode::Anonymous;
        self
    }

    pub fn expect(mut self, kind: BodyKind) -> Self {
        self.expect = kind;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Successful upstream result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpstreamResponse {
    pub status: u16,
    /// Parsed body (the envelope's `body` field for `BodyKind::Envelope`)
    pub body: serde_json::Value,
    /// Attempts used, including the successful one
    pub attempts: u32,
    /// Name of the pooled credential that served the call, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}
