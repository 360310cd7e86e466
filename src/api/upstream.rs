//! Upstream passthrough
//!
//! `GET /api/*path` is forwarded to the upstream API through the call
//! executor and answered with the envelope's `body`. If the client goes away
//! the handler future is dropped, which cancels the in-flight call.

use axum::{
    extract::{Path, RawQuery, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::middleware::TraceId;
use crate::server::state::AppState;
use crate::services::upstream::{BodyKind, UpstreamRequest};

/// Header reporting how many upstream attempts a response took
pub const ATTEMPTS_HEADER: &str = "x-upstream-attempts";

/// GET /api/*path
pub async fn forward(
    State(state): State<AppState>,
    trace_id: Option<Extension<TraceId>>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError> {
    if path.split('/').any(|segment| segment == "..") {
        return Err(ApiError::InvalidRequest(
            "path traversal is not allowed".to_string(),
        ));
    }

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let request = UpstreamRequest::get(state.upstream_url(&path, query.as_deref()))
        .expect(BodyKind::Envelope)
        .with_cancel(cancel);

    let response = state.executor.execute(&request).await.map_err(|err| {
        tracing::debug!(
            trace_id = %trace_id.as_ref().map(|Extension(id)| id.as_str()).unwrap_or("-"),
            path = %path,
            attempts = err.attempts,
            error = %err,
            "Upstream passthrough failed"
        );
        ApiError::from(err)
    })?;

    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);
    let mut http = (status, Json(response.body)).into_response();
    http.headers_mut()
        .insert(ATTEMPTS_HEADER, HeaderValue::from(response.attempts));
    Ok(http)
}
