//! Operator endpoints for the credential pool

use axum::{extract::State, Json};
use serde::Serialize;

use crate::services::credential_pool::PoolSnapshot;
use crate::server::state::AppState;

/// Result of a pool reset
#[derive(Serialize)]
pub struct ResetResponse {
    pub reset: usize,
    pub pool: PoolSnapshot,
}

/// Point-in-time credential health
///
/// GET /admin/credentials
pub async fn credentials_snapshot(State(state): State<AppState>) -> Json<PoolSnapshot> {
    Json(state.pool.snapshot())
}

/// Clear every quarantine and failure count
///
/// POST /admin/credentials/reset
pub async fn reset_credentials(State(state): State<AppState>) -> Json<ResetResponse> {
    let before = state.pool.snapshot();
    state.pool.reset_all();

    tracing::info!(
        credentials = before.total,
        previously_quarantined = before.quarantined,
        "Credential pool reset by operator"
    );

    Json(ResetResponse {
        reset: before.total,
        pool: state.pool.snapshot(),
    })
}
