//! Liveness check.

use crate::routes::AppState;
use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub signing_keys: usize,
}

/// GET /health
///
/// Healthy as long as the service holds a signing key, which it always does
/// once started.
#[instrument(skip_all, name = "auth.health.check")]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let signing_keys = state.tokens.key_manager().len();
    Json(HealthResponse {
        status: if signing_keys > 0 { "healthy" } else { "unhealthy" },
        signing_keys,
    })
}
