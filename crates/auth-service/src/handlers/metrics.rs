//! Prometheus scrape endpoint.
//!
//! Unauthenticated. Labels carry no user identifiers.

use axum::{extract::State, response::IntoResponse};
use metrics_exporter_prometheus::PrometheusHandle;

/// GET /metrics
#[tracing::instrument(skip_all, name = "auth.metrics.scrape")]
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}
