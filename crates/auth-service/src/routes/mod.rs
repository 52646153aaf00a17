//! HTTP routes for the auth service.
//!
//! Defines the Axum router and application state.

use crate::handlers::{self, auth_handler, jwks_handler, metrics::metrics_handler};
use crate::middleware::require_access_token;
use crate::repositories::UserStore;
use crate::services::{SessionService, TokenService};
use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

pub use crate::observability::metrics::init_metrics_recorder;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenService>,
    pub sessions: Arc<SessionService>,
    pub users: Arc<dyn UserStore>,
}

/// Build the application routes.
///
/// - `/.well-known/jwks.json`, `/health`, `/metrics` - public
/// - `/api/v1/auth/login`, `/api/v1/auth/refresh` - public
/// - `/api/v1/auth/logout`, `/api/v1/whoami` - bearer access token
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let protected_routes = Router::new()
        .route("/api/v1/auth/logout", post(auth_handler::handle_logout))
        .route("/api/v1/whoami", get(auth_handler::handle_whoami))
        .route_layer(from_fn_with_state(state.clone(), require_access_token));

    let app_routes = Router::new()
        .route("/api/v1/auth/login", post(auth_handler::handle_login))
        .route("/api/v1/auth/refresh", post(auth_handler::handle_refresh))
        .route("/.well-known/jwks.json", get(jwks_handler::handle_get_jwks))
        .route("/health", get(handlers::health_check))
        .merge(protected_routes)
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics_handle);

    // TraceLayer wraps the timeout so timed-out requests are still logged
    app_routes
        .merge(metrics_routes)
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
}
