use crate::errors::AuthError;
use crate::models::{
    LoginRequest, LoginResponse, RefreshRequest, RefreshResponse, RequestContext, WhoAmIResponse,
};
use crate::routes::AppState;
use axum::{extract::State, http::StatusCode, Extension, Json};
use std::sync::Arc;
use tracing::instrument;

/// Handle login
///
/// POST /api/v1/auth/login
#[instrument(name = "auth.session.login", skip_all)]
pub async fn handle_login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AuthError> {
    let response = state
        .sessions
        .login(&payload.email, &payload.password)
        .await?;
    Ok(Json(response))
}

/// Exchange a refresh token for a new access token
///
/// POST /api/v1/auth/refresh
#[instrument(name = "auth.session.refresh", skip_all)]
pub async fn handle_refresh(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, AuthError> {
    let response = state.sessions.refresh(&payload.refresh_token).await?;
    Ok(Json(response))
}

/// Revoke the presented access token
///
/// POST /api/v1/auth/logout (bearer)
#[instrument(name = "auth.session.logout", skip_all)]
pub async fn handle_logout(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
) -> StatusCode {
    state.sessions.logout(&ctx);
    StatusCode::NO_CONTENT
}

/// GET /api/v1/whoami (bearer)
#[instrument(name = "auth.session.whoami", skip_all)]
pub async fn handle_whoami(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<WhoAmIResponse>, AuthError> {
    let response = state.sessions.whoami(&ctx).await?;
    Ok(Json(response))
}
