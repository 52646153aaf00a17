//! Bearer-token authentication for protected routes.

use crate::errors::AuthError;
use crate::models::RequestContext;
use crate::routes::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::IntoResponse,
};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::instrument;

/// Validate the request's access token and attach a [`RequestContext`].
///
/// ```text
/// Authorization: Bearer <token>
/// ```
///
/// Rejects with 401 when the header is missing or malformed, the token does
/// not validate as an access token, or the user no longer exists or is
/// inactive.
#[instrument(skip_all, name = "auth.middleware.bearer")]
pub async fn require_access_token(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, AuthError> {
    let token = bearer_token(&req)?.to_string();

    let user_id = state.tokens.validate_access_token(&token)?;

    let user = match state.users.get_user_by_id(user_id).await? {
        Some(user) if user.is_active => user,
        _ => {
            tracing::debug!(target: "auth.middleware", user_id, "Token subject is missing or inactive");
            return Err(AuthError::InvalidCredentials);
        }
    };

    req.extensions_mut().insert(RequestContext {
        user,
        token: SecretString::from(token),
    });

    Ok(next.run(req).await)
}

fn bearer_token(req: &Request) -> Result<&str, AuthError> {
    let header = req
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "auth.middleware", "Missing Authorization header");
            AuthError::MalformedToken
        })?;

    header.strip_prefix("Bearer ").ok_or_else(|| {
        tracing::debug!(target: "auth.middleware", "Invalid Authorization header format");
        AuthError::MalformedToken
    })
}
