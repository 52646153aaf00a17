use crate::models::Jwks;
use crate::observability::metrics::record_jwks_request;
use crate::routes::AppState;
use axum::{
    extract::State,
    http::header::{HeaderMap, HeaderValue, CACHE_CONTROL},
    Json,
};
use std::sync::Arc;
use tracing::instrument;

/// Handle JWKS request
///
/// GET /.well-known/jwks.json
///
/// Returns every public key the service currently verifies with, in JWKS
/// format (RFC 7517), cacheable for one hour.
#[instrument(name = "auth.jwks.get", skip_all, fields(key_count))]
pub async fn handle_get_jwks(State(state): State<Arc<AppState>>) -> (HeaderMap, Json<Jwks>) {
    let jwks = state.tokens.jwks();

    tracing::Span::current().record("key_count", jwks.keys.len());
    record_jwks_request();

    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=3600"));

    (headers, Json(jwks))
}
