use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Errors produced by key management, token issuance and validation.
///
/// Token failures are split into distinct variants so an HTTP layer can map
/// each to a status without inspecting the message.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Failed to parse signing key: {0}")]
    KeyParse(String),

    #[error("Failed to serialize signing key: {0}")]
    KeySerialization(String),

    #[error("Failed to build token: {0}")]
    TokenBuild(String),

    #[error("Failed to sign token: {0}")]
    TokenSigning(String),

    #[error("Malformed token")]
    MalformedToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token signature does not match any trusted key")]
    SignatureMismatch,

    #[error("Invalid token claims: {0}")]
    InvalidClaims(String),

    #[error("Invalid token type: expected {expected}, got {actual:?}")]
    WrongTokenType {
        expected: String,
        actual: Option<String>,
    },

    #[error("Token has been invalidated")]
    TokenRevoked,

    #[error("Token missing subject (user ID)")]
    MissingSubject,

    #[error("Invalid user ID in token")]
    InvalidSubject,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid password hash format")]
    PasswordHashFormat,

    #[error("Internal server error")]
    Internal,
}

impl AuthError {
    /// Stable machine-readable code for the error.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Store(_) => "STORE_ERROR",
            AuthError::Crypto(_)
            | AuthError::KeyGeneration(_)
            | AuthError::KeyParse(_)
            | AuthError::KeySerialization(_)
            | AuthError::PasswordHashFormat => "CRYPTO_ERROR",
            AuthError::TokenBuild(_) | AuthError::TokenSigning(_) => "TOKEN_ISSUANCE_ERROR",
            AuthError::MalformedToken => "MALFORMED_TOKEN",
            AuthError::TokenExpired => "TOKEN_EXPIRED",
            AuthError::SignatureMismatch => "INVALID_SIGNATURE",
            AuthError::InvalidClaims(_) => "INVALID_CLAIMS",
            AuthError::WrongTokenType { .. } => "WRONG_TOKEN_TYPE",
            AuthError::TokenRevoked => "TOKEN_REVOKED",
            AuthError::MissingSubject | AuthError::InvalidSubject => "INVALID_SUBJECT",
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::Internal => "INTERNAL_ERROR",
        }
    }

    /// Whether the error describes a rejected token rather than a server fault.
    pub fn is_token_rejection(&self) -> bool {
        matches!(
            self,
            AuthError::MalformedToken
                | AuthError::TokenExpired
                | AuthError::SignatureMismatch
                | AuthError::InvalidClaims(_)
                | AuthError::WrongTokenType { .. }
                | AuthError::TokenRevoked
                | AuthError::MissingSubject
                | AuthError::InvalidSubject
        )
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AuthError::Store(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal storage error occurred".to_string(),
            ),
            AuthError::Crypto(_)
            | AuthError::KeyGeneration(_)
            | AuthError::KeyParse(_)
            | AuthError::KeySerialization(_)
            | AuthError::PasswordHashFormat
            | AuthError::TokenBuild(_)
            | AuthError::TokenSigning(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal cryptographic error occurred".to_string(),
            ),
            AuthError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "Invalid credentials".to_string(),
            ),
            AuthError::TokenRevoked => (
                StatusCode::UNAUTHORIZED,
                "The token has been invalidated".to_string(),
            ),
            AuthError::WrongTokenType { .. } => (
                StatusCode::UNAUTHORIZED,
                "The token is not valid for this operation".to_string(),
            ),
            AuthError::MalformedToken
            | AuthError::TokenExpired
            | AuthError::SignatureMismatch
            | AuthError::InvalidClaims(_)
            | AuthError::MissingSubject
            | AuthError::InvalidSubject => (
                StatusCode::UNAUTHORIZED,
                "The access token is invalid or expired".to_string(),
            ),
            AuthError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal error occurred".to_string(),
            ),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message,
            },
        };

        (status, Json(error_response)).into_response()
    }
}
