//! Observability for the auth service.
//!
//! # Privacy by Default
//!
//! Operations on tokens, keys and passwords use `#[instrument(skip_all)]`
//! and log an explicit allow-list of fields:
//! - **SAFE**: plaintext (token types, key ids, counts, outcomes)
//! - **HASHED**: SHA-256 truncated for correlation (email)
//! - **NEVER**: tokens, passwords, key material, user subjects in claims

pub mod metrics;

use crate::errors::AuthError;
use sha2::{Digest, Sha256};

/// Hash a field value for correlation in logs (SHA-256, first 8 hex chars)
///
/// Not suitable for secrets; only for identifiers that need correlating
/// across log lines without being stored in plaintext.
pub fn hash_for_correlation(value: &str) -> String {
    let result = Sha256::digest(value.as_bytes());
    hex::encode(result.get(..4).unwrap_or_default())
}

/// Error categories for metrics labels (bounded cardinality)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad credentials
    Authentication,
    /// Rejected token (expired, revoked, bad signature, wrong type)
    Cryptographic,
    /// Store or system failure
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Cryptographic => "cryptographic",
            ErrorCategory::Internal => "internal",
        }
    }
}

impl From<&AuthError> for ErrorCategory {
    fn from(err: &AuthError) -> Self {
        if err.is_token_rejection() {
            ErrorCategory::Cryptographic
        } else if matches!(err, AuthError::InvalidCredentials) {
            ErrorCategory::Authentication
        } else {
            ErrorCategory::Internal
        }
    }
}
