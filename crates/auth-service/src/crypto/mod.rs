//! Token claims and the JWT signing/verification primitives.
//!
//! Everything here is stateless; key selection and revocation live in
//! [`crate::services::token_service`].

pub mod password;

use crate::errors::AuthError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::instrument;

/// Maximum accepted JWT size in bytes (8KB).
///
/// Checked before any decoding. An RS256 token with our claims is well
/// under 1KB.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Clock skew tolerated when checking `exp`.
pub const CLOCK_SKEW_LEEWAY_SECONDS: u64 = 60;

/// Signing algorithm for every token this service issues.
pub const SIGNING_ALGORITHM: Algorithm = Algorithm::RS256;

/// The three kinds of token the service issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    Access,
    Refresh,
    Reset,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
            TokenType::Reset => "reset",
        }
    }

    /// Lifetime used by the named convenience wrappers.
    pub fn default_lifetime(&self) -> chrono::Duration {
        match self {
            TokenType::Access => chrono::Duration::hours(24),
            TokenType::Refresh => chrono::Duration::days(30),
            TokenType::Reset => chrono::Duration::hours(24),
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenType {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access" => Ok(TokenType::Access),
            "refresh" => Ok(TokenType::Refresh),
            "reset" => Ok(TokenType::Reset),
            other => Err(AuthError::InvalidClaims(format!(
                "unknown token type '{}'",
                other
            ))),
        }
    }
}

/// JWT claim set.
///
/// `sub` is the user id as a decimal string. It is optional on the wire so a
/// token without one decodes and is rejected as `MissingSubject` rather than
/// as a malformed token.
#[derive(Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub iss: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    pub iat: i64,
    pub exp: i64,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl Claims {
    /// Build the claim set for a new token issued at `now`.
    pub fn new(
        issuer: &str,
        user_id: i64,
        token_type: TokenType,
        now: DateTime<Utc>,
        duration: chrono::Duration,
    ) -> Result<Self, AuthError> {
        if duration <= chrono::Duration::zero() {
            return Err(AuthError::TokenBuild(format!(
                "token duration must be positive, got {}s",
                duration.num_seconds()
            )));
        }

        let expires_at = now
            .checked_add_signed(duration)
            .ok_or_else(|| AuthError::TokenBuild("token expiry overflows".to_string()))?;

        Ok(Self {
            iss: issuer.to_string(),
            sub: Some(user_id.to_string()),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            token_type: Some(token_type.as_str().to_string()),
        })
    }
}

impl fmt::Debug for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claims")
            .field("iss", &self.iss)
            .field("sub", &"[REDACTED]")
            .field("iat", &self.iat)
            .field("exp", &self.exp)
            .field("type", &self.token_type)
            .finish()
    }
}

/// Sign claims with an RSA private key, stamping `kid` into the header.
#[instrument(skip_all)]
pub fn sign_jwt(
    claims: &Claims,
    encoding_key: &EncodingKey,
    key_id: &str,
) -> Result<String, AuthError> {
    let mut header = Header::new(SIGNING_ALGORITHM);
    header.typ = Some("JWT".to_string());
    header.kid = Some(key_id.to_string());

    encode(&header, claims, encoding_key)
        .map_err(|e| AuthError::TokenSigning(format!("JWT signing operation failed: {}", e)))
}

/// Verify signature, issuer and expiry in one step.
///
/// The token size is checked before any parsing.
#[instrument(skip_all)]
pub fn verify_jwt(
    token: &str,
    decoding_key: &DecodingKey,
    issuer: &str,
) -> Result<Claims, AuthError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "auth.crypto",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(AuthError::MalformedToken);
    }

    let mut validation = Validation::new(SIGNING_ALGORITHM);
    validation.validate_exp = true;
    validation.leeway = CLOCK_SKEW_LEEWAY_SECONDS;
    validation.set_issuer(&[issuer]);
    validation.set_required_spec_claims(&["exp", "iss"]);

    let token_data = decode::<Claims>(token, decoding_key, &validation).map_err(|e| {
        tracing::debug!(target: "auth.crypto", error = %e, "Token verification failed");
        map_jwt_error(e.kind())
    })?;

    Ok(token_data.claims)
}

fn map_jwt_error(kind: &ErrorKind) -> AuthError {
    match kind {
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        ErrorKind::InvalidSignature => AuthError::SignatureMismatch,
        ErrorKind::InvalidIssuer => AuthError::InvalidClaims("unexpected issuer".to_string()),
        ErrorKind::ImmatureSignature => {
            AuthError::InvalidClaims("token not yet valid".to_string())
        }
        ErrorKind::MissingRequiredClaim(claim) => {
            AuthError::InvalidClaims(format!("missing required claim '{}'", claim))
        }
        _ => AuthError::MalformedToken,
    }
}

/// Split a compact JWT and decode one of its JSON segments without
/// verifying anything.
fn decode_segment(token: &str, index: usize) -> Option<serde_json::Value> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        return None;
    }

    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(parts.get(index)?).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Extract the `kid` from a JWT header without verifying the signature.
///
/// Only used to choose a verification key; the token must still be verified.
pub fn extract_jwt_kid(token: &str) -> Option<String> {
    decode_segment(token, 0)?
        .get("kid")?
        .as_str()
        .map(|s| s.to_string())
}

/// Read `exp` from an unverified payload.
pub fn peek_expiry(token: &str) -> Option<DateTime<Utc>> {
    let exp = decode_segment(token, 1)?.get("exp")?.as_i64()?;
    DateTime::from_timestamp(exp, 0)
}

/// Generate cryptographically secure random bytes
pub fn generate_random_bytes(len: usize) -> Result<Vec<u8>, AuthError> {
    let rng = SystemRandom::new();
    let mut bytes = vec![0u8; len];
    rng.fill(&mut bytes)
        .map_err(|e| AuthError::Crypto(format!("Random bytes generation failed: {}", e)))?;
    Ok(bytes)
}
