//! Custom test assertions for expressive tests
//!
//! Inspect the unverified header and payload of a token string. Signature
//! checks belong to the service under test.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct JwtHeader {
    pub alg: String,
    pub typ: String,
    #[serde(default)]
    pub kid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwtClaims {
    pub iss: String,
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(rename = "type")]
    pub token_type: String,
}

fn segment(token: &str, index: usize) -> Vec<u8> {
    let part = token
        .split('.')
        .nth(index)
        .unwrap_or_else(|| panic!("JWT has no segment {}", index));
    URL_SAFE_NO_PAD
        .decode(part)
        .unwrap_or_else(|e| panic!("Failed to base64 decode JWT segment {}: {}", index, e))
}

fn header(token: &str) -> JwtHeader {
    serde_json::from_slice(&segment(token, 0)).expect("Failed to parse JWT header")
}

fn claims(token: &str) -> JwtClaims {
    serde_json::from_slice(&segment(token, 1)).expect("Failed to parse JWT claims")
}

/// Custom assertions for issued tokens
///
/// # Example
/// ```rust,ignore
/// token
///     .assert_valid_jwt()
///     .assert_token_type("access")
///     .assert_for_user(42)
///     .assert_signed_by("3");
/// ```
pub trait TokenAssertions {
    /// Assert the token is a well-formed RS256 JWT with the expected claims
    fn assert_valid_jwt(&self) -> &Self;

    /// Assert the `type` claim
    fn assert_token_type(&self, token_type: &str) -> &Self;

    /// Assert the `kid` header
    fn assert_signed_by(&self, key_id: &str) -> &Self;

    /// Assert the token expires within 5 seconds of `seconds` from now
    fn assert_expires_in(&self, seconds: u64) -> &Self;

    /// Assert the subject is the given user id
    fn assert_for_user(&self, user_id: i64) -> &Self;

    fn assert_issued_by(&self, issuer: &str) -> &Self;
}

impl TokenAssertions for String {
    fn assert_valid_jwt(&self) -> &Self {
        let parts = self.split('.').count();
        assert_eq!(
            parts, 3,
            "JWT must have 3 parts (header.payload.signature), got {}",
            parts
        );

        let header = header(self);
        assert_eq!(header.alg, "RS256", "Expected RS256 algorithm");
        assert_eq!(header.typ, "JWT", "Expected JWT type");
        assert!(header.kid.is_some(), "Expected a kid header");

        let claims = claims(self);
        assert!(claims.exp > claims.iat, "exp must be after iat");

        self
    }

    fn assert_token_type(&self, token_type: &str) -> &Self {
        let claims = claims(self);
        assert_eq!(
            claims.token_type, token_type,
            "Expected token type '{}', got '{}'",
            token_type, claims.token_type
        );
        self
    }

    fn assert_signed_by(&self, key_id: &str) -> &Self {
        let header = header(self);
        assert_eq!(
            header.kid.as_deref(),
            Some(key_id),
            "Expected key_id '{}', got {:?}",
            key_id,
            header.kid
        );
        self
    }

    fn assert_expires_in(&self, seconds: u64) -> &Self {
        let claims = claims(self);
        let expires_in = claims.exp - chrono::Utc::now().timestamp();

        assert!(
            (expires_in - seconds as i64).abs() <= 5,
            "Expected token to expire in {} seconds, but expires in {} seconds",
            seconds,
            expires_in
        );
        self
    }

    fn assert_for_user(&self, user_id: i64) -> &Self {
        let claims = claims(self);
        assert_eq!(
            claims.sub,
            user_id.to_string(),
            "Expected subject '{}', got '{}'",
            user_id,
            claims.sub
        );
        self
    }

    fn assert_issued_by(&self, issuer: &str) -> &Self {
        let claims = claims(self);
        assert_eq!(claims.iss, issuer, "Unexpected issuer");
        self
    }
}
