use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Persisted signing key (maps to signing_keys table)
///
/// `key_data` is the PKCS#8 PEM of the full RSA keypair.
#[derive(Clone, FromRow)]
pub struct SigningKeyRecord {
    pub id: i64,
    pub key_data: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for SigningKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyRecord")
            .field("id", &self.id)
            .field("key_data", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("is_active", &self.is_active)
            .field("deactivated_at", &self.deactivated_at)
            .finish()
    }
}

/// User account (maps to users table)
#[derive(Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("email", &"[REDACTED]")
            .field("password_hash", &"[REDACTED]")
            .field("role", &self.role)
            .field("is_active", &self.is_active)
            .field("last_login", &self.last_login)
            .finish()
    }
}

/// Authenticated caller of one request.
///
/// Built by the bearer-auth middleware and passed to handlers as an
/// extension.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user: User,
    /// The raw access token the request presented.
    pub token: SecretString,
}

/// JWKS response (RFC 7517)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<JsonWebKey>,
}

/// RSA JSON Web Key (RFC 7517, RFC 7518 section 6.3)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonWebKey {
    pub kid: String,
    pub kty: String, // "RSA"
    pub alg: String, // "RS256"
    #[serde(rename = "use")]
    pub use_: String,
    pub n: String, // Modulus (base64url, no padding)
    pub e: String, // Exponent (base64url, no padding)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhoAmIResponse {
    pub user_id: i64,
    pub email: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login: Option<String>,
}

impl From<&User> for WhoAmIResponse {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            role: user.role.clone(),
            last_login: user.last_login.map(|t| t.to_rfc3339()),
        }
    }
}
