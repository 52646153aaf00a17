//! Argon2id password hashing.
//!
//! Hashes are stored in PHC string format:
//! `$argon2id$v=19$m=65536,t=1,p=4$<salt>$<hash>`. Verification re-derives
//! the hash with the parameters embedded in the string and compares in
//! constant time.

use crate::crypto::generate_random_bytes;
use crate::errors::AuthError;
use argon2::password_hash::{
    Error as PasswordHashError, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::{Algorithm, Argon2, Params, Version};
use tracing::instrument;

const SALT_LEN: usize = 16;

/// Number of `$`-separated segments in an encoded hash (leading empty one
/// included).
const ENCODED_SEGMENTS: usize = 6;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordConfig {
    pub time_cost: u32,
    /// Memory cost in KiB.
    pub memory_cost: u32,
    pub parallelism: u32,
    pub output_len: usize,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            time_cost: 1,
            memory_cost: 64 * 1024,
            parallelism: 4,
            output_len: 32,
        }
    }
}

/// Hash a password with Argon2id and a fresh random salt.
///
/// `None` uses [`PasswordConfig::default`].
#[instrument(skip_all)]
pub fn hash_password(password: &str, config: Option<&PasswordConfig>) -> Result<String, AuthError> {
    let config = config.copied().unwrap_or_default();

    let params = Params::new(
        config.memory_cost,
        config.time_cost,
        config.parallelism,
        Some(config.output_len),
    )
    .map_err(|e| AuthError::Crypto(format!("Invalid Argon2 parameters: {}", e)))?;

    let salt_bytes = generate_random_bytes(SALT_LEN)?;
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AuthError::Crypto(format!("Salt encoding failed: {}", e)))?;

    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Crypto(format!("Password hashing failed: {}", e)))
}

/// Check a password against an encoded hash.
///
/// Returns `Ok(false)` on mismatch and `PasswordHashFormat` when the encoded
/// string cannot be parsed.
#[instrument(skip_all)]
pub fn verify_password(password: &str, encoded_hash: &str) -> Result<bool, AuthError> {
    if encoded_hash.split('$').count() != ENCODED_SEGMENTS {
        return Err(AuthError::PasswordHashFormat);
    }

    let parsed = PasswordHash::new(encoded_hash).map_err(|e| {
        tracing::debug!(target: "auth.crypto", error = %e, "Unparseable password hash");
        AuthError::PasswordHashFormat
    })?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(PasswordHashError::Password) => Ok(false),
        Err(e) => {
            tracing::debug!(target: "auth.crypto", error = %e, "Password hash parameters rejected");
            Err(AuthError::PasswordHashFormat)
        }
    }
}
