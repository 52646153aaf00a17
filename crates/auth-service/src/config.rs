use argon2::password_hash::PasswordHash;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default key rotation check interval (12 hours).
pub const DEFAULT_KEY_ROTATION_INTERVAL_SECONDS: u64 = 12 * 60 * 60;

/// Default lookahead before key expiry at which a new key is generated (24 hours).
pub const DEFAULT_KEY_ROTATION_LOOKAHEAD_SECONDS: u64 = 24 * 60 * 60;

/// Default lifetime assigned to newly stored signing keys.
pub const DEFAULT_KEY_VALIDITY_DAYS: i64 = 90;

/// Default retention for inactive signing keys before deletion.
pub const DEFAULT_KEY_RETENTION_DAYS: i64 = 60;

pub const DEFAULT_TOKEN_ISSUER: &str = "toolmin";

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Which held keys may verify a presented token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationScope {
    /// Only the current signing key. Tokens signed by a rotated-out key are
    /// rejected even though the key is still published.
    SigningKeyOnly,
    /// Any key the manager holds, selected by the token's `kid` header.
    AllKeys,
}

impl FromStr for VerificationScope {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signing-key" => Ok(VerificationScope::SigningKeyOnly),
            "all-keys" => Ok(VerificationScope::AllKeys),
            other => Err(ConfigError::InvalidValue {
                var: "TOKEN_VERIFICATION_SCOPE".to_string(),
                reason: format!("unknown scope '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Settings consumed by the token service and its rotation task.
#[derive(Debug, Clone)]
pub struct TokenServiceConfig {
    pub issuer: String,
    pub rotation_interval: Duration,
    pub rotation_lookahead: chrono::Duration,
    pub key_retention: chrono::Duration,
    pub verification_scope: VerificationScope,
}

impl Default for TokenServiceConfig {
    fn default() -> Self {
        Self {
            issuer: DEFAULT_TOKEN_ISSUER.to_string(),
            rotation_interval: Duration::from_secs(DEFAULT_KEY_ROTATION_INTERVAL_SECONDS),
            rotation_lookahead: chrono::Duration::seconds(
                DEFAULT_KEY_ROTATION_LOOKAHEAD_SECONDS as i64,
            ),
            key_retention: chrono::Duration::days(DEFAULT_KEY_RETENTION_DAYS),
            verification_scope: VerificationScope::AllKeys,
        }
    }
}

/// Account seeded into the in-memory store at startup.
#[derive(Clone, PartialEq, Eq)]
pub struct BootstrapAdmin {
    pub email: String,
    /// Argon2id PHC string, as produced by `hash_password`.
    pub password_hash: String,
}

impl std::fmt::Debug for BootstrapAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapAdmin")
            .field("email", &self.email)
            .field("password_hash", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres URL; `None` runs the service on the in-memory store.
    pub database_url: Option<String>,
    pub bind_address: String,
    pub key_validity: chrono::Duration,
    pub log_format: LogFormat,
    pub token: TokenServiceConfig,
    /// Only used without `DATABASE_URL`.
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue { var: String, reason: String },
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing)
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = vars
            .get("DATABASE_URL")
            .filter(|url| !url.is_empty())
            .cloned();

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let issuer = vars
            .get("TOKEN_ISSUER")
            .cloned()
            .unwrap_or_else(|| DEFAULT_TOKEN_ISSUER.to_string());

        let rotation_interval_seconds = parse_positive(
            vars,
            "KEY_ROTATION_INTERVAL_SECONDS",
            DEFAULT_KEY_ROTATION_INTERVAL_SECONDS,
        )?;
        let rotation_lookahead_seconds = parse_positive(
            vars,
            "KEY_ROTATION_LOOKAHEAD_SECONDS",
            DEFAULT_KEY_ROTATION_LOOKAHEAD_SECONDS,
        )?;
        let key_validity_days =
            parse_positive(vars, "KEY_VALIDITY_DAYS", DEFAULT_KEY_VALIDITY_DAYS as u64)?;
        let key_retention_days =
            parse_positive(vars, "KEY_RETENTION_DAYS", DEFAULT_KEY_RETENTION_DAYS as u64)?;

        let verification_scope = match vars.get("TOKEN_VERIFICATION_SCOPE") {
            Some(value) => value.parse()?,
            None => VerificationScope::AllKeys,
        };

        let log_format = match vars.get("LOG_FORMAT").map(String::as_str) {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    var: "LOG_FORMAT".to_string(),
                    reason: format!("unknown format '{}'", other),
                })
            }
        };

        let bootstrap_admin = parse_bootstrap_admin(vars)?;

        // Lookahead must leave room for at least one rotation check before expiry
        if rotation_lookahead_seconds / 86_400 >= key_validity_days {
            return Err(ConfigError::InvalidValue {
                var: "KEY_ROTATION_LOOKAHEAD_SECONDS".to_string(),
                reason: format!(
                    "lookahead of {}s is not shorter than key validity of {} days",
                    rotation_lookahead_seconds, key_validity_days
                ),
            });
        }

        Ok(Config {
            database_url,
            bind_address,
            key_validity: chrono::Duration::days(to_i64(
                "KEY_VALIDITY_DAYS",
                key_validity_days,
            )?),
            log_format,
            token: TokenServiceConfig {
                issuer,
                rotation_interval: Duration::from_secs(rotation_interval_seconds),
                rotation_lookahead: chrono::Duration::seconds(to_i64(
                    "KEY_ROTATION_LOOKAHEAD_SECONDS",
                    rotation_lookahead_seconds,
                )?),
                key_retention: chrono::Duration::days(to_i64(
                    "KEY_RETENTION_DAYS",
                    key_retention_days,
                )?),
                verification_scope,
            },
            bootstrap_admin,
        })
    }
}

fn parse_positive(
    vars: &HashMap<String, String>,
    var: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(raw) = vars.get(var) else {
        return Ok(default);
    };

    let value: u64 = raw.parse().map_err(|e| ConfigError::InvalidValue {
        var: var.to_string(),
        reason: format!("'{}' is not a number: {}", raw, e),
    })?;

    if value == 0 {
        return Err(ConfigError::InvalidValue {
            var: var.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }

    Ok(value)
}

fn parse_bootstrap_admin(
    vars: &HashMap<String, String>,
) -> Result<Option<BootstrapAdmin>, ConfigError> {
    let non_empty = |var: &str| vars.get(var).filter(|value| !value.is_empty()).cloned();

    match (
        non_empty("BOOTSTRAP_ADMIN_EMAIL"),
        non_empty("BOOTSTRAP_ADMIN_PASSWORD_HASH"),
    ) {
        (None, None) => Ok(None),
        (Some(email), Some(password_hash)) => {
            PasswordHash::new(&password_hash).map_err(|e| ConfigError::InvalidValue {
                var: "BOOTSTRAP_ADMIN_PASSWORD_HASH".to_string(),
                reason: format!("not a PHC password hash: {}", e),
            })?;
            Ok(Some(BootstrapAdmin {
                email,
                password_hash,
            }))
        }
        (Some(_), None) => Err(ConfigError::InvalidValue {
            var: "BOOTSTRAP_ADMIN_PASSWORD_HASH".to_string(),
            reason: "required when BOOTSTRAP_ADMIN_EMAIL is set".to_string(),
        }),
        (None, Some(_)) => Err(ConfigError::InvalidValue {
            var: "BOOTSTRAP_ADMIN_EMAIL".to_string(),
            reason: "required when BOOTSTRAP_ADMIN_PASSWORD_HASH is set".to_string(),
        }),
    }
}

fn to_i64(var: &str, value: u64) -> Result<i64, ConfigError> {
    i64::try_from(value).map_err(|_| ConfigError::InvalidValue {
        var: var.to_string(),
        reason: "value out of range".to_string(),
    })
}
