//! Persistence for signing keys and users.
//!
//! Services depend on the [`KeyStore`] and [`UserStore`] traits only. The
//! Postgres adapters back the production binary; [`memory::MemoryStore`]
//! backs tests and database-less runs.

pub mod memory;
pub mod signing_keys;
pub mod users;

use crate::errors::AuthError;
use crate::models::{SigningKeyRecord, User};
use chrono::{DateTime, Utc};

pub use memory::MemoryStore;
pub use signing_keys::PgKeyStore;
pub use users::PgUserStore;

/// Signing key queries used by the token service.
#[async_trait::async_trait]
pub trait KeyStore: Send + Sync {
    /// Every key that has not yet expired, newest first.
    async fn list_valid_signing_keys(&self) -> Result<Vec<SigningKeyRecord>, AuthError>;

    /// The newest active, unexpired key. `None` is not an error.
    async fn get_active_signing_key(&self) -> Result<Option<SigningKeyRecord>, AuthError>;

    /// Store new key material as the active key, deactivating the previous
    /// one. Returns the assigned identifier.
    async fn create_signing_key(&self, key_data: &str) -> Result<i64, AuthError>;

    /// Mark every expired key inactive. Returns the number of keys changed.
    async fn mark_expired_keys_inactive(&self) -> Result<u64, AuthError>;

    /// Delete inactive, expired keys deactivated more than `retention` ago.
    async fn delete_inactive_keys(&self, retention: chrono::Duration) -> Result<u64, AuthError>;
}

/// User queries used by the session flow.
#[async_trait::async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user_by_id(&self, user_id: i64) -> Result<Option<User>, AuthError>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, AuthError>;

    async fn update_last_login(&self, user_id: i64, at: DateTime<Utc>) -> Result<(), AuthError>;
}
