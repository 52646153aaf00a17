//! Services wired over the in-memory store.

use auth_service::config::TokenServiceConfig;
use auth_service::crypto::password::{hash_password, PasswordConfig};
use auth_service::repositories::MemoryStore;
use auth_service::services::{SessionService, TokenService};
use std::sync::Arc;

pub const TEST_USER_EMAIL: &str = "admin@example.com";
pub const TEST_USER_PASSWORD: &str = "correct horse battery staple";
pub const TEST_USER_ROLE: &str = "admin";

/// Argon2 parameters cheap enough to hash many passwords per test.
pub fn test_password_config() -> PasswordConfig {
    PasswordConfig {
        time_cost: 1,
        memory_cost: 1024,
        parallelism: 1,
        output_len: 32,
    }
}

/// Token and session services sharing one [`MemoryStore`].
pub struct TestServices {
    pub store: Arc<MemoryStore>,
    pub tokens: Arc<TokenService>,
    pub sessions: Arc<SessionService>,
    /// Id of the seeded active user with [`TEST_USER_EMAIL`].
    pub user_id: i64,
}

impl TestServices {
    pub async fn new() -> Result<Self, anyhow::Error> {
        Self::with_config(TokenServiceConfig::default()).await
    }

    pub async fn with_config(config: TokenServiceConfig) -> Result<Self, anyhow::Error> {
        let store = Arc::new(MemoryStore::default());
        let user_id = seed_user(&store, TEST_USER_EMAIL, TEST_USER_PASSWORD, true)?;

        let tokens = Arc::new(TokenService::initialize(store.clone(), config).await?);
        let sessions = Arc::new(SessionService::with_password_config(
            tokens.clone(),
            store.clone(),
            &test_password_config(),
        )?);

        Ok(Self {
            store,
            tokens,
            sessions,
            user_id,
        })
    }
}

/// Insert a user with a freshly hashed password.
pub fn seed_user(
    store: &MemoryStore,
    email: &str,
    password: &str,
    is_active: bool,
) -> Result<i64, anyhow::Error> {
    let hash = hash_password(password, Some(&test_password_config()))?;
    Ok(store.insert_user(email, &hash, TEST_USER_ROLE, is_active))
}
