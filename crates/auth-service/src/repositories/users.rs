//! User lookups for the session flow.

use crate::errors::AuthError;
use crate::models::User;
use crate::repositories::UserStore;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Postgres-backed user store.
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UserStore for PgUserStore {
    async fn get_user_by_id(&self, user_id: i64) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, role, is_active, last_login
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AuthError::Store(format!("Failed to fetch user by id: {}", e)))?;

        Ok(user)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, role, is_active, last_login
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AuthError::Store(format!("Failed to fetch user by email: {}", e)))?;

        Ok(user)
    }

    async fn update_last_login(&self, user_id: i64, at: DateTime<Utc>) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            UPDATE users
            SET last_login = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| AuthError::Store(format!("Failed to update last login: {}", e)))?;

        Ok(())
    }
}
