use crate::errors::AuthError;
use crate::models::SigningKeyRecord;
use crate::repositories::KeyStore;
use chrono::Utc;
use sqlx::PgPool;

/// Postgres-backed signing key store.
#[derive(Clone)]
pub struct PgKeyStore {
    pool: PgPool,
    key_validity: chrono::Duration,
}

impl PgKeyStore {
    /// `key_validity` is the lifetime assigned to newly created keys.
    pub fn new(pool: PgPool, key_validity: chrono::Duration) -> Self {
        Self { pool, key_validity }
    }
}

#[async_trait::async_trait]
impl KeyStore for PgKeyStore {
    async fn list_valid_signing_keys(&self) -> Result<Vec<SigningKeyRecord>, AuthError> {
        let keys = sqlx::query_as::<_, SigningKeyRecord>(
            r#"
            SELECT id, key_data, created_at, expires_at, is_active, deactivated_at
            FROM signing_keys
            WHERE expires_at > NOW()
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AuthError::Store(format!("Failed to list valid signing keys: {}", e)))?;

        Ok(keys)
    }

    async fn get_active_signing_key(&self) -> Result<Option<SigningKeyRecord>, AuthError> {
        let key = sqlx::query_as::<_, SigningKeyRecord>(
            r#"
            SELECT id, key_data, created_at, expires_at, is_active, deactivated_at
            FROM signing_keys
            WHERE is_active = true
                AND expires_at > NOW()
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AuthError::Store(format!("Failed to fetch active signing key: {}", e)))?;

        Ok(key)
    }

    async fn create_signing_key(&self, key_data: &str) -> Result<i64, AuthError> {
        let expires_at = Utc::now() + self.key_validity;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AuthError::Store(format!("Failed to start transaction: {}", e)))?;

        sqlx::query(
            r#"
            UPDATE signing_keys
            SET is_active = false, deactivated_at = NOW()
            WHERE is_active = true
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| AuthError::Store(format!("Failed to deactivate previous key: {}", e)))?;

        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO signing_keys (key_data, expires_at, is_active)
            VALUES ($1, $2, true)
            RETURNING id
            "#,
        )
        .bind(key_data)
        .bind(expires_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AuthError::Store(format!("Failed to create signing key: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| AuthError::Store(format!("Failed to commit signing key: {}", e)))?;

        Ok(id)
    }

    async fn mark_expired_keys_inactive(&self) -> Result<u64, AuthError> {
        let result = sqlx::query(
            r#"
            UPDATE signing_keys
            SET is_active = false, deactivated_at = COALESCE(deactivated_at, NOW())
            WHERE is_active = true
                AND expires_at <= NOW()
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AuthError::Store(format!("Failed to mark expired keys inactive: {}", e)))?;

        Ok(result.rows_affected())
    }

    async fn delete_inactive_keys(&self, retention: chrono::Duration) -> Result<u64, AuthError> {
        let cutoff = Utc::now() - retention;

        let result = sqlx::query(
            r#"
            DELETE FROM signing_keys
            WHERE is_active = false
                AND expires_at <= NOW()
                AND COALESCE(deactivated_at, expires_at) < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| AuthError::Store(format!("Failed to delete inactive keys: {}", e)))?;

        Ok(result.rows_affected())
    }
}
