//! Token issuance, validation and revocation, plus signing key rotation.
//!
//! The service owns the [`KeyManager`] and the revocation set. All store
//! I/O happens here; the key manager only ever sees finished keys.

use crate::config::{TokenServiceConfig, VerificationScope};
use crate::crypto::{
    extract_jwt_kid, peek_expiry, sign_jwt, verify_jwt, Claims, TokenType,
    CLOCK_SKEW_LEEWAY_SECONDS, MAX_JWT_SIZE_BYTES,
};
use crate::errors::AuthError;
use crate::keys::{KeyManager, ManagedKey};
use crate::models::{Jwks, SigningKeyRecord};
use crate::observability::metrics::{
    record_key_rotation, record_token_issuance, record_token_revocation,
    record_token_validation, set_key_rotation_last_success, set_revoked_tokens,
};
use crate::observability::ErrorCategory;
use crate::repositories::KeyStore;
use crate::tasks::key_rotation::{spawn_key_rotation, RotationTaskHandle};
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tracing::instrument;

/// Identifier a freshly generated key carries until the store assigns one.
const PENDING_KEY_ID: &str = "pending";

/// Assumed remaining lifetime of a revoked token whose `exp` is unreadable.
const UNREADABLE_REVOCATION_TTL_DAYS: i64 = 30;

/// Result of one rotation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOutcome {
    /// A new key was generated, stored and made current.
    Rotated { key_id: String },
    /// The active key is not close to expiry.
    NotNeeded,
    /// The store has no active key; the next issuance will create one.
    NoActiveKey,
}

impl RotationOutcome {
    fn as_metric_label(&self) -> &'static str {
        match self {
            RotationOutcome::Rotated { .. } => "rotated",
            RotationOutcome::NotNeeded => "not_needed",
            RotationOutcome::NoActiveKey => "no_active_key",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RevokedToken {
    revoked_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

pub struct TokenService {
    store: Arc<dyn KeyStore>,
    keys: KeyManager,
    config: TokenServiceConfig,
    revoked: RwLock<HashMap<String, RevokedToken>>,
    /// Serializes key generation and key set refreshes.
    rotation_lock: tokio::sync::Mutex<()>,
}

impl TokenService {
    /// Build the service from the store's current state.
    ///
    /// 1. Run a store-side rotation pass so a store holding only expired keys
    ///    heals itself (failures are logged).
    /// 2. List every valid key, newest first.
    /// 3. With none, generate one and persist it. If persisting fails the
    ///    process signs with an in-memory `ephemeral-<uuid>` key.
    /// 4. Otherwise sign with the newest and admit the rest for verification.
    ///
    /// Does not start the background task; see [`TokenService::start`].
    #[instrument(skip_all)]
    pub async fn initialize(
        store: Arc<dyn KeyStore>,
        config: TokenServiceConfig,
    ) -> Result<Self, AuthError> {
        match rotation_pass(store.as_ref(), &config).await {
            Ok(RotationCheck::Due) => {
                if let Err(e) = generate_and_persist(store.as_ref()).await {
                    tracing::error!(target: "auth.token", error = %e, "Startup key rotation failed");
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(target: "auth.token", error = %e, "Startup key rotation failed");
            }
        }

        let records = store.list_valid_signing_keys().await.map_err(|e| {
            tracing::error!(target: "auth.token", error = %e, "Failed to query signing keys");
            e
        })?;

        tracing::debug!(target: "auth.token", count = records.len(), "Found valid signing keys");

        let keys = match records.split_first() {
            None => {
                tracing::info!(target: "auth.token", "No valid signing keys found, generating new one");
                initial_key_manager(store.as_ref()).await?
            }
            Some((newest, rest)) => key_manager_from_records(newest, rest)?,
        };

        Ok(Self {
            store,
            keys,
            config,
            revoked: RwLock::new(HashMap::new()),
            rotation_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Initialize and start the background rotation task.
    pub async fn start(
        store: Arc<dyn KeyStore>,
        config: TokenServiceConfig,
    ) -> Result<(Arc<Self>, RotationTaskHandle), AuthError> {
        let interval = config.rotation_interval;
        let service = Arc::new(Self::initialize(store, config).await?);
        let handle = spawn_key_rotation(Arc::clone(&service), interval);
        Ok((service, handle))
    }

    pub fn key_manager(&self) -> &KeyManager {
        &self.keys
    }

    /// Public verification key set for the JWKS endpoint.
    pub fn jwks(&self) -> Jwks {
        self.keys.public_key_set()
    }

    pub fn config(&self) -> &TokenServiceConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Issuance
    // ------------------------------------------------------------------

    /// Issue a signed token for `user_id`.
    ///
    /// Before signing, checks whether the store's active key expires within
    /// the rotation lookahead and rotates if so. That check is best effort:
    /// any failure is logged and the token is signed with the current key.
    #[instrument(skip_all, fields(token_type = %token_type))]
    pub async fn create_token(
        &self,
        user_id: i64,
        token_type: TokenType,
        duration: chrono::Duration,
    ) -> Result<String, AuthError> {
        let start = Instant::now();

        let result = match Claims::new(
            &self.config.issuer,
            user_id,
            token_type,
            Utc::now(),
            duration,
        ) {
            Ok(claims) => {
                self.ensure_fresh_signing_key().await;
                let key = self.keys.current_signing_key();
                sign_jwt(&claims, key.encoding_key(), key.kid())
            }
            Err(e) => Err(e),
        };

        let status = if result.is_ok() { "success" } else { "error" };
        record_token_issuance(token_type.as_str(), status, start.elapsed());

        if let Err(e) = &result {
            tracing::warn!(target: "auth.token", error = %e, "Token issuance failed");
        }
        result
    }

    async fn ensure_fresh_signing_key(&self) {
        match self.store.get_active_signing_key().await {
            Ok(Some(active)) if !self.expires_within_lookahead(&active) => {}
            Ok(Some(active)) => {
                tracing::info!(
                    target: "auth.token",
                    key_id = active.id,
                    expires_at = %active.expires_at,
                    "Signing key approaching expiry, generating new one"
                );
                self.rotate_before_issuance().await;
            }
            Ok(None) => {
                tracing::info!(target: "auth.token", "No active signing key in store, generating new one");
                self.rotate_before_issuance().await;
            }
            Err(e) => {
                tracing::warn!(target: "auth.token", error = %e, "Failed to check signing key, continuing with in-memory key");
            }
        }
    }

    fn expires_within_lookahead(&self, record: &SigningKeyRecord) -> bool {
        record.expires_at - Utc::now() < self.config.rotation_lookahead
    }

    async fn rotate_before_issuance(&self) {
        if let Err(e) = self.generate_and_install().await {
            tracing::error!(
                target: "auth.token",
                error = %e,
                "Failed to generate new key, continuing with existing key"
            );
        }
    }

    /// Generate, persist and install a new signing key unless another caller
    /// already replaced the stale one. Returns the new key id, or `None` when
    /// the store's active key turned out to be fresh.
    ///
    /// The active key is re-read under `rotation_lock`, so a burst of
    /// concurrent callers produces one key.
    async fn generate_and_install(&self) -> Result<Option<String>, AuthError> {
        let _guard = self.rotation_lock.lock().await;

        if let Some(active) = self.store.get_active_signing_key().await? {
            if !self.expires_within_lookahead(&active) {
                tracing::debug!(
                    target: "auth.token",
                    key_id = active.id,
                    "Active key already replaced"
                );
                return Ok(None);
            }
        }

        let key = generate_and_persist(self.store.as_ref()).await?;
        let installed = self.keys.install(key);
        Ok(Some(installed.kid().to_string()))
    }

    /// Drop held verification keys the store no longer lists as valid. The
    /// current signing key is always kept. A failed listing keeps every key.
    async fn drop_unlisted_keys(&self) {
        let _guard = self.rotation_lock.lock().await;

        let records = match self.store.list_valid_signing_keys().await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(target: "auth.token", error = %e, "Failed to refresh signing keys");
                return;
            }
        };

        let valid: HashSet<String> = records.iter().map(|r| r.id.to_string()).collect();
        let removed = self.keys.retain_keys(|kid| valid.contains(kid));
        if removed > 0 {
            tracing::info!(
                target: "auth.token",
                removed,
                remaining = self.keys.len(),
                "Dropped signing keys no longer valid in store"
            );
        }
    }

    pub async fn create_access_token(&self, user_id: i64) -> Result<String, AuthError> {
        self.create_token(user_id, TokenType::Access, TokenType::Access.default_lifetime())
            .await
    }

    pub async fn create_refresh_token(&self, user_id: i64) -> Result<String, AuthError> {
        self.create_token(user_id, TokenType::Refresh, TokenType::Refresh.default_lifetime())
            .await
    }

    pub async fn create_reset_token(&self, user_id: i64) -> Result<String, AuthError> {
        self.create_token(user_id, TokenType::Reset, TokenType::Reset.default_lifetime())
            .await
    }

    // ------------------------------------------------------------------
    // Validation and revocation
    // ------------------------------------------------------------------

    /// Validate a token of `expected` type and return its user id.
    ///
    /// Checks, in order: revocation, size, signature with expiry and issuer,
    /// `type` claim, numeric subject.
    #[instrument(skip_all, fields(expected_type = %expected))]
    pub fn validate_token(&self, token: &str, expected: TokenType) -> Result<i64, AuthError> {
        let result = self.validate_inner(token, expected);

        match &result {
            Ok(_) => record_token_validation("success", None),
            Err(e) => {
                tracing::debug!(target: "auth.token", error = %e, "Token rejected");
                record_token_validation("error", Some(ErrorCategory::from(e).as_str()));
            }
        }
        result
    }

    fn validate_inner(&self, token: &str, expected: TokenType) -> Result<i64, AuthError> {
        if let Some(entry) = self.read_revoked().get(token) {
            tracing::debug!(target: "auth.token", revoked_at = %entry.revoked_at, "Token was invalidated");
            return Err(AuthError::TokenRevoked);
        }

        if token.len() > MAX_JWT_SIZE_BYTES {
            return Err(AuthError::MalformedToken);
        }

        let key = self.verification_key(token)?;
        let claims = verify_jwt(token, key.decoding_key(), &self.config.issuer)?;

        if claims.token_type.as_deref() != Some(expected.as_str()) {
            return Err(AuthError::WrongTokenType {
                expected: expected.as_str().to_string(),
                actual: claims.token_type,
            });
        }

        let subject = claims
            .sub
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::MissingSubject)?;

        subject.parse::<i64>().map_err(|_| AuthError::InvalidSubject)
    }

    fn verification_key(&self, token: &str) -> Result<Arc<ManagedKey>, AuthError> {
        match self.config.verification_scope {
            VerificationScope::SigningKeyOnly => Ok(self.keys.current_signing_key()),
            VerificationScope::AllKeys => match extract_jwt_kid(token) {
                Some(kid) => self.keys.find_key(&kid).ok_or_else(|| {
                    tracing::debug!(target: "auth.token", key_id = %kid, "Token signed by unknown key");
                    AuthError::SignatureMismatch
                }),
                None => Ok(self.keys.current_signing_key()),
            },
        }
    }

    pub fn validate_access_token(&self, token: &str) -> Result<i64, AuthError> {
        self.validate_token(token, TokenType::Access)
    }

    pub fn validate_refresh_token(&self, token: &str) -> Result<i64, AuthError> {
        self.validate_token(token, TokenType::Refresh)
    }

    pub fn validate_reset_token(&self, token: &str) -> Result<i64, AuthError> {
        self.validate_token(token, TokenType::Reset)
    }

    fn read_revoked(&self) -> RwLockReadGuard<'_, HashMap<String, RevokedToken>> {
        self.revoked
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_revoked(&self) -> RwLockWriteGuard<'_, HashMap<String, RevokedToken>> {
        self.revoked
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Revoke a token string. It is rejected from now on, whatever its
    /// signature or expiry.
    #[instrument(skip_all)]
    pub fn invalidate_token(&self, token: &str) {
        let now = Utc::now();
        let expires_at = peek_expiry(token)
            .unwrap_or_else(|| now + chrono::Duration::days(UNREADABLE_REVOCATION_TTL_DAYS));

        let count = {
            let mut revoked = self.write_revoked();
            revoked.insert(
                token.to_string(),
                RevokedToken {
                    revoked_at: now,
                    expires_at,
                },
            );
            revoked.len()
        };

        record_token_revocation();
        set_revoked_tokens(count);
        tracing::debug!(target: "auth.token", revoked_count = count, "Token invalidated");
    }

    /// Drop revocation entries for tokens that can no longer pass expiry
    /// checks anyway. Returns the number removed.
    pub fn prune_revocations(&self, now: DateTime<Utc>) -> usize {
        let grace = chrono::Duration::seconds(CLOCK_SKEW_LEEWAY_SECONDS as i64);

        let (removed, remaining) = {
            let mut revoked = self.write_revoked();
            let before = revoked.len();
            revoked.retain(|_, entry| entry.expires_at + grace > now);
            (before - revoked.len(), revoked.len())
        };

        set_revoked_tokens(remaining);
        if removed > 0 {
            tracing::debug!(target: "auth.token", removed, remaining, "Pruned expired revocations");
        }
        removed
    }

    pub fn revoked_count(&self) -> usize {
        self.read_revoked().len()
    }

    // ------------------------------------------------------------------
    // Rotation
    // ------------------------------------------------------------------

    /// One rotation pass: mark expired keys inactive, delete old inactive
    /// keys, then rotate if the active key expires within the lookahead.
    ///
    /// The first two steps are best effort. A failure to fetch the active
    /// key or to store a new one ends the pass with an error. A successful
    /// pass finishes by dropping held keys the store no longer lists.
    #[instrument(skip_all)]
    pub async fn rotate(&self) -> Result<RotationOutcome, AuthError> {
        let result = match rotation_pass(self.store.as_ref(), &self.config).await {
            Ok(RotationCheck::NoActiveKey) => Ok(RotationOutcome::NoActiveKey),
            Ok(RotationCheck::NotDue) => Ok(RotationOutcome::NotNeeded),
            Ok(RotationCheck::Due) => {
                tracing::info!(target: "auth.token", "Rotating signing key");
                self.generate_and_install()
                    .await
                    .map(|rotated| match rotated {
                        Some(key_id) => RotationOutcome::Rotated { key_id },
                        None => RotationOutcome::NotNeeded,
                    })
            }
            Err(e) => Err(e),
        };

        if result.is_ok() {
            self.drop_unlisted_keys().await;
        }

        match &result {
            Ok(outcome) => {
                record_key_rotation(outcome.as_metric_label());
                set_key_rotation_last_success(Utc::now().timestamp() as f64);
            }
            Err(_) => record_key_rotation("error"),
        }
        result
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RotationCheck {
    NoActiveKey,
    NotDue,
    Due,
}

/// Store-side steps of a rotation pass, shared by startup and the timer.
async fn rotation_pass(
    store: &dyn KeyStore,
    config: &TokenServiceConfig,
) -> Result<RotationCheck, AuthError> {
    match store.mark_expired_keys_inactive().await {
        Ok(count) if count > 0 => {
            tracing::info!(target: "auth.token", count, "Marked expired signing keys inactive");
        }
        Ok(_) => {}
        Err(e) => {
            tracing::error!(target: "auth.token", error = %e, "Failed to mark expired keys inactive");
        }
    }

    match store.delete_inactive_keys(config.key_retention).await {
        Ok(count) if count > 0 => {
            tracing::info!(
                target: "auth.token",
                count,
                retention_days = config.key_retention.num_days(),
                "Deleted old inactive signing keys"
            );
        }
        Ok(_) => {}
        Err(e) => {
            tracing::error!(target: "auth.token", error = %e, "Failed to delete old keys");
        }
    }

    let Some(active) = store.get_active_signing_key().await? else {
        tracing::debug!(target: "auth.token", "No active signing key found");
        return Ok(RotationCheck::NoActiveKey);
    };

    if active.expires_at - Utc::now() < config.rotation_lookahead {
        Ok(RotationCheck::Due)
    } else {
        Ok(RotationCheck::NotDue)
    }
}

async fn generate_key(kid: String) -> Result<ManagedKey, AuthError> {
    tokio::task::spawn_blocking(move || ManagedKey::generate(kid))
        .await
        .map_err(|e| AuthError::KeyGeneration(format!("Key generation task failed: {}", e)))?
}

/// Generate a key, store it as the active key, and tag it with its new id.
async fn generate_and_persist(store: &dyn KeyStore) -> Result<ManagedKey, AuthError> {
    let key = generate_key(PENDING_KEY_ID.to_string()).await?;
    let pem = key.to_pkcs8_pem()?;
    let id = store.create_signing_key(pem.expose_secret()).await?;

    tracing::info!(target: "auth.token", key_id = id, "Stored new signing key");
    Ok(key.with_kid(id.to_string()))
}

/// Key manager for a store with no valid keys.
async fn initial_key_manager(store: &dyn KeyStore) -> Result<KeyManager, AuthError> {
    let key = generate_key(PENDING_KEY_ID.to_string()).await?;

    let persisted = match key.to_pkcs8_pem() {
        Ok(pem) => store.create_signing_key(pem.expose_secret()).await,
        Err(e) => Err(e),
    };

    let key = match persisted {
        Ok(id) => {
            tracing::info!(target: "auth.token", key_id = id, "Stored new signing key");
            key.with_kid(id.to_string())
        }
        Err(e) => {
            let kid = format!("ephemeral-{}", uuid::Uuid::new_v4());
            tracing::warn!(
                target: "auth.token",
                error = %e,
                key_id = %kid,
                "Failed to persist signing key, using in-memory key"
            );
            key.with_kid(kid)
        }
    };

    Ok(KeyManager::from_key(key))
}

/// Sign with the newest record; admit the rest for verification.
fn key_manager_from_records(
    newest: &SigningKeyRecord,
    rest: &[SigningKeyRecord],
) -> Result<KeyManager, AuthError> {
    let manager = KeyManager::from_serialized(&newest.key_data, newest.id.to_string())?;

    for record in rest {
        tracing::debug!(target: "auth.token", key_id = record.id, "Adding additional key");

        let added = ManagedKey::from_pkcs8_pem(&record.key_data, record.id.to_string())
            .and_then(|key| manager.add_key(key));
        if let Err(e) = added {
            tracing::error!(target: "auth.token", key_id = record.id, error = %e, "Failed to add stored key");
        }
    }

    tracing::debug!(
        target: "auth.token",
        current_key_id = newest.id,
        keys_count = manager.len(),
        "Initialized key manager"
    );
    Ok(manager)
}
