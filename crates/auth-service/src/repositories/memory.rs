//! In-process store with the same semantics as the Postgres adapters.
//!
//! Used by tests (with fault injection) and by the binary when no
//! `DATABASE_URL` is configured. Nothing survives a restart.

use crate::config::{BootstrapAdmin, DEFAULT_KEY_VALIDITY_DAYS};
use crate::errors::AuthError;
use crate::models::{SigningKeyRecord, User};
use crate::repositories::{KeyStore, UserStore};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

/// Role given to the bootstrap account.
pub const BOOTSTRAP_ADMIN_ROLE: &str = "admin";

/// Store operations that can be made to fail in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    ListValidKeys,
    GetActiveKey,
    CreateKey,
    MarkExpired,
    DeleteInactive,
    GetUser,
    UpdateLastLogin,
}

impl StoreOperation {
    fn description(&self) -> &'static str {
        match self {
            StoreOperation::ListValidKeys => "list valid signing keys",
            StoreOperation::GetActiveKey => "fetch active signing key",
            StoreOperation::CreateKey => "create signing key",
            StoreOperation::MarkExpired => "mark expired keys inactive",
            StoreOperation::DeleteInactive => "delete inactive keys",
            StoreOperation::GetUser => "fetch user",
            StoreOperation::UpdateLastLogin => "update last login",
        }
    }
}

#[derive(Default)]
struct MemoryState {
    keys: Vec<SigningKeyRecord>,
    users: Vec<User>,
    next_key_id: i64,
    next_user_id: i64,
    failing: HashSet<StoreOperation>,
    keys_created: u64,
}

pub struct MemoryStore {
    state: Mutex<MemoryState>,
    key_validity: chrono::Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(chrono::Duration::days(DEFAULT_KEY_VALIDITY_DAYS))
    }
}

impl MemoryStore {
    pub fn new(key_validity: chrono::Duration) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                next_key_id: 1,
                next_user_id: 1,
                ..MemoryState::default()
            }),
            key_validity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(state: &MemoryState, op: StoreOperation) -> Result<(), AuthError> {
        if state.failing.contains(&op) {
            return Err(AuthError::Store(format!(
                "Failed to {}: injected failure",
                op.description()
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Test controls
    // ------------------------------------------------------------------

    /// Make every subsequent call of `op` fail with a store error.
    pub fn fail_operation(&self, op: StoreOperation) {
        self.lock().failing.insert(op);
    }

    pub fn restore_operation(&self, op: StoreOperation) {
        self.lock().failing.remove(&op);
    }

    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    /// Insert a key row directly, bypassing the one-active-key rule.
    pub fn insert_signing_key(
        &self,
        key_data: &str,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        is_active: bool,
    ) -> i64 {
        let mut state = self.lock();
        let id = state.next_key_id;
        state.next_key_id += 1;
        state.keys.push(SigningKeyRecord {
            id,
            key_data: key_data.to_string(),
            created_at,
            expires_at,
            is_active,
            deactivated_at: if is_active { None } else { Some(created_at) },
        });
        id
    }

    /// Move the active key's expiry, simulating the passage of time.
    pub fn set_active_key_expiry(&self, expires_at: DateTime<Utc>) -> bool {
        let mut state = self.lock();
        match state.keys.iter_mut().filter(|k| k.is_active).max_by_key(|k| k.id) {
            Some(key) => {
                key.expires_at = expires_at;
                true
            }
            None => false,
        }
    }

    /// Move one key's expiry. Returns false when no key has that id.
    pub fn set_key_expiry(&self, id: i64, expires_at: DateTime<Utc>) -> bool {
        let mut state = self.lock();
        match state.keys.iter_mut().find(|k| k.id == id) {
            Some(key) => {
                key.expires_at = expires_at;
                true
            }
            None => false,
        }
    }

    /// Snapshot of every stored key row.
    pub fn signing_keys(&self) -> Vec<SigningKeyRecord> {
        self.lock().keys.clone()
    }

    pub fn signing_key_count(&self) -> usize {
        self.lock().keys.len()
    }

    /// Number of successful `create_signing_key` calls.
    pub fn keys_created(&self) -> u64 {
        self.lock().keys_created
    }

    pub fn insert_user(
        &self,
        email: &str,
        password_hash: &str,
        role: &str,
        is_active: bool,
    ) -> i64 {
        let mut state = self.lock();
        let id = state.next_user_id;
        state.next_user_id += 1;
        state.users.push(User {
            id,
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            role: role.to_string(),
            is_active,
            last_login: None,
        });
        id
    }

    /// Insert the configured bootstrap account as an active admin unless a
    /// user with that email already exists. Returns the user's id.
    pub fn seed_admin(&self, admin: &BootstrapAdmin) -> i64 {
        let existing = self
            .lock()
            .users
            .iter()
            .find(|u| u.email == admin.email)
            .map(|u| u.id);

        existing.unwrap_or_else(|| {
            self.insert_user(&admin.email, &admin.password_hash, BOOTSTRAP_ADMIN_ROLE, true)
        })
    }
}

fn newest_first(keys: &mut [SigningKeyRecord]) {
    keys.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

#[async_trait::async_trait]
impl KeyStore for MemoryStore {
    async fn list_valid_signing_keys(&self) -> Result<Vec<SigningKeyRecord>, AuthError> {
        let state = self.lock();
        Self::check(&state, StoreOperation::ListValidKeys)?;

        let now = Utc::now();
        let mut keys: Vec<SigningKeyRecord> = state
            .keys
            .iter()
            .filter(|k| k.expires_at > now)
            .cloned()
            .collect();
        newest_first(&mut keys);
        Ok(keys)
    }

    async fn get_active_signing_key(&self) -> Result<Option<SigningKeyRecord>, AuthError> {
        let state = self.lock();
        Self::check(&state, StoreOperation::GetActiveKey)?;

        let now = Utc::now();
        let mut active: Vec<SigningKeyRecord> = state
            .keys
            .iter()
            .filter(|k| k.is_active && k.expires_at > now)
            .cloned()
            .collect();
        newest_first(&mut active);
        Ok(active.into_iter().next())
    }

    async fn create_signing_key(&self, key_data: &str) -> Result<i64, AuthError> {
        let mut state = self.lock();
        Self::check(&state, StoreOperation::CreateKey)?;

        let now = Utc::now();
        for key in state.keys.iter_mut().filter(|k| k.is_active) {
            key.is_active = false;
            key.deactivated_at = Some(now);
        }

        let id = state.next_key_id;
        state.next_key_id += 1;
        state.keys.push(SigningKeyRecord {
            id,
            key_data: key_data.to_string(),
            created_at: now,
            expires_at: now + self.key_validity,
            is_active: true,
            deactivated_at: None,
        });
        state.keys_created += 1;
        Ok(id)
    }

    async fn mark_expired_keys_inactive(&self) -> Result<u64, AuthError> {
        let mut state = self.lock();
        Self::check(&state, StoreOperation::MarkExpired)?;

        let now = Utc::now();
        let mut changed = 0;
        for key in state
            .keys
            .iter_mut()
            .filter(|k| k.is_active && k.expires_at <= now)
        {
            key.is_active = false;
            key.deactivated_at.get_or_insert(now);
            changed += 1;
        }
        Ok(changed)
    }

    async fn delete_inactive_keys(&self, retention: chrono::Duration) -> Result<u64, AuthError> {
        let mut state = self.lock();
        Self::check(&state, StoreOperation::DeleteInactive)?;

        let now = Utc::now();
        let cutoff = now - retention;
        let before = state.keys.len();
        state.keys.retain(|k| {
            let deactivated = k.deactivated_at.unwrap_or(k.expires_at);
            k.is_active || k.expires_at > now || deactivated >= cutoff
        });
        Ok((before - state.keys.len()) as u64)
    }
}

#[async_trait::async_trait]
impl UserStore for MemoryStore {
    async fn get_user_by_id(&self, user_id: i64) -> Result<Option<User>, AuthError> {
        let state = self.lock();
        Self::check(&state, StoreOperation::GetUser)?;
        Ok(state.users.iter().find(|u| u.id == user_id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let state = self.lock();
        Self::check(&state, StoreOperation::GetUser)?;
        Ok(state.users.iter().find(|u| u.email == email).cloned())
    }

    async fn update_last_login(&self, user_id: i64, at: DateTime<Utc>) -> Result<(), AuthError> {
        let mut state = self.lock();
        Self::check(&state, StoreOperation::UpdateLastLogin)?;
        if let Some(user) = state.users.iter_mut().find(|u| u.id == user_id) {
            user.last_login = Some(at);
        }
        Ok(())
    }
}
