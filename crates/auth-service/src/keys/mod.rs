//! In-process set of RSA signing keys.
//!
//! The [`KeyManager`] signs with exactly one key (the newest generated or
//! loaded) and keeps older ones around so tokens they signed can still be
//! verified and so the published JWKS covers them. It never does I/O;
//! persistence is the token service's job.

use crate::crypto::SIGNING_ALGORITHM;
use crate::errors::AuthError;
use crate::models::{JsonWebKey, Jwks};
use crate::observability::metrics::set_signing_keys_held;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use secrecy::SecretString;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::instrument;

/// RSA modulus size for generated keys.
pub const RSA_KEY_BITS: usize = 2048;

/// One RSA keypair plus the jsonwebtoken keys derived from it.
pub struct ManagedKey {
    kid: String,
    private_key: RsaPrivateKey,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl ManagedKey {
    /// Generate a fresh 2048-bit keypair. CPU-heavy; call off the async
    /// workers.
    #[instrument(skip_all)]
    pub fn generate(kid: impl Into<String>) -> Result<Self, AuthError> {
        let mut rng = rsa::rand_core::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
            .map_err(|e| AuthError::KeyGeneration(format!("RSA key generation failed: {}", e)))?;

        Self::from_private_key(private_key, kid.into())
            .map_err(|e| AuthError::KeyGeneration(e.to_string()))
    }

    /// Parse a PKCS#8 PEM keypair and tag it with `kid`.
    pub fn from_pkcs8_pem(data: &str, kid: impl Into<String>) -> Result<Self, AuthError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(data)
            .map_err(|e| AuthError::KeyParse(format!("Invalid PKCS#8 RSA key: {}", e)))?;

        Self::from_private_key(private_key, kid.into())
    }

    fn from_private_key(private_key: RsaPrivateKey, kid: String) -> Result<Self, AuthError> {
        let private_der = private_key
            .to_pkcs1_der()
            .map_err(|e| AuthError::KeyParse(format!("Private key encoding failed: {}", e)))?;
        let encoding_key = EncodingKey::from_rsa_der(private_der.as_bytes());

        let public_der = RsaPublicKey::from(&private_key)
            .to_pkcs1_der()
            .map_err(|e| AuthError::KeyParse(format!("Public key derivation failed: {}", e)))?;
        let decoding_key = DecodingKey::from_rsa_der(public_der.as_bytes());

        Ok(Self {
            kid,
            private_key,
            encoding_key,
            decoding_key,
        })
    }

    /// Retag the keypair (used once the store has assigned an identifier).
    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.kid = kid.into();
        self
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Serialize private and public parts as PKCS#8 PEM.
    pub fn to_pkcs8_pem(&self) -> Result<SecretString, AuthError> {
        let pem = self
            .private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AuthError::KeySerialization(format!("PKCS#8 encoding failed: {}", e)))?;

        Ok(SecretString::from(pem.as_str()))
    }

    /// Public half as an RSA JWK.
    pub fn public_jwk(&self) -> Result<JsonWebKey, AuthError> {
        let public_key = RsaPublicKey::from(&self.private_key);
        let n = public_key.n().to_bytes_be();
        let e = public_key.e().to_bytes_be();

        if n.is_empty() || e.is_empty() {
            return Err(AuthError::Crypto(format!(
                "Key {} has an empty public component",
                self.kid
            )));
        }

        Ok(JsonWebKey {
            kid: self.kid.clone(),
            kty: "RSA".to_string(),
            alg: format!("{:?}", SIGNING_ALGORITHM),
            use_: "sig".to_string(),
            n: URL_SAFE_NO_PAD.encode(n),
            e: URL_SAFE_NO_PAD.encode(e),
        })
    }
}

impl fmt::Debug for ManagedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedKey")
            .field("kid", &self.kid)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

struct KeySet {
    keys: Vec<Arc<ManagedKey>>,
    current: Arc<ManagedKey>,
}

/// Holds the process's signing keys behind one reader/writer lock.
///
/// Always initialized: every constructor installs a current key, and the
/// current key is always a member of the collection.
pub struct KeyManager {
    state: RwLock<KeySet>,
}

impl KeyManager {
    /// Manager holding exactly `key`.
    pub fn from_key(key: ManagedKey) -> Self {
        let key = Arc::new(key);
        set_signing_keys_held(1);
        Self {
            state: RwLock::new(KeySet {
                keys: vec![Arc::clone(&key)],
                current: key,
            }),
        }
    }

    /// Manager holding a single freshly generated key.
    pub fn with_generated_key(kid: impl Into<String>) -> Result<Self, AuthError> {
        let key = ManagedKey::generate(kid)?;
        tracing::debug!(target: "auth.keys", key_id = %key.kid(), "Key manager created with generated key");
        Ok(Self::from_key(key))
    }

    /// Manager holding exactly the one serialized key.
    pub fn from_serialized(data: &str, kid: impl Into<String>) -> Result<Self, AuthError> {
        let key = ManagedKey::from_pkcs8_pem(data, kid)?;
        tracing::debug!(target: "auth.keys", key_id = %key.kid(), "Key manager created with stored key");
        Ok(Self::from_key(key))
    }

    fn read(&self) -> RwLockReadGuard<'_, KeySet> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, KeySet> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Generate a new keypair, make it current and append it.
    ///
    /// Key generation happens before the write lock is taken.
    #[instrument(skip_all)]
    pub fn generate(&self, kid: impl Into<String>) -> Result<Arc<ManagedKey>, AuthError> {
        let key = ManagedKey::generate(kid)?;
        Ok(self.install(key))
    }

    /// Replace the whole key set with one serialized key.
    #[instrument(skip_all)]
    pub fn load_from_serialized(
        &self,
        data: &str,
        kid: impl Into<String>,
    ) -> Result<(), AuthError> {
        let key = Arc::new(ManagedKey::from_pkcs8_pem(data, kid)?);

        let mut state = self.write();
        tracing::debug!(
            target: "auth.keys",
            key_id = %key.kid(),
            dropped_keys = state.keys.len(),
            "Key manager reloaded from serialized key"
        );
        state.keys = vec![Arc::clone(&key)];
        state.current = key;
        set_signing_keys_held(1);
        Ok(())
    }

    /// Make `key` the current signing key and append it to the collection.
    pub fn install(&self, key: ManagedKey) -> Arc<ManagedKey> {
        let key = Arc::new(key);

        let mut state = self.write();
        state.keys.push(Arc::clone(&key));
        state.current = Arc::clone(&key);
        set_signing_keys_held(state.keys.len());

        tracing::debug!(
            target: "auth.keys",
            key_id = %key.kid(),
            total_keys = state.keys.len(),
            "Installed new signing key"
        );
        key
    }

    /// Admit an additional verification key without changing the signer.
    ///
    /// Fails if the key's public half cannot be derived.
    pub fn add_key(&self, key: ManagedKey) -> Result<(), AuthError> {
        key.public_jwk()?;

        let mut state = self.write();
        tracing::debug!(
            target: "auth.keys",
            key_id = %key.kid(),
            current_keys = state.keys.len(),
            "Adding verification key"
        );
        state.keys.push(Arc::new(key));
        set_signing_keys_held(state.keys.len());
        Ok(())
    }

    /// Drop every non-current key for which `keep` returns false. The
    /// current signing key is never dropped. Returns the number removed.
    pub fn retain_keys(&self, keep: impl Fn(&str) -> bool) -> usize {
        let mut state = self.write();
        let before = state.keys.len();
        let current = Arc::clone(&state.current);
        state.keys.retain(|key| Arc::ptr_eq(key, &current) || keep(key.kid()));
        let removed = before - state.keys.len();

        if removed > 0 {
            set_signing_keys_held(state.keys.len());
            tracing::debug!(
                target: "auth.keys",
                removed,
                remaining = state.keys.len(),
                "Dropped verification keys"
            );
        }
        removed
    }

    /// The key used for all new signatures.
    pub fn current_signing_key(&self) -> Arc<ManagedKey> {
        Arc::clone(&self.read().current)
    }

    /// Held key with the given identifier, newest first on duplicates.
    pub fn find_key(&self, kid: &str) -> Option<Arc<ManagedKey>> {
        self.read()
            .keys
            .iter()
            .rev()
            .find(|key| key.kid() == kid)
            .cloned()
    }

    /// Public JWKS of every held key. Keys whose public part cannot be
    /// derived are logged and skipped.
    pub fn public_key_set(&self) -> Jwks {
        let keys: Vec<Arc<ManagedKey>> = self.read().keys.clone();

        let jwks = keys
            .iter()
            .filter_map(|key| match key.public_jwk() {
                Ok(jwk) => Some(jwk),
                Err(e) => {
                    tracing::error!(
                        target: "auth.keys",
                        key_id = %key.kid(),
                        error = %e,
                        "Failed to derive public key, omitting from JWKS"
                    );
                    None
                }
            })
            .collect();

        Jwks { keys: jwks }
    }

    /// Serialize the current signing key for persistence.
    pub fn export_current_key(&self) -> Result<SecretString, AuthError> {
        self.current_signing_key().to_pkcs8_pem()
    }

    pub fn key_ids(&self) -> Vec<String> {
        self.read()
            .keys
            .iter()
            .map(|key| key.kid().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().keys.is_empty()
    }
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("KeyManager")
            .field("current", &state.current.kid())
            .field("keys", &state.keys.len())
            .finish()
    }
}
