//! Signing key rotation and its effect on verification.

use auth_service::config::{TokenServiceConfig, VerificationScope};
use auth_service::errors::AuthError;
use auth_service::keys::ManagedKey;
use auth_service::repositories::{KeyStore, MemoryStore};
use auth_service::services::{RotationOutcome, TokenService};
use auth_test_utils::{TestServices, TokenAssertions};
use chrono::Utc;
use std::sync::Arc;

fn scoped(scope: VerificationScope) -> TokenServiceConfig {
    TokenServiceConfig {
        verification_scope: scope,
        ..TokenServiceConfig::default()
    }
}

fn expire_active_key_soon(store: &MemoryStore) {
    assert!(store.set_active_key_expiry(Utc::now() + chrono::Duration::hours(2)));
}

#[tokio::test]
async fn test_rotation_not_needed_for_fresh_key() -> Result<(), anyhow::Error> {
    let services = TestServices::new().await?;

    assert_eq!(services.tokens.rotate().await?, RotationOutcome::NotNeeded);
    assert_eq!(services.store.keys_created(), 1);
    Ok(())
}

/// Two passes back to back create at most one key.
#[tokio::test]
async fn test_rotation_is_idempotent() -> Result<(), anyhow::Error> {
    let services = TestServices::new().await?;
    expire_active_key_soon(&services.store);

    let first = services.tokens.rotate().await?;
    let second = services.tokens.rotate().await?;

    assert!(matches!(first, RotationOutcome::Rotated { .. }));
    assert_eq!(second, RotationOutcome::NotNeeded);
    assert_eq!(services.store.keys_created(), 2);
    Ok(())
}

#[tokio::test]
async fn test_rotation_with_no_active_key_is_not_an_error() -> Result<(), anyhow::Error> {
    let store = Arc::new(MemoryStore::default());
    let service = TokenService::initialize(store.clone(), TokenServiceConfig::default()).await?;

    // Expire the active key outright; the pass marks it inactive first
    store.set_active_key_expiry(Utc::now() - chrono::Duration::minutes(1));

    assert_eq!(service.rotate().await?, RotationOutcome::NoActiveKey);
    assert!(store.get_active_signing_key().await?.is_none());

    // The next issuance creates a key
    let token = service.create_access_token(4).await?;
    let active = store.get_active_signing_key().await?.expect("key created on issuance");
    token.assert_signed_by(&active.id.to_string());
    assert_eq!(service.validate_access_token(&token)?, 4);
    Ok(())
}

#[tokio::test]
async fn test_issuance_rotates_near_expiry_key_first() -> Result<(), anyhow::Error> {
    let services = TestServices::new().await?;
    let old_kid = services
        .tokens
        .key_manager()
        .current_signing_key()
        .kid()
        .to_string();
    expire_active_key_soon(&services.store);

    let token = services.tokens.create_access_token(8).await?;

    let new_kid = services

        .tokens

        .key_manager()

        .current_signing_key()

        .kid()

        .to_string();
    assert_ne!(old_kid, new_kid);
    token.assert_signed_by(&new_kid);
    Ok(())
}

/// Default scope: tokens signed before a rotation keep validating, and the
/// JWKS lists both keys.
#[tokio::test]
async fn test_all_keys_scope_accepts_rotated_out_key() -> Result<(), anyhow::Error> {
    let services = TestServices::with_config(scoped(VerificationScope::AllKeys)).await?;
    let before = services.tokens.create_access_token(21).await?;

    expire_active_key_soon(&services.store);
    assert!(matches!(
        services.tokens.rotate().await?,
        RotationOutcome::Rotated { .. }
    ));

    assert_eq!(services.tokens.validate_access_token(&before)?, 21);
    assert_eq!(services.tokens.jwks().keys.len(), 2);
    Ok(())
}

/// Signing-key-only scope: a rotation invalidates tokens signed by the
/// previous key.
#[tokio::test]
async fn test_signing_key_only_scope_rejects_rotated_out_key() -> Result<(), anyhow::Error> {
    let services = TestServices::with_config(scoped(VerificationScope::SigningKeyOnly)).await?;
    let before = services.tokens.create_access_token(21).await?;

    expire_active_key_soon(&services.store);
    services.tokens.rotate().await?;

    assert!(matches!(
        services.tokens.validate_access_token(&before),
        Err(AuthError::SignatureMismatch)
    ));

    let after = services.tokens.create_access_token(21).await?;
    assert_eq!(services.tokens.validate_access_token(&after)?, 21);
    Ok(())
}

#[tokio::test]
async fn test_unknown_kid_rejected() -> Result<(), anyhow::Error> {
    let services = TestServices::new().await?;

    // Same store shape, different process key
    let other = TestServices::new().await?;
    let token = other.tokens.create_access_token(2).await?;

    assert!(matches!(
        services.tokens.validate_access_token(&token),
        Err(AuthError::SignatureMismatch)
    ));
    Ok(())
}

/// A restart loads the newest valid key for signing and the older ones for
/// verification.
#[tokio::test]
async fn test_restart_restores_key_set() -> Result<(), anyhow::Error> {
    let store = Arc::new(MemoryStore::default());
    let first = TokenService::initialize(store.clone(), TokenServiceConfig::default()).await?;
    let old_token = first.create_access_token(33).await?;

    store.set_active_key_expiry(Utc::now() + chrono::Duration::hours(2));
    first.rotate().await?;
    let newest_kid = first
        .key_manager()
        .current_signing_key()
        .kid()
        .to_string();
    drop(first);

    let restarted = TokenService::initialize(store.clone(), TokenServiceConfig::default()).await?;

    assert_eq!(restarted.key_manager().current_signing_key().kid(), newest_kid);
    assert_eq!(restarted.key_manager().len(), 2);
    assert_eq!(restarted.validate_access_token(&old_token)?, 33);
    Ok(())
}

/// A store holding only expired keys heals on startup.
#[tokio::test]
async fn test_startup_with_only_expired_keys_generates_new_key() -> Result<(), anyhow::Error> {
    let store = Arc::new(MemoryStore::default());
    let now = Utc::now();
    let pem = ManagedKey::generate("stale")?.to_pkcs8_pem()?;
    {
        use secrecy::ExposeSecret;
        store.insert_signing_key(
            pem.expose_secret(),
            now - chrono::Duration::days(100),
            now - chrono::Duration::days(10),
            true,
        );
    }

    let service = TokenService::initialize(store.clone(), TokenServiceConfig::default()).await?;

    let active = store.get_active_signing_key().await?.expect("fresh active key");
    assert!(active.expires_at > now);
    assert_eq!(
        service.key_manager().current_signing_key().kid(),
        active.id.to_string()
    );
    assert_eq!(service.key_manager().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_jwks_matches_held_keys() -> Result<(), anyhow::Error> {
    let services = TestServices::new().await?;
    expire_active_key_soon(&services.store);
    services.tokens.rotate().await?;

    let mut published: Vec<String> = services
        .tokens
        .jwks()
        .keys
        .into_iter()
        .map(|k| {
            assert_eq!(k.kty, "RSA");
            assert_eq!(k.alg, "RS256");
            assert_eq!(k.use_, "sig");
            k.kid
        })
        .collect();
    let mut held = services.tokens.key_manager().key_ids();
    published.sort();
    held.sort();

    assert_eq!(published, held);
    Ok(())
}
