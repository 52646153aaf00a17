//! Key rotation under concurrent load
//!
//! Rotation swaps the current signing key while requests are signing and
//! validating with it. Every token issued during the swap must keep
//! validating afterwards.

use auth_service::config::{TokenServiceConfig, VerificationScope};
use auth_service::repositories::KeyStore;
use auth_service::services::RotationOutcome;
use auth_service::tasks::spawn_key_rotation;
use auth_test_utils::TestServices;
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashSet;
use std::time::Duration;

const CONCURRENT_ISSUANCES: i64 = 32;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_issuance_with_rotation() -> Result<(), anyhow::Error> {
    let services = TestServices::new().await?;
    services
        .store
        .set_active_key_expiry(Utc::now() + chrono::Duration::hours(2));

    let issuers = (0..CONCURRENT_ISSUANCES).map(|user_id| {
        let tokens = services.tokens.clone();
        tokio::spawn(async move { (user_id, tokens.create_access_token(user_id).await) })
    });
    let rotation = {
        let tokens = services.tokens.clone();
        tokio::spawn(async move { tokens.rotate().await })
    };

    let issued = join_all(issuers).await;
    let rotated = rotation.await?;
    assert!(rotated.is_ok(), "rotation failed: {:?}", rotated);

    for joined in issued {
        let (user_id, token) = joined?;
        let token = token?;
        assert_eq!(services.tokens.validate_access_token(&token)?, user_id);
    }

    // Issuance may have rotated too; every key it created is still held
    let held: HashSet<_> = services.tokens.key_manager().key_ids().into_iter().collect();
    let stored: HashSet<_> = services
        .store
        .signing_keys()
        .into_iter()
        .map(|record| record.id.to_string())
        .collect();
    assert!(stored.is_subset(&held), "stored {:?} held {:?}", stored, held);
    Ok(())
}

/// A burst of issuances that all see a near-expiry key produces exactly one
/// replacement key.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_near_expiry_issuance_generates_one_key() -> Result<(), anyhow::Error> {
    let services = TestServices::new().await?;
    let old_kid = services
        .tokens
        .key_manager()
        .current_signing_key()
        .kid()
        .to_string();
    services
        .store
        .set_active_key_expiry(Utc::now() + chrono::Duration::hours(2));

    let issuers = (0..16).map(|user_id| {
        let tokens = services.tokens.clone();
        tokio::spawn(async move { tokens.create_access_token(user_id).await })
    });
    for joined in join_all(issuers).await {
        joined??;
    }

    assert_eq!(services.store.keys_created(), 2);
    assert_eq!(services.tokens.key_manager().len(), 2);
    assert_eq!(services.tokens.jwks().keys.len(), 2);

    let active = services
        .store
        .get_active_signing_key()
        .await?
        .expect("replacement key is active");
    let current = services.tokens.key_manager().current_signing_key();
    assert_eq!(current.kid(), active.id.to_string());
    assert_ne!(current.kid(), old_kid);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_validation_never_fails_during_repeated_rotation() -> Result<(), anyhow::Error> {
    let services = TestServices::with_config(TokenServiceConfig {
        verification_scope: VerificationScope::AllKeys,
        ..TokenServiceConfig::default()
    })
    .await?;
    let token = services.tokens.create_access_token(99).await?;

    let validator = {
        let tokens = services.tokens.clone();
        let token = token.clone();
        tokio::spawn(async move {
            for _ in 0..500 {
                if let Err(e) = tokens.validate_access_token(&token) {
                    return Err(e);
                }
                tokio::task::yield_now().await;
            }
            Ok(())
        })
    };

    for _ in 0..3 {
        services
            .store
            .set_active_key_expiry(Utc::now() + chrono::Duration::hours(2));
        let outcome = services.tokens.rotate().await?;
        assert!(matches!(outcome, RotationOutcome::Rotated { .. }));
    }

    validator.await??;
    assert_eq!(services.tokens.key_manager().len(), 4);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_background_task_rotates_while_issuing() -> Result<(), anyhow::Error> {
    let services = TestServices::new().await?;
    services
        .store
        .set_active_key_expiry(Utc::now() + chrono::Duration::hours(2));

    let task = spawn_key_rotation(services.tokens.clone(), Duration::from_millis(20));

    let mut tokens_issued = Vec::new();
    let rotated = tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            tokens_issued.push(services.tokens.create_access_token(5).await);
            if services.store.keys_created() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    task.shutdown().await;

    assert!(rotated.is_ok(), "no rotation observed");
    for token in tokens_issued {
        assert_eq!(services.tokens.validate_access_token(&token?)?, 5);
    }
    Ok(())
}
