//! Issue, validate and revoke tokens through the public TokenService API.

use auth_service::config::TokenServiceConfig;
use auth_service::crypto::{sign_jwt, Claims, TokenType};
use auth_service::errors::AuthError;
use auth_service::repositories::{KeyStore, MemoryStore};
use auth_service::services::TokenService;
use auth_test_utils::{TestServices, TokenAssertions};
use chrono::Utc;
use std::sync::Arc;

const ALL_TYPES: [TokenType; 3] = [TokenType::Access, TokenType::Refresh, TokenType::Reset];

/// Fresh store with no keys: the first issuance creates one and the token
/// validates only as the type it was issued for.
#[tokio::test]
async fn test_first_token_from_empty_store() -> Result<(), anyhow::Error> {
    let store = Arc::new(MemoryStore::default());
    assert_eq!(store.signing_key_count(), 0);

    let service = TokenService::initialize(store.clone(), TokenServiceConfig::default()).await?;
    let token = service
        .create_token(42, TokenType::Access, chrono::Duration::hours(24))
        .await?;

    let active = store.get_active_signing_key().await?.expect("active key");
    token
        .assert_valid_jwt()
        .assert_token_type("access")
        .assert_for_user(42)
        .assert_signed_by(&active.id.to_string())
        .assert_expires_in(24 * 3600);

    assert_eq!(service.validate_access_token(&token)?, 42);
    assert!(matches!(
        service.validate_refresh_token(&token),
        Err(AuthError::WrongTokenType { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_every_type_round_trips_and_rejects_other_types() -> Result<(), anyhow::Error> {
    let services = TestServices::new().await?;
    let tokens = &services.tokens;

    for issued_as in ALL_TYPES {
        let token = tokens
            .create_token(7, issued_as, issued_as.default_lifetime())
            .await?;
        assert_eq!(tokens.validate_token(&token, issued_as)?, 7);

        for other in ALL_TYPES.into_iter().filter(|t| *t != issued_as) {
            match tokens.validate_token(&token, other) {
                Err(AuthError::WrongTokenType { expected, actual }) => {
                    assert_eq!(expected, other.as_str());
                    assert_eq!(actual.as_deref(), Some(issued_as.as_str()));
                }
                other_result => panic!("expected WrongTokenType, got {:?}", other_result),
            }
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_convenience_wrappers_use_default_lifetimes() -> Result<(), anyhow::Error> {
    let services = TestServices::new().await?;
    let tokens = &services.tokens;

    tokens
        .create_access_token(1)
        .await?
        .assert_token_type("access")
        .assert_expires_in(24 * 3600);
    tokens
        .create_refresh_token(1)
        .await?
        .assert_token_type("refresh")
        .assert_expires_in(30 * 24 * 3600);
    tokens
        .create_reset_token(1)
        .await?
        .assert_token_type("reset")
        .assert_expires_in(24 * 3600);
    Ok(())
}

#[tokio::test]
async fn test_revoked_token_rejected_for_every_type() -> Result<(), anyhow::Error> {
    let services = TestServices::new().await?;
    let tokens = &services.tokens;

    let token = tokens.create_refresh_token(9).await?;
    tokens.invalidate_token(&token);

    for expected in ALL_TYPES {
        assert!(matches!(
            tokens.validate_token(&token, expected),
            Err(AuthError::TokenRevoked)
        ));
    }

    // Other tokens for the same user are unaffected
    let other = tokens.create_refresh_token(9).await?;
    assert_eq!(tokens.validate_refresh_token(&other)?, 9);
    Ok(())
}

#[tokio::test]
async fn test_expired_token_rejected() -> Result<(), anyhow::Error> {
    let services = TestServices::new().await?;
    let key = services.tokens.key_manager().current_signing_key();
    let now = Utc::now().timestamp();

    // Well outside the clock-skew leeway
    let claims = Claims {
        iss: services.tokens.config().issuer.clone(),
        sub: Some("5".to_string()),
        iat: now - 7200,
        exp: now - 600,
        token_type: Some("access".to_string()),
    };
    let token = sign_jwt(&claims, key.encoding_key(), key.kid())?;

    assert!(matches!(
        services.tokens.validate_access_token(&token),
        Err(AuthError::TokenExpired)
    ));
    Ok(())
}

#[tokio::test]
async fn test_token_within_clock_skew_accepted() -> Result<(), anyhow::Error> {
    let services = TestServices::new().await?;
    let key = services.tokens.key_manager().current_signing_key();
    let now = Utc::now().timestamp();

    let claims = Claims {
        iss: services.tokens.config().issuer.clone(),
        sub: Some("5".to_string()),
        iat: now - 3600,
        exp: now - 10,
        token_type: Some("access".to_string()),
    };
    let token = sign_jwt(&claims, key.encoding_key(), key.kid())?;

    assert_eq!(services.tokens.validate_access_token(&token)?, 5);
    Ok(())
}

#[tokio::test]
async fn test_subject_must_be_present_and_numeric() -> Result<(), anyhow::Error> {
    let services = TestServices::new().await?;
    let key = services.tokens.key_manager().current_signing_key();
    let now = Utc::now().timestamp();

    let with_subject = |sub: Option<&str>| Claims {
        iss: services.tokens.config().issuer.clone(),
        sub: sub.map(str::to_string),
        iat: now,
        exp: now + 3600,
        token_type: Some("access".to_string()),
    };

    let missing = sign_jwt(&with_subject(None), key.encoding_key(), key.kid())?;
    let non_numeric = sign_jwt(&with_subject(Some("alice")), key.encoding_key(), key.kid())?;

    assert!(matches!(
        services.tokens.validate_access_token(&missing),
        Err(AuthError::MissingSubject)
    ));
    assert!(matches!(
        services.tokens.validate_access_token(&non_numeric),
        Err(AuthError::InvalidSubject)
    ));
    Ok(())
}

#[tokio::test]
async fn test_tampered_and_garbage_tokens_rejected() -> Result<(), anyhow::Error> {
    let services = TestServices::new().await?;
    let token = services.tokens.create_access_token(3).await?;

    // Swap the payload for one claiming a different user
    let parts: Vec<&str> = token.split('.').collect();
    let forged_claims = {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
        let now = Utc::now().timestamp();
        URL_SAFE_NO_PAD.encode(format!(
            r#"{{"iss":"toolmin","sub":"1","iat":{},"exp":{},"type":"access"}}"#,
            now,
            now + 3600
        ))
    };
    let forged = format!("{}.{}.{}", parts[0], forged_claims, parts[2]);

    assert!(matches!(
        services.tokens.validate_access_token(&forged),
        Err(AuthError::SignatureMismatch)
    ));
    assert!(matches!(
        services.tokens.validate_access_token("not-a-jwt"),
        Err(AuthError::MalformedToken)
    ));

    let oversized = format!("{}.{}.sig", "a".repeat(4096), "b".repeat(4200));
    assert!(matches!(
        services.tokens.validate_access_token(&oversized),
        Err(AuthError::MalformedToken)
    ));
    Ok(())
}

#[tokio::test]
async fn test_foreign_issuer_rejected() -> Result<(), anyhow::Error> {
    let store = Arc::new(MemoryStore::default());
    let ours = TokenService::initialize(store.clone(), TokenServiceConfig::default()).await?;
    let theirs = TokenService::initialize(
        store,
        TokenServiceConfig {
            issuer: "someone-else".to_string(),
            ..TokenServiceConfig::default()
        },
    )
    .await?;

    // Same store, same key, different issuer
    let token = theirs.create_access_token(11).await?;
    token.assert_issued_by("someone-else");

    assert!(matches!(
        ours.validate_access_token(&token),
        Err(AuthError::InvalidClaims(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_non_positive_duration_is_build_error() -> Result<(), anyhow::Error> {
    let services = TestServices::new().await?;

    let result = services
        .tokens
        .create_token(1, TokenType::Access, chrono::Duration::zero())
        .await;
    assert!(matches!(result, Err(AuthError::TokenBuild(_))));
    Ok(())
}
