//! Login, refresh, logout and whoami over HTTP.

use auth_service::config::Config;
use auth_service::crypto::password::hash_password;
use auth_service::models::{LoginResponse, RefreshResponse};
use auth_test_utils::{
    seed_user, test_password_config, TestAuthServer, TestServices, TokenAssertions,
    TEST_USER_EMAIL, TEST_USER_PASSWORD,
};
use reqwest::StatusCode;
use serde_json::json;
use std::collections::HashMap;

/// The account configured through BOOTSTRAP_ADMIN_* can log in against the
/// in-memory store.
#[tokio::test]
async fn test_bootstrap_admin_can_log_in() -> Result<(), anyhow::Error> {
    let password = "bootstrap password";
    let hash = hash_password(password, Some(&test_password_config()))?;
    let vars = HashMap::from([
        (
            "BOOTSTRAP_ADMIN_EMAIL".to_string(),
            "root@example.com".to_string(),
        ),
        ("BOOTSTRAP_ADMIN_PASSWORD_HASH".to_string(), hash),
    ]);
    let admin = Config::from_vars(&vars)?
        .bootstrap_admin
        .expect("bootstrap admin configured");

    let services = TestServices::new().await?;
    let user_id = services.store.seed_admin(&admin);

    let login = services.sessions.login("root@example.com", password).await?;
    login.access_token.assert_for_user(user_id);
    Ok(())
}

#[tokio::test]
async fn test_login_returns_token_pair() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;

    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/auth/login", server.url()))
        .json(&json!({"email": TEST_USER_EMAIL, "password": TEST_USER_PASSWORD}))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["tokenType"], "Bearer");
    assert_eq!(body["expiresIn"], 86400);

    let access = body["accessToken"].as_str().unwrap_or_default().to_string();
    let refresh = body["refreshToken"].as_str().unwrap_or_default().to_string();
    access
        .assert_valid_jwt()
        .assert_token_type("access")
        .assert_for_user(server.user_id());
    refresh
        .assert_valid_jwt()
        .assert_token_type("refresh")
        .assert_for_user(server.user_id());
    Ok(())
}

#[tokio::test]
async fn test_login_failures_share_one_response() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;
    seed_user(server.store(), "inactive@example.com", "pw", false)?;
    let client = reqwest::Client::new();

    let mut bodies = Vec::new();
    for (email, password) in [
        (TEST_USER_EMAIL, "wrong password"),
        ("nobody@example.com", "whatever"),
        ("inactive@example.com", "pw"),
    ] {
        let response = client
            .post(format!("{}/api/v1/auth/login", server.url()))
            .json(&json!({"email": email, "password": password}))
            .send()
            .await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", email);
        bodies.push(response.text().await?);
    }

    assert!(bodies.windows(2).all(|w| w[0] == w[1]));
    Ok(())
}

#[tokio::test]
async fn test_refresh_issues_access_token() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;
    let login = server.login().await?;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/v1/auth/refresh", server.url()))
        .json(&json!({"refreshToken": login.refresh_token}))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let refreshed: RefreshResponse = response.json().await?;
    refreshed
        .access_token
        .assert_token_type("access")
        .assert_for_user(server.user_id());

    // An access token cannot be used to refresh
    let response = client
        .post(format!("{}/api/v1/auth/refresh", server.url()))
        .json(&json!({"refreshToken": login.access_token}))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["error"]["code"], "WRONG_TOKEN_TYPE");
    Ok(())
}

#[tokio::test]
async fn test_whoami_returns_authenticated_user() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;
    let login = server.login().await?;

    let response = reqwest::Client::new()
        .get(format!("{}/api/v1/whoami", server.url()))
        .bearer_auth(&login.access_token)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["userId"], server.user_id());
    assert_eq!(body["email"], TEST_USER_EMAIL);
    assert!(body["lastLogin"].is_string());
    Ok(())
}

#[tokio::test]
async fn test_whoami_rejects_refresh_token() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;
    let login = server.login().await?;

    let response = reqwest::Client::new()
        .get(format!("{}/api/v1/whoami", server.url()))
        .bearer_auth(&login.refresh_token)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn test_logout_revokes_access_token() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;
    let login: LoginResponse = server.login().await?;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/v1/auth/logout", server.url()))
        .bearer_auth(&login.access_token)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = client
        .get(format!("{}/api/v1/whoami", server.url()))
        .bearer_auth(&login.access_token)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["error"]["code"], "TOKEN_REVOKED");

    assert_eq!(server.tokens().revoked_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_logout_without_token_rejected() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;

    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/auth/logout", server.url()))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}
