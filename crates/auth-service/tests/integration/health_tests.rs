//! Operational endpoints: health, JWKS discovery, metrics.

use auth_test_utils::TestAuthServer;
use reqwest::StatusCode;

#[tokio::test]
async fn test_health_endpoint_reports_signing_keys() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;

    let response = reqwest::Client::new()
        .get(format!("{}/health", server.url()))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["signing_keys"], 1);
    Ok(())
}

/// A token issued by the service verifies against the published JWKS with
/// nothing but the document.
#[tokio::test]
async fn test_jwks_verifies_issued_token() -> Result<(), anyhow::Error> {
    use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};

    let server = TestAuthServer::spawn().await?;
    let login = server.login().await?;

    let response = reqwest::Client::new()
        .get(format!("{}/.well-known/jwks.json", server.url()))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("cache-control")
            .and_then(|v| v.to_str().ok()),
        Some("max-age=3600")
    );
    let jwks: serde_json::Value = response.json().await?;

    let kid = decode_header(&login.access_token)?.kid.expect("kid header");
    let jwk = jwks["keys"]
        .as_array()
        .and_then(|keys| keys.iter().find(|k| k["kid"] == kid.as_str()))
        .expect("signing key published");

    let key = DecodingKey::from_rsa_components(
        jwk["n"].as_str().unwrap_or_default(),
        jwk["e"].as_str().unwrap_or_default(),
    )?;
    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_issuer(&["toolmin"]);

    let data = decode::<serde_json::Value>(&login.access_token, &key, &validation)?;
    assert_eq!(data.claims["sub"], server.user_id().to_string());
    assert_eq!(data.claims["type"], "access");
    Ok(())
}

#[tokio::test]
async fn test_metrics_endpoint_serves_text() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::spawn().await?;

    let response = reqwest::Client::new()
        .get(format!("{}/metrics", server.url()))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}
