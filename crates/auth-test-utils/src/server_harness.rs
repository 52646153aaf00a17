//! Test server harness for E2E testing
//!
//! Provides TestAuthServer for spawning real auth service instances in tests.

use crate::fixtures::{TestServices, TEST_USER_EMAIL, TEST_USER_PASSWORD};
use auth_service::config::TokenServiceConfig;
use auth_service::models::LoginResponse;
use auth_service::repositories::MemoryStore;
use auth_service::routes::{self, AppState};
use auth_service::services::TokenService;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Test harness for spawning the auth service in E2E tests
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_login_e2e() -> Result<()> {
///     let server = TestAuthServer::spawn().await?;
///     let tokens = server.login().await?;
///
///     let response = reqwest::Client::new()
///         .get(format!("{}/api/v1/whoami", server.url()))
///         .bearer_auth(&tokens.access_token)
///         .send()
///         .await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestAuthServer {
    addr: SocketAddr,
    services: TestServices,
    _handle: JoinHandle<()>,
}

impl TestAuthServer {
    /// Spawn a server with default token settings
    ///
    /// The server binds to a random port (127.0.0.1:0), runs on a fresh
    /// in-memory store seeded with one active user, and serves in the
    /// background until dropped with the runtime. No rotation task is
    /// started; tests drive rotation through [`TestAuthServer::tokens`].
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with_config(TokenServiceConfig::default()).await
    }

    pub async fn spawn_with_config(config: TokenServiceConfig) -> Result<Self, anyhow::Error> {
        let services = TestServices::with_config(config).await?;

        let state = Arc::new(AppState {
            tokens: services.tokens.clone(),
            sessions: services.sessions.clone(),
            users: services.store.clone(),
        });

        // The global recorder can only be installed once per process
        let metrics_handle = match routes::init_metrics_recorder() {
            Ok(handle) => handle,
            Err(_) => {
                use metrics_exporter_prometheus::PrometheusBuilder;
                PrometheusBuilder::new().build_recorder().handle()
            }
        };

        let app = routes::build_routes(state, metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            services,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.services.store
    }

    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.services.tokens
    }

    /// Id of the seeded user
    pub fn user_id(&self) -> i64 {
        self.services.user_id
    }

    /// Log in as the seeded user over HTTP
    pub async fn login(&self) -> Result<LoginResponse, anyhow::Error> {
        let response = reqwest::Client::new()
            .post(format!("{}/api/v1/auth/login", self.url()))
            .json(&serde_json::json!({
                "email": TEST_USER_EMAIL,
                "password": TEST_USER_PASSWORD,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("Login failed with status {}", response.status());
        }

        Ok(response.json().await?)
    }
}
