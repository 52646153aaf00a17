//! Auth service
//!
//! Issues user session tokens and publishes the JWKS that verifies them.

use auth_service::config::{Config, LogFormat};
use auth_service::repositories::{KeyStore, MemoryStore, PgKeyStore, PgUserStore, UserStore};
use auth_service::routes::{self, AppState};
use auth_service::services::{SessionService, TokenService};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration is loaded first so LOG_FORMAT can pick the formatter
    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "auth_service=debug,tower_http=debug".into());
    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    info!("Starting auth service");
    info!(
        bind_address = %config.bind_address,
        issuer = %config.token.issuer,
        rotation_interval_seconds = config.token.rotation_interval.as_secs(),
        verification_scope = ?config.token.verification_scope,
        "Configuration loaded successfully"
    );

    let metrics_handle = routes::init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    let (key_store, user_store): (Arc<dyn KeyStore>, Arc<dyn UserStore>) =
        match &config.database_url {
            Some(database_url) => {
                info!("Connecting to database...");
                let db_pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(10)
                    .acquire_timeout(Duration::from_secs(5))
                    .connect(database_url)
                    .await
                    .map_err(|e| {
                        error!("Failed to connect to database: {}", e);
                        e
                    })?;
                info!("Database connection established");
                if config.bootstrap_admin.is_some() {
                    warn!("BOOTSTRAP_ADMIN_* is ignored when DATABASE_URL is set");
                }
                let key_store: Arc<dyn KeyStore> =
                    Arc::new(PgKeyStore::new(db_pool.clone(), config.key_validity));
                let user_store: Arc<dyn UserStore> = Arc::new(PgUserStore::new(db_pool));
                (key_store, user_store)
            }
            None => {
                warn!(
                    "DATABASE_URL not set; using in-memory store. Signing keys and users will not survive a restart"
                );
                let store = Arc::new(MemoryStore::new(config.key_validity));
                match &config.bootstrap_admin {
                    Some(admin) => {
                        let user_id = store.seed_admin(admin);
                        info!(user_id, "Seeded bootstrap admin account");
                    }
                    None => warn!(
                        "BOOTSTRAP_ADMIN_EMAIL not set; the in-memory store has no users, so only JWKS and health endpoints are useful"
                    ),
                }
                let key_store: Arc<dyn KeyStore> = store.clone();
                let user_store: Arc<dyn UserStore> = store;
                (key_store, user_store)
            }
        };

    info!("Initializing signing keys...");
    let (tokens, rotation_task) = TokenService::start(key_store, config.token.clone())
        .await
        .map_err(|e| {
            error!("Failed to initialize token service: {}", e);
            e
        })?;
    info!(
        key_ids = ?tokens.key_manager().key_ids(),
        "Signing keys initialized"
    );

    let sessions = Arc::new(SessionService::new(tokens.clone(), user_store.clone())?);

    let state = Arc::new(AppState {
        tokens,
        sessions,
        users: user_store,
    });
    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Auth service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    rotation_task.shutdown().await;

    info!("Auth service shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
