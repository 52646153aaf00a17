//! Login, refresh, logout and whoami on top of the token service.

use crate::crypto::password::{hash_password, verify_password, PasswordConfig};
use crate::crypto::TokenType;
use crate::errors::AuthError;
use crate::models::{LoginResponse, RefreshResponse, RequestContext, User, WhoAmIResponse};
use crate::observability::hash_for_correlation;
use crate::observability::metrics::{record_login, record_password_duration};
use crate::repositories::UserStore;
use crate::services::token_service::TokenService;
use chrono::Utc;
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

pub const BEARER_TOKEN_TYPE: &str = "Bearer";

/// Verified against when the email is unknown, so a miss costs the same as
/// a wrong password.
const DUMMY_PASSWORD: &str = "timing-equalization-only";

pub struct SessionService {
    tokens: Arc<TokenService>,
    users: Arc<dyn UserStore>,
    dummy_hash: String,
}

impl SessionService {
    /// Session service whose dummy hash uses the default Argon2 parameters.
    pub fn new(tokens: Arc<TokenService>, users: Arc<dyn UserStore>) -> Result<Self, AuthError> {
        Self::with_password_config(tokens, users, &PasswordConfig::default())
    }

    /// `config` should match the parameters stored user hashes were made
    /// with, so unknown-user logins take as long as real ones.
    pub fn with_password_config(
        tokens: Arc<TokenService>,
        users: Arc<dyn UserStore>,
        config: &PasswordConfig,
    ) -> Result<Self, AuthError> {
        let dummy_hash = hash_password(DUMMY_PASSWORD, Some(config))?;
        Ok(Self {
            tokens,
            users,
            dummy_hash,
        })
    }

    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    /// Authenticate with email and password and issue an access/refresh
    /// pair.
    ///
    /// Every credential failure is reported as `InvalidCredentials`.
    #[instrument(skip_all)]
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, AuthError> {
        let result = self.login_inner(email, password).await;

        match &result {
            Ok(_) => record_login("success"),
            Err(AuthError::InvalidCredentials) => record_login("rejected"),
            Err(_) => record_login("error"),
        }
        result
    }

    async fn login_inner(&self, email: &str, password: &str) -> Result<LoginResponse, AuthError> {
        let email_hash = hash_for_correlation(email);
        tracing::debug!(target: "auth.session", email_hash = %email_hash, "Login attempt");

        let user = match self.users.get_user_by_email(email).await {
            Ok(user) => user,
            Err(e) => {
                tracing::error!(target: "auth.session", error = %e, "User lookup failed during login");
                None
            }
        };

        let encoded = user
            .as_ref()
            .map(|u| u.password_hash.clone())
            .unwrap_or_else(|| self.dummy_hash.clone());
        let password_matches = self.check_password(password, encoded).await;

        let user = match (user, password_matches) {
            (Some(user), true) if user.is_active => user,
            (Some(_), true) => {
                tracing::debug!(target: "auth.session", email_hash = %email_hash, "Login rejected: user inactive");
                return Err(AuthError::InvalidCredentials);
            }
            _ => {
                tracing::debug!(target: "auth.session", email_hash = %email_hash, "Login rejected: invalid credentials");
                return Err(AuthError::InvalidCredentials);
            }
        };

        let access_token = self.tokens.create_access_token(user.id).await?;
        let refresh_token = self.tokens.create_refresh_token(user.id).await?;

        if let Err(e) = self.users.update_last_login(user.id, Utc::now()).await {
            tracing::warn!(target: "auth.session", user_id = user.id, error = %e, "Failed to update last login");
        }

        tracing::info!(target: "auth.session", user_id = user.id, "User logged in");

        Ok(LoginResponse {
            access_token,
            refresh_token,
            token_type: BEARER_TOKEN_TYPE.to_string(),
            expires_in: TokenType::Access.default_lifetime().num_seconds(),
        })
    }

    /// Argon2 off the async workers. Any verification error counts as a
    /// mismatch.
    async fn check_password(&self, password: &str, encoded: String) -> bool {
        let password = password.to_string();
        let start = Instant::now();

        let result =
            tokio::task::spawn_blocking(move || verify_password(&password, &encoded)).await;
        record_password_duration("verify", start.elapsed());

        match result {
            Ok(Ok(matches)) => matches,
            Ok(Err(e)) => {
                tracing::error!(target: "auth.session", error = %e, "Stored password hash is unreadable");
                false
            }
            Err(e) => {
                tracing::error!(target: "auth.session", error = %e, "Password verification task failed");
                false
            }
        }
    }

    /// Exchange a refresh token for a new access token.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, AuthError> {
        let user_id = self.tokens.validate_refresh_token(refresh_token)?;

        match self.users.get_user_by_id(user_id).await? {
            Some(user) if user.is_active => {}
            _ => {
                tracing::debug!(target: "auth.session", user_id, "Refresh rejected: user missing or inactive");
                return Err(AuthError::InvalidCredentials);
            }
        }

        let access_token = self.tokens.create_access_token(user_id).await?;

        Ok(RefreshResponse {
            access_token,
            token_type: BEARER_TOKEN_TYPE.to_string(),
            expires_in: TokenType::Access.default_lifetime().num_seconds(),
        })
    }

    /// Revoke the access token the request was authenticated with.
    #[instrument(skip_all)]
    pub fn logout(&self, ctx: &RequestContext) {
        self.tokens.invalidate_token(ctx.token.expose_secret());
        tracing::info!(target: "auth.session", user_id = ctx.user.id, "User logged out");
    }

    /// Current view of the authenticated user.
    #[instrument(skip_all)]
    pub async fn whoami(&self, ctx: &RequestContext) -> Result<WhoAmIResponse, AuthError> {
        let user: User = self
            .users
            .get_user_by_id(ctx.user.id)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        Ok(WhoAmIResponse::from(&user))
    }
}
