//! OAuth2 state management.
//!
//! Everything the authorization server handlers share lives in
//! [`OAuth2State`]; it is cheap to clone.

use crate::audit::{AuditEvent, AuditLog};
use crate::config::OAuth2Config;
use crate::entity::oauth2_user;
use crate::error::OAuthError;
use crate::oauth2::codec::TokenCodec;
use crate::oauth2::rate_limit::LoginRateLimiter;
use crate::oauth2::registrar::ClientRegistry;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sea_orm::{DatabaseConnection, DbErr, EntityTrait};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Run a persistence call under a deadline. Timeouts and database errors
/// both surface as `server_error`.
pub async fn bounded<T, F>(timeout: Duration, fut: F) -> Result<T, OAuthError>
where
    F: Future<Output = Result<T, DbErr>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(OAuthError::from),
        Err(_) => Err(OAuthError::server(format!(
            "persistence call exceeded {}ms",
            timeout.as_millis()
        ))),
    }
}

/// OAuth2 state containing all components needed for the authorization server.
#[derive(Clone)]
pub struct OAuth2State {
    pub registrar: ClientRegistry,
    pub db: Arc<DatabaseConnection>,
    pub codec: Arc<TokenCodec>,
    pub config: Arc<OAuth2Config>,
    pub login_limiter: LoginRateLimiter,
    pub audit: AuditLog,
}

impl OAuth2State {
    pub fn new(db: Arc<DatabaseConnection>, config: OAuth2Config) -> Self {
        let timeout = config.persistence_timeout();
        Self {
            registrar: ClientRegistry::new(db.clone(), timeout),
            codec: Arc::new(TokenCodec::new(
                config.issuer.clone(),
                config.token_secret.as_bytes(),
            )),
            login_limiter: LoginRateLimiter::new(&config.login_rate_limit),
            audit: AuditLog::new(db.clone(), timeout),
            config: Arc::new(config),
            db,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.config.issuer
    }

    pub async fn bounded<T, F>(&self, fut: F) -> Result<T, OAuthError>
    where
        F: Future<Output = Result<T, DbErr>>,
    {
        bounded(self.config.persistence_timeout(), fut).await
    }

    pub async fn audit(&self, event: AuditEvent) {
        self.audit.record(event).await;
    }

    /// Look up a user that may still act: missing, locked and inactive
    /// accounts all yield `None`.
    pub async fn find_active_user(
        &self,
        user_id: &str,
    ) -> Result<Option<oauth2_user::Model>, OAuthError> {
        let user = self
            .bounded(oauth2_user::Entity::find_by_id(user_id).one(self.db.as_ref()))
            .await?;
        Ok(user.filter(oauth2_user::Model::is_active))
    }

    /// Generate a secure random token (256 bits, base64url).
    pub fn generate_token() -> Result<String, OAuthError> {
        let mut bytes = [0u8; 32];
        getrandom::fill(&mut bytes)
            .map_err(|e| OAuthError::server(format!("random source failed: {e}")))?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Storage key for opaque authorization codes.
    pub fn hash_code(code: &str) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(code.as_bytes()))
    }
}
