use crate::oauth2::registrar::GrantType;
use crate::oauth2::scope::ScopeSet;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    pub oauth2: OAuth2Config,
    /// Clients upserted into the registry at startup.
    #[serde(default)]
    pub clients: Vec<ClientSeed>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct OAuth2Config {
    /// Issuer URL placed in every token and the discovery document.
    pub issuer: String,
    /// HS256 signing key, at least 32 bytes.
    pub token_secret: String,
    #[serde(default = "default_access_token_ttl")]
    pub access_token_ttl_secs: i64,
    #[serde(default = "default_refresh_token_ttl")]
    pub refresh_token_ttl_secs: i64,
    #[serde(default = "default_code_ttl")]
    pub authorization_code_ttl_secs: i64,
    #[serde(default = "default_request_ttl")]
    pub authorization_request_ttl_secs: i64,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: i64,
    #[serde(default = "default_true")]
    pub rotate_refresh_tokens: bool,
    #[serde(default = "default_persistence_timeout_ms")]
    pub persistence_timeout_ms: u64,
    /// Mark cookies `Secure`. Only disable for plain-HTTP development.
    #[serde(default = "default_true")]
    pub secure_cookies: bool,
    /// Use `X-Forwarded-For` / `X-Real-IP` as the client address. Only
    /// enable behind a reverse proxy that overwrites these headers.
    #[serde(default)]
    pub trust_proxy_headers: bool,
    #[serde(default)]
    pub login_rate_limit: LoginRateLimitConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoginRateLimitConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for LoginRateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            window_secs: default_window_secs(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ClientSeed {
    pub id: String,
    pub name: String,
    /// `public` or `confidential`
    #[serde(default = "default_client_type")]
    pub client_type: String,
    /// Plain-text secret; hashed before it is stored.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    pub scopes: String,
    #[serde(default = "default_grant_types")]
    pub grant_types: Vec<String>,
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_access_token_ttl() -> i64 {
    3600
}
fn default_refresh_token_ttl() -> i64 {
    30 * 24 * 3600
}
fn default_code_ttl() -> i64 {
    600
}
fn default_request_ttl() -> i64 {
    600
}
fn default_session_ttl() -> i64 {
    8 * 3600
}
fn default_true() -> bool {
    true
}
fn default_persistence_timeout_ms() -> u64 {
    5000
}
fn default_max_attempts() -> u32 {
    5
}
fn default_window_secs() -> u64 {
    900
}
fn default_client_type() -> String {
    "public".to_string()
}
fn default_grant_types() -> Vec<String> {
    vec!["authorization_code".to_string(), "refresh_token".to_string()]
}

impl OAuth2Config {
    /// Configuration with every tunable at its default.
    pub fn new(issuer: impl Into<String>, token_secret: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            token_secret: token_secret.into(),
            access_token_ttl_secs: default_access_token_ttl(),
            refresh_token_ttl_secs: default_refresh_token_ttl(),
            authorization_code_ttl_secs: default_code_ttl(),
            authorization_request_ttl_secs: default_request_ttl(),
            session_ttl_secs: default_session_ttl(),
            rotate_refresh_tokens: true,
            persistence_timeout_ms: default_persistence_timeout_ms(),
            secure_cookies: true,
            trust_proxy_headers: false,
            login_rate_limit: LoginRateLimitConfig::default(),
        }
    }

    pub fn persistence_timeout(&self) -> Duration {
        Duration::from_millis(self.persistence_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token_secret.len() < 32 {
            return Err(ConfigError::Validation(
                "oauth2.token_secret must be at least 32 bytes".into(),
            ));
        }
        match url::Url::parse(&self.issuer) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(ConfigError::Validation(format!(
                    "oauth2.issuer '{}' is not an http(s) URL",
                    self.issuer
                )));
            }
        }
        for (name, value) in [
            ("access_token_ttl_secs", self.access_token_ttl_secs),
            ("refresh_token_ttl_secs", self.refresh_token_ttl_secs),
            ("authorization_code_ttl_secs", self.authorization_code_ttl_secs),
            ("authorization_request_ttl_secs", self.authorization_request_ttl_secs),
            ("session_ttl_secs", self.session_ttl_secs),
        ] {
            if value <= 0 {
                return Err(ConfigError::Validation(format!(
                    "oauth2.{name} must be > 0"
                )));
            }
        }
        if self.persistence_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "oauth2.persistence_timeout_ms must be > 0".into(),
            ));
        }
        if self.login_rate_limit.max_attempts == 0 || self.login_rate_limit.window_secs == 0 {
            return Err(ConfigError::Validation(
                "oauth2.login_rate_limit values must be > 0".into(),
            ));
        }
        Ok(())
    }
}

impl ClientSeed {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| ConfigError::Validation(format!("client '{}': {msg}", self.id));

        if self.id.is_empty() {
            return Err(ConfigError::Validation("client id must not be empty".into()));
        }
        match (self.client_type.as_str(), &self.secret) {
            ("public", None) => {}
            ("public", Some(_)) => return Err(invalid("public clients must not have a secret".into())),
            ("confidential", Some(s)) if !s.is_empty() => {}
            ("confidential", _) => return Err(invalid("confidential clients need a secret".into())),
            (other, _) => return Err(invalid(format!("unknown client_type '{other}'"))),
        }

        let grants = self
            .grant_types
            .iter()
            .map(|g| g.parse::<GrantType>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| invalid(e.to_string()))?;
        if grants.contains(&GrantType::ClientCredentials) && self.client_type != "confidential" {
            return Err(invalid("client_credentials requires a confidential client".into()));
        }
        if grants.contains(&GrantType::AuthorizationCode) && self.redirect_uris.is_empty() {
            return Err(invalid("authorization_code requires a redirect URI".into()));
        }

        for uri in &self.redirect_uris {
            let parsed = url::Url::parse(uri).map_err(|e| invalid(format!("redirect URI '{uri}': {e}")))?;
            if parsed.fragment().is_some() {
                return Err(invalid(format!("redirect URI '{uri}' must not contain a fragment")));
            }
        }

        let scopes: ScopeSet = self
            .scopes
            .parse()
            .map_err(|e| invalid(format!("{e}")))?;
        if scopes.is_empty() {
            return Err(invalid("at least one scope is required".into()));
        }
        Ok(())
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.oauth2.validate()?;
        for client in &self.clients {
            client.validate()?;
        }
        Ok(())
    }
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// Environment variables override file values using the key path separated
/// by double underscores, e.g. `OAUTH2__TOKEN_SECRET`.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};
    let cfg = Config::builder()
        .add_source(File::with_name("config.yaml").required(false))
        .add_source(Environment::default().separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;
    Ok(app)
}

/// Convenience helper for binaries wanting panic-on-error behaviour.
pub fn load_config_or_panic() -> AppConfig {
    match load_config() {
        Ok(c) => c,
        Err(e) => panic!("Failed to load configuration: {e}"),
    }
}
