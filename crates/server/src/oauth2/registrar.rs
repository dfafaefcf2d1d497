//! Database-backed OAuth2 client registry.
//!
//! Clients are looked up by `client_id` and cached briefly in-process. Only
//! active clients resolve; everything else is reported as `invalid_client`.

use crate::cache::ClientCache;
use crate::config::ClientSeed;
use crate::entity::oauth2_client;
use crate::error::OAuthError;
use crate::oauth2::password::{hash_password, verify_password};
use crate::oauth2::scope::ScopeSet;
use crate::oauth2::state::bounded;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, DatabaseConnection, EntityTrait};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrantType {
    AuthorizationCode,
    RefreshToken,
    ClientCredentials,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::RefreshToken => "refresh_token",
            Self::ClientCredentials => "client_credentials",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantType {
    type Err = OAuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization_code" => Ok(Self::AuthorizationCode),
            "refresh_token" => Ok(Self::RefreshToken),
            "client_credentials" => Ok(Self::ClientCredentials),
            other => Err(OAuthError::UnsupportedGrantType(format!(
                "Grant type '{other}' is not supported"
            ))),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum ClientKind {
    Public,
    Confidential { secret_hash: String },
}

impl fmt::Debug for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => f.write_str("Public"),
            Self::Confidential { .. } => f.write_str("Confidential"),
        }
    }
}

/// A registered, active client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub id: String,
    pub name: String,
    pub kind: ClientKind,
    pub redirect_uris: Vec<String>,
    pub scopes: ScopeSet,
    pub grant_types: Vec<GrantType>,
}

impl TryFrom<oauth2_client::Model> for Client {
    type Error = OAuthError;

    fn try_from(model: oauth2_client::Model) -> Result<Self, Self::Error> {
        let kind = match (model.client_type.as_str(), model.secret_hash.clone()) {
            (oauth2_client::CLIENT_TYPE_PUBLIC, _) => ClientKind::Public,
            (oauth2_client::CLIENT_TYPE_CONFIDENTIAL, Some(secret_hash)) => {
                ClientKind::Confidential { secret_hash }
            }
            (other, _) => {
                return Err(OAuthError::server(format!(
                    "client {} has inconsistent type '{other}'",
                    model.id
                )));
            }
        };

        let scopes = model.scopes.parse().map_err(|e| {
            OAuthError::server(format!("client {} has malformed scopes: {e}", model.id))
        })?;

        // Unknown grant names in storage are ignored rather than failing the client.
        let grant_types = model
            .grant_types
            .split_whitespace()
            .filter_map(|g| g.parse().ok())
            .collect();

        Ok(Self {
            redirect_uris: model.redirect_uris_list(),
            id: model.id,
            name: model.name,
            kind,
            scopes,
            grant_types,
        })
    }
}

impl Client {
    pub fn is_public(&self) -> bool {
        matches!(self.kind, ClientKind::Public)
    }

    /// Byte-exact comparison against the registered URIs.
    pub fn validate_redirect_uri(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|allowed| allowed == uri)
    }

    pub fn allows_grant(&self, grant: GrantType) -> Result<(), OAuthError> {
        if self.grant_types.contains(&grant) {
            Ok(())
        } else {
            Err(OAuthError::UnauthorizedClient(format!(
                "Client is not allowed to use the {grant} grant"
            )))
        }
    }

    /// Parse a requested scope string; it must be non-empty and within the
    /// client's allowed scopes.
    pub fn validate_scopes(&self, requested: Option<&str>) -> Result<ScopeSet, OAuthError> {
        let scopes: ScopeSet = requested
            .unwrap_or_default()
            .parse()
            .map_err(|e| OAuthError::InvalidScope(format!("{e}")))?;

        if scopes.is_empty() {
            return Err(OAuthError::InvalidScope("scope is required".to_string()));
        }
        if !scopes.is_subset(&self.scopes) {
            let extra: Vec<&str> = scopes.difference(&self.scopes).collect();
            return Err(OAuthError::InvalidScope(format!(
                "Scope not allowed for this client: {}",
                extra.join(" ")
            )));
        }
        Ok(scopes)
    }

    /// Public clients present no secret; confidential clients must present
    /// one matching the stored hash.
    pub fn authenticate(&self, secret: Option<&str>) -> Result<(), OAuthError> {
        match (&self.kind, secret) {
            (ClientKind::Public, _) => Ok(()),
            (ClientKind::Confidential { secret_hash }, Some(secret))
                if verify_password(secret, secret_hash) =>
            {
                Ok(())
            }
            (ClientKind::Confidential { .. }, _) => Err(OAuthError::InvalidClient(
                "Client authentication failed".to_string(),
            )),
        }
    }
}

/// Client lookups backed by the `oauth2_client` table.
#[derive(Clone)]
pub struct ClientRegistry {
    db: Arc<DatabaseConnection>,
    cache: ClientCache,
    timeout: Duration,
}

impl ClientRegistry {
    pub fn new(db: Arc<DatabaseConnection>, timeout: Duration) -> Self {
        Self {
            db,
            cache: ClientCache::default(),
            timeout,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, client_id: &str) -> Result<Client, OAuthError> {
        if let Some(client) = self.cache.get(&client_id.to_string()) {
            return Ok(client);
        }

        let model = bounded(
            self.timeout,
            oauth2_client::Entity::find_by_id(client_id).one(self.db.as_ref()),
        )
        .await?;

        let model = match model {
            Some(m) if m.is_active() => m,
            _ => {
                tracing::debug!(client_id, "Unknown or inactive client");
                return Err(OAuthError::InvalidClient("Unknown client".to_string()));
            }
        };

        let client = Client::try_from(model)?;
        self.cache.insert(client.id.clone(), client.clone());
        Ok(client)
    }

    /// Insert or update a client from a configuration seed.
    ///
    /// An existing secret hash is kept when it still verifies against the
    /// seed's secret so restarts do not churn the stored hash.
    #[tracing::instrument(skip(self, seed), fields(client_id = %seed.id))]
    pub async fn register(&self, seed: &ClientSeed) -> Result<(), OAuthError> {
        let existing = bounded(
            self.timeout,
            oauth2_client::Entity::find_by_id(seed.id.as_str()).one(self.db.as_ref()),
        )
        .await?;

        let secret_hash = match (&seed.secret, existing.as_ref().and_then(|e| e.secret_hash.clone())) {
            (None, _) => None,
            (Some(secret), Some(current)) if verify_password(secret, &current) => Some(current),
            (Some(secret), _) => Some(
                hash_password(secret)
                    .map_err(|e| OAuthError::server(format!("failed to hash client secret: {e}")))?,
            ),
        };

        let redirect_uris = serde_json::to_string(&seed.redirect_uris)
            .map_err(|e| OAuthError::server(format!("failed to encode redirect URIs: {e}")))?;
        let grant_types = seed
            .grant_types
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ");
        let now = OffsetDateTime::now_utc();

        match existing {
            Some(model) => {
                let mut active: oauth2_client::ActiveModel = model.into();
                active.name = Set(seed.name.clone());
                active.client_type = Set(seed.client_type.clone());
                active.secret_hash = Set(secret_hash);
                active.redirect_uris = Set(redirect_uris);
                active.grant_types = Set(grant_types);
                active.scopes = Set(seed.scopes.clone());
                active.status = Set(oauth2_client::STATUS_ACTIVE.to_string());
                active.updated_at = Set(now);
                bounded(self.timeout, active.update(self.db.as_ref())).await?;
                tracing::info!("Updated OAuth2 client from configuration");
            }
            None => {
                let active = oauth2_client::ActiveModel {
                    id: Set(seed.id.clone()),
                    name: Set(seed.name.clone()),
                    client_type: Set(seed.client_type.clone()),
                    secret_hash: Set(secret_hash),
                    redirect_uris: Set(redirect_uris),
                    grant_types: Set(grant_types),
                    scopes: Set(seed.scopes.clone()),
                    status: Set(oauth2_client::STATUS_ACTIVE.to_string()),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                bounded(self.timeout, active.insert(self.db.as_ref())).await?;
                tracing::info!("Registered OAuth2 client from configuration");
            }
        }

        self.invalidate(&seed.id);
        Ok(())
    }

    pub fn invalidate(&self, client_id: &str) {
        self.cache.invalidate(&client_id.to_string());
    }
}
