//! Bearer token authentication for protected resources.

use crate::entity::oauth2_user;
use crate::error::OAuthError;
use crate::oauth2::codec::{AccessClaims, SubjectKind};
use crate::oauth2::scope::ScopeSet;
use crate::oauth2::state::OAuth2State;
use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};

/// The user and grant behind a verified access token.
#[derive(Debug, Clone)]
pub struct AuthenticatedPrincipal {
    pub user: oauth2_user::Model,
    pub client_id: String,
    pub scopes: ScopeSet,
    /// Unix timestamp
    pub expires_at: i64,
}

impl AuthenticatedPrincipal {
    pub fn require_scope(&self, scope: &str) -> Result<(), OAuthError> {
        require_scope(&self.scopes, scope)
    }
}

pub fn require_scope(granted: &ScopeSet, scope: &str) -> Result<(), OAuthError> {
    if granted.contains(scope) {
        Ok(())
    } else {
        Err(OAuthError::InsufficientScope(scope.to_string()))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

fn unauthorized() -> OAuthError {
    OAuthError::InvalidToken("The access token is missing, invalid or expired".to_string())
}

/// Verify the bearer token and re-resolve its subject.
///
/// Every failure collapses to the same `invalid_token` so callers learn
/// nothing about why a token was refused.
#[tracing::instrument(skip_all)]
pub async fn authenticate(
    state: &OAuth2State,
    headers: &HeaderMap,
) -> Result<AuthenticatedPrincipal, OAuthError> {
    let token = bearer_token(headers).ok_or_else(unauthorized)?;

    let claims = state.codec.verify::<AccessClaims>(token).map_err(|e| {
        tracing::debug!(error = %e, "Rejected access token");
        unauthorized()
    })?;

    // Machine tokens name a client, never a resource owner.
    if claims.sub_kind != SubjectKind::User {
        tracing::debug!(client_id = %claims.client_id, "Client token presented as a user token");
        return Err(unauthorized());
    }

    // Tokens are not revocable; a deactivated user must stop working now.
    let Some(user) = state.find_active_user(&claims.sub).await? else {
        tracing::debug!(sub = %claims.sub, "Access token subject is not an active user");
        return Err(unauthorized());
    };

    Ok(AuthenticatedPrincipal {
        scopes: claims.scopes(),
        client_id: claims.client_id,
        expires_at: claims.exp,
        user,
    })
}

/// Extractor form of [`authenticate`].
#[derive(Debug, Clone)]
pub struct BearerAuth(pub AuthenticatedPrincipal);

impl FromRequestParts<OAuth2State> for BearerAuth {
    type Rejection = OAuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &OAuth2State,
    ) -> Result<Self, Self::Rejection> {
        authenticate(state, &parts.headers).await.map(BearerAuth)
    }
}
