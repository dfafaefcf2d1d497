//! Token exchange engine.
//!
//! Redeems authorization codes, rotates refresh tokens and serves the
//! `client_credentials` grant. Every outcome is a [`TokenSet`] or an
//! [`OAuthError`]; nothing else reaches the wire.

use crate::audit::{AuditAction, AuditEvent};
use crate::entity::{oauth2_authorization, oauth2_refresh_token};
use crate::error::OAuthError;
use crate::oauth2::codec::{AccessClaims, RefreshClaims};
use crate::oauth2::pkce::{self, CodeChallengeMethod};
use crate::oauth2::registrar::{Client, GrantType};
use crate::oauth2::scope::ScopeSet;
use crate::oauth2::state::OAuth2State;
use axum::http::HeaderMap;
use base64::Engine;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter,
    sea_query::Expr,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

/// Body of `POST /oauth2/token`. Fields are optional so missing parameters
/// become `invalid_request` instead of a form rejection.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

/// Successful token response (RFC 6749 Section 5.1).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenSet {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub scope: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RevokeRequest {
    pub token: Option<String>,
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Client credentials from HTTP Basic, falling back to the form body.
pub fn extract_client_credentials(
    headers: &HeaderMap,
    body_id: Option<&str>,
    body_secret: Option<&str>,
) -> (Option<String>, Option<String>) {
    // Try Basic auth first
    if let Some(auth) = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        && let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(auth)
        && let Ok(creds) = String::from_utf8(decoded)
        && let Some((id, secret)) = creds.split_once(':')
    {
        let id = urlencoding::decode(id).map(|s| s.into_owned()).unwrap_or_else(|_| id.to_string());
        let secret = urlencoding::decode(secret)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| secret.to_string());
        return (Some(id), Some(secret));
    }

    // Fall back to form body
    (
        body_id.filter(|s| !s.is_empty()).map(str::to_string),
        body_secret.filter(|s| !s.is_empty()).map(str::to_string),
    )
}

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, OAuthError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| OAuthError::InvalidRequest(format!("{name} is required")))
}

/// Resolve and authenticate the calling client.
pub async fn authenticate_client(
    state: &OAuth2State,
    client_id: Option<&str>,
    client_secret: Option<&str>,
) -> Result<Client, OAuthError> {
    let client_id = required(client_id, "client_id")?;
    let client = state.registrar.resolve(client_id).await?;
    client.authenticate(client_secret)?;
    Ok(client)
}

/// Dispatch a token request to its grant handler.
#[tracing::instrument(skip_all, fields(grant_type = ?request.grant_type))]
pub async fn exchange(
    state: &OAuth2State,
    headers: &HeaderMap,
    request: &TokenRequest,
) -> Result<TokenSet, OAuthError> {
    let grant_type = required(request.grant_type.as_deref(), "grant_type")?;
    let (client_id, client_secret) = extract_client_credentials(
        headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    );
    let client =
        authenticate_client(state, client_id.as_deref(), client_secret.as_deref()).await?;

    let grant: GrantType = grant_type.parse()?;
    client.allows_grant(grant)?;

    match grant {
        GrantType::AuthorizationCode => redeem_code(state, &client, request).await,
        GrantType::RefreshToken => refresh(state, &client, request).await,
        GrantType::ClientCredentials => client_credentials(state, &client, request),
    }
}

fn user_access(
    state: &OAuth2State,
    user_id: &str,
    client_id: &str,
    scopes: &ScopeSet,
) -> Result<String, OAuthError> {
    let ttl = state.config.access_token_ttl_secs;
    issue_access(state, AccessClaims::new(state.issuer(), user_id, client_id, scopes, ttl))
}

fn issue_access(state: &OAuth2State, claims: AccessClaims) -> Result<String, OAuthError> {
    state
        .codec
        .issue(&claims)
        .map_err(|e| OAuthError::server(format!("failed to sign access token: {e}")))
}

/// Sign a refresh token and record it so it can be rotated or revoked.
async fn issue_refresh(
    state: &OAuth2State,
    user_id: &str,
    client_id: &str,
    scopes: &ScopeSet,
    family: &str,
    exp: i64,
) -> Result<String, OAuthError> {
    let claims = RefreshClaims::new(state.issuer(), user_id, client_id, scopes, family, exp);
    let token = state
        .codec
        .issue(&claims)
        .map_err(|e| OAuthError::server(format!("failed to sign refresh token: {e}")))?;

    let expires_at = OffsetDateTime::from_unix_timestamp(exp)
        .map_err(|e| OAuthError::server(format!("refresh expiry out of range: {e}")))?;
    let row = oauth2_refresh_token::ActiveModel {
        jti: Set(claims.jti),
        family_id: Set(family.to_string()),
        client_id: Set(client_id.to_string()),
        user_id: Set(user_id.to_string()),
        scope: Set(scopes.to_string()),
        expires_at: Set(expires_at),
        created_at: Set(OffsetDateTime::now_utc()),
        consumed_at: Set(None),
        revoked_at: Set(None),
    };
    state.bounded(row.insert(state.db.as_ref())).await?;
    Ok(token)
}

/// Revoke every live refresh token in `family`. Returns how many were hit.
pub async fn revoke_family(state: &OAuth2State, family: &str) -> Result<u64, OAuthError> {
    let result = state
        .bounded(
            oauth2_refresh_token::Entity::update_many()
                .col_expr(
                    oauth2_refresh_token::Column::RevokedAt,
                    Expr::value(OffsetDateTime::now_utc()),
                )
                .filter(oauth2_refresh_token::Column::FamilyId.eq(family))
                .filter(oauth2_refresh_token::Column::RevokedAt.is_null())
                .exec(state.db.as_ref()),
        )
        .await?;
    Ok(result.rows_affected)
}

/// Parse a stored grant and make sure the client may still hold all of it.
fn granted_scopes(client: &Client, stored: &str) -> Result<ScopeSet, OAuthError> {
    let scopes: ScopeSet = stored
        .parse()
        .map_err(|e| OAuthError::server(format!("stored scope: {e}")))?;
    if !scopes.is_subset(&client.scopes) {
        let disallowed: Vec<&str> = scopes.difference(&client.scopes).collect();
        tracing::warn!(client_id = %client.id, disallowed = ?disallowed, "Grant exceeds the client's allowed scopes");
        return Err(OAuthError::InvalidScope(
            "The grant includes scopes the client is no longer allowed".to_string(),
        ));
    }
    Ok(scopes)
}

fn bad_code() -> OAuthError {
    OAuthError::InvalidGrant("Invalid or expired authorization code".to_string())
}

/// `authorization_code` grant.
#[tracing::instrument(skip_all, fields(client_id = %client.id))]
pub async fn redeem_code(
    state: &OAuth2State,
    client: &Client,
    request: &TokenRequest,
) -> Result<TokenSet, OAuthError> {
    let code = required(request.code.as_deref(), "code")?;
    let redirect_uri = required(request.redirect_uri.as_deref(), "redirect_uri")?;
    let verifier = required(request.code_verifier.as_deref(), "code_verifier")?;

    let code_hash = OAuth2State::hash_code(code);
    let Some(record) = state
        .bounded(oauth2_authorization::Entity::find_by_id(code_hash.as_str()).one(state.db.as_ref()))
        .await?
    else {
        return Err(bad_code());
    };

    if record.is_consumed() {
        // Replay: everything minted from this code is suspect.
        let revoked = match record.token_family.as_deref() {
            Some(family) => revoke_family(state, family).await?,
            None => 0,
        };
        tracing::warn!(client_id = %client.id, revoked, "Authorization code replayed");
        state
            .audit(
                AuditEvent::failure(AuditAction::CodeReplay)
                    .actor(record.user_id.as_str())
                    .client(&client.id)
                    .detail("revoked_tokens", revoked),
            )
            .await;
        return Err(bad_code());
    }

    if record.is_expired() {
        return Err(bad_code());
    }
    if record.client_id != client.id {
        tracing::warn!(client_id = %client.id, "Authorization code presented by another client");
        return Err(bad_code());
    }
    if record.redirect_uri != redirect_uri {
        return Err(OAuthError::InvalidGrant(
            "redirect_uri does not match the authorization request".to_string(),
        ));
    }

    let method: CodeChallengeMethod = record
        .code_challenge_method
        .parse()
        .map_err(|e| OAuthError::server(format!("stored challenge method: {e}")))?;
    pkce::verify(verifier, &record.code_challenge, method)
        .map_err(|e| OAuthError::InvalidGrant(e.to_string()))?;

    let scopes = granted_scopes(client, &record.scope)?;

    let issue_refresh_token = client.allows_grant(GrantType::RefreshToken).is_ok();
    let family = issue_refresh_token.then(|| uuid::Uuid::new_v4().to_string());

    // Single-use: only the caller that flips consumed_at from NULL proceeds.
    let consumed = state
        .bounded(
            oauth2_authorization::Entity::update_many()
                .col_expr(
                    oauth2_authorization::Column::ConsumedAt,
                    Expr::value(OffsetDateTime::now_utc()),
                )
                .col_expr(
                    oauth2_authorization::Column::TokenFamily,
                    Expr::value(family.clone()),
                )
                .filter(oauth2_authorization::Column::CodeHash.eq(code_hash.as_str()))
                .filter(oauth2_authorization::Column::ConsumedAt.is_null())
                .exec(state.db.as_ref()),
        )
        .await?;
    if consumed.rows_affected != 1 {
        return Err(bad_code());
    }

    if state.find_active_user(&record.user_id).await?.is_none() {
        return Err(OAuthError::InvalidGrant(
            "The resource owner is no longer active".to_string(),
        ));
    }

    let access_token = user_access(state, &record.user_id, &client.id, &scopes)?;

    let refresh_token = match family.as_deref() {
        Some(family) => {
            let exp = OffsetDateTime::now_utc().unix_timestamp()
                + state.config.refresh_token_ttl_secs;
            Some(issue_refresh(state, &record.user_id, &client.id, &scopes, family, exp).await?)
        }
        None => None,
    };

    state
        .audit(
            AuditEvent::success(AuditAction::TokenIssued)
                .actor(record.user_id.as_str())
                .client(&client.id)
                .detail("grant_type", "authorization_code")
                .detail("scope", scopes.to_string()),
        )
        .await;

    Ok(TokenSet {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.config.access_token_ttl_secs,
        refresh_token,
        scope: scopes.to_string(),
    })
}

fn bad_refresh() -> OAuthError {
    OAuthError::InvalidGrant("Invalid or expired refresh token".to_string())
}

/// `refresh_token` grant.
#[tracing::instrument(skip_all, fields(client_id = %client.id))]
pub async fn refresh(
    state: &OAuth2State,
    client: &Client,
    request: &TokenRequest,
) -> Result<TokenSet, OAuthError> {
    let token = required(request.refresh_token.as_deref(), "refresh_token")?;
    let claims = state.codec.verify::<RefreshClaims>(token).map_err(|e| {
        tracing::debug!(error = %e, "Rejected refresh token");
        bad_refresh()
    })?;

    if claims.client_id != client.id {
        tracing::warn!(client_id = %client.id, "Refresh token presented by another client");
        return Err(bad_refresh());
    }

    let Some(record) = state
        .bounded(
            oauth2_refresh_token::Entity::find_by_id(claims.jti.as_str())
                .one(state.db.as_ref()),
        )
        .await?
    else {
        return Err(bad_refresh());
    };
    if record.is_revoked() || record.client_id != client.id {
        return Err(bad_refresh());
    }

    let rotate = state.config.rotate_refresh_tokens;
    if rotate && record.is_consumed() {
        return Err(refresh_reuse(state, client, &record).await);
    }

    let original = granted_scopes(client, &record.scope)?;
    let scopes = match request.scope.as_deref().map(str::trim) {
        None | Some("") => original.clone(),
        Some(requested) => {
            let requested: ScopeSet = requested
                .parse()
                .map_err(|e| OAuthError::InvalidScope(format!("{e}")))?;
            if !requested.is_subset(&original) {
                return Err(OAuthError::InvalidScope(
                    "Requested scope exceeds the original grant".to_string(),
                ));
            }
            requested
        }
    };

    if state.find_active_user(&record.user_id).await?.is_none() {
        return Err(OAuthError::InvalidGrant(
            "The resource owner is no longer active".to_string(),
        ));
    }

    let refresh_token = if rotate {
        let consumed = state
            .bounded(
                oauth2_refresh_token::Entity::update_many()
                    .col_expr(
                        oauth2_refresh_token::Column::ConsumedAt,
                        Expr::value(OffsetDateTime::now_utc()),
                    )
                    .filter(oauth2_refresh_token::Column::Jti.eq(record.jti.as_str()))
                    .filter(oauth2_refresh_token::Column::ConsumedAt.is_null())
                    .filter(oauth2_refresh_token::Column::RevokedAt.is_null())
                    .exec(state.db.as_ref()),
            )
            .await?;
        if consumed.rows_affected != 1 {
            // A concurrent request rotated the same token first.
            return Err(refresh_reuse(state, client, &record).await);
        }
        Some(
            issue_refresh(
                state,
                &record.user_id,
                &client.id,
                &original,
                &record.family_id,
                claims.exp,
            )
            .await?,
        )
    } else {
        None
    };

    let access_token = user_access(state, &record.user_id, &client.id, &scopes)?;

    state
        .audit(
            AuditEvent::success(AuditAction::TokenRefreshed)
                .actor(record.user_id.as_str())
                .client(&client.id)
                .detail("family", record.family_id.as_str())
                .detail("rotated", rotate),
        )
        .await;

    Ok(TokenSet {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.config.access_token_ttl_secs,
        refresh_token,
        scope: scopes.to_string(),
    })
}

/// A rotated refresh token came back: revoke the whole family.
async fn refresh_reuse(
    state: &OAuth2State,
    client: &Client,
    record: &oauth2_refresh_token::Model,
) -> OAuthError {
    let revoked = match revoke_family(state, &record.family_id).await {
        Ok(n) => n,
        Err(e) => return e,
    };
    tracing::warn!(
        client_id = %client.id,
        family = %record.family_id,
        revoked,
        "Rotated refresh token reused; family revoked"
    );
    state
        .audit(
            AuditEvent::failure(AuditAction::RefreshReuse)
                .actor(record.user_id.as_str())
                .client(&client.id)
                .detail("family", record.family_id.as_str())
                .detail("revoked_tokens", revoked),
        )
        .await;
    bad_refresh()
}

/// `client_credentials` grant, for confidential machine clients only.
#[tracing::instrument(skip_all, fields(client_id = %client.id))]
pub fn client_credentials(
    state: &OAuth2State,
    client: &Client,
    request: &TokenRequest,
) -> Result<TokenSet, OAuthError> {
    if client.is_public() {
        return Err(OAuthError::UnauthorizedClient(
            "Public clients cannot use the client_credentials grant".to_string(),
        ));
    }

    let scopes = match request.scope.as_deref().map(str::trim) {
        None | Some("") => client.scopes.clone(),
        Some(requested) => client.validate_scopes(Some(requested))?,
    };
    let claims = AccessClaims::for_client(
        state.issuer(),
        &client.id,
        &scopes,
        state.config.access_token_ttl_secs,
    );
    let access_token = issue_access(state, claims)?;

    Ok(TokenSet {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.config.access_token_ttl_secs,
        refresh_token: None,
        scope: scopes.to_string(),
    })
}

/// Token revocation (RFC 7009). Unknown or foreign tokens are ignored.
#[tracing::instrument(skip_all)]
pub async fn revoke(
    state: &OAuth2State,
    headers: &HeaderMap,
    request: &RevokeRequest,
) -> Result<(), OAuthError> {
    let (client_id, client_secret) = extract_client_credentials(
        headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    );
    let client =
        authenticate_client(state, client_id.as_deref(), client_secret.as_deref()).await?;
    let token = required(request.token.as_deref(), "token")?;

    // Access tokens are self-contained and expire on their own; only
    // refresh tokens have server-side state to revoke.
    let Ok(claims) = state.codec.verify::<RefreshClaims>(token) else {
        return Ok(());
    };
    if claims.client_id != client.id {
        return Ok(());
    }

    let revoked = revoke_family(state, &claims.fam).await?;
    state
        .audit(
            AuditEvent::success(AuditAction::TokenRevoked)
                .actor(claims.sub.as_str())
                .client(&client.id)
                .detail("revoked_tokens", revoked),
        )
        .await;
    Ok(())
}

/// Delete refresh token records past their absolute expiry.
pub async fn purge_expired(state: &OAuth2State) -> Result<u64, OAuthError> {
    let result = state
        .bounded(
            oauth2_refresh_token::Entity::delete_many()
                .filter(oauth2_refresh_token::Column::ExpiresAt.lt(OffsetDateTime::now_utc()))
                .exec(state.db.as_ref()),
        )
        .await?;
    Ok(result.rows_affected)
}
