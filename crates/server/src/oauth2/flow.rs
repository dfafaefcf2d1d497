//! Authorization state machine.
//!
//! One authorization attempt moves through
//! `Received → ClientValidated → UserAuthenticated → ConsentDecided → CodeIssued`
//! or ends in `Rejected`. Progress is persisted in
//! `oauth2_authorization_request`, keyed by `(client_id, state)`, and every
//! status change is a compare-and-set so a replayed request can never mint a
//! second code.

use crate::entity::{oauth2_authorization, oauth2_authorization_request as auth_request};
use crate::error::OAuthError;
use crate::oauth2::codec::ConsentClaims;
use crate::oauth2::pages::render_error_page;
use crate::oauth2::pkce::{self, CodeChallengeMethod};
use crate::oauth2::registrar::{Client, GrantType};
use crate::oauth2::scope::ScopeSet;
use crate::oauth2::state::OAuth2State;
use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DbErr, EntityTrait, QueryFilter,
    TransactionTrait, sea_query::Expr,
};
use serde::Deserialize;
use time::{Duration, OffsetDateTime};
use utoipa::IntoParams;

/// Raw query of `GET /oauth2/authorize`. Every field is optional so missing
/// parameters are reported as OAuth errors instead of extractor rejections.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuthorizeRequest {
    /// Must be `code`
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    /// Must exactly match a registered redirect URI
    pub redirect_uri: Option<String>,
    /// Space-separated scopes
    pub scope: Option<String>,
    /// Opaque value echoed back to the client
    pub state: Option<String>,
    /// base64url(SHA-256(code_verifier))
    pub code_challenge: Option<String>,
    /// Must be `S256`
    pub code_challenge_method: Option<String>,
}

/// Why an authorization attempt stopped.
#[derive(Debug)]
pub enum Rejection {
    /// Shown to the user agent; no redirect target can be trusted.
    Page(OAuthError),
    /// Sent back to the registered redirect URI.
    Redirect {
        redirect_uri: String,
        state: String,
        error: OAuthError,
    },
}

impl Rejection {
    pub fn error(&self) -> &OAuthError {
        match self {
            Self::Page(error) | Self::Redirect { error, .. } => error,
        }
    }
}

impl From<OAuthError> for Rejection {
    fn from(error: OAuthError) -> Self {
        Self::Page(error)
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        match self {
            Self::Page(error) => render_error_page(&error),
            Self::Redirect {
                redirect_uri,
                state,
                error,
            } => {
                let code = error.code();
                let description = error.description();
                let mut params = vec![("error", code.as_str()), ("state", state.as_str())];
                if let Some(description) = description.as_deref() {
                    params.push(("error_description", description));
                }
                match client_redirect(&redirect_uri, &params) {
                    Ok(response) => response,
                    Err(e) => render_error_page(&e),
                }
            }
        }
    }
}

/// `302 Found` to a registered redirect URI with `params` appended.
pub fn client_redirect(redirect_uri: &str, params: &[(&str, &str)]) -> Result<Response, OAuthError> {
    let mut url = url::Url::parse(redirect_uri)
        .map_err(|e| OAuthError::server(format!("registered redirect URI is invalid: {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in params {
            query.append_pair(key, value);
        }
    }
    Ok((
        StatusCode::FOUND,
        [
            (header::LOCATION, url.to_string()),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
    )
        .into_response())
}

/// Parameters that identify a safe redirect target, taken before anything
/// else is trusted.
#[derive(Debug)]
pub struct ReceivedRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub params: AuthorizeRequest,
}

/// A request whose client, redirect URI, PKCE challenge and scopes have all
/// been checked.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub client: Client,
    pub redirect_uri: String,
    pub state: String,
    pub scopes: ScopeSet,
    pub code_challenge: String,
    pub code_challenge_method: CodeChallengeMethod,
}

/// Outcome of the consent step.
pub struct Decision {
    pub client_id: String,
    pub user_id: String,
    pub approved: bool,
    /// Fully built client redirect (code or `access_denied`)
    pub redirect: Response,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Stage `Received`: make sure a redirect target can even be considered.
pub fn receive(mut params: AuthorizeRequest) -> Result<ReceivedRequest, Rejection> {
    let client_id = non_empty(params.client_id.take())
        .ok_or_else(|| OAuthError::InvalidRequest("client_id is required".to_string()))?;
    let redirect_uri = non_empty(params.redirect_uri.take())
        .ok_or_else(|| OAuthError::InvalidRequest("redirect_uri is required".to_string()))?;

    Ok(ReceivedRequest {
        client_id,
        redirect_uri,
        params,
    })
}

/// Stage `ClientValidated`.
///
/// Errors up to and including the redirect URI check are rendered as a page.
/// Once the redirect URI is known to be registered, errors go back to the
/// client with its `state`.
#[tracing::instrument(skip(state, request), fields(client_id = %request.client_id))]
pub async fn validate_client(
    state: &OAuth2State,
    request: ReceivedRequest,
) -> Result<ValidatedRequest, Rejection> {
    let ReceivedRequest {
        client_id,
        redirect_uri,
        params,
    } = request;

    let client = state.registrar.resolve(&client_id).await?;

    if !client.validate_redirect_uri(&redirect_uri) {
        tracing::warn!(client_id = %client.id, "Rejected unregistered redirect_uri");
        return Err(Rejection::Page(OAuthError::InvalidRequest(
            "The redirect_uri is not registered for this client".to_string(),
        )));
    }

    // Without `state` the client cannot correlate a redirected error.
    let Some(state_param) = non_empty(params.state) else {
        return Err(Rejection::Page(OAuthError::InvalidRequest(
            "state is required".to_string(),
        )));
    };

    let redirect_error = |error: OAuthError| Rejection::Redirect {
        redirect_uri: redirect_uri.clone(),
        state: state_param.clone(),
        error,
    };

    match params.response_type.as_deref() {
        Some("code") => {}
        Some(other) => {
            return Err(redirect_error(OAuthError::UnsupportedResponseType(format!(
                "response_type '{other}' is not supported"
            ))));
        }
        None => {
            return Err(redirect_error(OAuthError::InvalidRequest(
                "response_type is required".to_string(),
            )));
        }
    }

    client
        .allows_grant(GrantType::AuthorizationCode)
        .map_err(redirect_error)?;

    let method = match params.code_challenge_method.as_deref() {
        Some(m) => m
            .parse::<CodeChallengeMethod>()
            .map_err(|e| redirect_error(OAuthError::InvalidRequest(e.to_string())))?,
        None => {
            return Err(redirect_error(OAuthError::InvalidRequest(
                "code_challenge_method is required".to_string(),
            )));
        }
    };

    let code_challenge = non_empty(params.code_challenge).ok_or_else(|| {
        redirect_error(OAuthError::InvalidRequest(
            "code_challenge is required".to_string(),
        ))
    })?;
    pkce::validate_challenge(&code_challenge)
        .map_err(|e| redirect_error(OAuthError::InvalidRequest(e.to_string())))?;

    let scopes = client
        .validate_scopes(params.scope.as_deref())
        .map_err(redirect_error)?;

    Ok(ValidatedRequest {
        client,
        redirect_uri,
        state: state_param,
        scopes,
        code_challenge,
        code_challenge_method: method,
    })
}

fn same_request(existing: &auth_request::Model, request: &ValidatedRequest) -> bool {
    existing.redirect_uri == request.redirect_uri
        && existing.scope == request.scopes.to_string()
        && existing.code_challenge == request.code_challenge
        && existing.code_challenge_method == request.code_challenge_method.as_str()
}

fn replayed() -> Rejection {
    Rejection::Page(OAuthError::InvalidRequest(
        "This authorization request has already been used".to_string(),
    ))
}

async fn find_request(
    state: &OAuth2State,
    client_id: &str,
    state_param: &str,
) -> Result<Option<auth_request::Model>, OAuthError> {
    state
        .bounded(
            auth_request::Entity::find_by_id((client_id.to_string(), state_param.to_string()))
                .one(state.db.as_ref()),
        )
        .await
}

/// Persist the pending request. Re-opening an identical pending request is a
/// no-op; anything else reusing the same `state` is refused.
#[tracing::instrument(skip(state, request), fields(client_id = %request.client.id))]
pub async fn open(
    state: &OAuth2State,
    request: &ValidatedRequest,
) -> Result<auth_request::Model, Rejection> {
    if let Some(existing) = find_request(state, &request.client.id, &request.state).await? {
        if existing.is_expired() {
            state
                .bounded(
                    auth_request::Entity::delete_many()
                        .filter(auth_request::Column::ClientId.eq(existing.client_id.as_str()))
                        .filter(auth_request::Column::State.eq(existing.state.as_str()))
                        .exec(state.db.as_ref()),
                )
                .await?;
        } else if existing.is_pending() && same_request(&existing, request) {
            return Ok(existing);
        } else {
            tracing::warn!("Refused to reopen a completed or conflicting authorization request");
            return Err(replayed());
        }
    }

    let now = OffsetDateTime::now_utc();
    let row = auth_request::ActiveModel {
        client_id: Set(request.client.id.clone()),
        state: Set(request.state.clone()),
        redirect_uri: Set(request.redirect_uri.clone()),
        scope: Set(request.scopes.to_string()),
        code_challenge: Set(request.code_challenge.clone()),
        code_challenge_method: Set(request.code_challenge_method.as_str().to_string()),
        user_id: Set(None),
        status: Set(auth_request::STATUS_PENDING.to_string()),
        expires_at: Set(now + Duration::seconds(state.config.authorization_request_ttl_secs)),
        created_at: Set(now),
    };

    match state.bounded(row.insert(state.db.as_ref())).await {
        Ok(model) => Ok(model),
        Err(insert_error) => {
            // Lost an insert race on the same key; the winner decides.
            match find_request(state, &request.client.id, &request.state).await? {
                Some(existing) if existing.is_pending() && same_request(&existing, request) => {
                    Ok(existing)
                }
                Some(_) => Err(replayed()),
                None => Err(insert_error.into()),
            }
        }
    }
}

/// Load a request that is still pending and unexpired.
pub async fn pending_request(
    state: &OAuth2State,
    client_id: &str,
    state_param: &str,
) -> Result<auth_request::Model, OAuthError> {
    match find_request(state, client_id, state_param).await? {
        Some(request) if request.is_pending() && !request.is_expired() => Ok(request),
        Some(request) if request.is_pending() => Err(OAuthError::InvalidRequest(
            "This authorization request has expired".to_string(),
        )),
        Some(_) => Err(OAuthError::InvalidRequest(
            "This authorization request has already been completed".to_string(),
        )),
        None => Err(OAuthError::InvalidRequest(
            "Unknown authorization request".to_string(),
        )),
    }
}

/// Stage `UserAuthenticated`: attach the signed-in user to the pending
/// request. A request already bound to a different user is refused.
#[tracing::instrument(skip(state))]
pub async fn bind_user(
    state: &OAuth2State,
    client_id: &str,
    state_param: &str,
    user_id: &str,
) -> Result<auth_request::Model, OAuthError> {
    let request = pending_request(state, client_id, state_param).await?;

    let result = state
        .bounded(
            auth_request::Entity::update_many()
                .col_expr(auth_request::Column::UserId, Expr::value(user_id))
                .filter(auth_request::Column::ClientId.eq(client_id))
                .filter(auth_request::Column::State.eq(state_param))
                .filter(auth_request::Column::Status.eq(auth_request::STATUS_PENDING))
                .filter(
                    auth_request::Column::UserId
                        .is_null()
                        .or(auth_request::Column::UserId.eq(user_id)),
                )
                .exec(state.db.as_ref()),
        )
        .await?;

    if result.rows_affected != 1 {
        return Err(OAuthError::InvalidRequest(
            "This authorization request belongs to another session".to_string(),
        ));
    }

    Ok(auth_request::Model {
        user_id: Some(user_id.to_string()),
        ..request
    })
}

/// Signed ticket that authorises the consent step for one request.
pub fn issue_consent_ticket(
    state: &OAuth2State,
    request: &auth_request::Model,
    user_id: &str,
) -> Result<String, OAuthError> {
    let remaining = (request.expires_at - OffsetDateTime::now_utc()).whole_seconds();
    let claims = ConsentClaims::new(
        state.issuer(),
        user_id,
        &request.client_id,
        &request.state,
        remaining.clamp(1, state.config.authorization_request_ttl_secs),
    );
    state
        .codec
        .issue(&claims)
        .map_err(|e| OAuthError::server(format!("failed to sign consent ticket: {e}")))
}

/// Stages `ConsentDecided` and `CodeIssued`.
///
/// The pending → consented/denied transition is a conditional update, so
/// exactly one decision wins even under concurrent submissions. On approval
/// the code row is inserted in the same transaction.
#[tracing::instrument(skip(state, ticket), fields(client_id = %ticket.client_id))]
pub async fn decide(
    state: &OAuth2State,
    ticket: &ConsentClaims,
    approve: bool,
) -> Result<Decision, Rejection> {
    let request = pending_request(state, &ticket.client_id, &ticket.state).await?;
    if request.user_id.as_deref() != Some(ticket.sub.as_str()) {
        return Err(Rejection::Page(OAuthError::AccessDenied(
            "Consent ticket does not match the signed-in user".to_string(),
        )));
    }

    let next = if approve {
        auth_request::STATUS_CONSENTED
    } else {
        auth_request::STATUS_DENIED
    };

    let code = if approve {
        Some(OAuth2State::generate_token()?)
    } else {
        None
    };
    let now = OffsetDateTime::now_utc();
    let code_row = code.as_ref().map(|code| oauth2_authorization::ActiveModel {
        code_hash: Set(OAuth2State::hash_code(code)),
        client_id: Set(request.client_id.clone()),
        user_id: Set(ticket.sub.clone()),
        redirect_uri: Set(request.redirect_uri.clone()),
        scope: Set(request.scope.clone()),
        code_challenge: Set(request.code_challenge.clone()),
        code_challenge_method: Set(request.code_challenge_method.clone()),
        expires_at: Set(now + Duration::seconds(state.config.authorization_code_ttl_secs)),
        created_at: Set(now),
        consumed_at: Set(None),
        token_family: Set(None),
    });

    // The status flip and the code row commit together; a failed insert
    // leaves the request pending so the user can simply approve again.
    let decided = state
        .bounded(async {
            let txn = state.db.begin().await?;
            let result = auth_request::Entity::update_many()
                .col_expr(auth_request::Column::Status, Expr::value(next))
                .filter(auth_request::Column::ClientId.eq(request.client_id.as_str()))
                .filter(auth_request::Column::State.eq(request.state.as_str()))
                .filter(auth_request::Column::Status.eq(auth_request::STATUS_PENDING))
                .filter(auth_request::Column::UserId.eq(ticket.sub.as_str()))
                .exec(&txn)
                .await?;
            if result.rows_affected != 1 {
                txn.rollback().await?;
                return Ok(false);
            }
            if let Some(row) = code_row {
                row.insert(&txn).await?;
            }
            txn.commit().await?;
            Ok::<_, DbErr>(true)
        })
        .await?;
    if !decided {
        return Err(replayed());
    }

    let Some(code) = code else {
        let redirect = client_redirect(
            &request.redirect_uri,
            &[
                ("error", "access_denied"),
                ("error_description", "The user denied the request"),
                ("state", request.state.as_str()),
            ],
        )?;
        return Ok(Decision {
            client_id: request.client_id,
            user_id: ticket.sub.clone(),
            approved: false,
            redirect,
        });
    };

    let redirect = client_redirect(
        &request.redirect_uri,
        &[("code", code.as_str()), ("state", request.state.as_str())],
    )?;
    Ok(Decision {
        client_id: request.client_id,
        user_id: ticket.sub.clone(),
        approved: true,
        redirect,
    })
}

/// Delete expired authorization requests and codes.
pub async fn purge_expired(state: &OAuth2State) -> Result<u64, OAuthError> {
    let now = OffsetDateTime::now_utc();
    let requests = state
        .bounded(
            auth_request::Entity::delete_many()
                .filter(auth_request::Column::ExpiresAt.lt(now))
                .exec(state.db.as_ref()),
        )
        .await?;
    let codes = state
        .bounded(
            oauth2_authorization::Entity::delete_many()
                .filter(oauth2_authorization::Column::ExpiresAt.lt(now))
                .exec(state.db.as_ref()),
        )
        .await?;
    Ok(requests.rows_affected + codes.rows_affected)
}
