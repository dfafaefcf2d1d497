//! OAuth2 HTTP endpoints.
//!
//! - `GET /oauth2/authorize` - Authorization endpoint
//! - `POST /oauth2/token` - Token endpoint
//! - `POST /oauth2/revoke` - Token revocation
//! - `GET /oauth2/userinfo` - OpenID Connect UserInfo
//! - `GET /.well-known/openid-configuration` - Discovery document

use crate::audit::{AuditAction, AuditEvent};
use crate::error::{ErrorResponse, OAuthError};
use crate::oauth2::exchange::{self, RevokeRequest, TokenRequest, TokenSet};
use crate::oauth2::flow::{self, AuthorizeRequest, Rejection};
use crate::oauth2::guard::BearerAuth;
use crate::oauth2::pages::render_error_page;
use crate::oauth2::scope::{SCOPE_EMAIL, SCOPE_OPENID, SCOPE_PROFILE};
use crate::oauth2::session::current_session;
use crate::oauth2::{OAUTH2_TAG, state::OAuth2State};
use axum::{
    Form, Json,
    extract::{
        Query, State,
        rejection::{FormRejection, QueryRejection},
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Routes mounted under `/oauth2`.
pub fn router() -> OpenApiRouter<OAuth2State> {
    OpenApiRouter::new()
        .routes(routes!(authorize))
        .routes(routes!(token))
        .routes(routes!(revoke))
        .routes(routes!(userinfo))
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct UserInfoResponse {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OpenIdConfiguration {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub revocation_endpoint: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub claims_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Malformed query strings and bodies become `invalid_request`. The
/// extractor's own message is logged, never sent.
pub(crate) fn malformed_query(rejection: QueryRejection) -> OAuthError {
    tracing::debug!(error = %rejection.body_text(), "Rejected query string");
    OAuthError::InvalidRequest("The request parameters could not be parsed".to_string())
}

pub(crate) fn malformed_form(rejection: FormRejection) -> OAuthError {
    tracing::debug!(error = %rejection.body_text(), "Rejected form body");
    OAuthError::InvalidRequest(
        "The request body must be a valid application/x-www-form-urlencoded form".to_string(),
    )
}

fn no_store(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

/// OAuth2 Authorization endpoint.
#[tracing::instrument(skip(state, jar))]
#[utoipa::path(
    get,
    path = "/authorize",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Authorize",
    summary = "Start the Authorization Code flow",
    description = "Validates the client, redirect URI, PKCE challenge and scopes, then sends the user \
                   to the login page (or straight to consent when a session cookie is present).\n\n\
                   **PKCE:** mandatory for every client, `S256` only.\n\n\
                   Errors detected before the redirect URI is validated are shown as an error page. \
                   Later errors are redirected to the client with `error`, `error_description` and `state`.",
    params(AuthorizeRequest),
    responses(
        (status = 302, description = "Redirect back to the client with an OAuth2 error"),
        (status = 303, description = "Redirect to the login or consent page"),
        (status = 400, description = "Error page for requests that cannot be redirected"),
        (status = 401, description = "Error page for unknown clients"),
    )
)]
pub async fn authorize(
    State(state): State<OAuth2State>,
    jar: CookieJar,
    params: Result<Query<AuthorizeRequest>, QueryRejection>,
) -> Response {
    let Query(params) = match params {
        Ok(params) => params,
        Err(rejection) => {
            let error = malformed_query(rejection);
            state
                .audit(
                    AuditEvent::failure(AuditAction::Authorize)
                        .detail("error", error.code().as_str()),
                )
                .await;
            return render_error_page(&error);
        }
    };
    let client_hint = params.client_id.clone().unwrap_or_default();

    let outcome = async {
        let received = flow::receive(params)?;
        let validated = flow::validate_client(&state, received).await?;
        let request = flow::open(&state, &validated).await?;
        Ok::<_, Rejection>((validated, request))
    }
    .await;

    let (validated, request) = match outcome {
        Ok(ok) => ok,
        Err(rejection) => {
            state
                .audit(
                    AuditEvent::failure(AuditAction::Authorize)
                        .client(&client_hint)
                        .detail("error", rejection.error().code().as_str()),
                )
                .await;
            return rejection.into_response();
        }
    };

    state
        .audit(
            AuditEvent::success(AuditAction::Authorize)
                .client(&validated.client.id)
                .detail("scope", validated.scopes.to_string()),
        )
        .await;

    // Single sign-on: an existing session skips the login form.
    if let Some(user_id) = current_session(&jar, &state.codec) {
        match state.find_active_user(&user_id).await {
            Ok(Some(user)) => {
                let ticket = flow::bind_user(&state, &request.client_id, &request.state, &user.id)
                    .await
                    .and_then(|bound| flow::issue_consent_ticket(&state, &bound, &user.id));
                return match ticket {
                    Ok(ticket) => Redirect::to(&format!(
                        "/oauth2/consent?ticket={}",
                        urlencoding::encode(&ticket)
                    ))
                    .into_response(),
                    Err(e) => render_error_page(&e),
                };
            }
            Ok(None) => tracing::debug!(user_id = %user_id, "Session user is no longer active"),
            Err(e) => return render_error_page(&e),
        }
    }

    Redirect::to(&format!(
        "/oauth2/login?client_id={}&state={}",
        urlencoding::encode(&request.client_id),
        urlencoding::encode(&request.state),
    ))
    .into_response()
}

/// OAuth2 Token endpoint.
#[tracing::instrument(skip(state, headers, params))]
#[utoipa::path(
    post,
    path = "/token",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Token",
    summary = "Exchange a grant for tokens",
    description = "**Supported grant types:**\n\
                   - `authorization_code`: requires `code`, `redirect_uri` and `code_verifier`\n\
                   - `refresh_token`: requires `refresh_token`; `scope` may narrow the original grant\n\
                   - `client_credentials`: confidential clients only\n\n\
                   **Client authentication:** public clients send `client_id` in the body. \
                   Confidential clients use HTTP Basic or `client_id` + `client_secret` in the body.\n\n\
                   Authorization codes are single-use. Refresh tokens are rotated; presenting a \
                   rotated token revokes its whole family.",
    request_body(
        content = TokenRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token request parameters"
    ),
    responses(
        (status = 200, description = "Tokens issued", body = TokenSet),
        (status = 400, description = "Invalid request, grant or scope", body = ErrorResponse),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
        (status = 500, description = "Server error", body = ErrorResponse),
    )
)]
pub async fn token(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    params: Result<Form<TokenRequest>, FormRejection>,
) -> Response {
    let Form(params) = match params {
        Ok(params) => params,
        Err(rejection) => {
            let error = malformed_form(rejection);
            state
                .audit(
                    AuditEvent::failure(AuditAction::TokenIssued)
                        .detail("error", error.code().as_str()),
                )
                .await;
            return error.into_response();
        }
    };

    match exchange::exchange(&state, &headers, &params).await {
        Ok(tokens) => no_store((StatusCode::OK, Json(tokens)).into_response()),
        Err(e) => {
            if !matches!(e, OAuthError::Server(_)) {
                tracing::info!(error = %e, "Token request rejected");
            }
            let (client_id, _) = exchange::extract_client_credentials(
                &headers,
                params.client_id.as_deref(),
                None,
            );
            state
                .audit(
                    AuditEvent::failure(AuditAction::TokenIssued)
                        .client(client_id.as_deref().unwrap_or_default())
                        .detail("grant_type", params.grant_type.as_deref().unwrap_or_default())
                        .detail("error", e.code().as_str()),
                )
                .await;
            e.into_response()
        }
    }
}

/// OAuth2 Token Revocation endpoint (RFC 7009).
#[tracing::instrument(skip(state, headers, params))]
#[utoipa::path(
    post,
    path = "/revoke",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Revoke Token",
    summary = "Revoke a refresh token",
    description = "Revokes a refresh token and every token rotated from the same authorization. \
                   Returns 200 even if the token is unknown, already revoked or an access token.",
    request_body(
        content = RevokeRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token revocation request"
    ),
    responses(
        (status = 200, description = "Token revoked (or was already invalid)"),
        (status = 400, description = "Missing token parameter or malformed body", body = ErrorResponse),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
    )
)]
pub async fn revoke(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    params: Result<Form<RevokeRequest>, FormRejection>,
) -> Response {
    let Form(params) = match params {
        Ok(params) => params,
        Err(rejection) => return malformed_form(rejection).into_response(),
    };

    match exchange::revoke(&state, &headers, &params).await {
        Ok(()) => no_store(StatusCode::OK.into_response()),
        Err(e) => e.into_response(),
    }
}

/// OpenID Connect UserInfo endpoint.
#[tracing::instrument(skip_all)]
#[utoipa::path(
    get,
    path = "/userinfo",
    tag = OAUTH2_TAG,
    operation_id = "OpenID Connect UserInfo",
    summary = "Get the authenticated user's claims",
    description = "Requires a valid access token with the `openid` scope.\n\n\
                   **Returned claims depend on granted scopes:**\n\
                   - `openid`: `sub`\n\
                   - `profile`: `name`, `given_name`, `family_name`, `preferred_username`, `picture`\n\
                   - `email`: `email`, `email_verified`",
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "User claims", body = UserInfoResponse),
        (status = 401, description = "Missing, invalid or expired access token", body = ErrorResponse),
        (status = 403, description = "Token lacks the `openid` scope", body = ErrorResponse),
    )
)]
pub async fn userinfo(
    State(state): State<OAuth2State>,
    BearerAuth(principal): BearerAuth,
) -> Response {
    if let Err(e) = principal.require_scope(SCOPE_OPENID) {
        state
            .audit(
                AuditEvent::failure(AuditAction::UserInfo)
                    .actor(principal.user.id.as_str())
                    .client(&principal.client_id)
                    .detail("error", e.code().as_str()),
            )
            .await;
        return e.into_response();
    }

    let user = principal.user;
    let mut claims = UserInfoResponse {
        sub: user.id.clone(),
        ..Default::default()
    };

    if principal.scopes.contains(SCOPE_PROFILE) {
        claims.name = user.name;
        claims.given_name = user.given_name;
        claims.family_name = user.family_name;
        claims.preferred_username = Some(user.username);
        claims.picture = user.picture;
    }

    if principal.scopes.contains(SCOPE_EMAIL) {
        claims.email = Some(user.email);
        claims.email_verified = Some(user.email_verified);
    }

    state
        .audit(
            AuditEvent::success(AuditAction::UserInfo)
                .actor(user.id.as_str())
                .client(&principal.client_id)
                .detail("scope", principal.scopes.to_string()),
        )
        .await;

    no_store((StatusCode::OK, Json(claims)).into_response())
}

/// OpenID Connect Discovery document.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/.well-known/openid-configuration",
    tag = OAUTH2_TAG,
    operation_id = "OpenID Connect Discovery",
    summary = "OpenID Connect Discovery document",
    description = "Endpoint URLs, supported grants, scopes, claims and PKCE methods of this provider.",
    responses(
        (status = 200, description = "OpenID Connect configuration document", body = OpenIdConfiguration),
    )
)]
pub async fn openid_configuration(State(state): State<OAuth2State>) -> Json<OpenIdConfiguration> {
    let issuer = state.issuer().trim_end_matches('/');

    Json(OpenIdConfiguration {
        issuer: state.issuer().to_string(),
        authorization_endpoint: format!("{issuer}/oauth2/authorize"),
        token_endpoint: format!("{issuer}/oauth2/token"),
        userinfo_endpoint: format!("{issuer}/oauth2/userinfo"),
        revocation_endpoint: format!("{issuer}/oauth2/revoke"),
        response_types_supported: strings(&["code"]),
        grant_types_supported: strings(&[
            "authorization_code",
            "refresh_token",
            "client_credentials",
        ]),
        subject_types_supported: strings(&["public"]),
        scopes_supported: strings(&[SCOPE_OPENID, SCOPE_PROFILE, SCOPE_EMAIL]),
        claims_supported: strings(&[
            "sub",
            "name",
            "given_name",
            "family_name",
            "preferred_username",
            "picture",
            "email",
            "email_verified",
        ]),
        token_endpoint_auth_methods_supported: strings(&[
            "client_secret_basic",
            "client_secret_post",
            "none",
        ]),
        code_challenge_methods_supported: strings(&["S256"]),
    })
}
