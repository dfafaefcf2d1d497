//! OAuth2 Login endpoints.
//!
//! - Login page (GET) for a pending authorization request
//! - Login submission (POST), throttled per username and client IP

use crate::audit::{AuditAction, AuditEvent};
use crate::entity::{oauth2_authorization_request as auth_request, oauth2_user};
use crate::error::OAuthError;
use crate::oauth2::endpoints::{malformed_form, malformed_query};
use crate::oauth2::flow;
use crate::oauth2::pages::{LoginTemplate, describe_scopes, render, render_error_page};
use crate::oauth2::password::{dummy_hash, verify_password};
use crate::oauth2::rate_limit::ClientIp;
use crate::oauth2::scope::ScopeSet;
use crate::oauth2::session::start_session;
use crate::oauth2::state::OAuth2State;
use axum::{
    Form,
    extract::{
        Query, State,
        rejection::{FormRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, EntityTrait, QueryFilter};
use serde::Deserialize;
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

const INVALID_CREDENTIALS: &str = "Invalid username or password";

/// Query parameters for the login page.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LoginQuery {
    pub client_id: String,
    pub state: String,
}

/// Form data for login submission.
#[derive(Deserialize, ToSchema)]
pub struct LoginForm {
    pub client_id: String,
    pub state: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for LoginForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginForm")
            .field("client_id", &self.client_id)
            .field("state", &self.state)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Creates the login router.
pub fn router() -> OpenApiRouter<OAuth2State> {
    OpenApiRouter::new()
        .routes(routes!(login_page))
        .routes(routes!(login_submit))
}

async fn login_template(
    state: &OAuth2State,
    request: &auth_request::Model,
    username: &str,
    error: Option<String>,
) -> Result<LoginTemplate, OAuthError> {
    let client = state.registrar.resolve(&request.client_id).await?;
    let scopes: ScopeSet = request.scope.parse().unwrap_or_default();
    Ok(LoginTemplate {
        client_id: request.client_id.clone(),
        state: request.state.clone(),
        client_name: client.name,
        scopes: describe_scopes(&scopes),
        username: username.to_string(),
        error,
    })
}

async fn render_login(
    state: &OAuth2State,
    request: &auth_request::Model,
    username: &str,
    error: Option<String>,
    status: StatusCode,
) -> Response {
    match login_template(state, request, username, error).await {
        Ok(template) => render(&template, status),
        Err(e) => render_error_page(&e),
    }
}

/// Display the login page.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/login",
    tag = super::OAUTH2_TAG,
    operation_id = "OAuth2 Login Page",
    summary = "Display the OAuth2 login page",
    description = "Renders the login form for a pending authorization request. \
                   This endpoint is redirected to from the `/authorize` endpoint.",
    params(LoginQuery),
    responses(
        (status = 200, description = "Login page HTML"),
        (status = 400, description = "Error page if the authorization request is unknown or finished"),
    )
)]
pub async fn login_page(
    State(state): State<OAuth2State>,
    params: Result<Query<LoginQuery>, QueryRejection>,
) -> Response {
    let Query(params) = match params {
        Ok(params) => params,
        Err(rejection) => return render_error_page(&malformed_query(rejection)),
    };
    match flow::pending_request(&state, &params.client_id, &params.state).await {
        Ok(request) => render_login(&state, &request, "", None, StatusCode::OK).await,
        Err(e) => render_error_page(&e),
    }
}

/// Handle login form submission.
#[tracing::instrument(skip_all, fields(client_id = tracing::field::Empty, username = tracing::field::Empty))]
#[utoipa::path(
    post,
    path = "/login",
    tag = super::OAUTH2_TAG,
    operation_id = "OAuth2 Login Submit",
    summary = "Authenticate the resource owner",
    description = "Verifies the username (or email) and password. On success a session cookie is set \
                   and the user is redirected to the consent page.\n\n\
                   Repeated failures for the same username or IP address are throttled with \
                   `429 Too Many Requests` and a `Retry-After` header.",
    request_body(
        content = LoginForm,
        content_type = "application/x-www-form-urlencoded",
        description = "Login credentials"
    ),
    responses(
        (status = 303, description = "Redirect to the consent page"),
        (status = 401, description = "Login page HTML with an error message"),
        (status = 429, description = "Too many failed attempts"),
    )
)]
pub async fn login_submit(
    State(state): State<OAuth2State>,
    ClientIp(ip): ClientIp,
    jar: CookieJar,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Response {
    let Form(form) = match form {
        Ok(form) => form,
        Err(rejection) => return render_error_page(&malformed_form(rejection)),
    };
    let username = form.username.trim();
    let span = tracing::Span::current();
    span.record("client_id", form.client_id.as_str());
    span.record("username", username);

    let attempt = match state.login_limiter.try_acquire(username, ip) {
        Ok(attempt) => attempt,
        Err(retry_after) => {
            tracing::warn!(retry_after, "Login throttled");
            state
                .audit(
                    AuditEvent::failure(AuditAction::Login)
                        .actor(username)
                        .client(&form.client_id)
                        .detail("reason", "throttled"),
                )
                .await;
            return render_error_page(&OAuthError::TooManyAttempts { retry_after });
        }
    };

    let request = match flow::pending_request(&state, &form.client_id, &form.state).await {
        Ok(request) => request,
        Err(e) => {
            state.login_limiter.release(attempt);
            return render_error_page(&e);
        }
    };

    let user = match state
        .bounded(
            oauth2_user::Entity::find()
                .filter(
                    Condition::any()
                        .add(oauth2_user::Column::Username.eq(username))
                        .add(oauth2_user::Column::Email.eq(username.to_lowercase())),
                )
                .one(state.db.as_ref()),
        )
        .await
    {
        Ok(user) => user,
        Err(e) => {
            state.login_limiter.release(attempt);
            return render_error_page(&e);
        }
    };

    // Always run one hash verification so unknown usernames cost the same.
    let stored_hash = user
        .as_ref()
        .and_then(|u| u.password_hash.clone())
        .unwrap_or_else(|| dummy_hash().to_string());
    let password_ok = verify_password(&form.password, &stored_hash) && user.is_some();

    let user = match user {
        Some(user) if password_ok => user,
        _ => {
            // The reserved attempt stays counted.
            drop(attempt);
            state
                .audit(
                    AuditEvent::failure(AuditAction::Login)
                        .actor(username)
                        .client(&form.client_id)
                        .detail("reason", "invalid_credentials"),
                )
                .await;
            return render_login(
                &state,
                &request,
                username,
                Some(INVALID_CREDENTIALS.to_string()),
                StatusCode::UNAUTHORIZED,
            )
            .await;
        }
    };

    if !user.is_active() {
        state.login_limiter.release(attempt);
        state
            .audit(
                AuditEvent::failure(AuditAction::Login)
                    .actor(user.id.as_str())
                    .client(&form.client_id)
                    .detail("reason", "account_not_active")
                    .detail("status", user.status.as_str()),
            )
            .await;
        return render_login(
            &state,
            &request,
            username,
            Some("This account is not active".to_string()),
            StatusCode::FORBIDDEN,
        )
        .await;
    }

    state.login_limiter.succeed(attempt, username);

    let user_id = user.id.clone();
    let mut active_user: oauth2_user::ActiveModel = user.into();
    active_user.last_login_at = Set(Some(OffsetDateTime::now_utc()));
    if let Err(e) = state.bounded(active_user.update(state.db.as_ref())).await {
        tracing::warn!("Failed to update last_login_at: {}", e);
    }

    let ticket = match flow::bind_user(&state, &request.client_id, &request.state, &user_id)
        .await
        .and_then(|bound| flow::issue_consent_ticket(&state, &bound, &user_id))
    {
        Ok(ticket) => ticket,
        Err(e) => return render_error_page(&e),
    };

    let jar = start_session(
        jar,
        &state.codec,
        &user_id,
        state.config.session_ttl_secs,
        state.config.secure_cookies,
    );

    state
        .audit(
            AuditEvent::success(AuditAction::Login)
                .actor(user_id.as_str())
                .client(&request.client_id),
        )
        .await;
    tracing::info!(user_id = %user_id, "User signed in");

    (
        jar,
        Redirect::to(&format!(
            "/oauth2/consent?ticket={}",
            urlencoding::encode(&ticket)
        )),
    )
        .into_response()
}
