//! OAuth2 Consent endpoints.
//!
//! - Consent page (GET) - Shows what the application is asking for
//! - Consent submission (POST) - Handles approve/deny
//!
//! Both steps are authorised by a short-lived signed ticket issued after
//! login; the ticket names the user and the pending request.

use crate::audit::{AuditAction, AuditEvent};
use crate::error::OAuthError;
use crate::oauth2::codec::ConsentClaims;
use crate::oauth2::endpoints::{malformed_form, malformed_query};
use crate::oauth2::flow;
use crate::oauth2::pages::{ConsentTemplate, describe_scopes, render, render_error_page};
use crate::oauth2::scope::ScopeSet;
use crate::oauth2::state::OAuth2State;
use axum::{
    Form,
    extract::{
        Query, State,
        rejection::{FormRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

/// Query parameters for the consent page.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ConsentQuery {
    /// Signed consent ticket
    pub ticket: String,
}

/// Form data for consent submission.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ConsentForm {
    pub ticket: String,
    /// `approve` or `deny`
    pub action: String,
}

/// Creates the consent router.
pub fn router() -> OpenApiRouter<OAuth2State> {
    OpenApiRouter::new()
        .routes(routes!(consent_page))
        .routes(routes!(consent_submit))
}

fn verify_ticket(state: &OAuth2State, ticket: &str) -> Result<ConsentClaims, OAuthError> {
    state.codec.verify::<ConsentClaims>(ticket).map_err(|e| {
        tracing::debug!(error = %e, "Rejected consent ticket");
        OAuthError::InvalidRequest(
            "This consent request is invalid or has expired. Please sign in again.".to_string(),
        )
    })
}

/// Display the consent page.
#[tracing::instrument(skip_all)]
#[utoipa::path(
    get,
    path = "/consent",
    tag = super::OAUTH2_TAG,
    operation_id = "OAuth2 Consent Page",
    summary = "Display the OAuth2 consent page",
    description = "Shows the application name and the scopes it requested so the signed-in user \
                   can approve or deny the request.",
    params(ConsentQuery),
    responses(
        (status = 200, description = "Consent page HTML"),
        (status = 400, description = "Error page if the ticket is invalid or the request is finished"),
    )
)]
pub async fn consent_page(
    State(state): State<OAuth2State>,
    params: Result<Query<ConsentQuery>, QueryRejection>,
) -> Response {
    let Query(params) = match params {
        Ok(params) => params,
        Err(rejection) => return render_error_page(&malformed_query(rejection)),
    };
    let page = async {
        let ticket = verify_ticket(&state, &params.ticket)?;
        let request = flow::pending_request(&state, &ticket.client_id, &ticket.state).await?;
        if request.user_id.as_deref() != Some(ticket.sub.as_str()) {
            return Err(OAuthError::AccessDenied(
                "Consent ticket does not match the signed-in user".to_string(),
            ));
        }
        let client = state.registrar.resolve(&request.client_id).await?;
        let user = state
            .find_active_user(&ticket.sub)
            .await?
            .ok_or_else(|| OAuthError::AccessDenied("This account is not active".to_string()))?;
        let scopes: ScopeSet = request.scope.parse().unwrap_or_default();

        Ok::<_, OAuthError>(ConsentTemplate {
            user_name: user.name.unwrap_or(user.username),
            client_name: client.name,
            scopes: describe_scopes(&scopes),
            ticket: params.ticket.clone(),
        })
    }
    .await;

    match page {
        Ok(template) => render(&template, StatusCode::OK),
        Err(e) => render_error_page(&e),
    }
}

/// Handle consent form submission.
#[tracing::instrument(skip_all, fields(action = tracing::field::Empty))]
#[utoipa::path(
    post,
    path = "/consent",
    tag = super::OAUTH2_TAG,
    operation_id = "OAuth2 Consent Submit",
    summary = "Submit OAuth2 consent decision",
    description = "On approval, mints a single-use authorization code and redirects back to the client \
                   with `code` and `state`. On denial, redirects with `error=access_denied` and `state`.\n\n\
                   A request can be decided only once; resubmitting never issues a second code.",
    request_body(
        content = ConsentForm,
        content_type = "application/x-www-form-urlencoded",
        description = "Consent decision and ticket"
    ),
    responses(
        (status = 302, description = "Redirect to the client with an authorization code or error"),
        (status = 400, description = "Error page if the ticket is invalid or the request was already decided"),
    )
)]
pub async fn consent_submit(
    State(state): State<OAuth2State>,
    form: Result<Form<ConsentForm>, FormRejection>,
) -> Response {
    let Form(form) = match form {
        Ok(form) => form,
        Err(rejection) => return render_error_page(&malformed_form(rejection)),
    };
    tracing::Span::current().record("action", form.action.as_str());
    let approve = match form.action.as_str() {
        "approve" => true,
        "deny" => false,
        _ => {
            return render_error_page(&OAuthError::InvalidRequest(
                "action must be 'approve' or 'deny'".to_string(),
            ));
        }
    };

    let ticket = match verify_ticket(&state, &form.ticket) {
        Ok(ticket) => ticket,
        Err(e) => return render_error_page(&e),
    };

    match flow::decide(&state, &ticket, approve).await {
        Ok(decision) => {
            let event = if decision.approved {
                AuditEvent::success(AuditAction::Consent)
            } else {
                AuditEvent::failure(AuditAction::Consent).detail("reason", "access_denied")
            };
            state
                .audit(
                    event
                        .actor(decision.user_id.as_str())
                        .client(&decision.client_id)
                        .detail("approved", decision.approved),
                )
                .await;
            tracing::info!(
                user_id = %decision.user_id,
                client_id = %decision.client_id,
                approved = decision.approved,
                "Consent decided"
            );
            decision.redirect
        }
        Err(rejection) => {
            state
                .audit(
                    AuditEvent::failure(AuditAction::Consent)
                        .actor(ticket.sub.as_str())
                        .client(&ticket.client_id)
                        .detail("error", rejection.error().code().as_str()),
                )
                .await;
            rejection.into_response()
        }
    }
}
