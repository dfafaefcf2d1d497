//! HTML pages shown to the resource owner during authorization.

use crate::error::OAuthError;
use crate::oauth2::scope::ScopeSet;
use askama::Template;
use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};

/// Scope information for display.
#[derive(Debug, Clone)]
pub struct ScopeInfo {
    pub name: String,
    pub description: String,
}

/// Get human-readable scope information.
pub fn get_scope_info(scope: &str) -> ScopeInfo {
    match scope {
        "openid" => ScopeInfo {
            name: "OpenID".to_string(),
            description: "Verify your identity".to_string(),
        },
        "email" => ScopeInfo {
            name: "Email".to_string(),
            description: "Access your email address".to_string(),
        },
        "profile" => ScopeInfo {
            name: "Profile".to_string(),
            description: "Access your name, username and picture".to_string(),
        },
        _ => ScopeInfo {
            name: scope.to_string(),
            description: format!("Access to {}", scope),
        },
    }
}

pub fn describe_scopes(scopes: &ScopeSet) -> Vec<ScopeInfo> {
    scopes.iter().map(get_scope_info).collect()
}

/// Login page template.
#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub client_id: String,
    pub state: String,
    pub client_name: String,
    pub scopes: Vec<ScopeInfo>,
    pub username: String,
    pub error: Option<String>,
}

/// Consent page template.
#[derive(Template)]
#[template(path = "consent.html")]
pub struct ConsentTemplate {
    pub user_name: String,
    pub client_name: String,
    pub scopes: Vec<ScopeInfo>,
    pub ticket: String,
}

/// Error page template.
#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate {
    pub error: String,
    pub message: String,
}

/// Render a template with `status` and `Cache-Control: no-store`.
pub fn render<T: Template>(template: &T, status: StatusCode) -> Response {
    match template.render() {
        Ok(html) => {
            let mut response = (status, Html(html)).into_response();
            response
                .headers_mut()
                .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
            response
        }
        Err(e) => {
            tracing::error!("Failed to render template: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

/// Error page for failures that must not be redirected to the client.
pub fn render_error_page(error: &OAuthError) -> Response {
    if let OAuthError::Server(detail) = error {
        tracing::error!(error = %detail, "Authorization page failed with a server error");
    }
    let template = ErrorTemplate {
        error: error.code().to_string(),
        message: error
            .description()
            .unwrap_or_else(|| "An unexpected error occurred. Please try again.".to_string()),
    };
    let mut response = render(&template, error.status());
    if let OAuthError::TooManyAttempts { retry_after } = error
        && let Ok(value) = HeaderValue::from_str(&retry_after.to_string())
    {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}
