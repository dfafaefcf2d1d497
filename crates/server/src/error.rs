//! OAuth2 error taxonomy.
//!
//! Every client-input failure in the authorization core is converted into one
//! of these errors before it reaches the wire. Server-side failures keep their
//! detail for the logs and are rendered as a bare `server_error`.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Error codes from RFC 6749, RFC 6750 and the login throttle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OAuthErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    InvalidScope,
    UnauthorizedClient,
    UnsupportedGrantType,
    UnsupportedResponseType,
    AccessDenied,
    InvalidToken,
    InsufficientScope,
    TooManyAttempts,
    ServerError,
}

impl OAuthErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::InvalidScope => "invalid_scope",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::AccessDenied => "access_denied",
            Self::InvalidToken => "invalid_token",
            Self::InsufficientScope => "insufficient_scope",
            Self::TooManyAttempts => "too_many_attempts",
            Self::ServerError => "server_error",
        }
    }

    /// HTTP status used when the error is returned directly (not redirected).
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidClient | Self::InvalidToken => StatusCode::UNAUTHORIZED,
            Self::InsufficientScope | Self::AccessDenied => StatusCode::FORBIDDEN,
            Self::TooManyAttempts => StatusCode::TOO_MANY_REQUESTS,
            Self::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl std::fmt::Display for OAuthErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON error body (RFC 6749 Section 5.2).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: OAuthErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("invalid_request: {0}")]
    InvalidRequest(String),
    #[error("invalid_client: {0}")]
    InvalidClient(String),
    #[error("invalid_grant: {0}")]
    InvalidGrant(String),
    #[error("invalid_scope: {0}")]
    InvalidScope(String),
    #[error("unauthorized_client: {0}")]
    UnauthorizedClient(String),
    #[error("unsupported_grant_type: {0}")]
    UnsupportedGrantType(String),
    #[error("unsupported_response_type: {0}")]
    UnsupportedResponseType(String),
    #[error("access_denied: {0}")]
    AccessDenied(String),
    #[error("invalid_token: {0}")]
    InvalidToken(String),
    #[error("insufficient_scope: token requires '{0}'")]
    InsufficientScope(String),
    #[error("too many attempts, retry after {retry_after}s")]
    TooManyAttempts { retry_after: u64 },
    /// Internal failure; the message is logged, never sent.
    #[error("server error: {0}")]
    Server(String),
}

impl OAuthError {
    pub fn server(context: impl std::fmt::Display) -> Self {
        Self::Server(context.to_string())
    }

    pub fn code(&self) -> OAuthErrorCode {
        match self {
            Self::InvalidRequest(_) => OAuthErrorCode::InvalidRequest,
            Self::InvalidClient(_) => OAuthErrorCode::InvalidClient,
            Self::InvalidGrant(_) => OAuthErrorCode::InvalidGrant,
            Self::InvalidScope(_) => OAuthErrorCode::InvalidScope,
            Self::UnauthorizedClient(_) => OAuthErrorCode::UnauthorizedClient,
            Self::UnsupportedGrantType(_) => OAuthErrorCode::UnsupportedGrantType,
            Self::UnsupportedResponseType(_) => OAuthErrorCode::UnsupportedResponseType,
            Self::AccessDenied(_) => OAuthErrorCode::AccessDenied,
            Self::InvalidToken(_) => OAuthErrorCode::InvalidToken,
            Self::InsufficientScope(_) => OAuthErrorCode::InsufficientScope,
            Self::TooManyAttempts { .. } => OAuthErrorCode::TooManyAttempts,
            Self::Server(_) => OAuthErrorCode::ServerError,
        }
    }

    /// Description safe to show to the caller.
    pub fn description(&self) -> Option<String> {
        match self {
            Self::InvalidRequest(d)
            | Self::InvalidClient(d)
            | Self::InvalidGrant(d)
            | Self::InvalidScope(d)
            | Self::UnauthorizedClient(d)
            | Self::UnsupportedGrantType(d)
            | Self::UnsupportedResponseType(d)
            | Self::AccessDenied(d)
            | Self::InvalidToken(d) => Some(d.clone()),
            Self::InsufficientScope(scope) => Some(format!("Token requires '{scope}' scope")),
            Self::TooManyAttempts { retry_after } => Some(format!(
                "Too many failed attempts, retry in {retry_after} seconds"
            )),
            Self::Server(_) => None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.code().status()
    }

    pub fn to_body(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.code(),
            error_description: self.description(),
        }
    }
}

impl From<sea_orm::DbErr> for OAuthError {
    fn from(e: sea_orm::DbErr) -> Self {
        Self::Server(format!("database error: {e}"))
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        if let Self::Server(detail) = &self {
            tracing::error!(error = %detail, "OAuth2 request failed with a server error");
        }

        let mut response = (self.status(), Json(self.to_body())).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));

        match &self {
            Self::InvalidToken(_) => {
                headers.insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static(r#"Bearer error="invalid_token""#),
                );
            }
            Self::InsufficientScope(_) => {
                headers.insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static(r#"Bearer error="insufficient_scope""#),
                );
            }
            Self::InvalidClient(_) => {
                headers.insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static(r#"Basic realm="oauth2""#),
                );
            }
            Self::TooManyAttempts { retry_after } => {
                if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                    headers.insert(header::RETRY_AFTER, value);
                }
            }
            _ => {}
        }

        response
    }
}
