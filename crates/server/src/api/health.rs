//! Health check endpoint.

use crate::oauth2::OAuth2State;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use utoipa_axum::{router::OpenApiRouter, routes};

/// Tag for OpenAPI documentation.
pub const MISC_TAG: &str = "Miscellaneous";

pub fn router(state: OAuth2State) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(health))
        .with_state(state)
}

/// Health check endpoint.
#[tracing::instrument(skip_all)]
#[utoipa::path(
    method(get, head),
    path = "/healthz",
    tag = MISC_TAG,
    operation_id = "Health Check",
    summary = "Service health check",
    description = "Pings the database under the configured persistence timeout and reports \
                   `503 Service Unavailable` when it cannot be reached.\n\n\
                   Supports both GET and HEAD for load balancers and orchestrator probes.",
    responses(
        (status = 200, description = "Service and database are reachable", body = str, content_type = "text/plain", example = "ok"),
        (status = 503, description = "Database is unreachable", body = str, content_type = "text/plain", example = "unavailable")
    )
)]
pub async fn health(State(state): State<OAuth2State>) -> Response {
    match state.bounded(state.db.ping()).await {
        Ok(()) => (StatusCode::OK, "ok").into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable").into_response()
        }
    }
}
