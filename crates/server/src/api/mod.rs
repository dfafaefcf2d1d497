//! HTTP surface of the authorization server.
//!
//! - `oauth2` routes (/oauth2/*, /.well-known/openid-configuration)
//! - `health` - Health check endpoint (/healthz)
//! - `openapi` - OpenAPI/Utoipa configuration

pub mod health;
pub mod openapi;

pub use health::MISC_TAG;

use crate::oauth2::{self, OAuth2State, rate_limit::TrustProxyHeaders};
use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_redoc::{Redoc, Servable};

/// Build the full application router.
pub fn app(state: OAuth2State) -> Router {
    let trust_proxy_headers = state.config.trust_proxy_headers;

    let (router, api) = OpenApiRouter::with_openapi(openapi::ApiDoc::openapi())
        .merge(oauth2::router(state.clone()))
        .merge(health::router(state))
        .split_for_parts();

    let router = router
        .merge(Redoc::with_url("/api-docs", api))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    if trust_proxy_headers {
        router.layer(axum::Extension(TrustProxyHeaders))
    } else {
        router
    }
}

/// Starts the web server with all configured routes.
#[tracing::instrument(skip(state))]
pub async fn start_webserver(state: OAuth2State, bind_address: &str) -> color_eyre::Result<()> {
    let router = app(state);

    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    tracing::info!(addr = %bind_address, "Server running");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .map_err(|e| color_eyre::Report::msg(format!("Failed to start server: {e}")))?;

    Ok(())
}
