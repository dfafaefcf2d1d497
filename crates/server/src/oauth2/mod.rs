//! OAuth 2.1 authorization server.
//!
//! ## Supported Flows
//!
//! - Authorization Code with mandatory PKCE (`S256`)
//! - Refresh Token, rotated on every use
//! - Client Credentials for confidential machine clients
//!
//! ## Endpoints
//!
//! - `GET /oauth2/authorize` - Authorization endpoint
//! - `GET|POST /oauth2/login` - Resource owner login
//! - `GET|POST /oauth2/consent` - Consent screen
//! - `POST /oauth2/token` - Token endpoint
//! - `POST /oauth2/revoke` - Token revocation
//! - `GET /oauth2/userinfo` - OpenID Connect UserInfo
//! - `GET /.well-known/openid-configuration` - OpenID Connect Discovery

pub mod codec;
pub mod consent;
pub mod endpoints;
pub mod exchange;
pub mod flow;
pub mod guard;
pub mod login;
pub mod pages;
pub mod password;
pub mod pkce;
pub mod rate_limit;
pub mod registrar;
pub mod scope;
pub mod session;
pub mod state;

pub use codec::TokenCodec;
pub use guard::{AuthenticatedPrincipal, BearerAuth};
pub use password::{hash_password, verify_password};
pub use registrar::{Client, ClientRegistry};
pub use state::OAuth2State;

use utoipa_axum::{router::OpenApiRouter, routes};

/// OpenAPI tag for OAuth2 endpoints
pub const OAUTH2_TAG: &str = "OAuth2";

/// Creates the OAuth2 router: the flow under `/oauth2` plus discovery.
pub fn router(state: OAuth2State) -> OpenApiRouter {
    let flow = OpenApiRouter::new()
        .merge(endpoints::router())
        .merge(login::router())
        .merge(consent::router());

    OpenApiRouter::new()
        .nest("/oauth2", flow)
        .routes(routes!(endpoints::openid_configuration))
        .with_state(state)
}

/// Drop expired authorization requests, codes and refresh tokens, and
/// forget stale login throttle entries.
pub async fn purge_expired(state: &OAuth2State) -> Result<u64, crate::error::OAuthError> {
    let removed = flow::purge_expired(state).await? + exchange::purge_expired(state).await?;
    state.login_limiter.cleanup();
    Ok(removed)
}
