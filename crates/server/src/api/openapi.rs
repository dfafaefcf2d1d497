//! OpenAPI/Utoipa configuration.

use crate::api::health::MISC_TAG;
use crate::oauth2::OAUTH2_TAG;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, OAuth2, Scopes, SecurityScheme},
};

/// Security addon for OpenAPI documentation.
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    #[tracing::instrument(skip(self, openapi))]
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        // Access tokens issued by /oauth2/token
        let bearer = HttpBuilder::new()
            .scheme(HttpAuthScheme::Bearer)
            .bearer_format("JWT")
            .description(Some(
                "Access token obtained from the `/oauth2/token` endpoint.",
            ))
            .build();
        components.add_security_scheme("bearer_auth", SecurityScheme::Http(bearer));

        // OAuth2 Authorization Code flow
        let oauth2 = OAuth2::new([utoipa::openapi::security::Flow::AuthorizationCode(
            utoipa::openapi::security::AuthorizationCode::new(
                "/oauth2/authorize",
                "/oauth2/token",
                Scopes::from_iter([
                    ("openid", "OpenID Connect scope"),
                    ("email", "Access to user email"),
                    ("profile", "Access to user profile"),
                ]),
            ),
        )]);
        components.add_security_scheme("OAuth2", SecurityScheme::OAuth2(oauth2));
    }
}

/// OpenAPI documentation configuration.
#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "Admin Portal Authorization Server",
        version = "1.0.0",
        description = "OAuth 2.1 Authorization Code + PKCE server with OpenID Connect UserInfo."
    ),
    tags(
        (name = MISC_TAG, description = "Miscellaneous endpoints"),
        (name = OAUTH2_TAG, description = "OAuth2 authorization endpoints")
    )
)]
pub struct ApiDoc;
