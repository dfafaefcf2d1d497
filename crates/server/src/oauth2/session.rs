//! Browser single sign-on session cookie.

use crate::oauth2::codec::{SessionClaims, TokenCodec};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

pub const SESSION_COOKIE_NAME: &str = "portal_session";

pub fn session_cookie(token: String, ttl_secs: i64, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, token))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/oauth2")
        .max_age(Duration::seconds(ttl_secs))
        .build()
}

/// Start a session for `user_id`, returning the jar with the cookie set.
/// A signing failure leaves the jar untouched; the login still succeeds
/// without SSO.
pub fn start_session(
    jar: CookieJar,
    codec: &TokenCodec,
    user_id: &str,
    ttl_secs: i64,
    secure: bool,
) -> CookieJar {
    let claims = SessionClaims::new(codec.issuer(), user_id, ttl_secs);
    match codec.issue(&claims) {
        Ok(token) => jar.add(session_cookie(token, ttl_secs, secure)),
        Err(e) => {
            tracing::error!("Failed to sign session token: {}", e);
            jar
        }
    }
}

/// Subject of a valid session cookie, if any.
pub fn current_session(jar: &CookieJar, codec: &TokenCodec) -> Option<String> {
    let cookie = jar.get(SESSION_COOKIE_NAME)?;
    match codec.verify::<SessionClaims>(cookie.value()) {
        Ok(claims) => Some(claims.sub),
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring invalid session cookie");
            None
        }
    }
}
