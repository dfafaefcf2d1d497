//! Token endpoint and revocation tests.

mod common;

use axum::http::{HeaderValue, StatusCode, header::AUTHORIZATION};
use base64::Engine;
use common::*;
use portal_auth::oauth2::OAuth2State;
use portal_auth::oauth2::codec::{AccessClaims, RefreshClaims, SubjectKind};
use portal_auth::oauth2::scope::ScopeSet;
use sea_orm::{ConnectionTrait, DbBackend, Statement};
use serde_json::Value;

fn basic(id: &str, secret: &str) -> HeaderValue {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{id}:{secret}"));
    HeaderValue::from_str(&format!("Basic {encoded}")).expect("header value")
}

#[tokio::test]
async fn test_code_exchange_returns_tokens() {
    let (server, state, _db) = test_server().await;
    let grant = portal_grant(&server, "exchange").await;

    let response = redeem(&server, PORTAL_CLIENT, &grant.code, PORTAL_REDIRECT, &grant.verifier).await;

    response.assert_status_ok();
    assert_eq!(
        response.headers().get("cache-control").and_then(|v| v.to_str().ok()),
        Some("no-store")
    );
    let body: Value = response.json();
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 3600);
    assert_eq!(body["scope"], "openid profile");
    assert!(body["refresh_token"].is_string());

    let claims = state
        .codec
        .verify::<AccessClaims>(body["access_token"].as_str().expect("access token"))
        .expect("valid access token");
    assert_eq!(claims.sub, ALICE_ID);
    assert_eq!(claims.client_id, PORTAL_CLIENT);
    assert_eq!(claims.iss, ISSUER);
    assert_eq!(claims.exp - claims.iat, 3600);

    let client_scopes: ScopeSet = "openid profile email".parse().expect("scopes");
    assert!(claims.scopes().is_subset(&client_scopes));
}

#[tokio::test]
async fn test_code_is_single_use() {
    let (server, _state, _db) = test_server().await;
    let grant = portal_grant(&server, "single-use").await;

    redeem(&server, PORTAL_CLIENT, &grant.code, PORTAL_REDIRECT, &grant.verifier)
        .await
        .assert_status_ok();
    let replay = redeem(&server, PORTAL_CLIENT, &grant.code, PORTAL_REDIRECT, &grant.verifier).await;

    replay.assert_status_bad_request();
    let body: Value = replay.json();
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn test_code_replay_revokes_issued_refresh_token() {
    let (server, _state, _db) = test_server().await;
    let grant = portal_grant(&server, "replay-revokes").await;

    let first: Value = redeem(&server, PORTAL_CLIENT, &grant.code, PORTAL_REDIRECT, &grant.verifier)
        .await
        .json();
    let refresh_token = first["refresh_token"].as_str().expect("refresh token").to_string();

    redeem(&server, PORTAL_CLIENT, &grant.code, PORTAL_REDIRECT, &grant.verifier)
        .await
        .assert_status_bad_request();

    let response = refresh(&server, PORTAL_CLIENT, &refresh_token).await;
    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_grant");
}

#[tokio::test]
async fn test_concurrent_redemption_has_one_winner() {
    let (server, _state, _db) = test_server().await;
    let grant = portal_grant(&server, "race").await;

    let (a, b) = tokio::join!(
        redeem(&server, PORTAL_CLIENT, &grant.code, PORTAL_REDIRECT, &grant.verifier),
        redeem(&server, PORTAL_CLIENT, &grant.code, PORTAL_REDIRECT, &grant.verifier),
    );

    let statuses = [a.status_code(), b.status_code()];
    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::OK).count(), 1);
    assert_eq!(
        statuses.iter().filter(|s| **s == StatusCode::BAD_REQUEST).count(),
        1
    );
}

#[tokio::test]
async fn test_wrong_verifier_is_invalid_grant() {
    let (server, _state, _db) = test_server().await;
    let grant = portal_grant(&server, "bad-verifier").await;
    let (other_verifier, _challenge) = pkce_pair();

    let response = redeem(&server, PORTAL_CLIENT, &grant.code, PORTAL_REDIRECT, &other_verifier).await;

    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_grant");
}

#[tokio::test]
async fn test_short_verifier_is_invalid_grant() {
    let (server, _state, _db) = test_server().await;
    let grant = portal_grant(&server, "short-verifier").await;

    let response = redeem(&server, PORTAL_CLIENT, &grant.code, PORTAL_REDIRECT, "too-short").await;

    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_grant");
}

#[tokio::test]
async fn test_missing_verifier_is_invalid_request() {
    let (server, _state, _db) = test_server().await;
    let grant = portal_grant(&server, "no-verifier").await;

    let response = server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("client_id", PORTAL_CLIENT),
            ("code", grant.code.as_str()),
            ("redirect_uri", PORTAL_REDIRECT),
        ])
        .await;

    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_request");
}

#[tokio::test]
async fn test_redirect_uri_mismatch_is_invalid_grant() {
    let (server, _state, _db) = test_server().await;
    let grant = portal_grant(&server, "other-redirect").await;

    let response = redeem(
        &server,
        PORTAL_CLIENT,
        &grant.code,
        "http://localhost:3000/other",
        &grant.verifier,
    )
    .await;

    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_grant");
}

#[tokio::test]
async fn test_code_bound_to_issuing_client() {
    let (server, _state, _db) = test_server().await;
    let grant = portal_grant(&server, "stolen").await;

    let response = redeem(&server, MOBILE_CLIENT, &grant.code, PORTAL_REDIRECT, &grant.verifier).await;

    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_grant");
}

#[tokio::test]
async fn test_unknown_code_is_invalid_grant() {
    let (server, _state, _db) = test_server().await;
    let (verifier, _challenge) = pkce_pair();

    let response = redeem(&server, PORTAL_CLIENT, "made-up-code", PORTAL_REDIRECT, &verifier).await;

    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_grant");
}

#[tokio::test]
async fn test_expired_code_is_invalid_grant() {
    let (server, _state, db) = test_server().await;
    let (verifier, challenge) = pkce_pair();
    let code = "expired-code-value";

    db.execute(Statement::from_string(
        DbBackend::Sqlite,
        format!(
            r#"INSERT INTO oauth2_authorization (code_hash, client_id, user_id, redirect_uri, scope, code_challenge, code_challenge_method, expires_at, created_at)
               VALUES ('{}', 'admin-portal', 'user-alice', 'http://localhost:3000/callback', 'openid', '{challenge}', 'S256', datetime('now', '-1 minute'), datetime('now', '-11 minutes'));"#,
            OAuth2State::hash_code(code)
        ),
    ))
    .await
    .expect("insert expired code");

    let response = redeem(&server, PORTAL_CLIENT, code, PORTAL_REDIRECT, &verifier).await;

    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_grant");
}

#[tokio::test]
async fn test_code_for_deactivated_user_is_rejected() {
    let (server, _state, db) = test_server().await;
    let grant = portal_grant(&server, "deactivated").await;

    db.execute(Statement::from_string(
        DbBackend::Sqlite,
        "UPDATE oauth2_user SET status = 'inactive' WHERE id = 'user-alice'".to_string(),
    ))
    .await
    .expect("deactivate user");

    let response = redeem(&server, PORTAL_CLIENT, &grant.code, PORTAL_REDIRECT, &grant.verifier).await;

    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_grant");
}

#[tokio::test]
async fn test_client_without_refresh_grant_gets_no_refresh_token() {
    let (server, _state, _db) = test_server().await;
    let (verifier, challenge) = pkce_pair();
    let params = AuthorizeParams {
        client_id: MOBILE_CLIENT,
        redirect_uri: MOBILE_REDIRECT,
        scope: "openid",
        state: "native",
        challenge: &challenge,
    };

    let response = obtain_code(&server, &params).await;
    response.assert_status(StatusCode::FOUND);
    let code = query_param(&location_url(&response), "code").expect("code");

    let response = redeem(&server, MOBILE_CLIENT, &code, MOBILE_REDIRECT, &verifier).await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert!(body.get("refresh_token").is_none());
    assert_eq!(body["scope"], "openid");
}

// Request validation

#[tokio::test]
async fn test_missing_grant_type_is_invalid_request() {
    let (server, _state, _db) = test_server().await;

    let response = server
        .post("/oauth2/token")
        .form(&[("client_id", PORTAL_CLIENT)])
        .await;

    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_request");
}

#[tokio::test]
async fn test_json_token_body_is_invalid_request() {
    let (server, _state, _db) = test_server().await;

    let response = server
        .post("/oauth2/token")
        .json(&serde_json::json!({
            "grant_type": "authorization_code",
            "client_id": PORTAL_CLIENT,
        }))
        .await;

    response.assert_status_bad_request();
    assert_eq!(
        response.headers().get("cache-control").and_then(|v| v.to_str().ok()),
        Some("no-store")
    );
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_request");
    assert!(!body["error_description"].as_str().unwrap_or_default().contains("Content-Type"));
}

#[tokio::test]
async fn test_json_revoke_body_is_invalid_request() {
    let (server, _state, _db) = test_server().await;

    let response = server
        .post("/oauth2/revoke")
        .json(&serde_json::json!({ "token": "anything", "client_id": PORTAL_CLIENT }))
        .await;

    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_request");
}

#[tokio::test]
async fn test_password_grant_is_unsupported() {
    let (server, _state, _db) = test_server().await;

    let response = server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "password"),
            ("client_id", PORTAL_CLIENT),
            ("username", ALICE_USERNAME),
            ("password", ALICE_PASSWORD),
        ])
        .await;

    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "unsupported_grant_type");
}

#[tokio::test]
async fn test_unknown_client_is_invalid_client() {
    let (server, _state, _db) = test_server().await;

    let response = server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("client_id", "nobody"),
            ("code", "abc"),
        ])
        .await;

    response.assert_status_unauthorized();
    assert_eq!(response.json::<Value>()["error"], "invalid_client");
}

#[tokio::test]
async fn test_error_bodies_are_not_cached() {
    let (server, _state, _db) = test_server().await;

    let response = server
        .post("/oauth2/token")
        .form(&[("grant_type", "authorization_code"), ("client_id", "nobody")])
        .await;

    assert_eq!(
        response.headers().get("cache-control").and_then(|v| v.to_str().ok()),
        Some("no-store")
    );
}

// client_credentials

#[tokio::test]
async fn test_client_credentials_with_basic_auth() {
    let (server, state, _db) = test_server().await;

    let response = server
        .post("/oauth2/token")
        .add_header(AUTHORIZATION, basic(REPORTING_CLIENT, REPORTING_SECRET))
        .form(&[("grant_type", "client_credentials"), ("scope", "reports:read")])
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["scope"], "reports:read");
    assert!(body.get("refresh_token").is_none());

    let claims = state
        .codec
        .verify::<AccessClaims>(body["access_token"].as_str().expect("access token"))
        .expect("valid access token");
    assert_eq!(claims.sub, REPORTING_CLIENT);
    assert_eq!(claims.sub_kind, SubjectKind::Client);
    assert_eq!(claims.client_id, REPORTING_CLIENT);
}

#[tokio::test]
async fn test_client_credentials_with_body_secret_defaults_scope() {
    let (server, _state, _db) = test_server().await;

    let response = server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", REPORTING_CLIENT),
            ("client_secret", REPORTING_SECRET),
        ])
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["scope"], "openid reports:read reports:write");
}

#[tokio::test]
async fn test_failed_basic_auth_request_is_audited_with_client() {
    let (server, _state, db) = test_server().await;

    let response = server
        .post("/oauth2/token")
        .add_header(AUTHORIZATION, basic(REPORTING_CLIENT, "wrong-secret"))
        .form(&[("grant_type", "client_credentials")])
        .await;
    response.assert_status_unauthorized();

    let row = db
        .query_one(Statement::from_string(
            DbBackend::Sqlite,
            "SELECT resource FROM audit_event WHERE action = 'token_issued' AND outcome = 'failure'"
                .to_string(),
        ))
        .await
        .expect("audit query")
        .expect("audit row");
    let resource: Option<String> = row.try_get("", "resource").expect("resource column");
    assert_eq!(resource.as_deref(), Some("client:reporting"));
}

#[tokio::test]
async fn test_client_credentials_wrong_secret_is_invalid_client() {
    let (server, _state, _db) = test_server().await;

    let response = server
        .post("/oauth2/token")
        .add_header(AUTHORIZATION, basic(REPORTING_CLIENT, "guess"))
        .form(&[("grant_type", "client_credentials")])
        .await;

    response.assert_status_unauthorized();
    assert_eq!(response.json::<Value>()["error"], "invalid_client");
    assert!(response.headers().get("www-authenticate").is_some());
}

#[tokio::test]
async fn test_client_credentials_rejects_foreign_scope() {
    let (server, _state, _db) = test_server().await;

    let response = server
        .post("/oauth2/token")
        .add_header(AUTHORIZATION, basic(REPORTING_CLIENT, REPORTING_SECRET))
        .form(&[("grant_type", "client_credentials"), ("scope", "admin")])
        .await;

    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_scope");
}

#[tokio::test]
async fn test_public_client_cannot_use_client_credentials() {
    let (server, _state, _db) = test_server().await;

    let response = server
        .post("/oauth2/token")
        .form(&[("grant_type", "client_credentials"), ("client_id", PORTAL_CLIENT)])
        .await;

    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "unauthorized_client");
}

// refresh_token

async fn portal_tokens(server: &axum_test::TestServer, state: &str) -> Value {
    let grant = portal_grant(server, state).await;
    let response = redeem(server, PORTAL_CLIENT, &grant.code, PORTAL_REDIRECT, &grant.verifier).await;
    response.assert_status_ok();
    response.json()
}

#[tokio::test]
async fn test_refresh_rotates_token() {
    let (server, state, _db) = test_server().await;
    let tokens = portal_tokens(&server, "rotate").await;
    let old = tokens["refresh_token"].as_str().expect("refresh token");

    let response = refresh(&server, PORTAL_CLIENT, old).await;

    response.assert_status_ok();
    let body: Value = response.json();
    let new = body["refresh_token"].as_str().expect("rotated refresh token");
    assert_ne!(new, old);
    assert_eq!(body["scope"], "openid profile");

    let old_claims = state.codec.verify::<RefreshClaims>(old).expect("old claims");
    let new_claims = state.codec.verify::<RefreshClaims>(new).expect("new claims");
    assert_eq!(old_claims.fam, new_claims.fam);
    // Rotation never extends the absolute lifetime.
    assert_eq!(old_claims.exp, new_claims.exp);
}

async fn narrow_portal_client(state: &OAuth2State, db: &sea_orm::DatabaseConnection, scopes: &str) {
    db.execute(Statement::from_string(
        DbBackend::Sqlite,
        format!("UPDATE oauth2_client SET scopes = '{scopes}' WHERE id = '{PORTAL_CLIENT}'"),
    ))
    .await
    .expect("narrow client scopes");
    state.registrar.invalidate(PORTAL_CLIENT);
}

#[tokio::test]
async fn test_refresh_after_client_scopes_narrowed() {
    let (server, state, db) = test_server().await;
    let tokens = portal_tokens(&server, "narrowed-refresh").await;
    let old = tokens["refresh_token"].as_str().expect("refresh token");

    narrow_portal_client(&state, &db, "openid").await;

    let response = refresh(&server, PORTAL_CLIENT, old).await;

    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_scope");
}

#[tokio::test]
async fn test_code_after_client_scopes_narrowed() {
    let (server, state, db) = test_server().await;
    let grant = portal_grant(&server, "narrowed-code").await;

    narrow_portal_client(&state, &db, "openid email").await;

    let response = redeem(&server, PORTAL_CLIENT, &grant.code, PORTAL_REDIRECT, &grant.verifier).await;

    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_scope");
}

#[tokio::test]
async fn test_refresh_within_current_client_scopes() {
    let (server, state, db) = test_server().await;
    let tokens = portal_tokens(&server, "still-allowed").await;
    let old = tokens["refresh_token"].as_str().expect("refresh token");

    // Dropping a scope the grant never used leaves the grant intact.
    narrow_portal_client(&state, &db, "openid profile").await;

    let response = refresh(&server, PORTAL_CLIENT, old).await;

    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["scope"], "openid profile");
}

#[tokio::test]
async fn test_refresh_reuse_revokes_family() {
    let (server, _state, _db) = test_server().await;
    let tokens = portal_tokens(&server, "reuse").await;
    let old = tokens["refresh_token"].as_str().expect("refresh token");

    let rotated: Value = refresh(&server, PORTAL_CLIENT, old).await.json();
    let new = rotated["refresh_token"].as_str().expect("rotated refresh token");

    let reuse = refresh(&server, PORTAL_CLIENT, old).await;
    reuse.assert_status_bad_request();
    assert_eq!(reuse.json::<Value>()["error"], "invalid_grant");

    // The legitimate holder is cut off too.
    let response = refresh(&server, PORTAL_CLIENT, new).await;
    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_grant");
}

#[tokio::test]
async fn test_refresh_can_narrow_scope() {
    let (server, _state, _db) = test_server().await;
    let tokens = portal_tokens(&server, "narrow").await;

    let response = server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "refresh_token"),
            ("client_id", PORTAL_CLIENT),
            ("refresh_token", tokens["refresh_token"].as_str().expect("refresh token")),
            ("scope", "openid"),
        ])
        .await;

    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["scope"], "openid");
}

#[tokio::test]
async fn test_refresh_cannot_widen_scope() {
    let (server, _state, _db) = test_server().await;
    let tokens = portal_tokens(&server, "widen").await;

    let response = server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "refresh_token"),
            ("client_id", PORTAL_CLIENT),
            ("refresh_token", tokens["refresh_token"].as_str().expect("refresh token")),
            ("scope", "openid email"),
        ])
        .await;

    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_scope");
}

#[tokio::test]
async fn test_access_token_is_not_a_refresh_token() {
    let (server, _state, _db) = test_server().await;
    let tokens = portal_tokens(&server, "confused").await;

    let response = refresh(
        &server,
        PORTAL_CLIENT,
        tokens["access_token"].as_str().expect("access token"),
    )
    .await;

    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_grant");
}

#[tokio::test]
async fn test_refresh_bound_to_client() {
    let (server, _state, _db) = test_server().await;
    let tokens = portal_tokens(&server, "foreign-refresh").await;

    let response = server
        .post("/oauth2/token")
        .add_header(AUTHORIZATION, basic(REPORTING_CLIENT, REPORTING_SECRET))
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", tokens["refresh_token"].as_str().expect("refresh token")),
        ])
        .await;

    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "invalid_grant");
}

// revocation

#[tokio::test]
async fn test_revoke_refresh_token() {
    let (server, _state, db) = test_server().await;
    let tokens = portal_tokens(&server, "revoke").await;
    let refresh_token = tokens["refresh_token"].as_str().expect("refresh token");

    let response = server
        .post("/oauth2/revoke")
        .form(&[
            ("token", refresh_token),
            ("token_type_hint", "refresh_token"),
            ("client_id", PORTAL_CLIENT),
        ])
        .await;
    response.assert_status_ok();

    refresh(&server, PORTAL_CLIENT, refresh_token)
        .await
        .assert_status_bad_request();

    let row = db
        .query_one(Statement::from_string(
            DbBackend::Sqlite,
            "SELECT COUNT(*) AS n FROM oauth2_refresh_token WHERE revoked_at IS NOT NULL".to_string(),
        ))
        .await
        .expect("query")
        .expect("row");
    assert_eq!(row.try_get::<i64>("", "n").expect("count"), 1);
}

#[tokio::test]
async fn test_revoke_unknown_token_succeeds() {
    let (server, _state, _db) = test_server().await;

    let response = server
        .post("/oauth2/revoke")
        .form(&[("token", "not-a-token"), ("client_id", PORTAL_CLIENT)])
        .await;

    response.assert_status_ok();
}

#[tokio::test]
async fn test_revoke_requires_client_authentication() {
    let (server, _state, _db) = test_server().await;

    let response = server
        .post("/oauth2/revoke")
        .add_header(AUTHORIZATION, basic(REPORTING_CLIENT, "guess"))
        .form(&[("token", "whatever")])
        .await;

    response.assert_status_unauthorized();
    assert_eq!(response.json::<Value>()["error"], "invalid_client");
}

#[tokio::test]
async fn test_revoke_ignores_other_clients_tokens() {
    let (server, _state, _db) = test_server().await;
    let tokens = portal_tokens(&server, "not-yours").await;
    let refresh_token = tokens["refresh_token"].as_str().expect("refresh token");

    server
        .post("/oauth2/revoke")
        .add_header(AUTHORIZATION, basic(REPORTING_CLIENT, REPORTING_SECRET))
        .form(&[("token", refresh_token)])
        .await
        .assert_status_ok();

    refresh(&server, PORTAL_CLIENT, refresh_token)
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_code_replay_is_audited() {
    let (server, _state, db) = test_server().await;
    let grant = portal_grant(&server, "audited").await;

    redeem(&server, PORTAL_CLIENT, &grant.code, PORTAL_REDIRECT, &grant.verifier)
        .await
        .assert_status_ok();
    redeem(&server, PORTAL_CLIENT, &grant.code, PORTAL_REDIRECT, &grant.verifier)
        .await
        .assert_status_bad_request();

    let row = db
        .query_one(Statement::from_string(
            DbBackend::Sqlite,
            "SELECT actor, outcome, resource FROM audit_event WHERE action = 'code_replay'"
                .to_string(),
        ))
        .await
        .expect("query")
        .expect("code_replay audit event");
    assert_eq!(row.try_get::<String>("", "actor").expect("actor"), ALICE_ID);
    assert_eq!(row.try_get::<String>("", "outcome").expect("outcome"), "failure");
    assert_eq!(
        row.try_get::<String>("", "resource").expect("resource"),
        format!("client:{PORTAL_CLIENT}")
    );
}

#[tokio::test]
async fn test_housekeeping_purges_only_expired_rows() {
    let (server, state, db) = test_server().await;
    let _live = portal_grant(&server, "housekeeping").await;

    for sql in [
        r#"INSERT INTO oauth2_authorization_request (client_id, state, redirect_uri, scope, code_challenge, code_challenge_method, user_id, status, expires_at, created_at)
           VALUES ('admin-portal', 'stale', 'http://localhost:3000/callback', 'openid', 'E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM', 'S256', NULL, 'pending', datetime('now', '-1 day'), datetime('now', '-1 day'));"#,
        r#"INSERT INTO oauth2_authorization (code_hash, client_id, user_id, redirect_uri, scope, code_challenge, code_challenge_method, expires_at, created_at)
           VALUES ('stale-code-hash', 'admin-portal', 'user-alice', 'http://localhost:3000/callback', 'openid', 'E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM', 'S256', datetime('now', '-1 day'), datetime('now', '-1 day'));"#,
        r#"INSERT INTO oauth2_refresh_token (jti, family_id, client_id, user_id, scope, expires_at, created_at)
           VALUES ('stale-jti', 'stale-family', 'admin-portal', 'user-alice', 'openid', datetime('now', '-1 day'), datetime('now', '-31 days'));"#,
    ] {
        db.execute(Statement::from_string(DbBackend::Sqlite, sql.to_string()))
            .await
            .expect("insert expired row");
    }

    let removed = portal_auth::oauth2::purge_expired(&state)
        .await
        .expect("purge");

    assert_eq!(removed, 3);
    assert_eq!(count(&db, "oauth2_authorization_request").await, 1);
    assert_eq!(count(&db, "oauth2_authorization").await, 1);
    assert_eq!(count(&db, "oauth2_refresh_token").await, 0);
}
