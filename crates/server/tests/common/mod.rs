//! Shared fixtures for the authorization server integration tests.

#![allow(dead_code)]

use axum::{
    Router,
    routing::{get, post},
};
use axum_test::{TestResponse, TestServer};
use portal_auth::config::OAuth2Config;
use portal_auth::oauth2::{
    OAuth2State, consent, endpoints, hash_password, login, pkce,
    session::SESSION_COOKIE_NAME,
};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbBackend, Statement};
use std::sync::Arc;

pub const ISSUER: &str = "http://localhost:8080";
pub const SECRET: &str = "test-signing-secret-0123456789abcdef";

pub const PORTAL_CLIENT: &str = "admin-portal";
pub const PORTAL_REDIRECT: &str = "http://localhost:3000/callback";
pub const MOBILE_CLIENT: &str = "mobile-app";
pub const MOBILE_REDIRECT: &str = "com.example.portal:/oauth2redirect";
pub const REPORTING_CLIENT: &str = "reporting";
pub const REPORTING_SECRET: &str = "reporting-secret-value";

pub const ALICE_ID: &str = "user-alice";
pub const ALICE_USERNAME: &str = "alice";
pub const ALICE_PASSWORD: &str = "correct horse battery staple";
pub const LOCKED_USERNAME: &str = "mallory";
pub const USER_PASSWORD: &str = "hunter2-but-longer";

async fn exec(db: &DatabaseConnection, sql: &str) {
    db.execute(Statement::from_string(DbBackend::Sqlite, sql.to_string()))
        .await
        .unwrap_or_else(|e| panic!("failed to execute {sql}: {e}"));
}

/// Create a test database with the authorization tables and fixtures.
pub async fn create_test_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.expect("connect");

    exec(
        &db,
        r#"CREATE TABLE oauth2_client (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            client_type TEXT NOT NULL DEFAULT 'public',
            secret_hash TEXT NULL,
            redirect_uris TEXT NOT NULL,
            grant_types TEXT NOT NULL,
            scopes TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );"#,
    )
    .await;

    exec(
        &db,
        r#"CREATE TABLE oauth2_user (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            username TEXT NOT NULL UNIQUE,
            email_verified INTEGER NOT NULL DEFAULT 0,
            name TEXT NULL,
            given_name TEXT NULL,
            family_name TEXT NULL,
            picture TEXT NULL,
            password_hash TEXT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL,
            last_login_at TEXT NULL
        );"#,
    )
    .await;

    exec(
        &db,
        r#"CREATE TABLE oauth2_authorization_request (
            client_id TEXT NOT NULL,
            state TEXT NOT NULL,
            redirect_uri TEXT NOT NULL,
            scope TEXT NOT NULL,
            code_challenge TEXT NOT NULL,
            code_challenge_method TEXT NOT NULL,
            user_id TEXT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            expires_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (client_id, state)
        );"#,
    )
    .await;

    exec(
        &db,
        r#"CREATE TABLE oauth2_authorization (
            code_hash TEXT PRIMARY KEY,
            client_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            redirect_uri TEXT NOT NULL,
            scope TEXT NOT NULL,
            code_challenge TEXT NOT NULL,
            code_challenge_method TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            consumed_at TEXT NULL,
            token_family TEXT NULL
        );"#,
    )
    .await;

    exec(
        &db,
        r#"CREATE TABLE oauth2_refresh_token (
            jti TEXT PRIMARY KEY,
            family_id TEXT NOT NULL,
            client_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            scope TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            consumed_at TEXT NULL,
            revoked_at TEXT NULL
        );"#,
    )
    .await;

    exec(
        &db,
        r#"CREATE TABLE audit_event (
            id TEXT PRIMARY KEY,
            occurred_at TEXT NOT NULL,
            actor TEXT NOT NULL,
            action TEXT NOT NULL,
            resource TEXT NULL,
            outcome TEXT NOT NULL,
            metadata TEXT NULL
        );"#,
    )
    .await;

    // Public SPA client (redirect_uris must be JSON array)
    exec(
        &db,
        r#"INSERT INTO oauth2_client (id, name, client_type, secret_hash, redirect_uris, grant_types, scopes, status, created_at, updated_at)
           VALUES ('admin-portal', 'Admin Portal', 'public', NULL, '["http://localhost:3000/callback"]', 'authorization_code refresh_token', 'openid profile email', 'active', datetime('now'), datetime('now'));"#,
    )
    .await;

    // Public native client without refresh tokens
    exec(
        &db,
        r#"INSERT INTO oauth2_client (id, name, client_type, secret_hash, redirect_uris, grant_types, scopes, status, created_at, updated_at)
           VALUES ('mobile-app', 'Mobile App', 'public', NULL, '["com.example.portal:/oauth2redirect"]', 'authorization_code', 'openid profile', 'active', datetime('now'), datetime('now'));"#,
    )
    .await;

    // Disabled client
    exec(
        &db,
        r#"INSERT INTO oauth2_client (id, name, client_type, secret_hash, redirect_uris, grant_types, scopes, status, created_at, updated_at)
           VALUES ('retired-app', 'Retired App', 'public', NULL, '["http://localhost:4000/callback"]', 'authorization_code', 'openid', 'inactive', datetime('now'), datetime('now'));"#,
    )
    .await;

    // Confidential machine client
    let secret_hash = hash_password(REPORTING_SECRET).expect("hash client secret");
    exec(
        &db,
        &format!(
            r#"INSERT INTO oauth2_client (id, name, client_type, secret_hash, redirect_uris, grant_types, scopes, status, created_at, updated_at)
               VALUES ('reporting', 'Reporting Service', 'confidential', '{secret_hash}', '["https://reports.example.org/callback"]', 'client_credentials authorization_code refresh_token', 'openid reports:read reports:write', 'active', datetime('now'), datetime('now'));"#
        ),
    )
    .await;

    let alice_hash = hash_password(ALICE_PASSWORD).expect("hash password");
    exec(
        &db,
        &format!(
            r#"INSERT INTO oauth2_user (id, email, username, email_verified, name, given_name, family_name, picture, password_hash, status, created_at)
               VALUES ('user-alice', 'alice@example.org', 'alice', 1, 'Alice Liddell', 'Alice', 'Liddell', 'https://example.org/alice.png', '{alice_hash}', 'active', datetime('now'));"#
        ),
    )
    .await;

    let user_hash = hash_password(USER_PASSWORD).expect("hash password");
    exec(
        &db,
        &format!(
            r#"INSERT INTO oauth2_user (id, email, username, email_verified, name, password_hash, status, created_at)
               VALUES ('user-mallory', 'mallory@example.org', 'mallory', 0, 'Mallory', '{user_hash}', 'locked', datetime('now'));"#
        ),
    )
    .await;

    exec(
        &db,
        &format!(
            r#"INSERT INTO oauth2_user (id, email, username, email_verified, name, password_hash, status, created_at)
               VALUES ('user-oscar', 'oscar@example.org', 'oscar', 1, 'Oscar', '{user_hash}', 'inactive', datetime('now'));"#
        ),
    )
    .await;

    db
}

pub fn test_config() -> OAuth2Config {
    let mut config = OAuth2Config::new(ISSUER, SECRET);
    config.secure_cookies = false;
    config
}

pub async fn create_test_state_with(config: OAuth2Config) -> (OAuth2State, Arc<DatabaseConnection>) {
    let db = Arc::new(create_test_db().await);
    (OAuth2State::new(db.clone(), config), db)
}

pub async fn create_test_state() -> (OAuth2State, Arc<DatabaseConnection>) {
    create_test_state_with(test_config()).await
}

pub fn test_router(state: OAuth2State) -> Router {
    Router::new()
        .route("/oauth2/authorize", get(endpoints::authorize))
        .route(
            "/oauth2/login",
            get(login::login_page).post(login::login_submit),
        )
        .route(
            "/oauth2/consent",
            get(consent::consent_page).post(consent::consent_submit),
        )
        .route("/oauth2/token", post(endpoints::token))
        .route("/oauth2/revoke", post(endpoints::revoke))
        .route("/oauth2/userinfo", get(endpoints::userinfo))
        .with_state(state)
}

pub async fn test_server() -> (TestServer, OAuth2State, Arc<DatabaseConnection>) {
    let (state, db) = create_test_state().await;
    let server = TestServer::new(test_router(state.clone())).expect("create test server");
    (server, state, db)
}

pub fn pkce_pair() -> (String, String) {
    let verifier = pkce::generate_verifier().expect("generate verifier");
    let challenge = pkce::derive_challenge(&verifier);
    (verifier, challenge)
}

pub fn location(response: &TestResponse) -> String {
    response
        .headers()
        .get("location")
        .expect("location header")
        .to_str()
        .expect("location is ascii")
        .to_string()
}

/// Parse a Location header, resolving relative paths against the server.
pub fn location_url(response: &TestResponse) -> url::Url {
    let location = location(response);
    url::Url::parse(&location)
        .or_else(|_| url::Url::parse("http://localhost").and_then(|base| base.join(&location)))
        .expect("valid location")
}

pub fn query_param(url: &url::Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

pub struct AuthorizeParams<'a> {
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub scope: &'a str,
    pub state: &'a str,
    pub challenge: &'a str,
}

impl<'a> AuthorizeParams<'a> {
    pub fn portal(state: &'a str, challenge: &'a str) -> Self {
        Self {
            client_id: PORTAL_CLIENT,
            redirect_uri: PORTAL_REDIRECT,
            scope: "openid profile",
            state,
            challenge,
        }
    }
}

pub async fn authorize(server: &TestServer, params: &AuthorizeParams<'_>) -> TestResponse {
    server
        .get("/oauth2/authorize")
        .add_query_param("response_type", "code")
        .add_query_param("client_id", params.client_id)
        .add_query_param("redirect_uri", params.redirect_uri)
        .add_query_param("scope", params.scope)
        .add_query_param("state", params.state)
        .add_query_param("code_challenge", params.challenge)
        .add_query_param("code_challenge_method", "S256")
        .await
}

pub async fn submit_login(
    server: &TestServer,
    client_id: &str,
    state: &str,
    username: &str,
    password: &str,
) -> TestResponse {
    server
        .post("/oauth2/login")
        .form(&[
            ("client_id", client_id),
            ("state", state),
            ("username", username),
            ("password", password),
        ])
        .await
}

pub async fn submit_consent(server: &TestServer, ticket: &str, action: &str) -> TestResponse {
    server
        .post("/oauth2/consent")
        .form(&[("ticket", ticket), ("action", action)])
        .await
}

/// Result of a completed browser flow.
pub struct Grant {
    pub code: String,
    pub verifier: String,
    pub session_cookie: String,
}

/// Run authorize → login → consent(approve) as alice and return the code.
pub async fn obtain_code(server: &TestServer, params: &AuthorizeParams<'_>) -> TestResponse {
    let response = authorize(server, params).await;
    response.assert_status_see_other();
    let login_url = location_url(&response);
    assert_eq!(login_url.path(), "/oauth2/login");

    let response = submit_login(
        server,
        params.client_id,
        params.state,
        ALICE_USERNAME,
        ALICE_PASSWORD,
    )
    .await;
    response.assert_status_see_other();
    let consent_url = location_url(&response);
    assert_eq!(consent_url.path(), "/oauth2/consent");
    let ticket = query_param(&consent_url, "ticket").expect("consent ticket");

    submit_consent(server, &ticket, "approve").await
}

/// Full flow for admin-portal with a fresh PKCE pair.
pub async fn portal_grant(server: &TestServer, state: &str) -> Grant {
    let (verifier, challenge) = pkce_pair();
    let params = AuthorizeParams::portal(state, &challenge);

    let response = authorize(server, &params).await;
    response.assert_status_see_other();

    let response = submit_login(server, PORTAL_CLIENT, state, ALICE_USERNAME, ALICE_PASSWORD).await;
    response.assert_status_see_other();
    let session_cookie = response.cookie(SESSION_COOKIE_NAME).value().to_string();
    let ticket = query_param(&location_url(&response), "ticket").expect("consent ticket");

    let response = submit_consent(server, &ticket, "approve").await;
    response.assert_status(axum::http::StatusCode::FOUND);
    let redirect = location_url(&response);
    assert_eq!(query_param(&redirect, "state").as_deref(), Some(state));

    Grant {
        code: query_param(&redirect, "code").expect("authorization code"),
        verifier,
        session_cookie,
    }
}

pub async fn redeem(
    server: &TestServer,
    client_id: &str,
    code: &str,
    redirect_uri: &str,
    verifier: &str,
) -> TestResponse {
    server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("client_id", client_id),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("code_verifier", verifier),
        ])
        .await
}

pub async fn refresh(server: &TestServer, client_id: &str, refresh_token: &str) -> TestResponse {
    server
        .post("/oauth2/token")
        .form(&[
            ("grant_type", "refresh_token"),
            ("client_id", client_id),
            ("refresh_token", refresh_token),
        ])
        .await
}

pub async fn count(db: &DatabaseConnection, table: &str) -> i64 {
    let row = db
        .query_one(Statement::from_string(
            DbBackend::Sqlite,
            format!("SELECT COUNT(*) AS n FROM {table}"),
        ))
        .await
        .expect("count query")
        .expect("count row");
    row.try_get::<i64>("", "n").expect("count value")
}
