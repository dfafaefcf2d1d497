pub mod audit_event;
pub mod oauth2_authorization;
pub mod oauth2_authorization_request;
pub mod oauth2_client;
pub mod oauth2_refresh_token;
pub mod oauth2_user;
