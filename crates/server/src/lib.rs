//! OAuth 2.1 authorization server for the admin portal.
//!
//! Implements the Authorization Code flow with mandatory PKCE, refresh token
//! rotation with family revocation, bearer-token protected resources and the
//! OpenID Connect UserInfo endpoint.

pub mod api;
pub mod audit;
pub mod cache;
pub mod config;
pub mod entity;
pub mod error;
pub mod oauth2;
