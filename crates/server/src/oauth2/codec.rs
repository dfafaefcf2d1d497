//! Token codec: issues and verifies the signed, time-bound tokens used by the
//! authorization server.
//!
//! All tokens are HS256 JWTs signed with the process-wide `token_secret`. Each
//! claims type carries a `typ` discriminator so a token minted for one purpose
//! (e.g. a consent ticket) can never be replayed as another (e.g. an access
//! token).

use crate::oauth2::scope::ScopeSet;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
    Session,
    Consent,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,
    #[error("token signature is invalid")]
    BadSignature,
    #[error("token is malformed")]
    Malformed,
    #[error("token is not a {expected:?} token")]
    WrongKind { expected: TokenKind },
    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// Claims types the codec knows how to issue and verify.
pub trait TypedClaims: Serialize + DeserializeOwned {
    const KIND: TokenKind;

    fn kind(&self) -> TokenKind;
}

fn now_ts() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn new_jti() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Who `sub` names in an access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    User,
    Client,
}

/// Bearer access token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub iss: String,
    /// User id, or the client id for `client_credentials` tokens.
    pub sub: String,
    pub sub_kind: SubjectKind,
    pub client_id: String,
    pub scope: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    pub typ: TokenKind,
}

impl AccessClaims {
    /// Claims for a token issued on behalf of user `sub`.
    pub fn new(issuer: &str, sub: &str, client_id: &str, scopes: &ScopeSet, ttl: i64) -> Self {
        Self::with_subject(issuer, sub, SubjectKind::User, client_id, scopes, ttl)
    }

    /// Claims for a `client_credentials` token; the client is its own subject.
    pub fn for_client(issuer: &str, client_id: &str, scopes: &ScopeSet, ttl: i64) -> Self {
        Self::with_subject(issuer, client_id, SubjectKind::Client, client_id, scopes, ttl)
    }

    fn with_subject(
        issuer: &str,
        sub: &str,
        sub_kind: SubjectKind,
        client_id: &str,
        scopes: &ScopeSet,
        ttl: i64,
    ) -> Self {
        let iat = now_ts();
        Self {
            iss: issuer.to_string(),
            sub: sub.to_string(),
            sub_kind,
            client_id: client_id.to_string(),
            scope: scopes.to_string(),
            iat,
            exp: iat + ttl,
            jti: new_jti(),
            typ: TokenKind::Access,
        }
    }

    pub fn scopes(&self) -> ScopeSet {
        self.scope.parse().unwrap_or_default()
    }
}

impl TypedClaims for AccessClaims {
    const KIND: TokenKind = TokenKind::Access;
    fn kind(&self) -> TokenKind {
        self.typ
    }
}

/// Refresh token claims. `fam` groups every token descended from a single
/// authorization code so reuse of a rotated token can revoke all of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub iss: String,
    pub sub: String,
    pub client_id: String,
    pub scope: String,
    pub fam: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    pub typ: TokenKind,
}

impl RefreshClaims {
    /// `exp` is absolute so rotated tokens can inherit their family's expiry.
    pub fn new(
        issuer: &str,
        sub: &str,
        client_id: &str,
        scopes: &ScopeSet,
        family: &str,
        exp: i64,
    ) -> Self {
        Self {
            iss: issuer.to_string(),
            sub: sub.to_string(),
            client_id: client_id.to_string(),
            scope: scopes.to_string(),
            fam: family.to_string(),
            iat: now_ts(),
            exp,
            jti: new_jti(),
            typ: TokenKind::Refresh,
        }
    }
}

impl TypedClaims for RefreshClaims {
    const KIND: TokenKind = TokenKind::Refresh;
    fn kind(&self) -> TokenKind {
        self.typ
    }
}

/// Browser single sign-on session, stored in an HttpOnly cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub iss: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub typ: TokenKind,
}

impl SessionClaims {
    pub fn new(issuer: &str, sub: &str, ttl: i64) -> Self {
        let iat = now_ts();
        Self {
            iss: issuer.to_string(),
            sub: sub.to_string(),
            iat,
            exp: iat + ttl,
            typ: TokenKind::Session,
        }
    }
}

impl TypedClaims for SessionClaims {
    const KIND: TokenKind = TokenKind::Session;
    fn kind(&self) -> TokenKind {
        self.typ
    }
}

/// Ticket authorising the consent step of one pending authorization request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentClaims {
    pub iss: String,
    pub sub: String,
    pub client_id: String,
    pub state: String,
    pub iat: i64,
    pub exp: i64,
    pub typ: TokenKind,
}

impl ConsentClaims {
    pub fn new(issuer: &str, sub: &str, client_id: &str, state: &str, ttl: i64) -> Self {
        let iat = now_ts();
        Self {
            iss: issuer.to_string(),
            sub: sub.to_string(),
            client_id: client_id.to_string(),
            state: state.to_string(),
            iat,
            exp: iat + ttl,
            typ: TokenKind::Consent,
        }
    }
}

impl TypedClaims for ConsentClaims {
    const KIND: TokenKind = TokenKind::Consent;
    fn kind(&self) -> TokenKind {
        self.typ
    }
}

/// HS256 signer/verifier bound to one issuer.
pub struct TokenCodec {
    issuer: String,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenCodec {
    pub fn new(issuer: impl Into<String>, secret: &[u8]) -> Self {
        let issuer = issuer.into();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        Self {
            issuer,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn issue<C: TypedClaims>(&self, claims: &C) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    pub fn verify<C: TypedClaims>(&self, token: &str) -> Result<C, TokenError> {
        let data = decode::<C>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature => TokenError::BadSignature,
                _ => TokenError::Malformed,
            }
        })?;

        if data.claims.kind() != C::KIND {
            return Err(TokenError::WrongKind { expected: C::KIND });
        }
        Ok(data.claims)
    }
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}
