//! PKCE (RFC 7636) challenge derivation and verification.
//!
//! Only the `S256` method is accepted. `plain` is rejected outright because it
//! lets an attacker who intercepts the authorization request downgrade the
//! binding to a bare string comparison.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use subtle::ConstantTimeEq;
use thiserror::Error;

pub const MIN_VERIFIER_LEN: usize = 43;
pub const MAX_VERIFIER_LEN: usize = 128;
/// Length of base64url(SHA-256(..)) without padding.
pub const S256_CHALLENGE_LEN: usize = 43;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeChallengeMethod {
    S256,
}

impl CodeChallengeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S256 => "S256",
        }
    }
}

impl FromStr for CodeChallengeMethod {
    type Err = PkceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "S256" => Ok(Self::S256),
            "plain" => Err(PkceError::PlainRejected),
            other => Err(PkceError::UnsupportedMethod(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PkceError {
    #[error("code_challenge_method 'plain' is not allowed")]
    PlainRejected,
    #[error("unsupported code_challenge_method: {0}")]
    UnsupportedMethod(String),
    #[error("code_verifier must be {MIN_VERIFIER_LEN}-{MAX_VERIFIER_LEN} unreserved characters")]
    InvalidVerifier,
    #[error("code_challenge is not a valid S256 challenge")]
    InvalidChallenge,
    #[error("code_verifier does not match code_challenge")]
    Mismatch,
}

/// Unreserved characters: ALPHA / DIGIT / "-" / "." / "_" / "~"
fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}

fn is_base64url(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_')
}

/// Generate a high-entropy verifier (32 random bytes, 43 characters).
pub fn generate_verifier() -> Result<String, getrandom::Error> {
    let mut bytes = [0u8; 32];
    getrandom::fill(&mut bytes)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

pub fn validate_verifier(verifier: &str) -> Result<(), PkceError> {
    let len = verifier.len();
    if !(MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&len)
        || !verifier.bytes().all(is_unreserved)
    {
        return Err(PkceError::InvalidVerifier);
    }
    Ok(())
}

pub fn validate_challenge(challenge: &str) -> Result<(), PkceError> {
    if challenge.len() != S256_CHALLENGE_LEN || !challenge.bytes().all(is_base64url) {
        return Err(PkceError::InvalidChallenge);
    }
    Ok(())
}

/// `base64url(SHA-256(verifier))`
pub fn derive_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Check a verifier presented at the token endpoint against the challenge
/// stored at authorize time.
pub fn verify(
    verifier: &str,
    stored_challenge: &str,
    method: CodeChallengeMethod,
) -> Result<(), PkceError> {
    validate_verifier(verifier)?;
    let computed = match method {
        CodeChallengeMethod::S256 => derive_challenge(verifier),
    };
    if bool::from(computed.as_bytes().ct_eq(stored_challenge.as_bytes())) {
        Ok(())
    } else {
        Err(PkceError::Mismatch)
    }
}
