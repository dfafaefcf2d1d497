//! Sliding-window throttle for the login form.
//!
//! Each attempt reserves a slot per username and per client IP before the
//! password is checked; failures keep their slot. Once either key holds
//! `max_attempts` slots within the window, further attempts are refused until
//! the oldest one ages out.

use crate::config::LoginRateLimitConfig;
use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, request::Parts},
};
use dashmap::DashMap;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LimitKey {
    User(String),
    Ip(IpAddr),
}

/// A reserved login attempt, see [`LoginRateLimiter::try_acquire`].
#[derive(Debug)]
#[must_use]
pub struct LoginAttempt {
    keys: Vec<LimitKey>,
    at: Instant,
}

#[derive(Debug, Clone)]
pub struct LoginRateLimiter {
    max_attempts: usize,
    window: Duration,
    entries: Arc<DashMap<LimitKey, Vec<Instant>>>,
}

impl LoginRateLimiter {
    pub fn new(config: &LoginRateLimitConfig) -> Self {
        Self {
            max_attempts: config.max_attempts as usize,
            window: Duration::from_secs(config.window_secs),
            entries: Arc::new(DashMap::new()),
        }
    }

    fn keys(username: &str, ip: Option<IpAddr>) -> Vec<LimitKey> {
        let mut keys = vec![LimitKey::User(username.to_lowercase())];
        if let Some(ip) = ip {
            keys.push(LimitKey::Ip(ip));
        }
        keys
    }

    fn retry_after(&self, attempts: &[Instant], now: Instant) -> u64 {
        let oldest = attempts.iter().min().copied().unwrap_or(now);
        self.window
            .saturating_sub(now.duration_since(oldest))
            .as_secs()
            .max(1)
    }

    /// Reserve one login attempt against every key for this caller.
    ///
    /// Pruning, the limit check and the reservation happen under each key's
    /// entry guard, so concurrent attempts can never exceed `max_attempts`.
    /// Returns the seconds until retry when any key is exhausted. A dropped
    /// [`LoginAttempt`] stays counted as a failure.
    pub fn try_acquire(&self, username: &str, ip: Option<IpAddr>) -> Result<LoginAttempt, u64> {
        let now = Instant::now();
        let mut attempt = LoginAttempt {
            keys: Vec::new(),
            at: now,
        };
        for key in Self::keys(username, ip) {
            let mut entry = self.entries.entry(key.clone()).or_default();
            entry.retain(|t| now.duration_since(*t) < self.window);
            if entry.len() >= self.max_attempts {
                let retry_after = self.retry_after(&entry, now);
                drop(entry);
                self.release(attempt);
                return Err(retry_after);
            }
            entry.push(now);
            attempt.keys.push(key);
        }
        Ok(attempt)
    }

    /// Give back a reservation that did not end in a credential failure.
    pub fn release(&self, attempt: LoginAttempt) {
        for key in &attempt.keys {
            if let Some(mut entry) = self.entries.get_mut(key)
                && let Some(pos) = entry.iter().position(|t| *t == attempt.at)
            {
                entry.swap_remove(pos);
            }
        }
    }

    /// Successful login: the attempt is returned and the username counter
    /// cleared. Earlier failures from the same IP still count so one good
    /// account cannot unlock spraying from that address.
    pub fn succeed(&self, attempt: LoginAttempt, username: &str) {
        self.release(attempt);
        self.entries
            .remove(&LimitKey::User(username.to_lowercase()));
    }

    /// Drop keys with no failures inside the window.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.entries.retain(|_, attempts| {
            attempts.retain(|t| now.duration_since(*t) < self.window);
            !attempts.is_empty()
        });
    }
}

/// Best-effort client address.
///
/// Proxy headers are only consulted when [`TrustProxyHeaders`] is present in
/// the request extensions; otherwise the socket address is used.
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub Option<IpAddr>);

/// Request extension enabling `X-Forwarded-For` / `X-Real-IP`.
#[derive(Debug, Clone, Copy)]
pub struct TrustProxyHeaders;

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
        })
}

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if parts.extensions.get::<TrustProxyHeaders>().is_some() {
            if let Some(ip) = forwarded_ip(&parts.headers) {
                return Ok(ClientIp(Some(ip)));
            }
        }
        let socket = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(ClientIp(socket))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn limiter(max_attempts: u32) -> LoginRateLimiter {
        LoginRateLimiter::new(&LoginRateLimitConfig {
            max_attempts,
            window_secs: 900,
        })
    }

    #[test]
    fn test_blocks_after_max_failures() {
        let limiter = limiter(3);
        let ip = Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));

        for _ in 0..3 {
            let _failed = limiter.try_acquire("alice", ip).unwrap();
        }

        let retry_after = limiter.try_acquire("alice", ip).unwrap_err();
        assert!(retry_after > 0 && retry_after <= 900);
    }

    #[test]
    fn test_outstanding_reservations_count() {
        let limiter = limiter(2);
        let first = limiter.try_acquire("alice", None).unwrap();
        let second = limiter.try_acquire("alice", None).unwrap();

        // Both attempts are still in flight; a third must wait.
        assert!(limiter.try_acquire("alice", None).is_err());

        limiter.release(first);
        let _third = limiter.try_acquire("alice", None).unwrap();
        drop(second);
    }

    #[test]
    fn test_username_is_case_insensitive() {
        let limiter = limiter(2);
        let _a = limiter.try_acquire("Alice", None).unwrap();
        let _b = limiter.try_acquire("ALICE", None).unwrap();
        assert!(limiter.try_acquire("alice", None).is_err());
    }

    #[test]
    fn test_ip_counter_spans_usernames() {
        let limiter = limiter(2);
        let ip = Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));
        let _a = limiter.try_acquire("alice", ip).unwrap();
        let _b = limiter.try_acquire("bob", ip).unwrap();
        assert!(limiter.try_acquire("carol", ip).is_err());

        // The refused attempt reserved nothing on carol's username key.
        let _c = limiter.try_acquire("carol", None).unwrap();
        let _d = limiter.try_acquire("carol", None).unwrap();
        assert!(limiter.try_acquire("carol", None).is_err());
    }

    #[test]
    fn test_success_clears_username_only() {
        let limiter = limiter(2);
        let ip = Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3)));
        let _failed = limiter.try_acquire("alice", ip).unwrap();
        let ok = limiter.try_acquire("alice", ip).unwrap();
        limiter.succeed(ok, "alice");

        let _again = limiter.try_acquire("alice", None).unwrap();
        let _other = limiter.try_acquire("bob", ip).unwrap();
        assert!(limiter.try_acquire("carol", ip).is_err());
    }

    #[test]
    fn test_forwarded_header_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(
            forwarded_ip(&headers),
            Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)))
        );

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "198.51.100.4".parse().unwrap());
        assert_eq!(
            forwarded_ip(&headers),
            Some(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 4)))
        );
    }
}
