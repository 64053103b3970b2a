//! HTTP-01 key authorization store
//!
//! Holds the `token -> key authorization` pairs of in-progress orders so an
//! HTTP responder can answer `/.well-known/acme-challenge/<token>`.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace};

/// HTTP-01 challenge path prefix
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Shared map of pending HTTP-01 challenges
///
/// Clones share the same map, so the ACME client can publish while a
/// responder running elsewhere reads.
#[derive(Debug, Clone, Default)]
pub struct ChallengeStore {
    challenges: Arc<DashMap<String, String>>,
}

impl ChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a key authorization available for `token`
    pub fn publish(&self, token: &str, key_authorization: &str) {
        debug!(token = %token, "Publishing HTTP-01 key authorization");
        self.challenges
            .insert(token.to_string(), key_authorization.to_string());
    }

    /// Withdraw a completed or abandoned challenge
    pub fn withdraw(&self, token: &str) {
        if self.challenges.remove(token).is_some() {
            debug!(token = %token, "Withdrew HTTP-01 key authorization");
        }
    }

    /// Key authorization to serve for `token`
    pub fn key_authorization(&self, token: &str) -> Option<String> {
        let found = self.challenges.get(token).map(|entry| entry.value().clone());
        trace!(token = %token, found = found.is_some(), "HTTP-01 challenge lookup");
        found
    }

    /// Key authorization for a request path under [`ACME_CHALLENGE_PREFIX`]
    pub fn respond(&self, path: &str) -> Option<String> {
        self.key_authorization(Self::token_from_path(path)?)
    }

    /// Extract the token from a challenge request path
    pub fn token_from_path(path: &str) -> Option<&str> {
        path.strip_prefix(ACME_CHALLENGE_PREFIX)
            .filter(|token| !token.is_empty())
    }

    pub fn len(&self) -> usize {
        self.challenges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.challenges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_and_withdraw() {
        let store = ChallengeStore::new();

        store.publish("tok", "tok.thumbprint");
        assert_eq!(store.key_authorization("tok").as_deref(), Some("tok.thumbprint"));
        assert_eq!(store.len(), 1);

        store.withdraw("tok");
        assert!(store.is_empty());
        assert_eq!(store.key_authorization("tok"), None);
    }

    #[test]
    fn test_token_from_path() {
        assert_eq!(
            ChallengeStore::token_from_path("/.well-known/acme-challenge/abc123"),
            Some("abc123")
        );
        assert_eq!(ChallengeStore::token_from_path("/.well-known/acme-challenge/"), None);
        assert_eq!(ChallengeStore::token_from_path("/.well-known/acme-challenge"), None);
        assert_eq!(ChallengeStore::token_from_path("/index.html"), None);
    }

    #[test]
    fn test_respond_by_path() {
        let store = ChallengeStore::new();
        store.publish("abc", "abc.key");

        assert_eq!(
            store.respond("/.well-known/acme-challenge/abc").as_deref(),
            Some("abc.key")
        );
        assert_eq!(store.respond("/.well-known/acme-challenge/other"), None);
    }

    #[test]
    fn test_clones_share_state() {
        let publisher = ChallengeStore::new();
        let responder = publisher.clone();

        publisher.publish("token", "auth");
        assert_eq!(responder.key_authorization("token").as_deref(), Some("auth"));
    }
}
