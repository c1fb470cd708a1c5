//! Token issuance and verification seams.
//!
//! The broker treats both as opaque: it only needs a challenge to send and a
//! yes/no answer for the peer's response to that challenge.

use rand::Rng;
use rand::distributions::Alphanumeric;

/// Length of the nonce [`SharedSecret`] issues per connection.
pub const NONCE_LEN: usize = 32;

const KEY_CONTEXT: &str = "castanets service-server 2026-01 token response";

/// Produces the challenge sent to each new connection.
///
/// An empty token means no challenge is sent.
pub trait TokenIssuer: Send + Sync {
    fn issue_token(&self) -> String;
}

/// Decides whether a peer's response authorizes its connection.
///
/// `challenge` is the token issued on that connection, or empty when none was.
pub trait TokenVerifier: Send + Sync {
    fn verify_token(&self, challenge: &str, token: &str) -> bool;
}

impl<F> TokenIssuer for F
where
    F: Fn() -> String + Send + Sync,
{
    fn issue_token(&self) -> String {
        self()
    }
}

impl<F> TokenVerifier for F
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    fn verify_token(&self, challenge: &str, token: &str) -> bool {
        self(challenge, token)
    }
}

/// Pre-shared secret driving a nonce challenge.
///
/// Each connection is challenged with a fresh random nonce. The peer answers
/// with the hex blake3 keyed hash of that nonce under a key derived from the
/// secret, so the secret itself never crosses the wire and an echoed or
/// replayed answer fails.
///
/// An empty secret locks every connection out: nothing is issued and nothing
/// verifies.
#[derive(Clone)]
pub struct SharedSecret {
    key: Option<[u8; 32]>,
}

impl SharedSecret {
    pub fn new(secret: impl AsRef<str>) -> Self {
        let secret = secret.as_ref();
        let key = (!secret.is_empty())
            .then(|| blake3::derive_key(KEY_CONTEXT, secret.as_bytes()));
        Self { key }
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_none()
    }

    /// Answer a holder of this secret sends for `challenge`.
    pub fn respond(&self, challenge: &str) -> String {
        match &self.key {
            Some(key) => blake3::keyed_hash(key, challenge.as_bytes())
                .to_hex()
                .to_string(),
            None => String::new(),
        }
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecret")
            .field("key", &self.key.map(|_| "<redacted>"))
            .finish()
    }
}

impl TokenIssuer for SharedSecret {
    fn issue_token(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(NONCE_LEN)
            .map(char::from)
            .collect()
    }
}

impl TokenVerifier for SharedSecret {
    fn verify_token(&self, challenge: &str, token: &str) -> bool {
        let Some(key) = &self.key else {
            return false;
        };
        if challenge.is_empty() {
            return false;
        }
        let Ok(answer) = blake3::Hash::from_hex(token) else {
            return false;
        };
        // blake3::Hash equality is constant-time.
        answer == blake3::keyed_hash(key, challenge.as_bytes())
    }
}
