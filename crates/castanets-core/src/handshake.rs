//! Token handshake.
//!
//! ```text
//! Client                                    Server
//!   |                                          |
//!   |  <-- verify-token://<challenge> ---------|  (only if a token was issued)
//!   |                                          |
//!   |  -- verify-token://<response> ---------> |  checked against the challenge
//!   |                                          |
//!   |  <-- verify-done:// ---------------------|  token accepted
//!   |      OR                                  |
//!   |  <-- (connection closed) ----------------|  token rejected
//! ```
//!
//! The verifier sees the challenge stored on the connection, so a response is
//! only good for the connection it was issued on. A connection is authorized
//! at most once. Further `verify-token` messages on
//! an authorized connection are ignored without consulting the verifier.

use crate::auth::{TokenIssuer, TokenVerifier};
use crate::connection::{Connection, HandshakeState};
use crate::message::Message;

/// Result of feeding a token to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Token verified; send `verify-done`.
    Accepted,
    /// Token rejected; close the connection.
    Rejected,
    /// Duplicate after a successful handshake.
    AlreadyAuthorized,
    /// The connection was already rejected.
    ConnectionClosed,
}

/// Challenge to send on accept, if the issuer produced a token.
pub fn challenge(issuer: &dyn TokenIssuer) -> Option<Message> {
    let token = issuer.issue_token();
    if token.is_empty() {
        None
    } else {
        Some(Message::VerifyToken(token))
    }
}

/// Drive `conn` with the token the peer sent.
pub fn verify(conn: &mut Connection, token: &str, verifier: &dyn TokenVerifier) -> HandshakeOutcome {
    match conn.state() {
        HandshakeState::Authorized => return HandshakeOutcome::AlreadyAuthorized,
        HandshakeState::Closed => return HandshakeOutcome::ConnectionClosed,
        HandshakeState::Unauthorized => {}
    }

    if verifier.verify_token(conn.challenge().unwrap_or_default(), token) {
        conn.authorize();
        HandshakeOutcome::Accepted
    } else {
        conn.close();
        HandshakeOutcome::Rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SharedSecret;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn challenged(secret: &SharedSecret) -> Connection {
        let mut conn = Connection::new("10.0.0.1", 1234);
        let Some(Message::VerifyToken(nonce)) = challenge(secret) else {
            panic!("no challenge issued");
        };
        conn.set_challenge(nonce);
        conn
    }

    #[test]
    fn challenge_only_for_non_empty_secret() {
        let issued = challenge(&SharedSecret::new("abc")).unwrap();
        assert_eq!(issued.payload().len(), crate::auth::NONCE_LEN);
        assert_eq!(challenge(&SharedSecret::new("")), None);
        assert_eq!(
            challenge(&|| "fixed".to_string()),
            Some(Message::VerifyToken("fixed".into()))
        );
    }

    #[test]
    fn valid_response_authorizes() {
        let secret = SharedSecret::new("abc");
        let mut conn = challenged(&secret);
        let response = secret.respond(conn.challenge().unwrap());
        let outcome = verify(&mut conn, &response, &secret);
        assert_eq!(outcome, HandshakeOutcome::Accepted);
        assert!(conn.is_authorized());
    }

    #[test]
    fn echoed_challenge_closes() {
        let secret = SharedSecret::new("abc");
        let mut conn = challenged(&secret);
        let echo = conn.challenge().unwrap().to_string();
        assert_eq!(verify(&mut conn, &echo, &secret), HandshakeOutcome::Rejected);
        assert!(conn.is_closed());
    }

    #[test]
    fn invalid_token_closes() {
        let secret = SharedSecret::new("abc");
        let mut conn = challenged(&secret);
        let response = secret.respond(conn.challenge().unwrap());
        let outcome = verify(&mut conn, "nope", &secret);
        assert_eq!(outcome, HandshakeOutcome::Rejected);
        assert!(conn.is_closed());

        // A later correct response cannot revive it.
        let outcome = verify(&mut conn, &response, &secret);
        assert_eq!(outcome, HandshakeOutcome::ConnectionClosed);
        assert!(!conn.is_authorized());
    }

    #[test]
    fn unchallenged_connection_passes_empty_challenge() {
        let verifier = |challenge: &str, token: &str| challenge.is_empty() && token == "abc";
        let mut conn = Connection::new("10.0.0.1", 1234);
        assert_eq!(verify(&mut conn, "abc", &verifier), HandshakeOutcome::Accepted);
    }

    #[test]
    fn duplicate_token_skips_verifier() {
        let calls = AtomicUsize::new(0);
        let verifier = |_: &str, token: &str| {
            calls.fetch_add(1, Ordering::SeqCst);
            token == "abc"
        };
        let mut conn = Connection::new("10.0.0.1", 1234);
        assert_eq!(verify(&mut conn, "abc", &verifier), HandshakeOutcome::Accepted);
        assert_eq!(
            verify(&mut conn, "wrong", &verifier),
            HandshakeOutcome::AlreadyAuthorized
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(conn.is_authorized());
    }
}
