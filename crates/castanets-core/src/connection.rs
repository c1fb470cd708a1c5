//! Per-connection records.

use std::collections::HashMap;
use std::fmt;

/// Identifier of an accepted connection. Never reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Authorization state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Accepted, no valid token seen yet.
    Unauthorized,
    /// Token verified. Terminal until the connection goes away.
    Authorized,
    /// Token rejected and close requested; further events are discarded.
    Closed,
}

/// State kept for one accepted socket.
#[derive(Debug, Clone)]
pub struct Connection {
    remote_address: String,
    remote_port: u16,
    state: HandshakeState,
    challenge: Option<String>,
}

impl Connection {
    pub fn new(remote_address: impl Into<String>, remote_port: u16) -> Self {
        Self {
            remote_address: remote_address.into(),
            remote_port,
            state: HandshakeState::Unauthorized,
            challenge: None,
        }
    }

    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_authorized(&self) -> bool {
        self.state == HandshakeState::Authorized
    }

    pub fn is_closed(&self) -> bool {
        self.state == HandshakeState::Closed
    }

    /// Whether a challenge was sent on accept.
    pub fn challenged(&self) -> bool {
        self.challenge.is_some()
    }

    /// The token this connection was challenged with.
    pub fn challenge(&self) -> Option<&str> {
        self.challenge.as_deref()
    }

    pub(crate) fn set_challenge(&mut self, challenge: String) {
        self.challenge = Some(challenge);
    }

    pub(crate) fn authorize(&mut self) {
        debug_assert_eq!(self.state, HandshakeState::Unauthorized);
        self.state = HandshakeState::Authorized;
    }

    pub(crate) fn close(&mut self) {
        self.state = HandshakeState::Closed;
    }
}

/// Connection records indexed by [`ConnectionId`].
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
    next_id: u64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly accepted connection.
    pub fn insert(&mut self, remote_address: impl Into<String>, remote_port: u16) -> ConnectionId {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        self.connections
            .insert(id, Connection::new(remote_address, remote_port));
        id
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_not_reused() {
        let mut registry = ConnectionRegistry::new();
        assert!(registry.is_empty());
        let a = registry.insert("10.0.0.1", 4000);
        registry.remove(a);
        assert!(registry.is_empty());
        let b = registry.insert("10.0.0.1", 4000);
        assert_ne!(a, b);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn new_connection_is_unauthorized() {
        let conn = Connection::new("10.0.0.2", 5000);
        assert_eq!(conn.state(), HandshakeState::Unauthorized);
        assert!(!conn.is_authorized());
        assert!(!conn.challenged());
        assert_eq!(conn.challenge(), None);
        assert_eq!(conn.remote_address(), "10.0.0.2");
        assert_eq!(conn.remote_port(), 5000);
    }

    #[test]
    fn display_id() {
        let mut registry = ConnectionRegistry::new();
        let id = registry.insert("::1", 1);
        assert_eq!(id.to_string(), "conn#0");
    }
}
