//! Service broker: connection events in, challenges/acks/launches out.

use crate::auth::{TokenIssuer, TokenVerifier};
use crate::connection::{Connection, ConnectionId, ConnectionRegistry, HandshakeState};
use crate::error::BrokerError;
use crate::handshake::{self, HandshakeOutcome};
use crate::launch::Launcher;
use crate::message::Message;
use crate::request;
use crate::transport::Transport;
use parking_lot::Mutex;
use std::sync::Arc;

/// What the broker did with one delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Token accepted and `verify-done` sent.
    Authorized,
    /// Launcher started a worker with these arguments.
    Launched { argv: Vec<String> },
    /// Nothing to do (duplicate token, server-only message, closed connection).
    Ignored,
}

/// Handles transport events for every connection of one server.
///
/// The registry lock is never held while a collaborator runs, so a slow
/// verifier or launcher on one connection does not stall the others. The
/// transport must deliver at most one event per connection at a time.
pub struct ServiceBroker {
    issuer: Arc<dyn TokenIssuer>,
    verifier: Arc<dyn TokenVerifier>,
    launcher: Arc<dyn Launcher>,
    transport: Arc<dyn Transport>,
    connections: Mutex<ConnectionRegistry>,
}

impl ServiceBroker {
    pub fn new(
        issuer: Arc<dyn TokenIssuer>,
        verifier: Arc<dyn TokenVerifier>,
        launcher: Arc<dyn Launcher>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            issuer,
            verifier,
            launcher,
            transport,
            connections: Mutex::new(ConnectionRegistry::new()),
        }
    }

    /// Record a freshly accepted socket. Call [`on_accepted`](Self::on_accepted)
    /// once the transport can route frames to the returned id.
    pub fn register(&self, remote_address: impl Into<String>, remote_port: u16) -> ConnectionId {
        self.connections.lock().insert(remote_address, remote_port)
    }

    /// Send the token challenge, if the issuer has one. At most one challenge
    /// is sent per connection.
    pub fn on_accepted(&self, conn: ConnectionId) -> Result<(), BrokerError> {
        match self.connections.lock().get(conn) {
            None => return Err(BrokerError::UnknownConnection { conn }),
            Some(record)
                if record.challenged() || record.state() != HandshakeState::Unauthorized =>
            {
                return Ok(());
            }
            Some(_) => {}
        }

        let Some(challenge) = handshake::challenge(self.issuer.as_ref()) else {
            tracing::debug!("No token issued, {} stays unauthorized", conn);
            return Ok(());
        };

        if let Some(record) = self.connections.lock().get_mut(conn) {
            record.set_challenge(challenge.payload().to_string());
        }
        self.transport.send(conn, challenge.encode());
        tracing::debug!("Sent token challenge to {}", conn);
        Ok(())
    }

    /// Handle one complete message from `conn`.
    pub fn on_data(&self, conn: ConnectionId, bytes: &[u8]) -> Result<Dispatch, BrokerError> {
        let snapshot = self
            .connection(conn)
            .ok_or(BrokerError::UnknownConnection { conn })?;
        if snapshot.is_closed() {
            return Ok(Dispatch::Ignored);
        }

        let message = match Message::decode(bytes) {
            Ok(message) => message,
            Err(source) => {
                tracing::debug!("Ignoring unrecognized message on {}: {}", conn, source);
                return Err(BrokerError::UnrecognizedMessage { conn, source });
            }
        };

        match message {
            Message::VerifyToken(token) => self.handle_token(conn, snapshot, &token),
            Message::ServiceRequest(payload) => self.handle_service_request(conn, &snapshot, &payload),
            Message::VerifyDone => {
                tracing::debug!("Ignoring verify-done from {}", conn);
                Ok(Dispatch::Ignored)
            }
        }
    }

    /// Discard the record for a connection the transport has closed.
    pub fn on_closed(&self, conn: ConnectionId) -> Option<Connection> {
        let removed = self.connections.lock().remove(conn);
        if removed.is_some() {
            tracing::debug!("Discarded {}", conn);
        }
        removed
    }

    pub fn is_authorized(&self, conn: ConnectionId) -> bool {
        self.connections
            .lock()
            .get(conn)
            .is_some_and(Connection::is_authorized)
    }

    /// Copy of the record for `conn`.
    pub fn connection(&self, conn: ConnectionId) -> Option<Connection> {
        self.connections.lock().get(conn).cloned()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    fn handle_token(
        &self,
        conn: ConnectionId,
        mut record: Connection,
        token: &str,
    ) -> Result<Dispatch, BrokerError> {
        let outcome = handshake::verify(&mut record, token, self.verifier.as_ref());

        match outcome {
            HandshakeOutcome::Accepted | HandshakeOutcome::Rejected => {
                let state = record.state();
                match self.connections.lock().get_mut(conn) {
                    Some(stored) if state == HandshakeState::Authorized => stored.authorize(),
                    Some(stored) => stored.close(),
                    None => return Err(BrokerError::UnknownConnection { conn }),
                }
            }
            HandshakeOutcome::AlreadyAuthorized | HandshakeOutcome::ConnectionClosed => {}
        }

        match outcome {
            HandshakeOutcome::Accepted => {
                self.transport.send(conn, Message::VerifyDone.encode());
                tracing::info!(
                    "Authorized {} from {}:{}",
                    conn,
                    record.remote_address(),
                    record.remote_port()
                );
                Ok(Dispatch::Authorized)
            }
            HandshakeOutcome::Rejected => {
                tracing::warn!("Invalid token from {}, closing", record.remote_address());
                self.transport.close(conn);
                Err(BrokerError::InvalidToken { conn })
            }
            HandshakeOutcome::AlreadyAuthorized => {
                tracing::debug!("Ignoring repeated token on {}", conn);
                Ok(Dispatch::Ignored)
            }
            HandshakeOutcome::ConnectionClosed => Ok(Dispatch::Ignored),
        }
    }

    fn handle_service_request(
        &self,
        conn: ConnectionId,
        record: &Connection,
        payload: &str,
    ) -> Result<Dispatch, BrokerError> {
        if !record.is_authorized() {
            tracing::warn!(
                "Service request from unauthorized client ({})",
                record.remote_address()
            );
            return Err(BrokerError::Unauthorized {
                conn,
                remote_address: record.remote_address().to_string(),
            });
        }

        let argv = match request::parse(record.remote_address(), payload) {
            Ok(request) => request.into_argv(),
            Err(source) => {
                tracing::warn!("Rejecting service request on {}: {}", conn, source);
                return Err(BrokerError::AddressTooLong { conn, source });
            }
        };

        match self.launcher.launch(&argv) {
            Ok(()) => {
                tracing::info!("Launched worker for {} with {:?}", record.remote_address(), argv);
                Ok(Dispatch::Launched { argv })
            }
            Err(source) => {
                tracing::error!("Worker launch for {} failed: {}", conn, source);
                Err(BrokerError::LaunchFailure { conn, source })
            }
        }
    }
}
