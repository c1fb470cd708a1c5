//! Broker error taxonomy.
//!
//! Every variant is local to one connection. None of them stops the server.

use crate::connection::ConnectionId;
use crate::launch::LaunchError;
use crate::message::DecodeError;
use crate::request::RequestError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// The verifier rejected the token; the connection has been closed.
    #[error("invalid token from {conn}")]
    InvalidToken { conn: ConnectionId },

    /// Launch request before a successful handshake; dropped without reply.
    #[error("service request from unauthorized {conn} ({remote_address})")]
    Unauthorized {
        conn: ConnectionId,
        remote_address: String,
    },

    /// The data matched no known scheme; dropped without reply.
    #[error("unrecognized message on {conn}: {source}")]
    UnrecognizedMessage {
        conn: ConnectionId,
        source: DecodeError,
    },

    /// The launcher did not start the worker. Not reported to the peer.
    #[error("launch for {conn} failed: {source}")]
    LaunchFailure {
        conn: ConnectionId,
        source: LaunchError,
    },

    /// The castanets switch could not be built for this peer.
    #[error("cannot build launch arguments for {conn}: {source}")]
    AddressTooLong {
        conn: ConnectionId,
        source: RequestError,
    },

    /// Event for a connection that is not registered (already discarded).
    #[error("unknown connection {conn}")]
    UnknownConnection { conn: ConnectionId },
}

impl BrokerError {
    pub fn connection(&self) -> ConnectionId {
        match self {
            BrokerError::InvalidToken { conn }
            | BrokerError::Unauthorized { conn, .. }
            | BrokerError::UnrecognizedMessage { conn, .. }
            | BrokerError::LaunchFailure { conn, .. }
            | BrokerError::AddressTooLong { conn, .. }
            | BrokerError::UnknownConnection { conn } => *conn,
        }
    }

    /// Whether the broker closed the connection because of this error.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(self, BrokerError::InvalidToken { .. })
    }
}
