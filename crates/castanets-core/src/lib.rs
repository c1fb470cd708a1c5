//! Core of the Castanets service server.
//!
//! Peers connect over TCP, answer a token challenge, and once authorized may
//! ask the server to launch renderer workers. This crate holds the protocol
//! logic only; sockets, process spawning, and token algorithms sit behind the
//! [`Transport`], [`Launcher`], [`TokenIssuer`] and [`TokenVerifier`] traits.

mod auth;
mod broker;
mod connection;
mod error;
mod frame;
pub mod handshake;
mod launch;
mod message;
pub mod request;
mod transport;

pub use auth::{NONCE_LEN, SharedSecret, TokenIssuer, TokenVerifier};
pub use broker::{Dispatch, ServiceBroker};
pub use connection::{Connection, ConnectionId, ConnectionRegistry, HandshakeState};
pub use error::BrokerError;
pub use frame::{DEFAULT_MAX_FRAME_LEN, FrameError, NulFrameCodec};
pub use handshake::HandshakeOutcome;
pub use launch::{LaunchError, Launcher};
pub use message::{
    DecodeError, Message, SERVICE_REQUEST_SCHEME, Scheme, VERIFY_DONE_SCHEME,
    VERIFY_TOKEN_SCHEME,
};
pub use request::{LaunchRequest, RequestError};
pub use transport::Transport;
