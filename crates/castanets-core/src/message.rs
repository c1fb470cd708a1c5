//! Wire messages.
//!
//! Message format: `scheme://payload`, NUL-terminated on the wire.
//!
//! Supported schemes:
//! - `verify-token://token` - Challenge (server) or challenge response (client)
//! - `verify-done://` - Handshake accepted (server only)
//! - `service-request://arg&arg&...` - Launch request (client only)
//!
//! Payloads are not escaped: a payload cannot carry a NUL, and `&` inside a
//! launch argument is indistinguishable from a separator.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::str::FromStr;

/// Prefix of a token challenge or challenge response.
pub const VERIFY_TOKEN_SCHEME: &str = "verify-token://";
/// Prefix of the handshake acknowledgment.
pub const VERIFY_DONE_SCHEME: &str = "verify-done://";
/// Prefix of a launch request.
pub const SERVICE_REQUEST_SCHEME: &str = "service-request://";

/// Message terminator.
pub const TERMINATOR: u8 = 0;

/// The tag identifying how a payload is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    VerifyToken,
    VerifyDone,
    ServiceRequest,
}

impl Scheme {
    /// All known schemes. The literals are disjoint, so order does not matter.
    pub const ALL: [Scheme; 3] = [
        Scheme::VerifyToken,
        Scheme::VerifyDone,
        Scheme::ServiceRequest,
    ];

    /// The literal prefix for this scheme.
    pub fn prefix(self) -> &'static str {
        match self {
            Scheme::VerifyToken => VERIFY_TOKEN_SCHEME,
            Scheme::VerifyDone => VERIFY_DONE_SCHEME,
            Scheme::ServiceRequest => SERVICE_REQUEST_SCHEME,
        }
    }
}

/// A single decoded wire unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A token, either the server's challenge or the client's answer.
    VerifyToken(String),
    /// The server accepted the client's token.
    VerifyDone,
    /// `&`-joined launch arguments.
    ServiceRequest(String),
}

impl Message {
    pub fn scheme(&self) -> Scheme {
        match self {
            Message::VerifyToken(_) => Scheme::VerifyToken,
            Message::VerifyDone => Scheme::VerifyDone,
            Message::ServiceRequest(_) => Scheme::ServiceRequest,
        }
    }

    /// The payload following the scheme prefix (empty for `verify-done`).
    pub fn payload(&self) -> &str {
        match self {
            Message::VerifyToken(payload) | Message::ServiceRequest(payload) => payload,
            Message::VerifyDone => "",
        }
    }

    /// Build a launch request from individual arguments.
    pub fn service_request<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = args
            .into_iter()
            .map(|arg| arg.as_ref().to_string())
            .collect::<Vec<_>>()
            .join("&");
        Message::ServiceRequest(joined)
    }

    /// Encoded length on the wire, terminator included.
    pub fn encoded_len(&self) -> usize {
        self.scheme().prefix().len() + self.payload().len() + 1
    }

    /// Append `prefix + payload + NUL` to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_slice(self.scheme().prefix().as_bytes());
        dst.put_slice(self.payload().as_bytes());
        dst.put_u8(TERMINATOR);
    }

    /// Encode as a single NUL-terminated frame.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Decode one complete message.
    ///
    /// The wire carries C strings: everything from the first NUL onwards is
    /// discarded, so a trailing terminator is optional.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let end = bytes
            .iter()
            .position(|&b| b == TERMINATOR)
            .unwrap_or(bytes.len());
        let text = std::str::from_utf8(&bytes[..end]).map_err(|_| DecodeError::InvalidUtf8)?;
        text.parse()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.scheme().prefix(), self.payload())
    }
}

impl FromStr for Message {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, payload) = Scheme::ALL
            .iter()
            .find_map(|scheme| s.strip_prefix(scheme.prefix()).map(|rest| (*scheme, rest)))
            .ok_or(DecodeError::Unrecognized)?;

        Ok(match scheme {
            Scheme::VerifyToken => Message::VerifyToken(payload.to_string()),
            Scheme::VerifyDone => Message::VerifyDone,
            Scheme::ServiceRequest => Message::ServiceRequest(payload.to_string()),
        })
    }
}

/// Error decoding a wire message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("message does not start with a known scheme")]
    Unrecognized,
    #[error("message is not valid UTF-8")]
    InvalidUtf8,
}
