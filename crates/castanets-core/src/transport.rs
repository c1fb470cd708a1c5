//! Outbound side of the socket layer.

use crate::connection::ConnectionId;
use bytes::Bytes;

/// Sends frames to and closes connections on behalf of the broker.
///
/// Both calls hand work off and return immediately; delivery failures are the
/// transport's concern.
pub trait Transport: Send + Sync {
    /// Queue one encoded, NUL-terminated frame.
    fn send(&self, conn: ConnectionId, frame: Bytes);

    /// Close the connection. Frames queued before this call are still flushed.
    fn close(&self, conn: ConnectionId);
}
