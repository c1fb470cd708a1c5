//! NUL-delimited stream framing.
//!
//! TCP may split or coalesce writes, so the transport reassembles frames here
//! before handing them to the broker, which expects one complete message per
//! delivery.

use crate::message::{Message, TERMINATOR};
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Default frame limit (64 KiB), terminator excluded.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// Splits a byte stream on NUL and encodes [`Message`]s with a trailing NUL.
#[derive(Debug, Clone)]
pub struct NulFrameCodec {
    max_frame_len: usize,
    /// Bytes of the buffer already scanned without finding a terminator.
    scanned: usize,
}

impl NulFrameCodec {
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            max_frame_len,
            scanned: 0,
        }
    }
}

impl Default for NulFrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for NulFrameCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
        loop {
            let found = src[self.scanned..].iter().position(|&b| b == TERMINATOR);
            let Some(offset) = found else {
                self.scanned = src.len();
                if src.len() > self.max_frame_len {
                    return Err(FrameError::FrameTooLong {
                        max: self.max_frame_len,
                    });
                }
                return Ok(None);
            };

            let end = self.scanned + offset;
            self.scanned = 0;
            if end > self.max_frame_len {
                return Err(FrameError::FrameTooLong {
                    max: self.max_frame_len,
                });
            }

            let frame = src.split_to(end).freeze();
            src.advance(1);
            if frame.is_empty() {
                continue;
            }
            return Ok(Some(frame));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => {
                // Peer closed mid-frame; the tail is a complete C string without
                // its terminator.
                self.scanned = 0;
                Ok(Some(src.split().freeze()))
            }
        }
    }
}

impl Encoder<Message> for NulFrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), FrameError> {
        item.encode_into(dst);
        Ok(())
    }
}

impl Encoder<Bytes> for NulFrameCodec {
    type Error = FrameError;

    /// Writes an already encoded frame as-is.
    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), FrameError> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}

/// Framing errors. All of them end the connection.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame exceeds maximum length of {max} bytes")]
    FrameTooLong { max: usize },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
