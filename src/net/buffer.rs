//! Frame buffer for the framed wire mode
//!
//! Each frame on the wire is:
//! - `u32` big-endian body length `L`
//! - `L` bytes of body: one mode tag byte followed by the payload
//!
//! Socket reads are appended to a [`FrameDecoder`], which yields complete
//! frames as they become available. A read may carry half a frame or several
//! frames at once. Oversized frames are reported once and their declared body
//! is skipped as it arrives, so one bad frame does not desynchronize the stream.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Size of the length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Payload mode tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameTag {
    /// Payload is UTF-8 text
    Plaintext = 0x00,
    /// Payload is cipher output
    Encrypted = 0x01,
}

impl FrameTag {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Plaintext),
            0x01 => Some(Self::Encrypted),
            _ => None,
        }
    }

    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// One complete framed-mode frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: FrameTag,
    pub payload: Bytes,
}

/// Incremental frame decoder
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_size: usize,
    /// Bytes of an oversized frame still to be skipped
    discard_remaining: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(LENGTH_PREFIX_SIZE + max_frame_size.min(8192)),
            max_frame_size,
            discard_remaining: 0,
        }
    }

    /// Append bytes read from the socket
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Whether any bytes of an incomplete frame are buffered
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty() || self.discard_remaining > 0
    }

    /// Number of buffered bytes
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Take the next complete frame.
    ///
    /// Returns `None` when more bytes are needed. Malformed frames are
    /// consumed and reported as errors; decoding can continue afterwards.
    pub fn next_frame(&mut self) -> Option<Result<Frame, ProtocolError>> {
        if !self.skip_discarded() {
            return None;
        }

        if self.buf.len() < LENGTH_PREFIX_SIZE {
            return None;
        }

        let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;

        if len == 0 {
            self.buf.advance(LENGTH_PREFIX_SIZE);
            return Some(Err(ProtocolError::EmptyFrame));
        }

        if len > self.max_frame_size {
            self.buf.advance(LENGTH_PREFIX_SIZE);
            self.discard_remaining = len;
            self.skip_discarded();
            return Some(Err(ProtocolError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            }));
        }

        if self.buf.len() < LENGTH_PREFIX_SIZE + len {
            self.buf.reserve(LENGTH_PREFIX_SIZE + len - self.buf.len());
            return None;
        }

        self.buf.advance(LENGTH_PREFIX_SIZE);
        let mut body = self.buf.split_to(len);
        let tag_byte = body.get_u8();

        Some(match FrameTag::from_u8(tag_byte) {
            Some(tag) => Ok(Frame {
                tag,
                payload: body.freeze(),
            }),
            None => Err(ProtocolError::UnknownFrameTag(tag_byte)),
        })
    }

    /// Drop buffered bytes belonging to an oversized frame.
    ///
    /// Returns true once nothing is left to skip.
    fn skip_discarded(&mut self) -> bool {
        if self.discard_remaining > 0 {
            let n = self.discard_remaining.min(self.buf.len());
            self.buf.advance(n);
            self.discard_remaining -= n;
        }
        self.discard_remaining == 0
    }
}

/// Encode one frame
pub fn encode_frame(tag: FrameTag, payload: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + 1 + payload.len());
    out.put_u32((payload.len() + 1) as u32);
    out.put_u8(tag.as_u8());
    out.put_slice(payload);
    out
}
