//! Frame codec for the chunk transport.
//!
//! Every message on a backend connection, in both directions, is one frame:
//!
//! ```text
//! [status: u8][id: u64 BE][length: u32 BE][payload: length bytes]
//! ```
//!
//! `status` must equal [`STATUS_OK`]. Any other value means the stream is out
//! of sync and the connection has to be re-established. The `id` correlates a
//! response with the request that produced it.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// The single status byte accepted on the wire.
pub const STATUS_OK: u8 = 0x01;

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 1 + 8 + 4;

/// Default upper bound on a frame payload (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Errors produced while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Status byte other than [`STATUS_OK`].
    #[error("invalid frame status byte: {0:#04x}")]
    InvalidStatus(u8),

    /// Payload exceeds the configured maximum.
    #[error("frame payload of {len} bytes exceeds maximum of {max}")]
    TooLarge {
        /// Announced or actual payload length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// IO error on the underlying stream.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether the error means the byte stream can no longer be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::InvalidStatus(_) | Self::TooLarge { .. })
    }
}

/// One request or response on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Correlation id.
    pub id: u64,
    /// Opaque payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame.
    pub fn new(id: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    /// Total encoded size of the frame.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }
}

/// Codec turning a byte stream into [`Frame`]s and back.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameCodec {
    /// Create a codec rejecting payloads larger than `max_frame_size`.
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Configured payload limit.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl asynchronous_codec::Encoder for FrameCodec {
    type Item<'a> = Frame;
    type Error = FrameError;

    fn encode(&mut self, item: Self::Item<'_>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = item.payload.len();
        if len > self.max_frame_size || u32::try_from(len).is_err() {
            return Err(FrameError::TooLarge {
                len,
                max: self.max_frame_size,
            });
        }
        dst.reserve(item.encoded_len());
        dst.put_u8(STATUS_OK);
        dst.put_u64(item.id);
        dst.put_u32(len as u32);
        dst.put_slice(&item.payload);
        Ok(())
    }
}

impl asynchronous_codec::Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(&status) = src.first() else {
            return Ok(None);
        };
        // Reject a bad status as soon as the first byte arrives.
        if status != STATUS_OK {
            return Err(FrameError::InvalidStatus(status));
        }
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = &src[1..HEADER_LEN];
        let id = header.get_u64();
        let len = header.get_u32() as usize;
        if len > self.max_frame_size {
            return Err(FrameError::TooLarge {
                len,
                max: self.max_frame_size,
            });
        }

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();
        Ok(Some(Frame { id, payload }))
    }
}
