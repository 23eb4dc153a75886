//! Frame codec for the tether stream protocol.
//!
//! ## Frame Format
//!
//! ```text
//! +----------------+----------------------+------------------+
//! | Magic (2B BE)  | Length (4B BE)       | Body (L bytes)   |
//! +----------------+----------------------+------------------+
//! ```
//!
//! A wrong magic or a length above the limit is fatal for the stream: the
//! decoder errors once and never yields another frame.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::error::{Result, TetherError};

/// Magic number opening every frame.
pub const MAGIC: u16 = 1729;

/// Magic plus length prefix.
pub const HEADER_LEN: usize = 6;

/// Default maximum body length (10 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    AwaitingHeader,
    AwaitingBody(usize),
    Failed,
}

/// Splits a byte stream into frame bodies and frames outgoing bodies.
///
/// Decoding is independent of how the stream is chunked: any split of the
/// same bytes yields the same frames.
///
/// # Example
///
/// ```
/// use bytes::{Bytes, BytesMut};
/// use tokio_util::codec::{Decoder, Encoder};
/// use tether_common::FrameCodec;
///
/// let mut codec = FrameCodec::new();
/// let mut wire = BytesMut::new();
/// codec.encode(Bytes::from_static(b"hello"), &mut wire).unwrap();
///
/// let body = codec.decode(&mut wire).unwrap().unwrap();
/// assert_eq!(&body[..], b"hello");
/// ```
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
    state: FrameState,
}

impl FrameCodec {
    /// Create a codec with the default 10 MiB limit
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            state: FrameState::AwaitingHeader,
        }
    }

    /// Create a codec with a custom body size limit
    pub fn with_max_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Whether a fatal framing error has been seen.
    pub fn is_failed(&self) -> bool {
        self.state == FrameState::Failed
    }

    fn fail(&mut self, src: &mut BytesMut, err: TetherError) -> Result<Option<Bytes>> {
        tracing::debug!(error = %err, discarded = src.len(), "Frame decoding failed");
        self.state = FrameState::Failed;
        src.clear();
        Err(err)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = TetherError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        loop {
            match self.state {
                FrameState::AwaitingHeader => {
                    if src.len() < HEADER_LEN {
                        src.reserve(HEADER_LEN - src.len());
                        return Ok(None);
                    }

                    let magic = u16::from_be_bytes([src[0], src[1]]);
                    if magic != MAGIC {
                        return self.fail(src, TetherError::BadMagic(magic));
                    }

                    let length = u32::from_be_bytes([src[2], src[3], src[4], src[5]]) as usize;
                    if length > self.max_frame_size {
                        return self.fail(
                            src,
                            TetherError::FrameTooLarge {
                                size: length,
                                max: self.max_frame_size,
                            },
                        );
                    }

                    src.advance(HEADER_LEN);
                    self.state = FrameState::AwaitingBody(length);
                }
                FrameState::AwaitingBody(length) => {
                    if src.len() < length {
                        src.reserve(length - src.len());
                        return Ok(None);
                    }

                    self.state = FrameState::AwaitingHeader;
                    return Ok(Some(src.split_to(length).freeze()));
                }
                FrameState::Failed => {
                    src.clear();
                    return Err(TetherError::Protocol("stream framing already failed".into()));
                }
            }
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = TetherError;

    fn encode(&mut self, body: Bytes, dst: &mut BytesMut) -> Result<()> {
        if body.len() > self.max_frame_size {
            return Err(TetherError::FrameTooLarge {
                size: body.len(),
                max: self.max_frame_size,
            });
        }

        dst.reserve(HEADER_LEN + body.len());
        dst.put_u16(MAGIC);
        dst.put_u32(body.len() as u32);
        dst.extend_from_slice(&body);
        Ok(())
    }
}
