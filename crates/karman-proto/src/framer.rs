//! Length-prefixed framing over a reliable byte stream.
//!
//! Layout on the wire:
//! `[length: i32 little-endian] + [payload: length bytes]`
//!
//! The decoder is incremental: [`Framer::append`] accepts chunks of any size
//! (a single byte, half a prefix, several frames at once) and emits every
//! frame completed by that chunk, in stream order.
//!
//! # Security
//!
//! The length prefix is checked before any payload buffer is allocated. A
//! negative length or one above the configured maximum means the peer is
//! misbehaving or the stream is desynchronized; the error is fatal and the
//! caller must drop the connection. A `Framer` that returned an error must not
//! be fed again.

use bytes::{BufMut, Bytes, BytesMut};

use crate::errors::{ProtocolError, Result};

/// Default upper bound for a single frame payload (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

#[derive(Debug)]
enum ReadState {
    /// Accumulating the 4-byte length prefix
    Prefix { buf: [u8; LENGTH_PREFIX_SIZE], filled: usize },
    /// Accumulating a payload of known size
    Payload { buf: BytesMut, expected: usize },
}

impl ReadState {
    const fn empty_prefix() -> Self {
        Self::Prefix { buf: [0; LENGTH_PREFIX_SIZE], filled: 0 }
    }
}

/// Incremental frame encoder/decoder.
#[derive(Debug)]
pub struct Framer {
    max_frame_size: usize,
    state: ReadState,
}

impl Framer {
    /// Create a framer enforcing [`MAX_FRAME_SIZE`].
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Create a framer with a custom frame size limit.
    ///
    /// Limits above `i32::MAX` are clamped, since the prefix is a signed
    /// 32-bit integer.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size: max_frame_size.min(i32::MAX as usize), state: ReadState::empty_prefix() }
    }

    /// Maximum payload size accepted by this framer.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// True if no partial frame is buffered.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, ReadState::Prefix { filled: 0, .. })
    }

    /// Frame a payload for sending.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FrameTooLarge`] if the payload exceeds the
    /// limit. Nothing is produced in that case.
    pub fn frame(&self, payload: &[u8]) -> Result<Bytes> {
        if payload.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame_size,
            });
        }

        let mut dst = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
        dst.put_i32_le(payload.len() as i32);
        dst.put_slice(payload);
        Ok(dst.freeze())
    }

    /// Feed a chunk of the incoming stream, collecting completed frames.
    pub fn append(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>> {
        let mut frames = Vec::new();
        self.append_with(chunk, |frame| frames.push(frame))?;
        Ok(frames)
    }

    /// Feed a chunk of the incoming stream, invoking `on_frame` once per
    /// completed frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidLength`] if a decoded prefix is outside
    /// `[0, max_frame_size]`. Frames completed earlier in the same chunk have
    /// already been handed to `on_frame`.
    pub fn append_with(&mut self, mut chunk: &[u8], mut on_frame: impl FnMut(Bytes)) -> Result<()> {
        let max = self.max_frame_size;

        while !chunk.is_empty() {
            let mut next = None;

            match &mut self.state {
                ReadState::Prefix { buf, filled } => {
                    let take = (LENGTH_PREFIX_SIZE - *filled).min(chunk.len());
                    buf[*filled..*filled + take].copy_from_slice(&chunk[..take]);
                    *filled += take;
                    chunk = &chunk[take..];

                    if *filled == LENGTH_PREFIX_SIZE {
                        let length = i32::from_le_bytes(*buf);
                        let expected = usize::try_from(length)
                            .ok()
                            .filter(|len| *len <= max)
                            .ok_or(ProtocolError::InvalidLength { length: i64::from(length), max })?;

                        if expected == 0 {
                            on_frame(Bytes::new());
                            next = Some(ReadState::empty_prefix());
                        } else {
                            next = Some(ReadState::Payload {
                                buf: BytesMut::with_capacity(expected),
                                expected,
                            });
                        }
                    }
                },
                ReadState::Payload { buf, expected } => {
                    let take = (*expected - buf.len()).min(chunk.len());
                    buf.extend_from_slice(&chunk[..take]);
                    chunk = &chunk[take..];

                    if buf.len() == *expected {
                        on_frame(std::mem::take(buf).freeze());
                        next = Some(ReadState::empty_prefix());
                    }
                },
            }

            if let Some(next) = next {
                self.state = next;
            }
        }

        Ok(())
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}
