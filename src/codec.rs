//! Length-prefixed framing shared by both protocol layers.
//!
//! A frame is a big-endian `u32` length, a one byte message tag and the
//! payload. The length counts the tag and the payload, so it is never zero.
//!
//! ```text
//! +----------------+-----+------------------+
//! | length (u32be) | tag | payload (len-1)  |
//! +----------------+-----+------------------+
//! ```
//!
//! Decoding keeps its header/body state between calls, so bytes may arrive
//! in any chunking. A bad frame body is reported and skipped; a bad length
//! poisons the decoder because the next frame boundary is unknown.

use core::fmt;
use core::marker::PhantomData;

use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::error::Category;
use static_assertions::const_assert;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{CodecError, MalformedMessage};

pub const MAX_FRAME_LEN: usize = 8 * 1024; // 8 KB
pub const LENGTH_PREFIX_LEN: usize = 4;

const_assert!(MAX_FRAME_LEN <= u32::MAX as usize);

/// A closed set of messages with a one byte tag per variant.
pub trait WireMessage: Sized {
    /// Protocol name used in error reports
    const PROTOCOL: &'static str;

    fn tag(&self) -> u8;

    /// Writes the payload that follows the tag.
    ///
    /// # Errors
    ///
    /// Fails when the message does not validate or cannot be serialized.
    fn encode_payload(&self, dst: &mut BytesMut) -> Result<(), CodecError>;

    /// Parses the payload of a frame carrying `tag`.
    ///
    /// # Errors
    ///
    /// Fails on an unknown tag, short or long payloads and invalid fields.
    fn decode_payload(tag: u8, payload: &[u8]) -> Result<Self, CodecError>;
}

/// Encodes one frame onto the end of `dst`.
///
/// # Errors
///
/// Fails when the message does not validate or the frame exceeds [`MAX_FRAME_LEN`].
pub fn encode_frame<M: WireMessage>(message: &M, dst: &mut BytesMut) -> Result<(), CodecError> {
    let mut payload = BytesMut::new();
    message.encode_payload(&mut payload)?;

    let length = payload.len() + 1;
    if length > MAX_FRAME_LEN {
        return Err(CodecError::MalformedLength {
            length,
            max: MAX_FRAME_LEN,
        });
    }

    dst.reserve(LENGTH_PREFIX_LEN + length);
    dst.put_u32(length as u32);
    dst.put_u8(message.tag());
    dst.extend_from_slice(&payload);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Head,
    Body { length: usize },
    Poisoned,
}

/// [`tokio_util::codec`] encoder/decoder for one protocol's frames.
pub struct FrameCodec<M> {
    state: DecodeState,
    _message: PhantomData<fn() -> M>,
}

impl<M> FrameCodec<M> {
    pub fn new() -> Self {
        Self {
            state: DecodeState::Head,
            _message: PhantomData,
        }
    }

    /// True once a malformed length has been seen.
    pub fn is_poisoned(&self) -> bool {
        self.state == DecodeState::Poisoned
    }
}

impl<M> Default for FrameCodec<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for FrameCodec<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameCodec").field("state", &self.state).finish()
    }
}

impl<M: WireMessage> Decoder for FrameCodec<M> {
    type Item = M;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let length = match self.state {
            DecodeState::Poisoned => return Err(CodecError::Desynchronized),
            DecodeState::Body { length } => length,
            DecodeState::Head => {
                if src.len() < LENGTH_PREFIX_LEN {
                    // Not enough data to read the length marker
                    return Ok(None);
                }
                let length = src.get_u32() as usize;
                if length == 0 || length > MAX_FRAME_LEN {
                    self.state = DecodeState::Poisoned;
                    return Err(CodecError::MalformedLength {
                        length,
                        max: MAX_FRAME_LEN,
                    });
                }
                self.state = DecodeState::Body { length };
                length
            }
        };

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        // The frame is consumed whether or not its body parses
        let frame = src.split_to(length);
        self.state = DecodeState::Head;
        M::decode_payload(frame[0], &frame[1..]).map(Some)
    }
}

impl<M: WireMessage> Encoder<M> for FrameCodec<M> {
    type Error = CodecError;

    fn encode(&mut self, item: M, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_frame(&item, dst)
    }
}

/// A decoder that owns its receive buffer, for push-style byte delivery.
pub struct FrameReader<M> {
    codec: FrameCodec<M>,
    buffer: BytesMut,
}

impl<M: WireMessage> FrameReader<M> {
    pub fn new() -> Self {
        Self {
            codec: FrameCodec::new(),
            buffer: BytesMut::with_capacity(MAX_FRAME_LEN),
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// The receive buffer, for reading straight from a socket.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Next complete message, `Ok(None)` when more bytes are needed.
    ///
    /// # Errors
    ///
    /// See [`CodecError::is_fatal`] for which errors end the stream.
    pub fn next_message(&mut self) -> Result<Option<M>, CodecError> {
        self.codec.decode(&mut self.buffer)
    }

    /// Drains every complete frame currently buffered.
    pub fn drain(&mut self) -> Vec<Result<M, CodecError>> {
        let mut results = Vec::new();
        loop {
            match self.next_message() {
                Ok(Some(message)) => results.push(Ok(message)),
                Ok(None) => break,
                Err(err) => {
                    let fatal = err.is_fatal();
                    results.push(Err(err));
                    if fatal {
                        break;
                    }
                }
            }
        }
        results
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_poisoned(&self) -> bool {
        self.codec.is_poisoned()
    }
}

impl<M: WireMessage> Default for FrameReader<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Cursor over a binary payload with truncation checks.
pub(crate) struct PayloadReader<'a> {
    buf: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub(crate) fn u8(&mut self, field: &'static str) -> Result<u8, CodecError> {
        if self.buf.remaining() < 1 {
            return Err(CodecError::Truncated { field });
        }
        Ok(self.buf.get_u8())
    }

    pub(crate) fn u32(&mut self, field: &'static str) -> Result<u32, CodecError> {
        if self.buf.remaining() < 4 {
            return Err(CodecError::Truncated { field });
        }
        Ok(self.buf.get_u32())
    }

    pub(crate) fn array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], CodecError> {
        if self.buf.remaining() < N {
            return Err(CodecError::Truncated { field });
        }
        let mut out = [0u8; N];
        self.buf.copy_to_slice(&mut out);
        Ok(out)
    }

    /// Errors unless every byte was consumed.
    pub(crate) fn finish(self) -> Result<(), CodecError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(CodecError::TrailingBytes {
                count: self.buf.len(),
            })
        }
    }
}

pub(crate) fn encode_json<T: Serialize>(value: &T, dst: &mut BytesMut) -> Result<(), CodecError> {
    serde_json::to_writer(dst.writer(), value).map_err(|err| CodecError::InvalidPayload(err.to_string()))
}

/// Parses exactly one JSON value spanning the whole payload.
pub(crate) fn decode_json<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CodecError> {
    let mut stream = serde_json::Deserializer::from_slice(payload).into_iter::<T>();
    let value = match stream.next() {
        Some(Ok(value)) => value,
        Some(Err(err)) if err.is_eof() => return Err(CodecError::Truncated { field: "json" }),
        Some(Err(err)) => return Err(json_error(err)),
        None => return Err(CodecError::Truncated { field: "json" }),
    };
    let consumed = stream.byte_offset();
    if consumed < payload.len() {
        return Err(CodecError::TrailingBytes {
            count: payload.len() - consumed,
        });
    }
    Ok(value)
}

fn json_error(err: serde_json::Error) -> CodecError {
    match err.classify() {
        // Well formed JSON carrying a value the message rejects
        Category::Data => CodecError::Malformed(MalformedMessage::InvalidField(err.to_string())),
        Category::Io | Category::Syntax | Category::Eof => CodecError::InvalidPayload(err.to_string()),
    }
}
