//! Codecs for encoding and decoding trackwire frames.
//!
//! Two encodings are provided: length-prefixed MessagePack for binary
//! sockets, and plain JSON for text sockets. Both implement [`Codec`], which
//! is the only surface the connection manager depends on.

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::events::{ClientIntent, ServerEvent};

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Translation between raw socket frames and typed protocol messages.
pub trait Codec: Send + Sync {
    /// Decode one inbound frame.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed frames and unknown event tags.
    fn decode(&self, frame: &[u8]) -> Result<ServerEvent, ProtocolError>;

    /// Encode one outbound intent.
    ///
    /// # Errors
    ///
    /// Returns an error if the intent cannot be serialized.
    fn encode(&self, intent: &ClientIntent) -> Result<Bytes, ProtocolError>;

    /// Whether encoded frames should travel as text messages.
    fn text_frames(&self) -> bool {
        false
    }

    /// Codec name for logs.
    fn name(&self) -> &'static str;
}

/// Encode a message to bytes.
///
/// The encoded format is:
/// - 4 bytes: Big-endian length prefix
/// - N bytes: MessagePack-encoded message
///
/// # Errors
///
/// Returns an error if the message is too large or encoding fails.
pub fn encode<T: Serialize>(message: &T) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(message, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a message into an existing buffer.
///
/// # Errors
///
/// Returns an error if the message is too large or encoding fails.
pub fn encode_into<T: Serialize>(message: &T, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(message)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Decode a message from bytes.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    Ok(rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?)
}

/// Length-prefixed MessagePack codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgpackCodec;

impl MsgpackCodec {
    /// Create a new codec instance.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Codec for MsgpackCodec {
    fn decode(&self, frame: &[u8]) -> Result<ServerEvent, ProtocolError> {
        decode(frame)
    }

    fn encode(&self, intent: &ClientIntent) -> Result<Bytes, ProtocolError> {
        encode(intent)
    }

    fn name(&self) -> &'static str {
        "msgpack"
    }
}

/// JSON codec: one document per text frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new codec instance.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Codec for JsonCodec {
    fn decode(&self, frame: &[u8]) -> Result<ServerEvent, ProtocolError> {
        if frame.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge(frame.len()));
        }
        Ok(serde_json::from_slice(frame)?)
    }

    fn encode(&self, intent: &ClientIntent) -> Result<Bytes, ProtocolError> {
        let payload = serde_json::to_vec(intent)?;
        if payload.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge(payload.len()));
        }
        Ok(Bytes::from(payload))
    }

    fn text_frames(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "json"
    }
}
