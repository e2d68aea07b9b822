//! Frame codec: `[type:1][playerId:4][payloadLength:4][payload]`, integers
//! little-endian.
//!
//! The fixed header goes through bincode's default fixint/little-endian
//! encoding, which lays `(u8, u32, u32)` out as exactly the 9 bytes above.

use crate::protocol::{MessageType, NetworkMessage};
use thiserror::Error;

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 9;

/// Largest payload a peer may announce.
pub const MAX_PAYLOAD_LEN: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame shorter than header ({0} bytes)")]
    Truncated(usize),

    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    #[error("payload length {declared} does not match frame body of {actual} bytes")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("payload length {0} exceeds limit")]
    PayloadTooLarge(usize),

    #[error("header encoding failed: {0}")]
    Header(#[from] bincode::Error),

    #[error("payload is not a valid document: {0}")]
    Payload(#[source] serde_json::Error),
}

impl CodecError {
    /// True when the byte stream can no longer be re-synchronised.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CodecError::PayloadTooLarge(_) | CodecError::Header(_))
    }
}

/// Serialises a message into one frame.
pub fn encode_frame(message: &NetworkMessage) -> Result<Vec<u8>, CodecError> {
    let len = message.payload.len();
    if len > MAX_PAYLOAD_LEN {
        return Err(CodecError::PayloadTooLarge(len));
    }

    let header = (message.kind.as_byte(), message.player_id, len as u32);
    let mut frame = bincode::serialize(&header)?;
    frame.extend_from_slice(&message.payload);
    Ok(frame)
}

/// Parses exactly one complete frame.
pub fn decode_frame(frame: &[u8]) -> Result<NetworkMessage, CodecError> {
    let (kind, player_id, declared) = read_header(frame)?;
    let actual = frame.len() - HEADER_LEN;
    if declared != actual {
        return Err(CodecError::LengthMismatch { declared, actual });
    }

    Ok(NetworkMessage {
        kind: MessageType::try_from(kind)?,
        player_id,
        payload: frame[HEADER_LEN..].to_vec(),
    })
}

fn read_header(bytes: &[u8]) -> Result<(u8, u32, usize), CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::Truncated(bytes.len()));
    }

    let (kind, player_id, len): (u8, u32, u32) = bincode::deserialize(&bytes[..HEADER_LEN])?;
    let len = len as usize;
    if len > MAX_PAYLOAD_LEN {
        return Err(CodecError::PayloadTooLarge(len));
    }
    Ok((kind, player_id, len))
}

/// Reassembles frames from a byte stream that may split or merge them.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes received but not yet consumed as a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Yields the next complete frame, if one is buffered.
    ///
    /// A frame with an unknown type is consumed and reported as an error so the
    /// stream stays aligned. A fatal error leaves the buffer untouched; the
    /// connection should be dropped.
    pub fn next_frame(&mut self) -> Option<Result<NetworkMessage, CodecError>> {
        if self.buffer.len() < HEADER_LEN {
            return None;
        }

        let (kind, player_id, len) = match read_header(&self.buffer) {
            Ok(header) => header,
            Err(e) => return Some(Err(e)),
        };

        if self.buffer.len() < HEADER_LEN + len {
            return None;
        }

        let frame: Vec<u8> = self.buffer.drain(..HEADER_LEN + len).collect();
        Some(MessageType::try_from(kind).map(|kind| NetworkMessage {
            kind,
            player_id,
            payload: frame[HEADER_LEN..].to_vec(),
        }))
    }
}
