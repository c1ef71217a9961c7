//! Frame Protocol
//!
//! Wire format for presence channel messages: an opcode and a length prefix
//! followed by a JSON payload.
//!
//! # Frame Format
//!
//! ```text
//! +----------------+----------------+------------------------------------------+
//! | Opcode (4)     | Length (4)     | JSON Payload (variable)                  |
//! | little-endian  | little-endian  | UTF-8 key/value text                     |
//! +----------------+----------------+------------------------------------------+
//! ```
//!
//! The Length field contains the size of the JSON payload only.
//!
//! # Safety Limits
//!
//! - Maximum payload size is enforced before any buffer is allocated
//! - One-shot `decode` requires the declared length to match the available
//!   bytes exactly; it never truncates or pads

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Maximum payload size (64 KiB)
///
/// Presence payloads are a few hundred bytes; anything near this limit is a
/// corrupted or hostile frame.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Frame header size: 4 bytes opcode + 4 bytes length
pub const HEADER_SIZE: usize = 8;

/// Minimum buffer capacity for decoder
const MIN_BUFFER_CAPACITY: usize = 1024;

/// Frame opcodes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    /// Client → peer: protocol version and application identifier
    Handshake = 0,
    /// Generic payload carrier in both directions (ack, commands, replies)
    Frame = 1,
    /// Graceful shutdown, or rejection when sent by the peer
    Close = 2,
    /// Liveness probe
    Ping = 3,
    /// Liveness reply (echoes the ping payload)
    Pong = 4,
}

impl Opcode {
    /// Numeric wire value
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for Opcode {
    type Error = CodecError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Handshake),
            1 => Ok(Self::Frame),
            2 => Ok(Self::Close),
            3 => Ok(Self::Ping),
            4 => Ok(Self::Pong),
            other => Err(CodecError::UnknownOpcode(other)),
        }
    }
}

/// Errors produced while encoding or decoding frames
///
/// Every variant is a protocol violation (`Malformed` in the client taxonomy).
#[derive(Debug, Error)]
pub enum CodecError {
    /// Header or length prefix does not describe the bytes we have
    #[error("Malformed frame: {0}")]
    Malformed(String),
    /// Declared or actual payload exceeds `MAX_PAYLOAD_SIZE`
    #[error("Frame too large: {len} bytes (max: {max})")]
    TooLarge {
        /// Offending payload length
        len: usize,
        /// Configured maximum
        max: usize,
    },
    /// Opcode outside the known set
    #[error("Unknown opcode: {0}")]
    UnknownOpcode(u32),
    /// Payload is not the JSON we expected
    #[error("Invalid payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// A decoded frame
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Frame opcode
    pub opcode: Opcode,
    /// Raw payload bytes (JSON text)
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a frame from an opcode and a serializable payload
    pub fn new<T: Serialize>(opcode: Opcode, payload: &T) -> Result<Self, CodecError> {
        let payload = serde_json::to_vec(payload)?;
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(CodecError::TooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self { opcode, payload })
    }

    /// Interpret the payload as JSON of type `T`
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Serialize to wire bytes
    ///
    /// # Errors
    ///
    /// `CodecError::TooLarge` if the payload exceeds `MAX_PAYLOAD_SIZE`.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let too_large = || CodecError::TooLarge {
            len: self.payload.len(),
            max: MAX_PAYLOAD_SIZE,
        };
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(too_large());
        }
        let len = u32::try_from(self.payload.len()).map_err(|_| too_large())?;

        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&self.opcode.as_u32().to_le_bytes());
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }
}

/// Read the opcode and declared length from the first 8 bytes
fn read_header(bytes: &[u8]) -> Result<(Opcode, usize), CodecError> {
    let opcode = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;

    if len > MAX_PAYLOAD_SIZE {
        return Err(CodecError::TooLarge {
            len,
            max: MAX_PAYLOAD_SIZE,
        });
    }

    Ok((Opcode::try_from(opcode)?, len))
}

/// Encode an opcode and payload into wire bytes
///
/// # Errors
///
/// Returns `CodecError::Json` if serialization fails and
/// `CodecError::TooLarge` if the payload exceeds `MAX_PAYLOAD_SIZE`.
pub fn encode<T: Serialize>(opcode: Opcode, payload: &T) -> Result<Vec<u8>, CodecError> {
    Frame::new(opcode, payload)?.to_bytes()
}

/// Decode exactly one frame from `bytes`
///
/// The declared payload length must match the bytes after the header
/// exactly; short or trailing bytes are rejected as malformed.
pub fn decode(bytes: &[u8]) -> Result<Frame, CodecError> {
    if bytes.len() < HEADER_SIZE {
        return Err(CodecError::Malformed(format!(
            "{} bytes is shorter than the {HEADER_SIZE}-byte header",
            bytes.len()
        )));
    }

    let (opcode, len) = read_header(bytes)?;
    let available = bytes.len() - HEADER_SIZE;
    if available != len {
        return Err(CodecError::Malformed(format!(
            "declared length {len} but {available} payload bytes present"
        )));
    }

    Ok(Frame {
        opcode,
        payload: bytes[HEADER_SIZE..].to_vec(),
    })
}

/// Decoder state machine for streaming frame parsing
///
/// Buffers incoming bytes and yields complete frames.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Position where we've consumed up to
    read_pos: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a new decoder with default buffer capacity
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
        }
    }

    /// Append bytes to the buffer
    pub fn push(&mut self, data: &[u8]) {
        // Compact buffer if we've consumed a lot
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_BUFFER_CAPACITY {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Get the number of bytes available in the buffer
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Try to decode the next frame
    ///
    /// Returns:
    /// - `Ok(Some(frame))` if a complete frame was decoded
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` if the header is invalid (unknown opcode, oversized length)
    pub fn decode(&mut self) -> Result<Option<Frame>, CodecError> {
        let available = self.available();
        if available < HEADER_SIZE {
            return Ok(None);
        }

        let (opcode, len) = read_header(&self.buffer[self.read_pos..])?;
        if available < HEADER_SIZE + len {
            return Ok(None);
        }

        let payload_start = self.read_pos + HEADER_SIZE;
        let payload_end = payload_start + len;
        let payload = self.buffer[payload_start..payload_end].to_vec();
        self.read_pos = payload_end;

        Ok(Some(Frame { opcode, payload }))
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
    }
}
