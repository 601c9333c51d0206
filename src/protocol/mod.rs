//! Protocol module - The bit-exact wire format spoken with game clients
//!
//! Everything on the wire is big-endian:
//! - byte / short / int / long: 1 / 2 / 4 / 8 bytes, two's complement
//! - float / double: IEEE-754 bit pattern, 4 / 8 bytes
//! - boolean: 1 byte
//! - raw string: short byte count + bytes
//! - legacy string: short unit count + 16-bit code units
//! - metadata: (tag, value) pairs closed by a 127 byte
//!
//! A packet is a one-byte id followed by the fields of its schema.

mod codec;
mod format;
mod metadata;
mod packet;
mod string;

pub use codec::*;
pub use format::*;
pub use metadata::*;
pub use packet::*;
pub use string::*;

use thiserror::Error;

use crate::buffer::BufferError;

/// Protocol version spoken by this server
pub const PROTOCOL_VERSION: i32 = 14;

/// Default port for client connections
pub const DEFAULT_PORT: u16 = 25565;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error("Invalid string length: {0}")]
    InvalidLength(i16),

    #[error("String too long: {0} (max: {1})")]
    StringTooLong(usize, usize),

    #[error("Unknown metadata kind {kind} in tag {tag:#04x}")]
    UnknownMetadataKind { tag: u8, kind: u8 },

    #[error("Metadata tag {0:#04x} collides with the terminator")]
    ReservedMetadataTag(u8),

    #[error("Field {index}: expected {expected:?}, got {actual:?}")]
    FieldMismatch {
        index: usize,
        expected: FieldKind,
        actual: FieldKind,
    },

    #[error("Field count mismatch: schema has {expected}, got {actual}")]
    FieldCount { expected: usize, actual: usize },

    #[error("Unknown packet id {0:#04x}")]
    UnknownPacket(u8),
}

impl CodecError {
    /// True when decoding stopped only because the message is not all here yet
    pub fn is_incomplete(&self) -> bool {
        matches!(self, CodecError::Buffer(e) if e.is_incomplete())
    }
}

pub type CodecResult<T> = Result<T, CodecError>;
