//! Buffer module - Byte queues for connection I/O
//!
//! Provides:
//! - `ByteBuffer`, a growable byte queue that either owns its storage or
//!   borrows a connection's
//! - `ConnectionBuffers`, the input/output pair bound to one transport with
//!   watermark-based read backpressure

mod byte_buffer;
mod connection;

pub use byte_buffer::*;
pub use connection::*;

use thiserror::Error;

/// Default high watermark for buffered input, in bytes
pub const DEFAULT_HIGH_WATERMARK: usize = 4096;

/// Buffer errors
#[derive(Error, Debug)]
pub enum BufferError {
    /// Not enough bytes are buffered yet; retry once more arrive
    #[error("Incomplete data: needed {needed} bytes, {available} available")]
    Incomplete { needed: usize, available: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BufferError {
    /// True when the error only means "wait for more bytes"
    pub fn is_incomplete(&self) -> bool {
        matches!(self, BufferError::Incomplete { .. })
    }
}

pub type BufferResult<T> = Result<T, BufferError>;
