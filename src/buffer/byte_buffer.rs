//! Growable byte queue
//!
//! A `ByteBuffer` either owns its `BytesMut` or wraps one that belongs to
//! somebody else (typically a connection). Dropping a wrapping buffer leaves
//! the wrapped storage untouched.

use bytes::{Bytes, BytesMut};
use std::fmt;

use super::{BufferError, BufferResult};

enum Storage<'a> {
    Owned(BytesMut),
    External(&'a mut BytesMut),
}

/// A byte queue: append at the back, consume from the front
pub struct ByteBuffer<'a> {
    storage: Storage<'a>,
}

impl ByteBuffer<'static> {
    /// Create an empty buffer that owns its storage
    pub fn new() -> Self {
        Self {
            storage: Storage::Owned(BytesMut::new()),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: Storage::Owned(BytesMut::with_capacity(capacity)),
        }
    }
}

impl<'a> ByteBuffer<'a> {
    /// Wrap an existing byte queue; the result is external and never frees it
    pub fn wrap(raw: &'a mut BytesMut) -> Self {
        Self {
            storage: Storage::External(raw),
        }
    }

    /// Whether the backing storage belongs to someone else
    pub fn is_external(&self) -> bool {
        matches!(self.storage, Storage::External(_))
    }

    pub(crate) fn raw(&self) -> &BytesMut {
        match &self.storage {
            Storage::Owned(raw) => raw,
            Storage::External(raw) => &**raw,
        }
    }

    pub(crate) fn raw_mut(&mut self) -> &mut BytesMut {
        match &mut self.storage {
            Storage::Owned(raw) => raw,
            Storage::External(raw) => &mut **raw,
        }
    }

    /// The buffered bytes, front first
    pub fn content(&self) -> &[u8] {
        self.raw()
    }

    pub fn len(&self) -> usize {
        self.raw().len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw().is_empty()
    }

    /// Fail with `Incomplete` unless at least `length` bytes are buffered
    pub fn ensure(&self, length: usize) -> BufferResult<()> {
        let available = self.len();
        if length > available {
            return Err(BufferError::Incomplete {
                needed: length,
                available,
            });
        }
        Ok(())
    }

    /// Discard `length` bytes from the front
    pub fn drain(&mut self, length: usize) -> BufferResult<()> {
        self.ensure(length)?;
        let _ = self.raw_mut().split_to(length);
        Ok(())
    }

    /// Append bytes at the back
    pub fn add(&mut self, data: &[u8]) {
        self.raw_mut().extend_from_slice(data);
    }

    /// Append the whole content of `other`, leaving it empty
    pub fn add_buffer(&mut self, other: &mut ByteBuffer<'_>) {
        let moved = other.raw_mut().split();
        if self.is_empty() && !self.is_external() {
            // Reuse the source allocation rather than copying into an empty one
            *self.raw_mut() = moved;
        } else {
            self.raw_mut().unsplit(moved);
        }
    }

    /// Take `length` bytes from the front; the caller owns the result
    pub fn remove(&mut self, length: usize) -> BufferResult<Bytes> {
        self.ensure(length)?;
        Ok(self.raw_mut().split_to(length).freeze())
    }

    /// Move everything into a new buffer that owns its storage
    pub fn remove_buffer(&mut self) -> ByteBuffer<'static> {
        ByteBuffer::from(self.raw_mut().split())
    }
}

impl Default for ByteBuffer<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl From<BytesMut> for ByteBuffer<'static> {
    fn from(raw: BytesMut) -> Self {
        Self {
            storage: Storage::Owned(raw),
        }
    }
}

impl From<&[u8]> for ByteBuffer<'static> {
    fn from(data: &[u8]) -> Self {
        Self::from(BytesMut::from(data))
    }
}

impl From<Vec<u8>> for ByteBuffer<'static> {
    fn from(data: Vec<u8>) -> Self {
        Self::from(BytesMut::from(&data[..]))
    }
}

impl fmt::Debug for ByteBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("len", &self.len())
            .field("external", &self.is_external())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_drain() {
        let mut buf = ByteBuffer::new();
        assert!(buf.is_empty());

        buf.add(b"hello world");
        assert_eq!(buf.len(), 11);

        buf.drain(6).unwrap();
        assert_eq!(buf.content(), b"world");
    }

    #[test]
    fn test_drain_past_end_fails() {
        let mut buf = ByteBuffer::from(&b"abc"[..]);

        let err = buf.drain(4).unwrap_err();
        assert!(err.is_incomplete());
        // Nothing consumed on failure
        assert_eq!(buf.content(), b"abc");
    }

    #[test]
    fn test_remove_transfers_bytes() {
        let mut buf = ByteBuffer::from(vec![1, 2, 3, 4, 5]);

        let head = buf.remove(2).unwrap();
        assert_eq!(&head[..], &[1, 2]);
        assert_eq!(buf.content(), &[3, 4, 5]);

        assert!(buf.remove(4).is_err());
    }

    #[test]
    fn test_add_buffer_drains_source() {
        let mut dst = ByteBuffer::from(&b"ab"[..]);
        let mut src = ByteBuffer::from(&b"cd"[..]);

        dst.add_buffer(&mut src);
        assert_eq!(dst.content(), b"abcd");
        assert!(src.is_empty());
    }

    #[test]
    fn test_remove_buffer_takes_everything() {
        let mut buf = ByteBuffer::from(&b"payload"[..]);

        let taken = buf.remove_buffer();
        assert!(buf.is_empty());
        assert!(!taken.is_external());
        assert_eq!(taken.content(), b"payload");
    }

    #[test]
    fn test_wrapped_storage_survives_drop() {
        let mut raw = BytesMut::from(&b"abc"[..]);
        {
            let mut wrapped = ByteBuffer::wrap(&mut raw);
            assert!(wrapped.is_external());
            wrapped.add(b"def");
            wrapped.drain(1).unwrap();
        }
        assert_eq!(&raw[..], b"bcdef");
    }
}
