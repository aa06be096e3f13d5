//! Growable byte buffer backing variable-length fields and LOB streaming.

use bytes::{Bytes, BytesMut};

/// A growable byte buffer.
///
/// The declared capacity only ever grows: `check_size` raises it when a
/// value larger than anything seen before has to be stored.
#[derive(Debug, Clone, Default)]
pub struct ByteBuffer {
    data: BytesMut,
    capacity: usize,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Make sure at least `size` bytes fit without reallocation.
    ///
    /// Returns `true` if the buffer had to grow.
    pub fn check_size(&mut self, size: usize) -> bool {
        if size <= self.capacity {
            return false;
        }
        self.data.reserve(size.saturating_sub(self.data.len()));
        self.capacity = size;
        true
    }

    /// Append bytes, growing the declared capacity when needed.
    pub fn append(&mut self, bytes: &[u8]) {
        self.check_size(self.data.len() + bytes.len());
        self.data.extend_from_slice(bytes);
    }

    /// Replace the contents.
    pub fn set(&mut self, bytes: &[u8]) {
        self.data.clear();
        self.append(bytes);
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Declared capacity (largest size requested so far).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Move the current contents out as an immutable view.
    ///
    /// The buffer keeps its declared capacity and is left empty.
    pub fn take(&mut self) -> Bytes {
        self.data.split().freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_size_only_grows() {
        let mut buf = ByteBuffer::with_capacity(16);
        assert!(!buf.check_size(8));
        assert_eq!(buf.capacity(), 16);
        assert!(buf.check_size(64));
        assert_eq!(buf.capacity(), 64);
        assert!(!buf.check_size(32));
        assert_eq!(buf.capacity(), 64);
    }

    #[test]
    fn test_append_grows_capacity() {
        let mut buf = ByteBuffer::with_capacity(4);
        buf.append(b"abc");
        buf.append(b"defgh");
        assert_eq!(buf.bytes(), b"abcdefgh");
        assert_eq!(buf.capacity(), 8);
    }

    #[test]
    fn test_take_leaves_empty_buffer() {
        let mut buf = ByteBuffer::new();
        buf.set(b"hello");
        let taken = buf.take();
        assert_eq!(&taken[..], b"hello");
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 5);
    }
}
