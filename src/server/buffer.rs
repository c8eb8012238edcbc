//! Fixed-capacity byte buffers owned by the server.
//!
//! Storage is allocated once with the server and reused for every
//! receive and send; nothing on the hot path allocates. Data longer than
//! the capacity is truncated on copy-in, never written past the backing
//! storage.

/// Default capacity of both the inbound and outbound buffers.
pub const BUFFER_CAPACITY: usize = 2048;

/// A byte array of capacity `N` plus the number of valid bytes in it.
pub struct FixedBuffer<const N: usize> {
    /// Backing storage.
    data: Box<[u8; N]>,
    /// Valid bytes at the front of `data`.
    len: usize,
}

impl<const N: usize> FixedBuffer<N> {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            data: Box::new([0u8; N]),
            len: 0,
        }
    }

    /// Replace the contents with the first `min(src.len(), N)` bytes of `src`.
    ///
    /// Returns the number of bytes copied. Bytes past the capacity are
    /// dropped.
    pub fn fill(&mut self, src: &[u8]) -> usize {
        let len = src.len().min(N);
        self.data[..len].copy_from_slice(&src[..len]);
        self.len = len;
        len
    }

    /// Valid contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[cfg(test)]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Forget the contents without touching storage.
    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl<const N: usize> Default for FixedBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> std::fmt::Debug for FixedBuffer<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedBuffer")
            .field("len", &self.len)
            .field("capacity", &N)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_within_capacity() {
        let mut buf = FixedBuffer::<16>::new();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 16);

        let copied = buf.fill(b"hello world");
        assert_eq!(copied, 11);
        assert_eq!(buf.len(), 11);
        assert_eq!(buf.as_slice(), b"hello world");
    }

    #[test]
    fn test_fill_truncates_at_capacity() {
        let mut buf = FixedBuffer::<8>::new();
        let data: Vec<u8> = (0..20u8).collect();

        let copied = buf.fill(&data);
        assert_eq!(copied, 8);
        assert_eq!(buf.as_slice(), &data[..8]);
    }

    #[test]
    fn test_fill_overwrites_previous_contents() {
        let mut buf = FixedBuffer::<16>::new();
        buf.fill(b"first request");
        buf.fill(b"second");

        // Shorter payload must not expose the tail of the previous one
        assert_eq!(buf.as_slice(), b"second");
    }

    #[test]
    fn test_clear_and_reuse() {
        let mut buf = FixedBuffer::<BUFFER_CAPACITY>::new();
        buf.fill(&[7u8; 100]);
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.as_slice(), b"");

        assert_eq!(buf.fill(&[1u8; 4096]), BUFFER_CAPACITY);
        assert_eq!(buf.len(), BUFFER_CAPACITY);
    }

    #[test]
    fn test_empty_fill() {
        let mut buf = FixedBuffer::<4>::new();
        buf.fill(b"abcd");
        assert_eq!(buf.fill(b""), 0);
        assert!(buf.is_empty());
    }
}
