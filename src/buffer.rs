//! Defines the `ByteBuffer`, a growable byte store used as a coded writer
//! output and as the append target for text encodings.

use alloc::vec::Vec;
use core::fmt::{self, Display};

/// A growable, amortized byte buffer.
///
/// This is the backing store for [`CodedWriter`] growable outputs and the
/// boundary type handed to text encoders: those only ever append raw bytes or
/// formatted numbers, they never see the buffer's internals.
///
/// [`CodedWriter`]: ../io/write/struct.CodedWriter.html
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ByteBuffer {
    data: Vec<u8>,
}

impl ByteBuffer {
    /// Creates an empty buffer
    #[inline]
    pub const fn new() -> ByteBuffer {
        ByteBuffer { data: Vec::new() }
    }

    /// Creates an empty buffer with at least the specified capacity
    #[inline]
    pub fn with_capacity(capacity: usize) -> ByteBuffer {
        ByteBuffer { data: Vec::with_capacity(capacity) }
    }

    /// Returns the number of bytes written to the buffer
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns whether the buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the buffer's capacity in bytes
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Ensures at least `additional` more bytes can be written without reallocating
    #[inline]
    pub fn reserve(&mut self, additional: usize) {
        self.data.reserve(additional);
    }

    /// Clears the buffer. The backing allocation is retained.
    #[inline]
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Returns the written bytes as a slice
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Returns the written bytes as a mutable slice
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Appends a single byte
    #[inline]
    pub fn push(&mut self, value: u8) {
        self.data.push(value);
    }

    /// Appends a slice of bytes
    #[inline]
    pub fn extend_from_slice(&mut self, value: &[u8]) {
        self.data.extend_from_slice(value);
    }

    /// Appends a value's `Display` form. This is how number formatting
    /// reaches the buffer without an intermediate string allocation.
    pub fn append_display<T: Display>(&mut self, value: T) {
        use core::fmt::Write;

        // writing into a Vec can't fail
        let _ = write!(self, "{}", value);
    }

    /// Consumes the buffer, returning the written bytes
    #[inline]
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl From<Vec<u8>> for ByteBuffer {
    fn from(data: Vec<u8>) -> ByteBuffer {
        ByteBuffer { data }
    }
}

impl AsRef<[u8]> for ByteBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Write for ByteBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.data.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

#[cfg(feature = "std")]
impl std::io::Write for ByteBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(not(feature = "std"))]
impl crate::io::stream::Write for ByteBuffer {
    fn write(&mut self, buf: &[u8]) -> crate::io::stream::Result {
        self.data.extend_from_slice(buf);
        Ok(())
    }
}
