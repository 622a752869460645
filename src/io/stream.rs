//! An abstraction around output sinks that allows the lib to work in `no-std` scenarios.
//!
//! Coded readers don't appear here; they require a seekable contiguous region
//! and read from slices or raw memory directly.

use core::fmt::{self, Display, Formatter};

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

#[cfg(feature = "std")]
use std::error;

/// An error type returned when an error occurs while writing to a stream trait.
///
/// Encountering this error likely means the stream is invalidated and shouldn't continue to be used.
/// It also does not communicate the underlying source of the error and implementors of Write should use
/// some external way of communicating the underlying error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error;

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "stream error")
    }
}

#[cfg(feature = "std")]
impl error::Error for Error { }

/// The result of writing to a Write instance
pub type Result = core::result::Result<(), Error>;

/// A trait for writing bytes to a destination.
///
/// Like the std::io::Write trait, implementors of this trait are called 'writers'.
pub trait Write {
    /// Writes all data in the buffer to the output
    fn write(&mut self, buf: &[u8]) -> Result;
}

#[cfg(feature = "std")]
impl<T: std::io::Write> Write for T {
    fn write(&mut self, buf: &[u8]) -> Result {
        self.write_all(buf).map_err(|_| Error)
    }
}

#[cfg(not(feature = "std"))]
impl<'a> Write for &'a mut [u8] {
    fn write(&mut self, buf: &[u8]) -> Result {
        if buf.len() <= self.len() {
            let (a, b) = core::mem::replace(self, &mut []).split_at_mut(buf.len());
            a.copy_from_slice(buf);
            *self = b;
            Ok(())
        } else {
            Err(Error)
        }
    }
}

#[cfg(not(feature = "std"))]
impl Write for Vec<u8> {
    fn write(&mut self, buf: &[u8]) -> Result {
        self.extend_from_slice(buf);
        Ok(())
    }
}
