//! Defines the `CodedWriter`, a writer for writing protobuf encoded values to outputs.
//!
//! Four output kinds are supported: a fixed slice, a growable [`ByteBuffer`],
//! a caller-trusted raw memory region, and a buffered stream adapter that
//! flushes to a sink and continues when its scratch region fills. All four
//! produce identical bytes for identical writes.
//!
//! [`ByteBuffer`]: ../../buffer/struct.ByteBuffer.html

use core::convert::TryInto;
use core::fmt::{self, Display, Formatter};
use core::result;
use crate::buffer::ByteBuffer;
use crate::collections::RepeatedValue;
use crate::internal::Sealed;
use crate::io::{raw_varint32_size, stream, FieldNumber, Length, Tag, WireType};
use crate::raw::Value;
use crate::utf8;
use trapper::Wrapper;

#[cfg(feature = "std")]
use std::error;

const DEFAULT_BUF_SIZE: usize = 8 * 1024;

pub(crate) mod internal {
    use alloc::boxed::Box;
    use alloc::vec;
    use core::marker::PhantomData;
    use core::ptr;
    use crate::buffer::ByteBuffer;
    use crate::io::{raw_varint32_size, raw_varint64_size, stream};
    use super::{Error, Result};

    /// A cursor over an output region.
    ///
    /// The varint encodings have a shared default implementation; the trusted
    /// raw writer overrides them with an unchecked loop. Both must emit the
    /// same bytes.
    pub trait Writer {
        /// Total bytes accepted by this writer
        fn pos(&self) -> usize;
        /// Writes all of `buf` or fails without consuming any of it
        fn write(&mut self, buf: &[u8]) -> Result;
        /// Whether previously written bytes can be overwritten in place
        fn supports_patch(&self) -> bool {
            false
        }
        /// Overwrites previously written bytes at offset `at`. Only called
        /// when `supports_patch` returned true and `at + bytes.len() <= pos`.
        fn patch(&mut self, at: usize, bytes: &[u8]) {
            let _ = (at, bytes);
            debug_assert!(false, "patch on an unsupporting writer");
        }
        /// Flushes any buffered bytes to the backing sink
        fn flush(&mut self) -> Result {
            Ok(())
        }

        fn write_byte(&mut self, value: u8) -> Result {
            self.write(&[value])
        }
        fn write_varint32(&mut self, mut value: u32) -> Result {
            let mut buf = [0u8; 5];
            let mut i = 0;
            loop {
                buf[i] = (value & 0x7F) as u8;
                value >>= 7;
                if value == 0 {
                    i += 1;
                    break;
                }
                buf[i] |= 0x80;
                i += 1;
            }
            self.write(&buf[..i])
        }
        fn write_varint64(&mut self, mut value: u64) -> Result {
            let mut buf = [0u8; 10];
            let mut i = 0;
            loop {
                buf[i] = (value & 0x7F) as u8;
                value >>= 7;
                if value == 0 {
                    i += 1;
                    break;
                }
                buf[i] |= 0x80;
                i += 1;
            }
            self.write(&buf[..i])
        }
        fn write_bit32(&mut self, value: u32) -> Result {
            self.write(&value.to_le_bytes())
        }
        fn write_bit64(&mut self, value: u64) -> Result {
            self.write(&value.to_le_bytes())
        }
    }

    /// The bounds checked fixed region writer; the reference implementation.
    pub struct SliceWriter<'a> {
        buf: &'a mut [u8],
        pos: usize,
    }

    impl<'a> SliceWriter<'a> {
        pub fn new(buf: &'a mut [u8]) -> Self {
            SliceWriter { buf, pos: 0 }
        }
    }

    impl Writer for SliceWriter<'_> {
        fn pos(&self) -> usize {
            self.pos
        }
        fn write(&mut self, buf: &[u8]) -> Result {
            if buf.len() <= self.buf.len() - self.pos {
                self.buf[self.pos..self.pos + buf.len()].copy_from_slice(buf);
                self.pos += buf.len();
                Ok(())
            } else {
                Err(Error::OutOfSpace)
            }
        }
        fn supports_patch(&self) -> bool {
            true
        }
        fn patch(&mut self, at: usize, bytes: &[u8]) {
            self.buf[at..at + bytes.len()].copy_from_slice(bytes);
        }
    }

    /// A writer appending into a growable byte buffer. Writes can't fail.
    pub struct GrowableWriter<'a> {
        buf: &'a mut ByteBuffer,
    }

    impl<'a> GrowableWriter<'a> {
        pub fn new(buf: &'a mut ByteBuffer) -> Self {
            GrowableWriter { buf }
        }
    }

    impl Writer for GrowableWriter<'_> {
        fn pos(&self) -> usize {
            self.buf.len()
        }
        fn write(&mut self, buf: &[u8]) -> Result {
            self.buf.extend_from_slice(buf);
            Ok(())
        }
        fn supports_patch(&self) -> bool {
            true
        }
        fn patch(&mut self, at: usize, bytes: &[u8]) {
            self.buf.as_mut_slice()[at..at + bytes.len()].copy_from_slice(bytes);
        }
    }

    /// The trusted region writer. The space check is against the logical end
    /// only; byte stores are unchecked.
    pub struct RawWriter<'a> {
        start: *mut u8,
        pos: *mut u8,
        end: *mut u8,
        _marker: PhantomData<&'a mut [u8]>,
    }

    impl<'a> RawWriter<'a> {
        /// # Safety
        ///
        /// `start` must be valid for writes of `len` bytes for the writer's lifetime.
        pub unsafe fn new(start: *mut u8, len: usize) -> Self {
            RawWriter {
                start,
                pos: start,
                end: start.add(len),
                _marker: PhantomData,
            }
        }

        fn space_left(&self) -> usize {
            usize::wrapping_sub(self.end as _, self.pos as _)
        }
    }

    impl Writer for RawWriter<'_> {
        fn pos(&self) -> usize {
            usize::wrapping_sub(self.pos as _, self.start as _)
        }
        fn write(&mut self, buf: &[u8]) -> Result {
            if buf.len() <= self.space_left() {
                unsafe {
                    ptr::copy_nonoverlapping(buf.as_ptr(), self.pos, buf.len());
                    self.pos = self.pos.add(buf.len());
                }
                Ok(())
            } else {
                Err(Error::OutOfSpace)
            }
        }
        fn supports_patch(&self) -> bool {
            true
        }
        fn patch(&mut self, at: usize, bytes: &[u8]) {
            debug_assert!(at + bytes.len() <= self.pos());
            unsafe {
                ptr::copy_nonoverlapping(bytes.as_ptr(), self.start.add(at), bytes.len());
            }
        }
        fn write_varint32(&mut self, mut value: u32) -> Result {
            if (raw_varint32_size(value).get() as usize) > self.space_left() {
                return Err(Error::OutOfSpace);
            }
            let mut p = self.pos;
            loop {
                unsafe {
                    if value < 0x80 {
                        *p = value as u8;
                        self.pos = p.add(1);
                        return Ok(());
                    }
                    *p = (value as u8 & 0x7F) | 0x80;
                    p = p.add(1);
                    value >>= 7;
                }
            }
        }
        fn write_varint64(&mut self, mut value: u64) -> Result {
            if (raw_varint64_size(value).get() as usize) > self.space_left() {
                return Err(Error::OutOfSpace);
            }
            let mut p = self.pos;
            loop {
                unsafe {
                    if value < 0x80 {
                        *p = value as u8;
                        self.pos = p.add(1);
                        return Ok(());
                    }
                    *p = (value as u8 & 0x7F) | 0x80;
                    p = p.add(1);
                    value >>= 7;
                }
            }
        }
        fn write_bit32(&mut self, value: u32) -> Result {
            if self.space_left() >= 4 {
                unsafe {
                    ptr::write_unaligned(self.pos as *mut u32, value.to_le());
                    self.pos = self.pos.add(4);
                }
                Ok(())
            } else {
                Err(Error::OutOfSpace)
            }
        }
        fn write_bit64(&mut self, value: u64) -> Result {
            if self.space_left() >= 8 {
                unsafe {
                    ptr::write_unaligned(self.pos as *mut u64, value.to_le());
                    self.pos = self.pos.add(8);
                }
                Ok(())
            } else {
                Err(Error::OutOfSpace)
            }
        }
    }

    /// A writer with a fixed scratch region that flushes to a sink and
    /// continues when the region fills. Oversized writes bypass the scratch
    /// region entirely.
    pub struct StreamWriter<T> {
        output: T,
        buf: Box<[u8]>,
        pos: usize,
        flushed: usize,
    }

    impl<T: stream::Write> StreamWriter<T> {
        pub fn new(output: T, capacity: usize) -> Self {
            StreamWriter {
                output,
                buf: vec![0; capacity.max(16)].into_boxed_slice(),
                pos: 0,
                flushed: 0,
            }
        }

        fn flush_buf(&mut self) -> Result {
            if self.pos != 0 {
                self.output.write(&self.buf[..self.pos])?;
                self.flushed += self.pos;
                self.pos = 0;
            }
            Ok(())
        }
    }

    impl<T: stream::Write> Writer for StreamWriter<T> {
        fn pos(&self) -> usize {
            self.flushed + self.pos
        }
        fn write(&mut self, buf: &[u8]) -> Result {
            if buf.len() > self.buf.len() - self.pos {
                self.flush_buf()?;
                if buf.len() >= self.buf.len() {
                    self.output.write(buf)?;
                    self.flushed += buf.len();
                    return Ok(());
                }
            }
            self.buf[self.pos..self.pos + buf.len()].copy_from_slice(buf);
            self.pos += buf.len();
            Ok(())
        }
        fn flush(&mut self) -> Result {
            self.flush_buf()
        }
    }
}

use internal::Writer;

/// The error type for [`CodedWriter`](struct.CodedWriter.html)
#[derive(Debug)]
pub enum Error {
    /// A write exceeded a fixed output region. The writer's position is left
    /// at the failing write for reporting.
    OutOfSpace,
    /// An error used to indicate a value was provided that was
    /// too large to write to an output.
    ValueTooLarge,
    /// A string value contained an unpaired surrogate
    IllegalEncoding(utf8::Error),
    /// An error occured while writing data to the underlying sink
    Stream(stream::Error),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Error::OutOfSpace => write!(f, "the output region did not have enough space for the written data"),
            Error::ValueTooLarge => write!(f, "the value was too large to write to the output"),
            Error::IllegalEncoding(_) => write!(f, "the string value could not be encoded"),
            Error::Stream(_) => write!(f, "an error occured while writing to the output"),
        }
    }
}

#[cfg(feature = "std")]
impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::IllegalEncoding(e) => Some(e),
            Error::Stream(e) => Some(e),
            _ => None,
        }
    }
}

impl From<stream::Error> for Error {
    fn from(e: stream::Error) -> Self {
        Self::Stream(e)
    }
}

impl From<utf8::Error> for Error {
    fn from(e: utf8::Error) -> Self {
        Self::IllegalEncoding(e)
    }
}

/// A result for a [`CodedWriter`](struct.CodedWriter.html) write operation
pub type Result = result::Result<(), Error>;

/// An output type that can be used to create a `Writer` for a [`CodedWriter`] instance.
///
/// [`CodedWriter`]: struct.CodedWriter.html
pub trait Output: Sealed {
    /// The writer type used by the [`CodedWriter`](struct.CodedWriter.html) to write data
    type Writer: internal::Writer;
}

/// A type used for a [`CodedWriter`] writing to a fixed [`slice`] output.
pub struct Slice<'a>(core::marker::PhantomData<&'a mut [u8]>);
impl Sealed for Slice<'_> { }
impl<'a> Output for Slice<'a> {
    type Writer = internal::SliceWriter<'a>;
}

/// A type used for a [`CodedWriter`] appending to a growable [`ByteBuffer`].
///
/// [`ByteBuffer`]: ../../buffer/struct.ByteBuffer.html
pub struct Growable<'a>(core::marker::PhantomData<&'a mut ByteBuffer>);
impl Sealed for Growable<'_> { }
impl<'a> Output for Growable<'a> {
    type Writer = internal::GrowableWriter<'a>;
}

/// A type used for a [`CodedWriter`] writing to a trusted raw memory region.
/// Constructed only through `unsafe` entry points.
pub struct Raw<'a>(core::marker::PhantomData<&'a mut [u8]>);
impl Sealed for Raw<'_> { }
impl<'a> Output for Raw<'a> {
    type Writer = internal::RawWriter<'a>;
}

/// A type used for a [`CodedWriter`] writing through a flushing scratch
/// region into a [`Write`](../stream/trait.Write.html) sink.
pub struct Stream<T>(T);
impl<T> Sealed for Stream<T> { }
impl<T: stream::Write> Output for Stream<T> {
    type Writer = internal::StreamWriter<T>;
}

/// A coded writer that writes protobuf encoded values to a specified output.
pub struct CodedWriter<T: Output> {
    inner: T::Writer,
}

impl<'a> CodedWriter<Slice<'a>> {
    /// Creates a new [`CodedWriter`] over the borrowed [`slice`].
    ///
    /// [`CodedWriter`]: struct.CodedWriter.html
    /// [`slice`]: https://doc.rust-lang.org/nightly/std/primitive.slice.html
    #[inline]
    pub fn with_slice(inner: &'a mut [u8]) -> Self {
        CodedWriter {
            inner: internal::SliceWriter::new(inner),
        }
    }
}

impl<'a> CodedWriter<Growable<'a>> {
    /// Creates a new [`CodedWriter`] appending to the borrowed [`ByteBuffer`].
    ///
    /// [`CodedWriter`]: struct.CodedWriter.html
    /// [`ByteBuffer`]: ../../buffer/struct.ByteBuffer.html
    #[inline]
    pub fn with_bytes(inner: &'a mut ByteBuffer) -> Self {
        CodedWriter {
            inner: internal::GrowableWriter::new(inner),
        }
    }
}

impl<'a> CodedWriter<Raw<'a>> {
    /// Creates a new [`CodedWriter`] over the trusted raw memory region.
    /// Writes elide per-byte bounds checks.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for writes of `len` bytes for the writer's lifetime.
    #[inline]
    pub unsafe fn with_raw_parts(ptr: *mut u8, len: usize) -> Self {
        CodedWriter {
            inner: internal::RawWriter::new(ptr, len),
        }
    }
}

impl<T: stream::Write> CodedWriter<Stream<T>> {
    /// Creates a new [`CodedWriter`] writing to the sink through a scratch
    /// region with the default capacity.
    ///
    /// [`CodedWriter`]: struct.CodedWriter.html
    #[inline]
    pub fn with_stream(inner: T) -> Self {
        Self::with_capacity(DEFAULT_BUF_SIZE, inner)
    }
    /// Creates a new [`CodedWriter`] writing to the sink through a scratch
    /// region with the specified capacity.
    ///
    /// [`CodedWriter`]: struct.CodedWriter.html
    #[inline]
    pub fn with_capacity(capacity: usize, inner: T) -> Self {
        CodedWriter {
            inner: internal::StreamWriter::new(inner, capacity),
        }
    }
}

impl<T: Output> CodedWriter<T> {
    /// Returns the number of bytes accepted by the writer. After an
    /// [`OutOfSpace`](enum.Error.html#variant.OutOfSpace) failure this is the
    /// position the failing write started at.
    #[inline]
    pub fn position(&self) -> usize {
        self.inner.pos()
    }

    /// Writes a tag to the output.
    #[inline]
    pub fn write_tag(&mut self, tag: Tag) -> Result {
        self.inner.write_varint32(tag.get())
    }

    /// Writes a pre-encoded tag to the output. Generated code uses this to
    /// emit statically known tags as literal bytes; the varint path remains
    /// the reference encoding.
    #[inline]
    pub fn write_raw_tag(&mut self, bytes: &[u8]) -> Result {
        debug_assert!(!bytes.is_empty() && bytes.len() <= 5);
        self.inner.write(bytes)
    }

    /// Writes a length to the output.
    #[inline]
    pub fn write_length(&mut self, length: Length) -> Result {
        self.inner.write_varint32(length.get() as u32)
    }

    /// Writes a 32-bit varint to the output. This is the same as upcasting
    /// the value to a u64 and writing that, however this is more optimized
    /// for writing 32-bit values.
    #[inline]
    pub fn write_varint32(&mut self, value: u32) -> Result {
        self.inner.write_varint32(value)
    }

    /// Writes a 64-bit varint to the output.
    #[inline]
    pub fn write_varint64(&mut self, value: u64) -> Result {
        self.inner.write_varint64(value)
    }

    /// Writes a 32-bit little endian integer to the output.
    #[inline]
    pub fn write_bit32(&mut self, value: u32) -> Result {
        self.inner.write_bit32(value)
    }

    /// Writes a 64-bit little endian integer to the output.
    #[inline]
    pub fn write_bit64(&mut self, value: u64) -> Result {
        self.inner.write_bit64(value)
    }

    /// Writes raw bytes to the output. This should be used carefully as to not corrupt the coded output.
    #[inline]
    pub fn write_bytes(&mut self, value: &[u8]) -> Result {
        self.inner.write(value)
    }

    /// Writes a length delimited set of bytes to the output.
    pub fn write_length_delimited(&mut self, value: &[u8]) -> Result {
        let len: i32 = value.len().try_into().map_err(|_| Error::ValueTooLarge)?;
        self.write_length(unsafe { Length::new_unchecked(len) })?;
        self.write_bytes(value)
    }

    /// Writes a length delimited string to the output.
    #[inline]
    pub fn write_string(&mut self, value: &str) -> Result {
        self.write_length_delimited(value.as_bytes())
    }

    /// Writes a length delimited string provided as UTF-16 code units.
    ///
    /// When the encoded length's varint width is unambiguous from the
    /// `len..=3 * len` bound and the output supports patching, the length
    /// prefix is written speculatively and fixed up after a single direct
    /// encoding pass. Otherwise the exact encoded length is computed first.
    pub fn write_utf16_string(&mut self, value: &[u16]) -> Result {
        let min = value.len();
        let max = min.checked_mul(3)
            .and_then(|n| n.try_into().ok().map(|n: i32| n as u32))
            .ok_or(Error::ValueTooLarge)?;

        if raw_varint32_size(min as u32) == raw_varint32_size(max) && self.inner.supports_patch() {
            let at = self.inner.pos();
            self.inner.write_varint32(min as u32)?;
            let start = self.inner.pos();
            self.encode_utf16(value)?;
            let written = self.inner.pos() - start;
            if written != min {
                let mut buf = [0u8; 5];
                let mut len = written as u32;
                let mut i = 0;
                loop {
                    buf[i] = (len & 0x7F) as u8;
                    len >>= 7;
                    if len == 0 {
                        i += 1;
                        break;
                    }
                    buf[i] |= 0x80;
                    i += 1;
                }
                // same width as the speculative prefix since min <= written <= max
                debug_assert_eq!(i as i32, raw_varint32_size(min as u32).get());
                self.inner.patch(at, &buf[..i]);
            }
        } else {
            let len = utf8::encoded_len(value)?;
            let len: i32 = len.try_into().map_err(|_| Error::ValueTooLarge)?;
            self.write_length(unsafe { Length::new_unchecked(len) })?;
            self.encode_utf16(value)?;
        }
        Ok(())
    }

    fn encode_utf16(&mut self, value: &[u16]) -> Result {
        let mut buf = [0u8; 4];
        for scalar in utf8::scalars(value) {
            let c = scalar?;
            if c < 0x80 {
                self.inner.write_byte(c as u8)?;
            } else {
                let n = utf8::encode_scalar(c, &mut buf);
                self.inner.write(&buf[..n])?;
            }
        }
        Ok(())
    }

    /// Writes a generic value to the output.
    #[inline]
    pub fn write_value<V: Value + Wrapper>(&mut self, value: &V::Inner) -> Result {
        V::wrap_ref(value).write_to(self)
    }

    /// Writes a generic value with a tag to the output based on the provided field number.
    #[inline]
    pub fn write_field<V: Value + Wrapper>(&mut self, num: FieldNumber, value: &V::Inner) -> Result {
        self.write_tag(Tag::new(num, V::WIRE_TYPE))?;
        self.write_value::<V>(value)?;
        if V::WIRE_TYPE as u8 == WireType::StartGroup as u8 {
            self.write_tag(Tag::new(num, WireType::EndGroup))?;
        }
        Ok(())
    }

    /// Writes a collection of values to the output with the provided field number.
    #[inline]
    pub fn write_values<U: RepeatedValue<V>, V>(&mut self, value: &U, num: FieldNumber) -> Result {
        value.write_to(self, num)
    }

    /// Flushes any bytes buffered by a stream output to its sink. Other
    /// outputs are unbuffered and this does nothing.
    #[inline]
    pub fn flush(&mut self) -> Result {
        self.inner.flush()
    }
}
