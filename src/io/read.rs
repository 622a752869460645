//! Defines the `CodedReader`, a reader for parsing values from a protobuf encoded byte region.
//!
//! Readers operate over contiguous regions only: either a borrowed slice with
//! every access checked against the active limit, or a caller-trusted raw
//! memory region that elides the per-byte slice checks. The two cursors must
//! decode byte-identical results for identical input; the raw cursor is purely
//! a performance fast path behind an `unsafe` opt-in.

use alloc::string::String;
use alloc::vec::Vec;
use core::convert::TryFrom;
use core::fmt::{self, Display, Formatter};
use core::result;
use core::str;
use crate::CodableMessage;
use crate::collections::RepeatedValue;
use crate::internal::Sealed;
use crate::io::{ByteString, FieldNumber, Length, Tag, WireType};
use crate::raw::{Primitive, Value};
use crate::utf8;
use trapper::Wrapper;

#[cfg(feature = "std")]
use std::error;

/// The default limit on nested message and group recursion.
pub const DEFAULT_RECURSION_LIMIT: u32 = 64;

pub(crate) mod internal {
    use core::cmp;
    use core::marker::PhantomData;
    use core::ptr;
    use core::slice;
    use super::{Error, Result};

    /// A cursor over a contiguous input region.
    ///
    /// The two implementations (checked slice and trusted raw memory) must be
    /// behaviorally identical; anything semantic lives in `CodedReader` on top
    /// of these primitives.
    pub trait Reader {
        /// The cursor's offset from the start of the region
        fn pos(&self) -> usize;
        /// Rewinds the cursor to an offset previously returned by `pos`.
        /// The active limit is unaffected.
        fn seek(&mut self, pos: usize);
        /// Bytes between the cursor and the active limit
        fn remaining(&self) -> usize;
        fn reached_limit(&self) -> bool {
            self.remaining() == 0
        }
        /// Moves the limit `len` bytes past the cursor, returning the old
        /// limit's offset for `pop_limit`
        fn push_limit(&mut self, len: usize) -> Result<usize>;
        fn pop_limit(&mut self, old: usize);

        fn read_byte(&mut self) -> Result<u8>;
        fn read_varint32(&mut self) -> Result<u32>;
        fn read_varint64(&mut self) -> Result<u64>;
        fn read_bit32(&mut self) -> Result<u32>;
        fn read_bit64(&mut self) -> Result<u64>;
        /// Borrows the next `len` bytes, advancing past them
        fn read_slice(&mut self, len: usize) -> Result<&[u8]>;

        fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
            let slice = self.read_slice(buf.len())?;
            buf.copy_from_slice(slice);
            Ok(())
        }
        fn skip(&mut self, len: usize) -> Result<()> {
            self.read_slice(len).map(drop)
        }
    }

    /// The bounds checked cursor; the reference implementation.
    pub struct SliceCursor<'a> {
        buf: &'a [u8],
        pos: usize,
        limit: usize,
    }

    impl<'a> SliceCursor<'a> {
        pub fn new(buf: &'a [u8]) -> Self {
            SliceCursor {
                buf,
                pos: 0,
                limit: buf.len(),
            }
        }
    }

    impl Reader for SliceCursor<'_> {
        fn pos(&self) -> usize {
            self.pos
        }
        fn seek(&mut self, pos: usize) {
            debug_assert!(pos <= self.limit);
            self.pos = pos;
        }
        fn remaining(&self) -> usize {
            self.limit - self.pos
        }
        fn push_limit(&mut self, len: usize) -> Result<usize> {
            let new_limit = self.pos.checked_add(len).ok_or(Error::TruncatedMessage)?;
            if new_limit > self.limit {
                return Err(Error::TruncatedMessage);
            }
            let old = self.limit;
            self.limit = new_limit;
            Ok(old)
        }
        fn pop_limit(&mut self, old: usize) {
            self.limit = cmp::min(old, self.buf.len());
        }

        fn read_byte(&mut self) -> Result<u8> {
            if self.pos < self.limit {
                let b = self.buf[self.pos];
                self.pos += 1;
                Ok(b)
            } else {
                Err(Error::TruncatedMessage)
            }
        }
        fn read_varint32(&mut self) -> Result<u32> {
            let mut value = 0u32;
            for i in 0..5 {
                let b = self.read_byte()?;
                value |= ((b & 0x7F) as u32) << (7 * i);
                if b < 0x80 {
                    return Ok(value);
                }
            }
            // discard the upper bits of 64-bit varints
            for _ in 0..5 {
                let b = self.read_byte()?;
                if b < 0x80 {
                    return Ok(value);
                }
            }
            Err(Error::MalformedVarint)
        }
        fn read_varint64(&mut self) -> Result<u64> {
            let mut value = 0u64;
            for i in 0..10 {
                let b = self.read_byte()?;
                value |= ((b & 0x7F) as u64) << (7 * i);
                if b < 0x80 {
                    return Ok(value);
                }
            }
            Err(Error::MalformedVarint)
        }
        fn read_bit32(&mut self) -> Result<u32> {
            let slice = self.read_slice(4)?;
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(slice);
            Ok(u32::from_le_bytes(bytes))
        }
        fn read_bit64(&mut self) -> Result<u64> {
            let slice = self.read_slice(8)?;
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(slice);
            Ok(u64::from_le_bytes(bytes))
        }
        fn read_slice(&mut self, len: usize) -> Result<&[u8]> {
            if len <= self.remaining() {
                let slice = &self.buf[self.pos..self.pos + len];
                self.pos += len;
                Ok(slice)
            } else {
                Err(Error::TruncatedMessage)
            }
        }
    }

    /// The trusted region cursor. Reads check the logical limit only; the
    /// caller vouched for the region when it constructed the reader.
    pub struct RawCursor<'a> {
        start: *const u8,
        pos: *const u8,
        limit: *const u8,
        end: *const u8,
        _marker: PhantomData<&'a [u8]>,
    }

    impl<'a> RawCursor<'a> {
        /// # Safety
        ///
        /// `start` must be valid for reads of `len` bytes for the cursor's lifetime.
        pub unsafe fn new(start: *const u8, len: usize) -> Self {
            let end = start.add(len);
            RawCursor {
                start,
                pos: start,
                limit: end,
                end,
                _marker: PhantomData,
            }
        }
    }

    impl Reader for RawCursor<'_> {
        fn pos(&self) -> usize {
            usize::wrapping_sub(self.pos as _, self.start as _)
        }
        fn seek(&mut self, pos: usize) {
            debug_assert!(pos <= self.pos());
            self.pos = unsafe { self.start.add(pos) };
        }
        fn remaining(&self) -> usize {
            usize::wrapping_sub(self.limit as _, self.pos as _)
        }
        fn push_limit(&mut self, len: usize) -> Result<usize> {
            if len > self.remaining() {
                return Err(Error::TruncatedMessage);
            }
            let old = usize::wrapping_sub(self.limit as _, self.start as _);
            self.limit = unsafe { self.pos.add(len) };
            Ok(old)
        }
        fn pop_limit(&mut self, old: usize) {
            let restored = unsafe { self.start.add(old) };
            self.limit = if restored > self.end { self.end } else { restored };
        }

        fn read_byte(&mut self) -> Result<u8> {
            if self.pos < self.limit {
                unsafe {
                    let b = *self.pos;
                    self.pos = self.pos.add(1);
                    Ok(b)
                }
            } else {
                Err(Error::TruncatedMessage)
            }
        }
        fn read_varint32(&mut self) -> Result<u32> {
            let mut value = 0u32;
            for i in 0..5 {
                let b = self.read_byte()?;
                value |= ((b & 0x7F) as u32) << (7 * i);
                if b < 0x80 {
                    return Ok(value);
                }
            }
            for _ in 0..5 {
                let b = self.read_byte()?;
                if b < 0x80 {
                    return Ok(value);
                }
            }
            Err(Error::MalformedVarint)
        }
        fn read_varint64(&mut self) -> Result<u64> {
            let mut value = 0u64;
            for i in 0..10 {
                let b = self.read_byte()?;
                value |= ((b & 0x7F) as u64) << (7 * i);
                if b < 0x80 {
                    return Ok(value);
                }
            }
            Err(Error::MalformedVarint)
        }
        fn read_bit32(&mut self) -> Result<u32> {
            if self.remaining() >= 4 {
                unsafe {
                    let value = ptr::read_unaligned(self.pos as *const u32);
                    self.pos = self.pos.add(4);
                    Ok(u32::from_le(value))
                }
            } else {
                Err(Error::TruncatedMessage)
            }
        }
        fn read_bit64(&mut self) -> Result<u64> {
            if self.remaining() >= 8 {
                unsafe {
                    let value = ptr::read_unaligned(self.pos as *const u64);
                    self.pos = self.pos.add(8);
                    Ok(u64::from_le(value))
                }
            } else {
                Err(Error::TruncatedMessage)
            }
        }
        fn read_slice(&mut self, len: usize) -> Result<&[u8]> {
            if len <= self.remaining() {
                unsafe {
                    let slice = slice::from_raw_parts(self.pos, len);
                    self.pos = self.pos.add(len);
                    Ok(slice)
                }
            } else {
                Err(Error::TruncatedMessage)
            }
        }
    }
}

use internal::Reader;

/// The error type for [`CodedReader`](struct.CodedReader.html)
#[derive(Debug)]
pub enum Error {
    /// The input ended before a read could be satisfied
    TruncatedMessage,
    /// The input contained a malformed variable length integer
    MalformedVarint,
    /// The input contained a length delimited value which reported it had a negative size
    NegativeSize,
    /// The input contained an invalid tag (zero or a zero field number)
    InvalidTag(u32),
    /// The input contained a tag with an invalid wire type
    InvalidWireType(u32),
    /// A nested message or group did not end with the expected tag
    InvalidEndTag,
    /// The input nested messages or groups deeper than the configured recursion limit
    RecursionLimitExceeded,
    /// The input contained an invalid UTF8 string
    InvalidString(str::Utf8Error),
    /// The input contained a string value that could not be transcoded
    IllegalEncoding(utf8::Error),
}

impl From<str::Utf8Error> for Error {
    fn from(value: str::Utf8Error) -> Error {
        Error::InvalidString(value)
    }
}

impl From<utf8::Error> for Error {
    fn from(value: utf8::Error) -> Error {
        Error::IllegalEncoding(value)
    }
}

impl Display for Error {
    fn fmt(&self, fmt: &mut Formatter) -> fmt::Result {
        match self {
            Error::TruncatedMessage => write!(fmt, "the input ended in the middle of a field"),
            Error::MalformedVarint => write!(fmt, "the input contained an invalid variable length integer"),
            Error::NegativeSize => write!(fmt, "the input contained a length delimited value which reported it had a negative size"),
            Error::InvalidTag(val) => write!(fmt, "the input contained a tag that was either invalid or was unexpected at this point in the input: {}", val),
            Error::InvalidWireType(val) => write!(fmt, "the input contained a tag with an invalid wire type: {}", val),
            Error::InvalidEndTag => write!(fmt, "a nested value did not end at the expected tag"),
            Error::RecursionLimitExceeded => write!(fmt, "the input nested values deeper than the configured recursion limit"),
            Error::InvalidString(_) => write!(fmt, "the input contained an invalid UTF8 string"),
            Error::IllegalEncoding(_) => write!(fmt, "the input contained a string value that could not be transcoded"),
        }
    }
}

#[cfg(feature = "std")]
impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::InvalidString(ref e) => Some(e),
            Error::IllegalEncoding(ref e) => Some(e),
            _ => None,
        }
    }
}

/// A result for a [`CodedReader`](struct.CodedReader.html) read operation
pub type Result<T> = result::Result<T, Error>;

/// An input type that can be used to create a `Reader` for a [`CodedReader`] instance.
///
/// [`CodedReader`]: struct.CodedReader.html
pub trait Input: Sealed {
    /// The reader type used by the [`CodedReader`](struct.CodedReader.html) to read data
    type Reader: internal::Reader;
}

/// A type used for a [`CodedReader`] reading from a [`slice`] input with full bounds checking.
pub struct Slice<'a>(&'a [u8]);
impl Sealed for Slice<'_> { }
impl<'a> Input for Slice<'a> {
    type Reader = internal::SliceCursor<'a>;
}

/// A type used for a [`CodedReader`] reading from a trusted raw memory region.
/// Constructed only through `unsafe` builder entry points.
pub struct Raw<'a>(core::marker::PhantomData<&'a [u8]>);
impl Sealed for Raw<'_> { }
impl<'a> Input for Raw<'a> {
    type Reader = internal::RawCursor<'a>;
}

#[derive(Clone, Copy, Debug)]
struct ReaderOptions {
    recursion_limit: u32,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        ReaderOptions {
            recursion_limit: DEFAULT_RECURSION_LIMIT,
        }
    }
}

/// A builder used to construct [`CodedReader`](struct.CodedReader.html) instances
#[derive(Clone, Debug, Default)]
pub struct Builder {
    options: ReaderOptions,
}

impl Builder {
    /// Creates a new builder with the default configuration
    #[inline]
    pub fn new() -> Self {
        Default::default()
    }
    /// Sets the limit on nested message and group recursion
    #[inline]
    pub fn recursion_limit(mut self, limit: u32) -> Self {
        self.options.recursion_limit = limit;
        self
    }
    /// Constructs a [`CodedReader`](struct.CodedReader.html) using this builder and
    /// the specified slice of bytes
    #[inline]
    pub fn with_slice<'a>(&self, inner: &'a [u8]) -> CodedReader<Slice<'a>> {
        CodedReader {
            inner: internal::SliceCursor::new(inner),
            last_tag: None,
            recursion_depth: 0,
            options: self.options,
        }
    }
    /// Constructs a [`CodedReader`](struct.CodedReader.html) using this builder and
    /// the specified raw memory region. Reads elide per-byte bounds checks.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads of `len` bytes for the reader's lifetime.
    #[inline]
    pub unsafe fn with_raw_parts<'a>(&self, ptr: *const u8, len: usize) -> CodedReader<Raw<'a>> {
        CodedReader {
            inner: internal::RawCursor::new(ptr, len),
            last_tag: None,
            recursion_depth: 0,
            options: self.options,
        }
    }
}

/// An opaque token representing the limit in place before a
/// [`push_limit`](struct.CodedReader.html#method.push_limit) call.
#[must_use = "the previous limit must be returned with pop_limit"]
#[derive(Debug)]
pub struct PrevLimit(usize);

/// An opaque snapshot of a reader's position, used to rewind lookahead passes.
#[derive(Clone, Copy)]
pub(crate) struct Mark {
    pos: usize,
    last_tag: Option<Tag>,
}

/// A reader used by generated code to quickly parse field values without tag
/// wire type and field number checking.
///
/// This structure defers tag checking, making it faster to read fields when matching
/// on an existing field tag value.
pub struct FieldReader<'a, T: Input + 'a> {
    inner: &'a mut CodedReader<T>,
    tag: u32,
}

impl<'a, T: Input + 'a> FieldReader<'a, T> {
    /// The unvalidated tag value read from the input
    #[inline]
    pub fn tag(&self) -> u32 {
        self.tag
    }
    /// Reads the field's value, trusting the caller's statically matched tag
    #[inline]
    pub fn read_value<F: FnOnce(&'a mut CodedReader<T>) -> Result<()>>(self, tag: Tag, f: F) -> Result<()> {
        debug_assert_eq!(self.tag, tag.get(), "provided tag does not match read tag value");
        self.inner.last_tag = Some(tag);

        f(self.inner)
    }
    /// Validates the tag value before reading the field's value
    #[inline]
    pub fn check_and_read_value<F: FnOnce(&'a mut CodedReader<T>) -> Result<()>>(self, f: F) -> Result<()> {
        let tag = Tag::try_from(self.tag).map_err(|_| Error::InvalidTag(self.tag))?;
        self.inner.last_tag = Some(tag);

        f(self.inner)
    }
}

/// A coded input reader that reads from a specified input.
///
/// Readers are reusable between messages; construction does not allocate.
pub struct CodedReader<T: Input> {
    inner: T::Reader,
    last_tag: Option<Tag>,
    recursion_depth: u32,
    options: ReaderOptions,
}

impl<'a> CodedReader<Slice<'a>> {
    /// Creates a new [`CodedReader`] over the borrowed [`slice`]
    /// in the default configuration.
    ///
    /// [`CodedReader`]: struct.CodedReader.html
    /// [`slice`]: https://doc.rust-lang.org/nightly/std/primitive.slice.html
    pub fn with_slice(inner: &'a [u8]) -> Self {
        Builder::new().with_slice(inner)
    }
}

impl<'a> CodedReader<Raw<'a>> {
    /// Creates a new [`CodedReader`] over the trusted raw memory region
    /// in the default configuration.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads of `len` bytes for the reader's lifetime.
    pub unsafe fn with_raw_parts(ptr: *const u8, len: usize) -> Self {
        Builder::new().with_raw_parts(ptr, len)
    }
}

impl<T: Input> CodedReader<T> {
    /// Gets the last tag read from the input. This is [`None`] at the start of
    /// the input and after a tag read observed the end of the current limit.
    #[inline]
    pub fn last_tag(&self) -> Option<Tag> {
        self.last_tag
    }

    /// Returns the number of bytes between the cursor and the active limit
    #[inline]
    pub fn remaining(&self) -> usize {
        self.inner.remaining()
    }

    /// Returns whether this coded reader has reached the current length limit
    #[inline]
    pub fn reached_limit(&self) -> bool {
        self.inner.reached_limit()
    }

    /// Reads a length delimited value's length from the input.
    ///
    /// # Errors
    ///
    /// If a negative length is read, this returns a [`NegativeSize`](enum.Error.html#variant.NegativeSize) error.
    #[inline]
    pub fn read_length(&mut self) -> Result<Length> {
        let value = self.inner.read_varint32()? as i32;
        Length::new(value).ok_or(Error::NegativeSize)
    }

    /// Reads a length from the input and pushes it, returning the old limit to
    /// return when the nested value has been read to completion.
    #[inline]
    pub fn read_and_push_limit(&mut self) -> Result<PrevLimit> {
        let length = self.read_length()?;
        self.push_limit(length)
    }

    /// Pushes a new limit to the reader, bounding the amount of data read from
    /// the input by the specified amount.
    ///
    /// # Errors
    ///
    /// Returns [`TruncatedMessage`](enum.Error.html#variant.TruncatedMessage)
    /// if the limit extends beyond the end of the enclosing region.
    #[inline]
    pub fn push_limit(&mut self, limit: Length) -> Result<PrevLimit> {
        self.inner.push_limit(limit.get() as usize).map(PrevLimit)
    }

    /// Returns an old limit to the reader.
    ///
    /// This should only be used after the current limit has been read to
    /// completion. Popping limits out of order can pre-emptively end the input.
    #[inline]
    pub fn pop_limit(&mut self, old: PrevLimit) {
        self.inner.pop_limit(old.0)
    }

    /// Reads a field tag from the input, returning [`None`] when the input
    /// region or the active limit ends cleanly before a tag.
    pub fn read_tag(&mut self) -> Result<Option<Tag>> {
        if self.inner.reached_limit() {
            self.last_tag = None;
            return Ok(None);
        }
        let value = self.inner.read_varint32()?;
        let tag = match Tag::try_from(value) {
            Ok(tag) => tag,
            Err(_) => {
                self.last_tag = None;
                return Err(
                    if value >> 3 != 0 {
                        Error::InvalidWireType(value)
                    } else {
                        Error::InvalidTag(value)
                    });
            }
        };
        self.last_tag = Some(tag);
        Ok(Some(tag))
    }

    /// Reads a 32-bit varint field value. This is functionally similar to [`read_varint64`](#method.read_varint64),
    /// but is optimised for 32-bit values and will discard any top bits from 64-bit values.
    #[inline]
    pub fn read_varint32(&mut self) -> Result<u32> {
        self.inner.read_varint32()
    }
    /// Reads a 64-bit varint field value.
    #[inline]
    pub fn read_varint64(&mut self) -> Result<u64> {
        self.inner.read_varint64()
    }
    /// Reads a 4-byte little endian value
    #[inline]
    pub fn read_bit32(&mut self) -> Result<u32> {
        self.inner.read_bit32()
    }
    /// Reads a 8-byte little endian value
    #[inline]
    pub fn read_bit64(&mut self) -> Result<u64> {
        self.inner.read_bit64()
    }

    /// Reads a length delimited string of bytes into a new byte string.
    pub fn read_length_delimited<B: ByteString>(&mut self) -> Result<B> {
        let length = self.read_length()?.get() as usize;
        let mut data = B::new(length);
        self.inner.read_exact(data.as_mut())?;
        Ok(data)
    }

    /// Reads a length delimited byte value into an existing buffer, reusing
    /// its capacity.
    pub fn merge_bytes(&mut self, value: &mut Vec<u8>) -> Result<()> {
        let length = self.read_length()?.get() as usize;
        let slice = self.inner.read_slice(length)?;
        value.clear();
        value.extend_from_slice(slice);
        Ok(())
    }

    /// Reads a length delimited string value into an existing string, reusing
    /// its capacity.
    ///
    /// # Errors
    ///
    /// Fails with [`InvalidString`](enum.Error.html#variant.InvalidString) if
    /// the bytes aren't valid UTF8. The destination is left cleared.
    pub fn merge_string(&mut self, value: &mut String) -> Result<()> {
        let length = self.read_length()?.get() as usize;
        let slice = self.inner.read_slice(length)?;
        let string = str::from_utf8(slice)?;
        value.clear();
        value.push_str(string);
        Ok(())
    }

    /// Reads a length delimited string value into a new string.
    pub fn read_string(&mut self) -> Result<String> {
        let mut value = String::new();
        self.merge_string(&mut value)?;
        Ok(value)
    }

    /// Reads a length delimited string value as UTF-16 code units into an
    /// existing buffer, reusing its capacity.
    pub fn merge_utf16_string(&mut self, value: &mut Vec<u16>) -> Result<()> {
        let length = self.read_length()?.get() as usize;
        let slice = self.inner.read_slice(length)?;
        value.clear();
        utf8::decode(slice, value)?;
        Ok(())
    }

    /// Reads a length prefixed message value, merging it into the provided message.
    ///
    /// The nested merge must consume the value exactly; stopping early at a
    /// group end tag fails with [`InvalidEndTag`](enum.Error.html#variant.InvalidEndTag).
    pub fn read_message<M: CodableMessage>(&mut self, msg: &mut M) -> Result<()> {
        let old = self.read_and_push_limit()?;
        self.enter_recursion()?;
        msg.merge_from(self)?;
        if self.last_tag.is_some() {
            return Err(Error::InvalidEndTag);
        }
        self.exit_recursion();
        self.pop_limit(old);
        Ok(())
    }

    /// Reads a group value delimited by an end tag for the specified field
    /// number, merging it into the provided message.
    pub fn read_group<M: CodableMessage>(&mut self, msg: &mut M, num: FieldNumber) -> Result<()> {
        self.enter_recursion()?;
        msg.merge_from(self)?;
        match self.last_tag {
            Some(tag) if tag == Tag::new(num, WireType::EndGroup) => { },
            _ => return Err(Error::InvalidEndTag),
        }
        self.exit_recursion();
        Ok(())
    }

    /// Skips the last value based on the tag read from the input. If no tag has been read, this does nothing
    pub fn skip(&mut self) -> Result<()> {
        if let Some(tag) = self.last_tag {
            match tag.wire_type() {
                WireType::Varint => { self.inner.read_varint64()?; },
                WireType::Bit64 => self.inner.skip(8)?,
                WireType::LengthDelimited => {
                    let length = self.read_length()?;
                    self.inner.skip(length.get() as usize)?;
                },
                WireType::StartGroup => {
                    self.enter_recursion()?;
                    let end_tag = Tag::new(tag.number(), WireType::EndGroup);
                    loop {
                        match self.read_tag()? {
                            Some(tag) if tag == end_tag => break,
                            Some(_) => self.skip()?,
                            None => return Err(Error::TruncatedMessage),
                        }
                    }
                    self.exit_recursion();
                },
                WireType::EndGroup => { },
                WireType::Bit32 => self.inner.skip(4)?,
            }
        }
        Ok(())
    }

    /// Reads the next field's unvalidated tag, deferring the tag check to the caller.
    #[inline]
    pub fn read_field<'b>(&'b mut self) -> Result<Option<FieldReader<'b, T>>> {
        if self.inner.reached_limit() {
            self.last_tag = None;
            return Ok(None);
        }
        let tag = self.inner.read_varint32()?;
        Ok(Some(FieldReader { inner: self, tag }))
    }

    /// Reads a new instance of the value from the input
    #[inline]
    pub fn read_value<V: Primitive + Wrapper>(&mut self) -> Result<V::Inner> {
        V::read_new(self).map(V::unwrap)
    }

    /// Merges an existing instance of a value with a value from the input
    #[inline]
    pub fn merge_value<V: Value + Wrapper>(&mut self, value: &mut V::Inner) -> Result<()> {
        V::wrap_mut(value).merge_from(self)
    }

    /// Adds values from the input to the repeated value
    #[inline]
    pub fn add_entries_to<U: RepeatedValue<V>, V>(&mut self, value: &mut U) -> Result<()> {
        value.add_entries_from(self)
    }

    #[inline]
    fn enter_recursion(&mut self) -> Result<()> {
        if self.recursion_depth >= self.options.recursion_limit {
            return Err(Error::RecursionLimitExceeded);
        }
        self.recursion_depth += 1;
        Ok(())
    }

    #[inline]
    fn exit_recursion(&mut self) {
        debug_assert!(self.recursion_depth != 0);
        self.recursion_depth -= 1;
    }

    /// Snapshots the cursor for a lookahead pass.
    #[inline]
    pub(crate) fn mark(&self) -> Mark {
        Mark {
            pos: self.inner.pos(),
            last_tag: self.last_tag,
        }
    }

    /// Rewinds the cursor to a snapshot taken under the same limit.
    #[inline]
    pub(crate) fn rewind(&mut self, mark: Mark) {
        self.inner.seek(mark.pos);
        self.last_tag = mark.last_tag;
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;
    use crate::io::{CodedReader, FieldNumber, Length, Tag, WireType, read::{Builder, Error}};

    // every check runs against both the bounds checked and the raw cursor;
    // the implementations must be indistinguishable
    macro_rules! check_both {
        ($bytes:expr, |$reader:ident| $body:block) => {{
            let bytes: &[u8] = $bytes;
            {
                let mut reader = CodedReader::with_slice(bytes);
                let $reader = &mut reader;
                $body
            }
            {
                let mut reader = unsafe { CodedReader::with_raw_parts(bytes.as_ptr(), bytes.len()) };
                let $reader = &mut reader;
                $body
            }
        }};
    }

    #[test]
    fn varint32_decode() {
        fn try_decode(bytes: &[u8], expected: u32) {
            check_both!(bytes, |reader| {
                assert_eq!(reader.read_varint32().unwrap(), expected);
            });
        }

        try_decode(&[0x00], 0);
        try_decode(&[0x7F], 127);
        try_decode(&[0xFF, 0x7F], 16_383);
        try_decode(&[0xFF, 0xFF, 0x7F], 2_097_151);
        try_decode(&[0xFF, 0xFF, 0xFF, 0x7F], 268_435_455);
        try_decode(&[0xFF, 0xFF, 0xFF, 0xFF, 0x0F], u32::max_value());
        // the top 32 bits of a 10-byte varint are discarded
        try_decode(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01], u32::max_value());
    }

    #[test]
    fn varint64_decode() {
        fn try_decode(bytes: &[u8], expected: u64) {
            check_both!(bytes, |reader| {
                assert_eq!(reader.read_varint64().unwrap(), expected);
            });
        }

        try_decode(&[0x00], 0);
        try_decode(&[0x7F], 127);
        try_decode(&[0xFF, 0x7F], 16_383);
        try_decode(&[0xFF, 0xFF, 0x7F], 2_097_151);
        try_decode(&[0xFF, 0xFF, 0xFF, 0x7F], 268_435_455);
        try_decode(&[0xFF, 0xFF, 0xFF, 0xFF, 0x0F], u32::max_value() as u64);
        try_decode(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01], u64::max_value());
    }

    #[test]
    fn malformed_varint() {
        let data = [0x80u8; 11];
        check_both!(&data, |reader| {
            assert_matches!(reader.read_varint32(), Err(Error::MalformedVarint));
        });
        check_both!(&data, |reader| {
            assert_matches!(reader.read_varint64(), Err(Error::MalformedVarint));
        });
    }

    #[test]
    fn truncated_varint() {
        // a continuation bit with no following byte
        check_both!(&[0x80], |reader| {
            assert_matches!(reader.read_varint32(), Err(Error::TruncatedMessage));
        });
    }

    #[test]
    fn tag_decode() {
        // decoding a tag should read it and set the last tag
        let expected_tag = Tag::new(FieldNumber::new(1).unwrap(), WireType::Varint);
        check_both!(&[0x08], |reader| {
            assert_matches!(reader.read_tag(), Ok(Some(tag)) if tag == expected_tag);
            assert_eq!(reader.last_tag(), Some(expected_tag));
        });
    }

    #[test]
    fn fail_tag_decode() {
        // decoding an invalid tag should return the InvalidTag error
        check_both!(&[0x00], |reader| {
            assert_matches!(reader.read_tag(), Err(Error::InvalidTag(0)));
            assert_eq!(reader.last_tag(), None);
        });
        // wire type 6 is invalid
        check_both!(&[0x0E], |reader| {
            assert_matches!(reader.read_tag(), Err(Error::InvalidWireType(14)));
            assert_eq!(reader.last_tag(), None);
        });
    }

    #[test]
    fn none_tag_marks_eof() {
        check_both!(&[], |reader| {
            assert_matches!(reader.read_tag(), Ok(None));
            assert_eq!(reader.last_tag(), None);
        });
    }

    #[test]
    fn push_pop_limits() {
        check_both!(&[0x00], |reader| {
            let len = reader.read_length().unwrap();
            assert_eq!(len.get(), 0);

            let old = reader.push_limit(len).unwrap();
            assert!(reader.reached_limit());

            reader.pop_limit(old);
        });
    }

    #[test]
    fn nested_limits() {
        check_both!(&[0x01, 0x00], |reader| {
            let len = reader.read_length().unwrap();
            assert_eq!(len.get(), 1);

            let old = reader.push_limit(len).unwrap();
            assert!(!reader.reached_limit());

            let nested_len = reader.read_length().unwrap();
            assert_eq!(nested_len.get(), 0);

            let nested_old = reader.push_limit(nested_len).unwrap();
            assert!(reader.reached_limit());

            reader.pop_limit(nested_old);

            assert!(reader.reached_limit());

            reader.pop_limit(old);
        });
    }

    #[test]
    fn limit_past_region_fails() {
        check_both!(&[0x05, 0x00], |reader| {
            let len = reader.read_length().unwrap();
            assert_matches!(reader.push_limit(len), Err(Error::TruncatedMessage));
        });
    }

    #[test]
    fn limit_bounds_tag_reads() {
        // a field inside the limit, another one past it
        check_both!(&[0x08, 0x01, 0x10, 0x02], |reader| {
            let old = reader.push_limit(Length::new(2).unwrap()).unwrap();

            assert_matches!(reader.read_tag(), Ok(Some(_)));
            assert_eq!(reader.read_varint32().unwrap(), 1);
            assert_matches!(reader.read_tag(), Ok(None));

            reader.pop_limit(old);
            assert_matches!(reader.read_tag(), Ok(Some(_)));
            assert_eq!(reader.read_varint32().unwrap(), 2);
        });
    }

    #[test]
    fn decode_bit32() {
        check_both!(&[123, 0, 0, 0], |reader| {
            assert_eq!(reader.read_bit32().unwrap(), 123);
        });
        check_both!(&[0x78, 0x56, 0x34, 0x12], |reader| {
            assert_eq!(reader.read_bit32().unwrap(), 0x12345678);
        });
    }

    #[test]
    fn decode_bit64() {
        check_both!(&[123, 0, 0, 0, 0, 0, 0, 0], |reader| {
            assert_eq!(reader.read_bit64().unwrap(), 123);
        });
    }

    #[test]
    fn truncated_fixed_reads() {
        check_both!(&[1, 2, 3], |reader| {
            assert_matches!(reader.read_bit32(), Err(Error::TruncatedMessage));
        });
        check_both!(&[1, 2, 3, 4, 5, 6, 7], |reader| {
            assert_matches!(reader.read_bit64(), Err(Error::TruncatedMessage));
        });
    }

    #[test]
    fn length_delimited_reads() {
        let data = [0x03, b'a', b'b', b'c'];
        check_both!(&data, |reader| {
            let bytes: alloc::vec::Vec<u8> = reader.read_length_delimited().unwrap();
            assert_eq!(bytes, b"abc");
        });
        check_both!(&data, |reader| {
            let mut value = alloc::string::String::with_capacity(8);
            let ptr = value.as_ptr();
            reader.merge_string(&mut value).unwrap();
            assert_eq!(value, "abc");
            // merging into spare capacity shouldn't reallocate
            assert_eq!(value.as_ptr(), ptr);
        });
    }

    #[test]
    fn invalid_string_fails() {
        check_both!(&[0x02, 0xC0, 0x80], |reader| {
            assert_matches!(reader.read_string(), Err(Error::InvalidString(_)));
        });
    }

    #[test]
    fn skip_values() {
        // varint, bit64, delimited, bit32
        let data = [0x08, 0xAC, 0x02, 0x11, 1, 2, 3, 4, 5, 6, 7, 8, 0x1A, 0x01, 0xFF, 0x25, 1, 2, 3, 4];
        check_both!(&data, |reader| {
            while let Some(_) = reader.read_tag().unwrap() {
                reader.skip().unwrap();
            }
            assert_eq!(reader.remaining(), 0);
        });
    }

    #[test]
    fn skip_group() {
        // field 1 start group, field 2 varint inside, field 1 end group
        let data = [0x0B, 0x10, 0x01, 0x0C];
        check_both!(&data, |reader| {
            assert_matches!(reader.read_tag(), Ok(Some(_)));
            reader.skip().unwrap();
            assert_matches!(reader.read_tag(), Ok(None));
        });
    }

    #[test]
    fn skip_group_missing_end_fails() {
        let data = [0x0B, 0x10, 0x01];
        check_both!(&data, |reader| {
            assert_matches!(reader.read_tag(), Ok(Some(_)));
            assert_matches!(reader.skip(), Err(Error::TruncatedMessage));
        });
    }

    #[test]
    fn tag_then_value_scenario() {
        // field 1 varint with value 300
        check_both!(&[0x08, 0xAC, 0x02], |reader| {
            let tag = reader.read_tag().unwrap().unwrap();
            assert_eq!(tag.get(), 0x08);
            assert_eq!(reader.read_varint32().unwrap(), 300);
            assert_matches!(reader.read_tag(), Ok(None));
        });
    }

    #[test]
    fn mark_rewind_replays_reads() {
        check_both!(&[0x08, 0xAC, 0x02], |reader| {
            let mark = reader.mark();
            assert_matches!(reader.read_tag(), Ok(Some(_)));
            assert_eq!(reader.read_varint32().unwrap(), 300);

            reader.rewind(mark);
            assert_matches!(reader.read_tag(), Ok(Some(_)));
            assert_eq!(reader.read_varint32().unwrap(), 300);
        });
    }

    #[test]
    fn configured_recursion_limit() {
        let reader = Builder::new().recursion_limit(8).with_slice(&[]);
        drop(reader);
    }
}
