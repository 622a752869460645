//! Contains types for protobuf values and traits for value operations.
//!
//! Each wire encoding gets a transparent newtype over its Rust representation;
//! generated code selects the encoding by naming the newtype while working
//! with the inner value.

use crate::{internal::Sealed, CodableMessage, Enum as EnumType, LiteMessage};
use crate::io::{read, write, ByteString, CodedReader, CodedWriter, Input, Length, LengthBuilder, Output, WireType};
use crate::io::{raw_varint32_size, raw_varint64_size};
use core::convert::TryInto;
use core::marker::PhantomData;
use trapper::{newtype, Wrapper};

/// A value capable of merging itself with an input value, writing itself to an output,
/// calculating its size, and checking its initialization.
pub trait Value: Sized + Sealed {
    /// A value indicating the wire type of the value without packing.
    /// This can be used to indicate if a value is eligible for repeated field packing.
    const WIRE_TYPE: WireType;

    /// The constant encoded size of the value, if every instance encodes to
    /// the same number of bytes. Size calculations and packed presizing use
    /// this to skip per-element work.
    const FIXED_SIZE: Option<Length> = None;

    /// Calculates the size of the value as encoded on the wire
    fn calculate_size(&self, builder: LengthBuilder) -> Option<LengthBuilder>;

    /// Merges the value with the [`CodedReader`](../io/read/struct.CodedReader.html)
    fn merge_from<T: Input>(&mut self, input: &mut CodedReader<T>) -> read::Result<()>;

    /// Writes the value to the [`CodedWriter`](../io/write/struct.CodedWriter.html)
    fn write_to<T: Output>(&self, output: &mut CodedWriter<T>) -> write::Result;

    /// Returns if the value is initialized, that is, if all the required fields in the value are set.
    fn is_initialized(&self) -> bool;
}

/// A value which can be read as a new instance without external context.
pub trait Primitive: Value {
    /// Reads a new instance of the value
    fn read_new<T: Input>(input: &mut CodedReader<T>) -> read::Result<Self>;
}

/// A marker for values eligible for packed repeated encoding.
pub trait Packable: Primitive { }

/// A marker type that selects the packed encoding for a repeated value.
/// This type is never instantiated.
pub struct Packed<V>(PhantomData<V>);

/// Maps a signed value to an unsigned one, keeping small magnitudes small.
#[inline]
pub const fn zigzag_encode32(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

/// Maps a signed value to an unsigned one, keeping small magnitudes small.
#[inline]
pub const fn zigzag_encode64(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

/// The inverse of [`zigzag_encode32`](fn.zigzag_encode32.html)
#[inline]
pub const fn zigzag_decode32(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

/// The inverse of [`zigzag_encode64`](fn.zigzag_encode64.html)
#[inline]
pub const fn zigzag_decode64(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

newtype! {
    /// A varint encoded 32-bit value. Negative values are encoded as 10-byte varints.
    pub type Int32(i32);
}

impl Sealed for Int32 { }
impl Value for Int32 {
    const WIRE_TYPE: WireType = WireType::Varint;

    fn calculate_size(&self, builder: LengthBuilder) -> Option<LengthBuilder> {
        if self.0 >= 0 {
            builder.add_bytes(raw_varint32_size(self.0 as u32))
        } else {
            builder.add_bytes(unsafe { Length::new_unchecked(10) })
        }
    }
    fn merge_from<T: Input>(&mut self, input: &mut CodedReader<T>) -> read::Result<()> {
        Self::read_new(input).map(|v| *self = v)
    }
    fn write_to<T: Output>(&self, output: &mut CodedWriter<T>) -> write::Result {
        if self.0 >= 0 {
            output.write_varint32(self.0 as u32)
        } else {
            output.write_varint64(i64::from(self.0) as u64)
        }
    }
    fn is_initialized(&self) -> bool { true }
}
impl Primitive for Int32 {
    fn read_new<T: Input>(input: &mut CodedReader<T>) -> read::Result<Self> {
        input.read_varint32().map(|v| Self(v as i32))
    }
}
impl Packable for Int32 { }

newtype! {
    /// A varint encoded 32-bit value. Can be at most 5 bytes.
    pub type Uint32(u32);
}

impl Sealed for Uint32 { }
impl Value for Uint32 {
    const WIRE_TYPE: WireType = WireType::Varint;

    fn calculate_size(&self, builder: LengthBuilder) -> Option<LengthBuilder> {
        builder.add_bytes(raw_varint32_size(self.0))
    }
    fn merge_from<T: Input>(&mut self, input: &mut CodedReader<T>) -> read::Result<()> {
        Self::read_new(input).map(|v| *self = v)
    }
    fn write_to<T: Output>(&self, output: &mut CodedWriter<T>) -> write::Result {
        output.write_varint32(self.0)
    }
    fn is_initialized(&self) -> bool { true }
}
impl Primitive for Uint32 {
    fn read_new<T: Input>(input: &mut CodedReader<T>) -> read::Result<Self> {
        input.read_varint32().map(Self)
    }
}
impl Packable for Uint32 { }

newtype! {
    /// A varint encoded 64-bit value. Can be at most 10 bytes.
    pub type Int64(i64);
}

impl Sealed for Int64 { }
impl Value for Int64 {
    const WIRE_TYPE: WireType = WireType::Varint;

    fn calculate_size(&self, builder: LengthBuilder) -> Option<LengthBuilder> {
        builder.add_bytes(raw_varint64_size(self.0 as u64))
    }
    fn merge_from<T: Input>(&mut self, input: &mut CodedReader<T>) -> read::Result<()> {
        Self::read_new(input).map(|v| *self = v)
    }
    fn write_to<T: Output>(&self, output: &mut CodedWriter<T>) -> write::Result {
        output.write_varint64(self.0 as u64)
    }
    fn is_initialized(&self) -> bool { true }
}
impl Primitive for Int64 {
    fn read_new<T: Input>(input: &mut CodedReader<T>) -> read::Result<Self> {
        input.read_varint64().map(|v| Self(v as i64))
    }
}
impl Packable for Int64 { }

newtype! {
    /// A varint encoded 64-bit value. Can be at most 10 bytes.
    pub type Uint64(u64);
}

impl Sealed for Uint64 { }
impl Value for Uint64 {
    const WIRE_TYPE: WireType = WireType::Varint;

    fn calculate_size(&self, builder: LengthBuilder) -> Option<LengthBuilder> {
        builder.add_bytes(raw_varint64_size(self.0))
    }
    fn merge_from<T: Input>(&mut self, input: &mut CodedReader<T>) -> read::Result<()> {
        Self::read_new(input).map(|v| *self = v)
    }
    fn write_to<T: Output>(&self, output: &mut CodedWriter<T>) -> write::Result {
        output.write_varint64(self.0)
    }
    fn is_initialized(&self) -> bool { true }
}
impl Primitive for Uint64 {
    fn read_new<T: Input>(input: &mut CodedReader<T>) -> read::Result<Self> {
        input.read_varint64().map(Self)
    }
}
impl Packable for Uint64 { }

newtype! {
    /// A varint encoded 32-bit value. This is encoded using zig-zag encoding,
    /// which makes it more efficient at encoding negative values.
    pub type Sint32(i32);
}

impl Sealed for Sint32 { }
impl Value for Sint32 {
    const WIRE_TYPE: WireType = WireType::Varint;

    fn calculate_size(&self, builder: LengthBuilder) -> Option<LengthBuilder> {
        builder.add_bytes(raw_varint32_size(zigzag_encode32(self.0)))
    }
    fn merge_from<T: Input>(&mut self, input: &mut CodedReader<T>) -> read::Result<()> {
        Self::read_new(input).map(|v| *self = v)
    }
    fn write_to<T: Output>(&self, output: &mut CodedWriter<T>) -> write::Result {
        output.write_varint32(zigzag_encode32(self.0))
    }
    fn is_initialized(&self) -> bool { true }
}
impl Primitive for Sint32 {
    fn read_new<T: Input>(input: &mut CodedReader<T>) -> read::Result<Self> {
        input.read_varint32().map(|v| Self(zigzag_decode32(v)))
    }
}
impl Packable for Sint32 { }

newtype! {
    /// A varint encoded 64-bit value. This is encoded using zig-zag encoding,
    /// which makes it more efficient at encoding negative values.
    pub type Sint64(i64);
}

impl Sealed for Sint64 { }
impl Value for Sint64 {
    const WIRE_TYPE: WireType = WireType::Varint;

    fn calculate_size(&self, builder: LengthBuilder) -> Option<LengthBuilder> {
        builder.add_bytes(raw_varint64_size(zigzag_encode64(self.0)))
    }
    fn merge_from<T: Input>(&mut self, input: &mut CodedReader<T>) -> read::Result<()> {
        Self::read_new(input).map(|v| *self = v)
    }
    fn write_to<T: Output>(&self, output: &mut CodedWriter<T>) -> write::Result {
        output.write_varint64(zigzag_encode64(self.0))
    }
    fn is_initialized(&self) -> bool { true }
}
impl Primitive for Sint64 {
    fn read_new<T: Input>(input: &mut CodedReader<T>) -> read::Result<Self> {
        input.read_varint64().map(|v| Self(zigzag_decode64(v)))
    }
}
impl Packable for Sint64 { }

newtype! {
    /// A fixed size 32-bit value. This is encoded as 4 little endian bytes.
    pub type Fixed32(u32);
}

impl Sealed for Fixed32 { }
impl Value for Fixed32 {
    const WIRE_TYPE: WireType = WireType::Bit32;
    const FIXED_SIZE: Option<Length> = Some(unsafe { Length::new_unchecked(4) });

    fn calculate_size(&self, builder: LengthBuilder) -> Option<LengthBuilder> {
        builder.add_bytes(unsafe { Length::new_unchecked(4) })
    }
    fn merge_from<T: Input>(&mut self, input: &mut CodedReader<T>) -> read::Result<()> {
        Self::read_new(input).map(|v| *self = v)
    }
    fn write_to<T: Output>(&self, output: &mut CodedWriter<T>) -> write::Result {
        output.write_bit32(self.0)
    }
    fn is_initialized(&self) -> bool { true }
}
impl Primitive for Fixed32 {
    fn read_new<T: Input>(input: &mut CodedReader<T>) -> read::Result<Self> {
        input.read_bit32().map(Self)
    }
}
impl Packable for Fixed32 { }

newtype! {
    /// A fixed size 64-bit value. This is encoded as 8 little endian bytes.
    pub type Fixed64(u64);
}

impl Sealed for Fixed64 { }
impl Value for Fixed64 {
    const WIRE_TYPE: WireType = WireType::Bit64;
    const FIXED_SIZE: Option<Length> = Some(unsafe { Length::new_unchecked(8) });

    fn calculate_size(&self, builder: LengthBuilder) -> Option<LengthBuilder> {
        builder.add_bytes(unsafe { Length::new_unchecked(8) })
    }
    fn merge_from<T: Input>(&mut self, input: &mut CodedReader<T>) -> read::Result<()> {
        Self::read_new(input).map(|v| *self = v)
    }
    fn write_to<T: Output>(&self, output: &mut CodedWriter<T>) -> write::Result {
        output.write_bit64(self.0)
    }
    fn is_initialized(&self) -> bool { true }
}
impl Primitive for Fixed64 {
    fn read_new<T: Input>(input: &mut CodedReader<T>) -> read::Result<Self> {
        input.read_bit64().map(Self)
    }
}
impl Packable for Fixed64 { }

newtype! {
    /// A signed, fixed size 32-bit value. This is encoded as 4 little endian bytes.
    pub type Sfixed32(i32);
}

impl Sealed for Sfixed32 { }
impl Value for Sfixed32 {
    const WIRE_TYPE: WireType = WireType::Bit32;
    const FIXED_SIZE: Option<Length> = Some(unsafe { Length::new_unchecked(4) });

    fn calculate_size(&self, builder: LengthBuilder) -> Option<LengthBuilder> {
        builder.add_bytes(unsafe { Length::new_unchecked(4) })
    }
    fn merge_from<T: Input>(&mut self, input: &mut CodedReader<T>) -> read::Result<()> {
        Self::read_new(input).map(|v| *self = v)
    }
    fn write_to<T: Output>(&self, output: &mut CodedWriter<T>) -> write::Result {
        output.write_bit32(self.0 as u32)
    }
    fn is_initialized(&self) -> bool { true }
}
impl Primitive for Sfixed32 {
    fn read_new<T: Input>(input: &mut CodedReader<T>) -> read::Result<Self> {
        input.read_bit32().map(|v| Self(v as i32))
    }
}
impl Packable for Sfixed32 { }

newtype! {
    /// A signed, fixed size 64-bit value. This is encoded as 8 little endian bytes.
    pub type Sfixed64(i64);
}

impl Sealed for Sfixed64 { }
impl Value for Sfixed64 {
    const WIRE_TYPE: WireType = WireType::Bit64;
    const FIXED_SIZE: Option<Length> = Some(unsafe { Length::new_unchecked(8) });

    fn calculate_size(&self, builder: LengthBuilder) -> Option<LengthBuilder> {
        builder.add_bytes(unsafe { Length::new_unchecked(8) })
    }
    fn merge_from<T: Input>(&mut self, input: &mut CodedReader<T>) -> read::Result<()> {
        Self::read_new(input).map(|v| *self = v)
    }
    fn write_to<T: Output>(&self, output: &mut CodedWriter<T>) -> write::Result {
        output.write_bit64(self.0 as u64)
    }
    fn is_initialized(&self) -> bool { true }
}
impl Primitive for Sfixed64 {
    fn read_new<T: Input>(input: &mut CodedReader<T>) -> read::Result<Self> {
        input.read_bit64().map(|v| Self(v as i64))
    }
}
impl Packable for Sfixed64 { }

newtype! {
    /// A 32-bit floating point value. This is encoded as 4 little endian bytes.
    pub type Float(f32);
}

impl Sealed for Float { }
impl Value for Float {
    const WIRE_TYPE: WireType = WireType::Bit32;
    const FIXED_SIZE: Option<Length> = Some(unsafe { Length::new_unchecked(4) });

    fn calculate_size(&self, builder: LengthBuilder) -> Option<LengthBuilder> {
        builder.add_bytes(unsafe { Length::new_unchecked(4) })
    }
    fn merge_from<T: Input>(&mut self, input: &mut CodedReader<T>) -> read::Result<()> {
        Self::read_new(input).map(|v| *self = v)
    }
    fn write_to<T: Output>(&self, output: &mut CodedWriter<T>) -> write::Result {
        output.write_bit32(self.0.to_bits())
    }
    fn is_initialized(&self) -> bool { true }
}
impl Primitive for Float {
    fn read_new<T: Input>(input: &mut CodedReader<T>) -> read::Result<Self> {
        input.read_bit32().map(|v| Self(f32::from_bits(v)))
    }
}
impl Packable for Float { }

newtype! {
    /// A 64-bit floating point value. This is encoded as 8 little endian bytes.
    pub type Double(f64);
}

impl Sealed for Double { }
impl Value for Double {
    const WIRE_TYPE: WireType = WireType::Bit64;
    const FIXED_SIZE: Option<Length> = Some(unsafe { Length::new_unchecked(8) });

    fn calculate_size(&self, builder: LengthBuilder) -> Option<LengthBuilder> {
        builder.add_bytes(unsafe { Length::new_unchecked(8) })
    }
    fn merge_from<T: Input>(&mut self, input: &mut CodedReader<T>) -> read::Result<()> {
        Self::read_new(input).map(|v| *self = v)
    }
    fn write_to<T: Output>(&self, output: &mut CodedWriter<T>) -> write::Result {
        output.write_bit64(self.0.to_bits())
    }
    fn is_initialized(&self) -> bool { true }
}
impl Primitive for Double {
    fn read_new<T: Input>(input: &mut CodedReader<T>) -> read::Result<Self> {
        input.read_bit64().map(|v| Self(f64::from_bits(v)))
    }
}
impl Packable for Double { }

newtype! {
    /// A bool value. This is encoded as a varint value
    pub type Bool(bool);
}

impl Sealed for Bool { }
impl Value for Bool {
    const WIRE_TYPE: WireType = WireType::Varint;
    const FIXED_SIZE: Option<Length> = Some(unsafe { Length::new_unchecked(1) });

    fn calculate_size(&self, builder: LengthBuilder) -> Option<LengthBuilder> {
        builder.add_bytes(unsafe { Length::new_unchecked(1) })
    }
    fn merge_from<T: Input>(&mut self, input: &mut CodedReader<T>) -> read::Result<()> {
        Self::read_new(input).map(|v| *self = v)
    }
    fn write_to<T: Output>(&self, output: &mut CodedWriter<T>) -> write::Result {
        output.write_varint32(self.0 as u32)
    }
    fn is_initialized(&self) -> bool { true }
}
impl Primitive for Bool {
    fn read_new<T: Input>(input: &mut CodedReader<T>) -> read::Result<Self> {
        input.read_varint64().map(|v| Self(v != 0))
    }
}
impl Packable for Bool { }

newtype! {
    /// A string value. This is encoded as a length-delimited series of bytes.
    pub type String(alloc::string::String);
}

impl Sealed for String { }
impl Value for String {
    const WIRE_TYPE: WireType = WireType::LengthDelimited;

    fn calculate_size(&self, builder: LengthBuilder) -> Option<LengthBuilder> {
        let len: i32 = self.0.len().try_into().ok()?;
        builder.add_delimited(Length::new(len)?)
    }
    fn merge_from<T: Input>(&mut self, input: &mut CodedReader<T>) -> read::Result<()> {
        input.merge_string(&mut self.0)
    }
    fn write_to<T: Output>(&self, output: &mut CodedWriter<T>) -> write::Result {
        output.write_string(&self.0)
    }
    fn is_initialized(&self) -> bool { true }
}
impl Primitive for String {
    fn read_new<T: Input>(input: &mut CodedReader<T>) -> read::Result<Self> {
        input.read_string().map(Self)
    }
}

newtype! {
    /// A bytes value. This is encoded as a length-delimited series of bytes.
    pub type Bytes<T>(T);
}

impl<T> Sealed for Bytes<T> { }
impl<T: ByteString> Value for Bytes<T> {
    const WIRE_TYPE: WireType = WireType::LengthDelimited;

    fn calculate_size(&self, builder: LengthBuilder) -> Option<LengthBuilder> {
        let len: i32 = self.0.as_ref().len().try_into().ok()?;
        builder.add_delimited(Length::new(len)?)
    }
    fn merge_from<U: Input>(&mut self, input: &mut CodedReader<U>) -> read::Result<()> {
        input.read_length_delimited::<T>().map(|v| self.0 = v)
    }
    fn write_to<U: Output>(&self, output: &mut CodedWriter<U>) -> write::Result {
        output.write_length_delimited(self.0.as_ref())
    }
    fn is_initialized(&self) -> bool { true }
}
impl<T: ByteString> Primitive for Bytes<T> {
    fn read_new<U: Input>(input: &mut CodedReader<U>) -> read::Result<Self> {
        input.read_length_delimited::<T>().map(Self)
    }
}

newtype! {
    /// An enum value. This is encoded as a 32-bit varint value.
    pub type Enum<T>(T);
}

impl<T> Sealed for Enum<T> { }
impl<T: EnumType> Value for Enum<T> {
    const WIRE_TYPE: WireType = WireType::Varint;

    fn calculate_size(&self, builder: LengthBuilder) -> Option<LengthBuilder> {
        builder.add_value::<Int32>(&self.0.into())
    }
    fn merge_from<U: Input>(&mut self, input: &mut CodedReader<U>) -> read::Result<()> {
        Self::read_new(input).map(|v| *self = v)
    }
    fn write_to<U: Output>(&self, output: &mut CodedWriter<U>) -> write::Result {
        Int32(self.0.into()).write_to(output)
    }
    fn is_initialized(&self) -> bool { true }
}
impl<T: EnumType> Primitive for Enum<T> {
    fn read_new<U: Input>(input: &mut CodedReader<U>) -> read::Result<Self> {
        Int32::read_new(input).map(|v| Self(v.0.into()))
    }
}
impl<T: EnumType> Packable for Enum<T> { }

newtype! {
    /// A message value. This is encoded as a length-delimited series of bytes.
    pub type Message<T>(T);
}

impl<T> Sealed for Message<T> { }
impl<T: CodableMessage> Value for Message<T> {
    const WIRE_TYPE: WireType = WireType::LengthDelimited;

    fn calculate_size(&self, builder: LengthBuilder) -> Option<LengthBuilder> {
        let payload = self.0.calculate_size(LengthBuilder::new())?.build();
        builder.add_delimited(payload)
    }
    fn merge_from<U: Input>(&mut self, input: &mut CodedReader<U>) -> read::Result<()> {
        input.read_message(&mut self.0)
    }
    fn write_to<U: Output>(&self, output: &mut CodedWriter<U>) -> write::Result {
        let length =
            self.0.calculate_size(LengthBuilder::new())
                .ok_or(write::Error::ValueTooLarge)?
                .build();
        output.write_length(length)?;
        self.0.write_to(output)
    }
    fn is_initialized(&self) -> bool {
        self.0.is_initialized()
    }
}
impl<T: LiteMessage> Primitive for Message<T> {
    fn read_new<U: Input>(input: &mut CodedReader<U>) -> read::Result<Self> {
        let mut value = Self(T::new());
        value.merge_from(input)?;
        Ok(value)
    }
}

newtype! {
    /// A group value. This is encoded by putting a start and end tag between its encoded fields.
    pub type Group<T>(T);
}

impl<T> Sealed for Group<T> { }
impl<T: CodableMessage> Value for Group<T> {
    const WIRE_TYPE: WireType = WireType::StartGroup;

    fn calculate_size(&self, builder: LengthBuilder) -> Option<LengthBuilder> {
        self.0.calculate_size(builder)
    }
    fn merge_from<U: Input>(&mut self, input: &mut CodedReader<U>) -> read::Result<()> {
        self.0.merge_from(input)
    }
    fn write_to<U: Output>(&self, output: &mut CodedWriter<U>) -> write::Result {
        self.0.write_to(output)
    }
    fn is_initialized(&self) -> bool {
        self.0.is_initialized()
    }
}
