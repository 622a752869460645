//! A fast, low-allocation protobuf wire format codec runtime.
//!
//! This crate is the runtime half of a schema-driven message system: generated
//! message types call into the coded readers and writers in [`io`], store
//! their repeated fields in the growable containers in [`collections`], and
//! track field presence with [`HasBits`]. The [`raw`] module maps each wire
//! encoding to a transparent value type, and [`utf8`] transcodes string
//! payloads that arrive as UTF-16 code units.
//!
//! Readers and writers are reusable, single-threaded cursors; rebinding one to
//! a new region does not allocate.
//!
//! [`io`]: io/index.html
//! [`collections`]: collections/index.html
//! [`raw`]: raw/index.html
//! [`utf8`]: utf8/index.html
//! [`HasBits`]: struct.HasBits.html

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

extern crate alloc;

mod internal {
    pub trait Sealed { }
}

pub mod buffer;
pub mod collections;
pub mod io;
pub mod raw;
pub mod utf8;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Debug;
use core::hash::Hash;
use crate::io::{read, write, CodedReader, CodedWriter, Input, LengthBuilder, Output};

/// A message value that can merge from an input, calculate its size, write to
/// an output, and report its initialization state.
///
/// A merge loop reads tags until the input reports the end of the message. If
/// the message is being read as a group, encountering the group's end tag must
/// end the loop without consuming further fields; the reader validates the end
/// tag afterwards.
pub trait CodableMessage {
    /// Merges this message with data from the specified [`CodedReader`](io/read/struct.CodedReader.html)
    fn merge_from<T: Input>(&mut self, input: &mut CodedReader<T>) -> read::Result<()>;
    /// Adds the size of the data in the message to the [`LengthBuilder`](io/struct.LengthBuilder.html)
    fn calculate_size(&self, builder: LengthBuilder) -> Option<LengthBuilder>;
    /// Writes this message's data to the specified [`CodedWriter`](io/write/struct.CodedWriter.html)
    fn write_to<T: Output>(&self, output: &mut CodedWriter<T>) -> write::Result;
    /// Returns if the message value is initialized
    fn is_initialized(&self) -> bool;
}

impl<M: CodableMessage> CodableMessage for Box<M> {
    fn merge_from<T: Input>(&mut self, input: &mut CodedReader<T>) -> read::Result<()> {
        (**self).merge_from(input)
    }
    fn calculate_size(&self, builder: LengthBuilder) -> Option<LengthBuilder> {
        (**self).calculate_size(builder)
    }
    fn write_to<T: Output>(&self, output: &mut CodedWriter<T>) -> write::Result {
        (**self).write_to(output)
    }
    fn is_initialized(&self) -> bool {
        (**self).is_initialized()
    }
}

/// A LITE message.
pub trait LiteMessage: CodableMessage + Clone + Default + Debug {
    /// Resets every field to its default value, releasing nothing that can be
    /// reused. A cleared message is indistinguishable from a new one.
    fn clear(&mut self);

    /// Resets the message only to the point where stale field content can't
    /// be observed, without restoring field storage to default values. Used
    /// by containers whose slots will be unconditionally overwritten next.
    fn clear_quick(&mut self) {
        self.clear();
    }

    /// Merges another instance of this message into this one
    fn merge(&mut self, other: &Self);

    /// Creates a new instance of the message
    fn new() -> Self {
        Self::default()
    }
    /// Reads a new instance of the message from a [`CodedReader`](io/read/struct.CodedReader.html)
    fn new_from<T: Input>(input: &mut CodedReader<T>) -> read::Result<Self> {
        let mut instance = Self::new();
        instance.merge_from(input)?;
        Ok(instance)
    }
}

impl<M: LiteMessage> LiteMessage for Box<M> {
    fn clear(&mut self) {
        (**self).clear()
    }
    fn clear_quick(&mut self) {
        (**self).clear_quick()
    }
    fn merge(&mut self, other: &Self) {
        (**self).merge(other)
    }
}

/// A marker trait used to mark enum types in generated code.
/// This defines all the main traits the enum types implement,
/// allowing code to refer to them easily.
pub trait Enum: From<i32> + Into<i32> + Clone + Copy + Debug + Hash { }

/// A value that can merge content from another instance of itself.
pub trait Mergable {
    /// Merges another value into this one
    fn merge(&mut self, other: &Self);
}

macro_rules! replace_merge {
    ($($t:ty),*) => {
        $(
            impl Mergable for $t {
                fn merge(&mut self, other: &Self) {
                    *self = other.clone();
                }
            }
        )*
    };
}

replace_merge!(i32, i64, u32, u64, f32, f64, bool, String, Vec<u8>);

/// A packed set of field presence flags, 32 flags per word, indexed by field
/// declaration order.
///
/// A field's serialized bytes are only valid while its has-bit is set;
/// clearing every has-bit makes the owning message semantically empty without
/// rewriting its field storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HasBits<const W: usize> {
    words: [u32; W],
}

impl<const W: usize> HasBits<W> {
    /// Creates a set with no bits set
    #[inline]
    pub const fn new() -> Self {
        HasBits { words: [0; W] }
    }

    /// Returns whether the flag at `index` is set
    #[inline]
    pub fn get(&self, index: usize) -> bool {
        self.words[index >> 5] & (1 << (index & 31)) != 0
    }

    /// Sets the flag at `index`
    #[inline]
    pub fn set(&mut self, index: usize) {
        self.words[index >> 5] |= 1 << (index & 31);
    }

    /// Clears the flag at `index`
    #[inline]
    pub fn clear(&mut self, index: usize) {
        self.words[index >> 5] &= !(1 << (index & 31));
    }

    /// Clears every flag
    #[inline]
    pub fn clear_all(&mut self) {
        self.words = [0; W];
    }

    /// Returns whether no flag is set
    #[inline]
    pub fn is_empty(&self) -> bool {
        let mut i = 0;
        while i < W {
            if self.words[i] != 0 {
                return false;
            }
            i += 1;
        }
        true
    }
}

impl<const W: usize> Default for HasBits<W> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use alloc::boxed::Box;
    use alloc::string::String;
    use alloc::vec::Vec;
    use assert_matches::assert_matches;
    use crate::{CodableMessage, HasBits, LiteMessage};
    use crate::buffer::ByteBuffer;
    use crate::collections::RepeatedField;
    use crate::io::{read, write, CodedReader, CodedWriter, FieldNumber, Input, Length, LengthBuilder, Output, Tag, WireType};
    use crate::io::read::Builder;
    use crate::raw::{Bytes, Group, Int32, Message, Packed, Uint32};

    const NUMBER_FIELD: FieldNumber = unsafe { FieldNumber::new_unchecked(1) };
    const NAME_FIELD: FieldNumber = unsafe { FieldNumber::new_unchecked(2) };
    const PAYLOAD_FIELD: FieldNumber = unsafe { FieldNumber::new_unchecked(3) };
    const FLAGS_FIELD: FieldNumber = unsafe { FieldNumber::new_unchecked(4) };
    const CHILD_FIELD: FieldNumber = unsafe { FieldNumber::new_unchecked(5) };

    const NUMBER_BIT: usize = 0;
    const NAME_BIT: usize = 1;
    const PAYLOAD_BIT: usize = 2;
    const CHILD_BIT: usize = 3;

    /// A hand-written stand-in for a generated message type.
    #[derive(Clone, Debug, Default)]
    struct TestMessage {
        has: HasBits<1>,
        number: i32,
        name: String,
        payload: Vec<u8>,
        flags: RepeatedField<u32>,
        child: Option<Box<TestMessage>>,
    }

    impl TestMessage {
        fn set_number(&mut self, value: i32) {
            self.number = value;
            self.has.set(NUMBER_BIT);
        }
        fn set_name(&mut self, value: &str) {
            self.name.clear();
            self.name.push_str(value);
            self.has.set(NAME_BIT);
        }
        fn set_payload(&mut self, value: &[u8]) {
            self.payload.clear();
            self.payload.extend_from_slice(value);
            self.has.set(PAYLOAD_BIT);
        }
        fn child_mut(&mut self) -> &mut TestMessage {
            self.has.set(CHILD_BIT);
            self.child.get_or_insert_with(Default::default)
        }
    }

    impl PartialEq for TestMessage {
        fn eq(&self, other: &Self) -> bool {
            // stale content behind a cleared has-bit is not observable
            fn field_eq<T: PartialEq>(a: &TestMessage, b: &TestMessage, bit: usize, value: impl Fn(&TestMessage) -> T) -> bool {
                match (a.has.get(bit), b.has.get(bit)) {
                    (true, true) => value(a) == value(b),
                    (false, false) => true,
                    _ => false,
                }
            }

            field_eq(self, other, NUMBER_BIT, |m| m.number)
                && field_eq(self, other, NAME_BIT, |m| m.name.clone())
                && field_eq(self, other, PAYLOAD_BIT, |m| m.payload.clone())
                && self.flags == other.flags
                && field_eq(self, other, CHILD_BIT, |m| m.child.clone())
        }
    }

    impl CodableMessage for TestMessage {
        fn merge_from<T: Input>(&mut self, input: &mut CodedReader<T>) -> read::Result<()> {
            while let Some(tag) = input.read_tag()? {
                // generated merge loops switch on the raw tag value
                match tag.get() {
                    0x08 => {
                        self.number = input.read_value::<Int32>()?;
                        self.has.set(NUMBER_BIT);
                    },
                    0x12 => {
                        input.merge_string(&mut self.name)?;
                        self.has.set(NAME_BIT);
                    },
                    0x1A => {
                        input.merge_bytes(&mut self.payload)?;
                        self.has.set(PAYLOAD_BIT);
                    },
                    0x20 | 0x22 => {
                        input.add_entries_to::<_, Packed<Uint32>>(&mut self.flags)?;
                    },
                    0x2A => {
                        self.has.set(CHILD_BIT);
                        input.read_message(self.child.get_or_insert_with(Default::default))?;
                    },
                    _ if tag.wire_type() == WireType::EndGroup => return Ok(()),
                    _ => input.skip()?,
                }
            }
            Ok(())
        }
        fn calculate_size(&self, builder: LengthBuilder) -> Option<LengthBuilder> {
            let mut builder = builder;
            if self.has.get(NUMBER_BIT) {
                builder = builder.add_field::<Int32>(NUMBER_FIELD, &self.number)?;
            }
            if self.has.get(NAME_BIT) {
                builder = builder.add_field::<crate::raw::String>(NAME_FIELD, &self.name)?;
            }
            if self.has.get(PAYLOAD_BIT) {
                builder = builder.add_field::<Bytes<Vec<u8>>>(PAYLOAD_FIELD, &self.payload)?;
            }
            builder = builder.add_values::<_, Packed<Uint32>>(&self.flags, FLAGS_FIELD)?;
            if self.has.get(CHILD_BIT) {
                if let Some(child) = &self.child {
                    builder = builder.add_field::<Message<Box<TestMessage>>>(CHILD_FIELD, child)?;
                }
            }
            Some(builder)
        }
        fn write_to<T: Output>(&self, output: &mut CodedWriter<T>) -> write::Result {
            if self.has.get(NUMBER_BIT) {
                output.write_field::<Int32>(NUMBER_FIELD, &self.number)?;
            }
            if self.has.get(NAME_BIT) {
                output.write_field::<crate::raw::String>(NAME_FIELD, &self.name)?;
            }
            if self.has.get(PAYLOAD_BIT) {
                output.write_field::<Bytes<Vec<u8>>>(PAYLOAD_FIELD, &self.payload)?;
            }
            output.write_values::<_, Packed<Uint32>>(&self.flags, FLAGS_FIELD)?;
            if self.has.get(CHILD_BIT) {
                if let Some(child) = &self.child {
                    output.write_field::<Message<Box<TestMessage>>>(CHILD_FIELD, child)?;
                }
            }
            Ok(())
        }
        fn is_initialized(&self) -> bool {
            true
        }
    }

    impl LiteMessage for TestMessage {
        fn clear(&mut self) {
            self.has.clear_all();
            self.number = 0;
            self.name.clear();
            self.payload.clear();
            self.flags.clear();
            self.child = None;
        }
        fn clear_quick(&mut self) {
            self.has.clear_all();
            self.flags.clear_quick();
            if let Some(child) = &mut self.child {
                child.clear_quick();
            }
        }
        fn merge(&mut self, other: &Self) {
            if other.has.get(NUMBER_BIT) {
                self.set_number(other.number);
            }
            if other.has.get(NAME_BIT) {
                self.set_name(&other.name);
            }
            if other.has.get(PAYLOAD_BIT) {
                self.set_payload(&other.payload);
            }
            crate::Mergable::merge(&mut self.flags, &other.flags);
            if other.has.get(CHILD_BIT) {
                if let Some(child) = &other.child {
                    self.child_mut().merge(child);
                }
            }
        }
    }

    fn sample_message() -> TestMessage {
        let mut msg = TestMessage::default();
        msg.set_number(300);
        msg.set_name("repeated field");
        msg.set_payload(&[0xDE, 0xAD, 0xBE, 0xEF]);
        for i in 0..20u32 {
            msg.flags.push(i * i);
        }
        let child = msg.child_mut();
        child.set_number(-1);
        child.set_name("nested");
        msg
    }

    fn encode(msg: &TestMessage) -> Vec<u8> {
        let size = msg.calculate_size(LengthBuilder::new()).unwrap().build();

        let mut buf = ByteBuffer::new();
        let mut writer = CodedWriter::with_bytes(&mut buf);
        msg.write_to(&mut writer).unwrap();

        let bytes = buf.into_vec();
        assert_eq!(bytes.len(), size.get() as usize, "calculate_size and write_to disagree");
        bytes
    }

    fn nested_chain(depth: usize) -> TestMessage {
        let mut msg = TestMessage::default();
        msg.set_number(1);
        let mut cursor = &mut msg;
        for _ in 0..depth {
            cursor = cursor.child_mut();
            cursor.set_number(1);
        }
        msg
    }

    #[test]
    fn message_round_trip() {
        let msg = sample_message();
        let bytes = encode(&msg);

        let mut reader = CodedReader::with_slice(&bytes);
        let decoded = TestMessage::new_from(&mut reader).unwrap();
        assert_eq!(decoded, msg);

        // the raw cursor must decode the identical message
        let mut reader = unsafe { CodedReader::with_raw_parts(bytes.as_ptr(), bytes.len()) };
        let decoded_raw = TestMessage::new_from(&mut reader).unwrap();
        assert_eq!(decoded_raw, msg);
    }

    #[test]
    fn reencoding_is_canonical() {
        let bytes = encode(&sample_message());

        let mut reader = CodedReader::with_slice(&bytes);
        let decoded = TestMessage::new_from(&mut reader).unwrap();

        // a decoded message re-encodes to the identical byte sequence, as
        // many times as it's serialized
        let first = encode(&decoded);
        let second = encode(&decoded);
        assert_eq!(first, bytes);
        assert_eq!(second, bytes);
    }

    #[test]
    fn concrete_single_field_encoding() {
        let mut msg = TestMessage::default();
        msg.set_number(300);

        assert_eq!(encode(&msg), [0x08, 0xAC, 0x02]);
    }

    #[test]
    fn merge_into_reused_message_overwrites() {
        let bytes = encode(&sample_message());

        let mut msg = TestMessage::default();
        msg.set_name("stale");
        msg.clear_quick();

        let mut reader = CodedReader::with_slice(&bytes);
        msg.merge_from(&mut reader).unwrap();
        assert_eq!(msg, sample_message());
    }

    #[test]
    fn recursion_at_limit_succeeds() {
        let bytes = encode(&nested_chain(4));

        let mut reader = Builder::new().recursion_limit(4).with_slice(&bytes);
        let decoded = TestMessage::new_from(&mut reader).unwrap();
        assert_eq!(decoded, nested_chain(4));
    }

    #[test]
    fn recursion_past_limit_fails() {
        let bytes = encode(&nested_chain(5));

        let mut reader = Builder::new().recursion_limit(4).with_slice(&bytes);
        let mut decoded = TestMessage::default();
        assert_matches!(decoded.merge_from(&mut reader), Err(read::Error::RecursionLimitExceeded));
    }

    #[test]
    fn group_round_trip() {
        let num = FieldNumber::new(6).unwrap();
        let mut inner = TestMessage::default();
        inner.set_number(77);
        inner.set_name("grouped");

        let mut buf = ByteBuffer::new();
        let mut writer = CodedWriter::with_bytes(&mut buf);
        writer.write_field::<Group<TestMessage>>(num, &inner).unwrap();
        let bytes = buf.into_vec();

        let mut reader = CodedReader::with_slice(&bytes);
        let tag = reader.read_tag().unwrap().unwrap();
        assert_eq!(tag, Tag::new(num, WireType::StartGroup));

        let mut decoded = TestMessage::default();
        reader.read_group(&mut decoded, num).unwrap();
        assert_eq!(decoded, inner);
        assert_matches!(reader.read_tag(), Ok(None));
    }

    #[test]
    fn nested_message_stopping_at_group_end_fails() {
        // field 5 message whose payload is a bare end group tag
        let bytes = [0x2A, 0x01, 0x0C];

        let mut reader = CodedReader::with_slice(&bytes);
        let mut decoded = TestMessage::default();
        assert_matches!(decoded.merge_from(&mut reader), Err(read::Error::InvalidEndTag));
    }

    #[test]
    fn truncated_nested_message_fails() {
        // field 5 message claiming 5 bytes with 1 available
        let bytes = [0x2A, 0x05, 0x08];

        let mut reader = CodedReader::with_slice(&bytes);
        let mut decoded = TestMessage::default();
        assert_matches!(decoded.merge_from(&mut reader), Err(read::Error::TruncatedMessage));
    }

    #[test]
    fn unknown_fields_are_skipped() {
        // unknown varint field 9, unknown delimited field 10, then field 1
        let bytes = [0x48, 0x7F, 0x52, 0x02, 0x01, 0x02, 0x08, 0xAC, 0x02];

        let mut reader = CodedReader::with_slice(&bytes);
        let decoded = TestMessage::new_from(&mut reader).unwrap();

        let mut expected = TestMessage::default();
        expected.set_number(300);
        assert_eq!(decoded, expected);
    }

    #[test]
    fn clear_quick_empties_without_rewriting_storage() {
        let mut msg = sample_message();
        let name_ptr = msg.name.as_ptr();
        msg.clear_quick();

        // semantically empty: nothing serializes
        assert!(encode(&msg).is_empty());
        assert_eq!(msg, TestMessage::default());

        // field storage wasn't rewritten, only the has-bits dropped
        assert!(!msg.name.is_empty());
        assert_eq!(msg.name.as_ptr(), name_ptr);
    }

    #[test]
    fn message_value_size_includes_length_prefix() {
        let mut child = TestMessage::default();
        child.set_number(1);

        // payload is [0x08, 0x01], preceded by a one byte length prefix
        let len = Length::of_value::<Message<TestMessage>>(&child).unwrap();
        assert_eq!(len.get(), 3);
    }

    #[test]
    fn has_bits_across_words() {
        let mut bits = HasBits::<2>::new();
        assert!(bits.is_empty());

        bits.set(0);
        bits.set(31);
        bits.set(40);
        assert!(bits.get(0));
        assert!(bits.get(31));
        assert!(bits.get(40));
        assert!(!bits.get(1));

        bits.clear(31);
        assert!(!bits.get(31));
        assert!(bits.get(40));

        bits.clear_all();
        assert!(bits.is_empty());
    }

    #[test]
    fn merge_combines_messages() {
        let mut a = TestMessage::default();
        a.set_number(5);
        a.flags.push(1);

        let mut b = TestMessage::default();
        b.set_name("other");
        b.flags.push(2);

        a.merge(&b);
        assert_eq!(a.number, 5);
        assert_eq!(a.name, "other");
        assert_eq!(a.flags.as_slice(), &[1, 2]);
    }
}
