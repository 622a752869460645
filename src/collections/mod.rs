//! Defines the growable collection types generated code parses repeated
//! fields into.
//!
//! There are two families. The primitive family ([`RepeatedField`]) is a flat
//! array of values copied in and out by value. The reference-slot family
//! ([`RepeatedSlots`], [`RepeatedMessage`]) holds pre-allocated reusable
//! elements: clearing the container resets slot contents in place and keeps
//! the slot allocations, so repeated parse/clear cycles don't reallocate
//! per element. A slot's identity is stable across `clear`; only its content
//! changes.
//!
//! [`RepeatedField`]: struct.RepeatedField.html
//! [`RepeatedSlots`]: struct.RepeatedSlots.html
//! [`RepeatedMessage`]: struct.RepeatedMessage.html

use alloc::string::String;
use alloc::vec::Vec;
use core::convert::TryInto;
use core::fmt::{self, Debug, Formatter};
use core::hash::Hash;
use core::ops::Index;
use core::slice;
use crate::{internal::Sealed, LiteMessage, Mergable};
use crate::io::{self, read, write, CodedReader, CodedWriter, FieldNumber, Input, Length, LengthBuilder, Output, Tag, WireType};
use crate::raw::{self, Packable, Packed, Primitive, Value};
use trapper::Wrapper;

/// A type of value that writes and reads repeated values on the wire, a common trait unifying repeated and map fields.
pub trait RepeatedValue<V>: Sealed {
    /// Gets the wire type of tags in this field.
    const WIRE_TYPE: WireType;

    /// Adds entries to the repeated field from the coded reader.
    fn add_entries_from<T: Input>(&mut self, input: &mut CodedReader<T>) -> read::Result<()>;
    /// Calculates the size of the repeated value.
    fn calculate_size(&self, builder: LengthBuilder, num: FieldNumber) -> Option<LengthBuilder>;
    /// Writes the value to the coded writer. This takes a field number to build the tag required for each field.
    fn write_to<T: Output>(&self, output: &mut CodedWriter<T>, num: FieldNumber) -> write::Result;
    /// Returns a bool indicating whether all the values in the field are initialized
    fn is_initialized(&self) -> bool;
}

/// The growable array used for repeated fields of primitive values.
///
/// Elements are copied by value; `clear` resets the length and retains the
/// backing capacity.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RepeatedField<T> {
    values: Vec<T>,
}

impl<T> RepeatedField<T> {
    /// Creates an empty field. This does not allocate.
    #[inline]
    pub const fn new() -> Self {
        RepeatedField { values: Vec::new() }
    }

    /// Creates an empty field with the specified capacity
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        RepeatedField { values: Vec::with_capacity(capacity) }
    }

    /// Returns the number of live elements
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns whether the field holds no elements
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the field's capacity. Content past the length is stale and
    /// never observed.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.values.capacity()
    }

    /// Ensures there is spare capacity for at least `additional` more elements
    #[inline]
    pub fn reserve(&mut self, additional: usize) {
        self.values.reserve(additional);
    }

    /// Appends a value, growing amortized if the capacity is exhausted
    #[inline]
    pub fn push(&mut self, value: T) {
        self.values.push(value);
    }

    /// Resets the length to zero, retaining capacity
    #[inline]
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Resets the length to zero without touching element storage. For
    /// primitive elements this is the same as [`clear`](#method.clear).
    #[inline]
    pub fn clear_quick(&mut self) {
        self.values.clear();
    }

    /// Returns the live elements as a slice
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.values
    }

    /// Returns the live elements as a mutable slice
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.values
    }

    /// Returns the element at `index` if it's within the length
    #[inline]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.values.get(index)
    }

    /// Iterates the live elements
    #[inline]
    pub fn iter(&self) -> slice::Iter<T> {
        self.values.iter()
    }

    /// Appends every value in the slice
    #[inline]
    pub fn extend_from_slice(&mut self, values: &[T])
    where
        T: Clone,
    {
        self.values.extend_from_slice(values);
    }

    /// Replaces this field's elements with copies of another field's,
    /// growing to fit and reusing the existing allocation
    pub fn copy_from(&mut self, other: &Self)
    where
        T: Clone,
    {
        self.values.clone_from(&other.values);
    }

    fn values_size<V>(&self) -> Option<Length>
    where
        V: Value + Wrapper<Inner = T>,
    {
        if let Some(size) = V::FIXED_SIZE {
            let len: i32 = self.len().try_into().ok()?;
            let total =
                if cfg!(feature = "checked_size") {
                    len.checked_mul(size.get())?
                } else {
                    len * size.get()
                };
            Length::new(total)
        } else {
            let mut builder = LengthBuilder::new();
            for value in self {
                builder = builder.add_value::<V>(value)?;
            }
            Some(builder.build())
        }
    }

    /// Reads entries from the wire, accepting either the packed or the
    /// expanded encoding regardless of the field's declared packedness.
    fn add_from_wire<V, U>(&mut self, input: &mut CodedReader<U>) -> read::Result<()>
    where
        V: Primitive + Wrapper<Inner = T>,
        U: Input,
    {
        match input.last_tag() {
            Some(tag) if V::WIRE_TYPE.is_packable() && tag.wire_type() == WireType::LengthDelimited => {
                self.add_packed::<V, U>(input)
            },
            Some(tag) => self.add_run::<V, U>(input, tag),
            None => input.read_value::<V>().map(|v| self.push(v)),
        }
    }

    /// Reads one packed block. The element count isn't on the wire, so fixed
    /// width elements are presized from the block length and varint elements
    /// fall back to a one-time count-and-rewind pass when spare capacity
    /// runs out.
    fn add_packed<V, U>(&mut self, input: &mut CodedReader<U>) -> read::Result<()>
    where
        V: Primitive + Wrapper<Inner = T>,
        U: Input,
    {
        let old = input.read_and_push_limit()?;
        if let Some(size) = V::FIXED_SIZE {
            self.reserve(input.remaining() / size.get() as usize);
            while !input.reached_limit() {
                self.values.push(input.read_value::<V>()?);
            }
        } else {
            while !input.reached_limit() {
                if self.values.len() == self.values.capacity() {
                    let mark = input.mark();
                    let mut count = 0;
                    while !input.reached_limit() {
                        input.read_varint64()?;
                        count += 1;
                    }
                    input.rewind(mark);
                    self.reserve(count);
                }
                self.values.push(input.read_value::<V>()?);
            }
        }
        input.pop_limit(old);
        Ok(())
    }

    /// Reads a run of back-to-back fields with the same tag. The run is
    /// scanned once to presize the storage, then decoded for real.
    fn add_run<V, U>(&mut self, input: &mut CodedReader<U>, tag: Tag) -> read::Result<()>
    where
        V: Primitive + Wrapper<Inner = T>,
        U: Input,
    {
        let start = input.mark();
        let mut count = 1usize;
        if input.skip().is_ok() {
            loop {
                match input.read_tag() {
                    Ok(Some(next)) if next == tag => {
                        if input.skip().is_err() {
                            break;
                        }
                        count += 1;
                    },
                    // run ended, hit the limit, or a later error the real
                    // pass will surface
                    _ => break,
                }
            }
        }
        input.rewind(start);

        self.reserve(count);
        // the first entry's tag was consumed by the caller's dispatch
        self.values.push(input.read_value::<V>()?);
        for _ in 1..count {
            input.read_tag()?;
            self.values.push(input.read_value::<V>()?);
        }
        Ok(())
    }
}

impl<T> Index<usize> for RepeatedField<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.values[index]
    }
}

impl<'a, T> IntoIterator for &'a RepeatedField<T> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

impl<T> Sealed for RepeatedField<T> { }

impl<V: Primitive + Wrapper> RepeatedValue<V> for RepeatedField<V::Inner> {
    const WIRE_TYPE: WireType = V::WIRE_TYPE;

    #[inline]
    fn add_entries_from<T: Input>(&mut self, input: &mut CodedReader<T>) -> read::Result<()> {
        self.add_from_wire::<V, T>(input)
    }
    #[inline]
    fn calculate_size(&self, builder: LengthBuilder, num: FieldNumber) -> Option<LengthBuilder> {
        if self.is_empty() {
            return Some(builder);
        }

        let len: i32 = self.len().try_into().ok()?;

        let tag = Tag::new(num, V::WIRE_TYPE);
        let tag_len = io::raw_varint32_size(tag.get());
        let tags_len =
            if cfg!(feature = "checked_size") {
                tag_len.get().checked_mul(len)?
            } else {
                tag_len.get() * len
            };
        let mut builder = builder.add_bytes(Length::new(tags_len)?)?;
        // groups repeat the tag length again for their end tags
        if V::WIRE_TYPE as u8 == WireType::StartGroup as u8 {
            builder = builder.add_bytes(Length::new(tags_len)?)?;
        }
        builder.add_bytes(self.values_size::<V>()?)
    }
    #[inline]
    fn write_to<T: Output>(&self, output: &mut CodedWriter<T>, num: FieldNumber) -> write::Result {
        for value in self {
            output.write_field::<V>(num, value)?;
        }
        Ok(())
    }
    fn is_initialized(&self) -> bool {
        true
    }
}

impl<V: Packable + Wrapper> RepeatedValue<Packed<V>> for RepeatedField<V::Inner> {
    const WIRE_TYPE: WireType = WireType::LengthDelimited;

    #[inline]
    fn add_entries_from<T: Input>(&mut self, input: &mut CodedReader<T>) -> read::Result<()> {
        self.add_from_wire::<V, T>(input)
    }
    #[inline]
    fn calculate_size(&self, builder: LengthBuilder, num: FieldNumber) -> Option<LengthBuilder> {
        if self.is_empty() {
            return Some(builder);
        }

        let payload = self.values_size::<V>()?;
        builder
            .add_tag(Tag::new(num, WireType::LengthDelimited))?
            .add_delimited(payload)
    }
    #[inline]
    fn write_to<T: Output>(&self, output: &mut CodedWriter<T>, num: FieldNumber) -> write::Result {
        if self.is_empty() {
            return Ok(());
        }

        let payload = self.values_size::<V>().ok_or(write::Error::ValueTooLarge)?;
        output.write_tag(Tag::new(num, WireType::LengthDelimited))?;
        output.write_length(payload)?;
        for value in self {
            output.write_value::<V>(value)?;
        }
        Ok(())
    }
    fn is_initialized(&self) -> bool {
        true
    }
}

impl<T: Clone> Mergable for RepeatedField<T> {
    /// Merges two repeated fields by extending this field with the elements of the other
    fn merge(&mut self, other: &Self) {
        self.values.extend(other.values.iter().cloned())
    }
}

/// A reusable element of a reference-slot container.
///
/// Slots are constructed once when the container grows and reset in place on
/// reuse; their backing allocations survive `clear`.
pub trait Slot: Default {
    /// Resets the slot to its default content, retaining allocations
    fn clear(&mut self);
    /// Resets the slot just enough that stale content can't be observed,
    /// retaining allocations. Nested retained memory is still released
    /// logically so reuse can't leak growth.
    fn clear_quick(&mut self);
    /// Replaces the slot's content with a copy of another slot's
    fn copy_from(&mut self, other: &Self);
}

impl Slot for String {
    fn clear(&mut self) {
        self.clear();
    }
    fn clear_quick(&mut self) {
        self.clear();
    }
    fn copy_from(&mut self, other: &Self) {
        self.clear();
        self.push_str(other);
    }
}

impl Slot for Vec<u8> {
    fn clear(&mut self) {
        self.clear();
    }
    fn clear_quick(&mut self) {
        self.clear();
    }
    fn copy_from(&mut self, other: &Self) {
        self.clear();
        self.extend_from_slice(other);
    }
}

/// A growable array of reusable slots for repeated string and bytes fields.
///
/// The first `len` slots hold live data; the rest are retained for reuse.
/// Equality and indexing only ever observe live slots.
pub struct RepeatedSlots<T: Slot> {
    slots: Vec<T>,
    len: usize,
}

/// A repeated string field
pub type RepeatedString = RepeatedSlots<String>;
/// A repeated bytes field
pub type RepeatedBytes = RepeatedSlots<Vec<u8>>;

impl<T: Slot> RepeatedSlots<T> {
    /// Creates an empty field. This does not allocate.
    #[inline]
    pub const fn new() -> Self {
        RepeatedSlots { slots: Vec::new(), len: 0 }
    }

    /// Returns the number of live elements
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns whether the field holds no live elements
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of allocated slots, live or pooled
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Ensures at least `additional` more elements can be added, allocating
    /// new slots only for capacity that doesn't exist yet
    pub fn reserve(&mut self, additional: usize) {
        let wanted = self.len + additional;
        if wanted > self.slots.len() {
            self.slots.reserve(wanted - self.slots.len());
            while self.slots.len() < wanted {
                self.slots.push(T::default());
            }
        }
    }

    /// Extends the live region by one slot and returns it, reusing a pooled
    /// slot when one is available. The slot's previous content was reset when
    /// the container was cleared.
    pub fn next_slot(&mut self) -> &mut T {
        if self.len == self.slots.len() {
            self.slots.push(T::default());
        }
        let slot = &mut self.slots[self.len];
        self.len += 1;
        slot
    }

    /// Appends a copy of the value into the next slot
    pub fn add(&mut self, value: &T) {
        self.next_slot().copy_from(value);
    }

    /// Resets the length to zero and clears the retained slot contents in
    /// place. Slot allocations are kept for reuse.
    pub fn clear(&mut self) {
        for slot in &mut self.slots[..self.len] {
            slot.clear();
        }
        self.len = 0;
    }

    /// Resets the length to zero with the weaker per-slot reset, for when
    /// every reused slot will be unconditionally overwritten next.
    pub fn clear_quick(&mut self) {
        for slot in &mut self.slots[..self.len] {
            slot.clear_quick();
        }
        self.len = 0;
    }

    /// Replaces this field's elements with copies of another field's,
    /// reusing existing slots
    pub fn copy_from(&mut self, other: &Self) {
        self.clear_quick();
        self.reserve(other.len());
        for value in other {
            self.next_slot().copy_from(value);
        }
    }

    /// Returns the live elements as a slice
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.slots[..self.len]
    }

    /// Returns the element at `index` if it's within the live length
    #[inline]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.as_slice().get(index)
    }

    /// Iterates the live elements
    #[inline]
    pub fn iter(&self) -> slice::Iter<T> {
        self.as_slice().iter()
    }
}

impl<T: Slot> Default for RepeatedSlots<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Slot + Clone> Clone for RepeatedSlots<T> {
    fn clone(&self) -> Self {
        RepeatedSlots {
            slots: self.as_slice().to_vec(),
            len: self.len,
        }
    }
}

impl<T: Slot + Debug> Debug for RepeatedSlots<T> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

impl<T: Slot + PartialEq> PartialEq for RepeatedSlots<T> {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<T: Slot> Index<usize> for RepeatedSlots<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.as_slice()[index]
    }
}

impl<'a, T: Slot> IntoIterator for &'a RepeatedSlots<T> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: Slot> Sealed for RepeatedSlots<T> { }

impl RepeatedValue<raw::String> for RepeatedSlots<String> {
    const WIRE_TYPE: WireType = WireType::LengthDelimited;

    fn add_entries_from<T: Input>(&mut self, input: &mut CodedReader<T>) -> read::Result<()> {
        input.merge_string(self.next_slot())
    }
    fn calculate_size(&self, builder: LengthBuilder, num: FieldNumber) -> Option<LengthBuilder> {
        let mut builder = builder;
        for value in self {
            builder = builder.add_field::<raw::String>(num, value)?;
        }
        Some(builder)
    }
    fn write_to<T: Output>(&self, output: &mut CodedWriter<T>, num: FieldNumber) -> write::Result {
        for value in self {
            output.write_field::<raw::String>(num, value)?;
        }
        Ok(())
    }
    fn is_initialized(&self) -> bool {
        true
    }
}

impl RepeatedValue<raw::Bytes<Vec<u8>>> for RepeatedSlots<Vec<u8>> {
    const WIRE_TYPE: WireType = WireType::LengthDelimited;

    fn add_entries_from<T: Input>(&mut self, input: &mut CodedReader<T>) -> read::Result<()> {
        input.merge_bytes(self.next_slot())
    }
    fn calculate_size(&self, builder: LengthBuilder, num: FieldNumber) -> Option<LengthBuilder> {
        let mut builder = builder;
        for value in self {
            builder = builder.add_field::<raw::Bytes<Vec<u8>>>(num, value)?;
        }
        Some(builder)
    }
    fn write_to<T: Output>(&self, output: &mut CodedWriter<T>, num: FieldNumber) -> write::Result {
        for value in self {
            output.write_field::<raw::Bytes<Vec<u8>>>(num, value)?;
        }
        Ok(())
    }
    fn is_initialized(&self) -> bool {
        true
    }
}

impl<T: Slot + Clone> Mergable for RepeatedSlots<T> {
    fn merge(&mut self, other: &Self) {
        self.reserve(other.len());
        for value in other {
            self.next_slot().copy_from(value);
        }
    }
}

/// A growable array of reusable message slots for repeated message fields.
///
/// Like [`RepeatedSlots`](struct.RepeatedSlots.html), cleared messages keep
/// their storage and are merged into in place on reuse.
pub struct RepeatedMessage<M> {
    slots: Vec<M>,
    len: usize,
}

impl<M: LiteMessage> RepeatedMessage<M> {
    /// Creates an empty field. This does not allocate.
    #[inline]
    pub const fn new() -> Self {
        RepeatedMessage { slots: Vec::new(), len: 0 }
    }

    /// Returns the number of live messages
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns whether the field holds no live messages
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of allocated slots, live or pooled
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Ensures at least `additional` more messages can be added, allocating
    /// new slots only for capacity that doesn't exist yet
    pub fn reserve(&mut self, additional: usize) {
        let wanted = self.len + additional;
        if wanted > self.slots.len() {
            self.slots.reserve(wanted - self.slots.len());
            while self.slots.len() < wanted {
                self.slots.push(M::new());
            }
        }
    }

    /// Extends the live region by one slot and returns it, reusing a pooled
    /// slot when one is available
    pub fn next_slot(&mut self) -> &mut M {
        if self.len == self.slots.len() {
            self.slots.push(M::new());
        }
        let slot = &mut self.slots[self.len];
        self.len += 1;
        slot
    }

    /// Appends a copy of the message into the next slot
    pub fn add(&mut self, value: &M) {
        let slot = self.next_slot();
        slot.clear();
        slot.merge(value);
    }

    /// Resets the length to zero and clears the retained messages in place
    pub fn clear(&mut self) {
        for slot in &mut self.slots[..self.len] {
            slot.clear();
        }
        self.len = 0;
    }

    /// Resets the length to zero, resetting retained messages only to the
    /// point where stale fields can't be observed
    pub fn clear_quick(&mut self) {
        for slot in &mut self.slots[..self.len] {
            slot.clear_quick();
        }
        self.len = 0;
    }

    /// Replaces this field's messages with copies of another field's,
    /// reusing existing slots
    pub fn copy_from(&mut self, other: &Self) {
        self.clear_quick();
        self.reserve(other.len());
        for value in other {
            let slot = self.next_slot();
            slot.merge(value);
        }
    }

    /// Returns the live messages as a slice
    #[inline]
    pub fn as_slice(&self) -> &[M] {
        &self.slots[..self.len]
    }

    /// Returns the message at `index` if it's within the live length
    #[inline]
    pub fn get(&self, index: usize) -> Option<&M> {
        self.as_slice().get(index)
    }

    /// Iterates the live messages
    #[inline]
    pub fn iter(&self) -> slice::Iter<M> {
        self.as_slice().iter()
    }
}

impl<M: LiteMessage> Default for RepeatedMessage<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: LiteMessage> Clone for RepeatedMessage<M> {
    fn clone(&self) -> Self {
        RepeatedMessage {
            slots: self.as_slice().to_vec(),
            len: self.len,
        }
    }
}

impl<M: LiteMessage> Debug for RepeatedMessage<M> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

impl<M: LiteMessage + PartialEq> PartialEq for RepeatedMessage<M> {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<M: LiteMessage> Index<usize> for RepeatedMessage<M> {
    type Output = M;

    fn index(&self, index: usize) -> &M {
        &self.as_slice()[index]
    }
}

impl<'a, M: LiteMessage> IntoIterator for &'a RepeatedMessage<M> {
    type Item = &'a M;
    type IntoIter = slice::Iter<'a, M>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<M> Sealed for RepeatedMessage<M> { }

impl<M: LiteMessage> RepeatedValue<raw::Message<M>> for RepeatedMessage<M> {
    const WIRE_TYPE: WireType = WireType::LengthDelimited;

    fn add_entries_from<T: Input>(&mut self, input: &mut CodedReader<T>) -> read::Result<()> {
        input.read_message(self.next_slot())
    }
    fn calculate_size(&self, builder: LengthBuilder, num: FieldNumber) -> Option<LengthBuilder> {
        let mut builder = builder;
        for value in self {
            builder = builder.add_field::<raw::Message<M>>(num, value)?;
        }
        Some(builder)
    }
    fn write_to<T: Output>(&self, output: &mut CodedWriter<T>, num: FieldNumber) -> write::Result {
        for value in self {
            output.write_field::<raw::Message<M>>(num, value)?;
        }
        Ok(())
    }
    fn is_initialized(&self) -> bool {
        self.iter().all(M::is_initialized)
    }
}

impl<M: LiteMessage> Mergable for RepeatedMessage<M> {
    fn merge(&mut self, other: &Self) {
        self.reserve(other.len());
        for value in other {
            self.add(value);
        }
    }
}

/// The type used by generated code to represent a map field.
pub type MapField<K, V> = hashbrown::HashMap<K, V>;

const KEY_FIELD: FieldNumber = unsafe { FieldNumber::new_unchecked(1) };
const VALUE_FIELD: FieldNumber = unsafe { FieldNumber::new_unchecked(2) };

impl<K, V> Sealed for MapField<K, V> { }

impl<K, V> RepeatedValue<(K, V)> for MapField<K::Inner, V::Inner>
where
    K: Primitive + Wrapper,
    K::Inner: Default + Eq + Hash,
    V: Primitive + Wrapper,
    V::Inner: Default,
{
    const WIRE_TYPE: WireType = WireType::LengthDelimited;

    fn add_entries_from<T: Input>(&mut self, input: &mut CodedReader<T>) -> read::Result<()> {
        let key_tag = Tag::new(KEY_FIELD, K::WIRE_TYPE);
        let value_tag = Tag::new(VALUE_FIELD, V::WIRE_TYPE);

        let mut key = None::<K::Inner>;
        let mut value = None::<V::Inner>;
        let old = input.read_and_push_limit()?;
        while let Some(field) = input.read_field()? {
            let tag = field.tag();
            if tag == key_tag.get() {
                field.read_value(key_tag, |input| input.read_value::<K>().map(|k| key = Some(k)))?;
            } else if tag == value_tag.get() {
                field.read_value(value_tag, |input| input.read_value::<V>().map(|v| value = Some(v)))?;
            } else {
                field.check_and_read_value(|input| input.skip())?;
            }
        }
        input.pop_limit(old);
        self.insert(key.unwrap_or_default(), value.unwrap_or_default());

        Ok(())
    }
    fn calculate_size(&self, builder: LengthBuilder, num: FieldNumber) -> Option<LengthBuilder> {
        if self.is_empty() {
            return Some(builder);
        }

        let tag = Tag::new(num, WireType::LengthDelimited);
        let mut builder = builder;
        for (key, value) in self {
            let entry_len =
                LengthBuilder::new()
                    .add_field::<K>(KEY_FIELD, key)?
                    .add_field::<V>(VALUE_FIELD, value)?
                    .build();
            builder = builder.add_tag(tag)?.add_delimited(entry_len)?;
        }
        Some(builder)
    }
    fn write_to<T: Output>(&self, output: &mut CodedWriter<T>, num: FieldNumber) -> write::Result {
        if self.is_empty() {
            return Ok(());
        }

        let tag = Tag::new(num, WireType::LengthDelimited);
        for (key, value) in self {
            let length =
                LengthBuilder::new()
                    .add_field::<K>(KEY_FIELD, key)
                    .and_then(|b| b.add_field::<V>(VALUE_FIELD, value))
                    .map(LengthBuilder::build)
                    .ok_or(write::Error::ValueTooLarge)?;
            output.write_tag(tag)?;
            output.write_length(length)?;
            output.write_field::<K>(KEY_FIELD, key)?;
            output.write_field::<V>(VALUE_FIELD, value)?;
        }

        Ok(())
    }
    fn is_initialized(&self) -> bool {
        true
    }
}

impl<K, V> Mergable for MapField<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone + Mergable,
{
    fn merge(&mut self, other: &Self) {
        for (k, v) in other {
            match self.get_mut(k) {
                Some(existing) => existing.merge(v),
                None => {
                    self.insert(k.clone(), v.clone());
                },
            }
        }
    }
}

#[cfg(test)]
mod test {
    use alloc::string::String;
    use alloc::vec::Vec;
    use crate::buffer::ByteBuffer;
    use crate::collections::{MapField, RepeatedField, RepeatedString};
    use crate::io::{CodedReader, CodedWriter, FieldNumber, Length};
    use crate::raw::{Fixed32, Packed, Uint32};

    const NUM: FieldNumber = unsafe { FieldNumber::new_unchecked(1) };

    fn encode_packed(values: &RepeatedField<u32>) -> Vec<u8> {
        let mut buf = ByteBuffer::new();
        let mut writer = CodedWriter::with_bytes(&mut buf);
        writer.write_values::<_, Packed<Uint32>>(values, NUM).unwrap();
        buf.into_vec()
    }

    #[test]
    fn packed_round_trip_with_lookahead() {
        // enough varint elements that the initial capacity is exhausted and
        // the count-and-rewind pass runs
        let mut values = RepeatedField::<u32>::new();
        for i in 0..100u32 {
            values.push(i * 31);
        }

        let bytes = encode_packed(&values);
        let size = Length::of_values::<_, Packed<Uint32>>(&values, NUM).unwrap();
        assert_eq!(size.get() as usize, bytes.len());

        let mut reader = CodedReader::with_slice(&bytes);
        let mut decoded = RepeatedField::<u32>::new();
        assert!(reader.read_tag().unwrap().is_some());
        reader.add_entries_to::<_, Packed<Uint32>>(&mut decoded).unwrap();

        assert_eq!(decoded.len(), 100);
        assert_eq!(decoded, values);
    }

    #[test]
    fn packed_fixed_width_presizes_exactly() {
        let mut values = RepeatedField::<u32>::new();
        for i in 0..50u32 {
            values.push(i);
        }

        let mut buf = ByteBuffer::new();
        let mut writer = CodedWriter::with_bytes(&mut buf);
        writer.write_values::<_, Packed<Fixed32>>(&values, NUM).unwrap();

        let bytes = buf.into_vec();
        // tag + length + 50 * 4 bytes
        assert_eq!(bytes.len(), 1 + 2 + 200);

        let mut reader = CodedReader::with_slice(&bytes);
        let mut decoded = RepeatedField::<u32>::new();
        assert!(reader.read_tag().unwrap().is_some());
        reader.add_entries_to::<_, Packed<Fixed32>>(&mut decoded).unwrap();

        assert_eq!(decoded, values);
        // the block length determined the element count up front
        assert!(decoded.capacity() >= 50);
    }

    #[test]
    fn duplicate_packed_blocks_append() {
        let mut values = RepeatedField::<u32>::new();
        for i in 0..10u32 {
            values.push(i);
        }

        let mut bytes = encode_packed(&values);
        let again = bytes.clone();
        bytes.extend_from_slice(&again);

        let mut reader = CodedReader::with_slice(&bytes);
        let mut decoded = RepeatedField::<u32>::new();
        while reader.read_tag().unwrap().is_some() {
            reader.add_entries_to::<_, Packed<Uint32>>(&mut decoded).unwrap();
        }

        assert_eq!(decoded.len(), 20);
        assert_eq!(&decoded.as_slice()[..10], values.as_slice());
        assert_eq!(&decoded.as_slice()[10..], values.as_slice());
    }

    #[test]
    fn unpacked_run_presizes_storage() {
        // five `field 1` varints back to back, then a `field 2` varint
        let bytes = [0x08, 0x01, 0x08, 0x02, 0x08, 0x03, 0x08, 0x04, 0x08, 0x05, 0x10, 0x2A];

        let mut reader = CodedReader::with_slice(&bytes);
        let mut decoded = RepeatedField::<u32>::new();
        assert!(reader.read_tag().unwrap().is_some());
        reader.add_entries_to::<_, Uint32>(&mut decoded).unwrap();

        assert_eq!(decoded.as_slice(), &[1, 2, 3, 4, 5]);
        // the whole run was read in one call; the next tag is field 2
        let next = reader.read_tag().unwrap().unwrap();
        assert_eq!(next.number().get(), 2);
        assert_eq!(reader.read_varint32().unwrap(), 42);
    }

    #[test]
    fn unpacked_reader_accepts_packed_block() {
        let mut values = RepeatedField::<u32>::new();
        values.push(300);
        values.push(0);

        let bytes = encode_packed(&values);
        let mut reader = CodedReader::with_slice(&bytes);
        let mut decoded = RepeatedField::<u32>::new();
        assert!(reader.read_tag().unwrap().is_some());
        // the field is declared expanded but the wire says packed
        reader.add_entries_to::<_, Uint32>(&mut decoded).unwrap();

        assert_eq!(decoded, values);
    }

    #[test]
    fn equality_ignores_stale_capacity() {
        let mut a = RepeatedField::<u32>::new();
        a.push(1);
        a.push(2);
        a.clear();
        a.push(7);

        let mut b = RepeatedField::<u32>::new();
        b.push(7);

        assert_eq!(a, b);
        assert!(a.capacity() >= 2);
    }

    #[test]
    fn copy_from_reuses_allocation() {
        let mut src = RepeatedField::<u32>::new();
        for i in 0..16u32 {
            src.push(i);
        }

        let mut dst = RepeatedField::<u32>::with_capacity(16);
        let cap = dst.capacity();
        dst.copy_from(&src);

        assert_eq!(dst, src);
        assert_eq!(dst.capacity(), cap);
    }

    #[test]
    fn string_slots_are_identity_stable_across_clear() {
        let mut field = RepeatedString::new();
        let values = ["first string value", "second string value", "third string value"];
        for value in &values {
            let slot = field.next_slot();
            slot.push_str(value);
        }

        let pointers: Vec<*const u8> = field.iter().map(|s| s.as_ptr()).collect();
        let capacity = field.capacity();

        field.clear();
        assert!(field.is_empty());
        assert_eq!(field.capacity(), capacity, "clear must not discard slots");

        for value in &values[..2] {
            let slot = field.next_slot();
            slot.push_str(value);
        }

        assert_eq!(field.len(), 2);
        for (i, value) in field.iter().enumerate() {
            assert_eq!(value, values[i]);
            // re-adding within the retained capacity reuses the exact slot
            // allocations instead of creating new ones
            assert_eq!(value.as_ptr(), pointers[i]);
        }
    }

    #[test]
    fn string_slots_round_trip() {
        let mut field = RepeatedString::new();
        field.add(&String::from("alpha"));
        field.add(&String::from("beta"));

        let mut buf = ByteBuffer::new();
        let mut writer = CodedWriter::with_bytes(&mut buf);
        writer.write_values::<_, crate::raw::String>(&field, NUM).unwrap();

        let bytes = buf.into_vec();
        let size = Length::of_values::<_, crate::raw::String>(&field, NUM).unwrap();
        assert_eq!(size.get() as usize, bytes.len());

        let mut reader = CodedReader::with_slice(&bytes);
        let mut decoded = RepeatedString::new();
        while reader.read_tag().unwrap().is_some() {
            reader.add_entries_to::<_, crate::raw::String>(&mut decoded).unwrap();
        }

        assert_eq!(decoded, field);
    }

    #[test]
    fn map_round_trip() {
        let mut map = MapField::<u32, String>::default();
        map.insert(1, String::from("one"));
        map.insert(2, String::from("two"));

        let mut buf = ByteBuffer::new();
        let mut writer = CodedWriter::with_bytes(&mut buf);
        writer.write_values::<_, (Uint32, crate::raw::String)>(&map, NUM).unwrap();

        let bytes = buf.into_vec();
        let size = Length::of_values::<_, (Uint32, crate::raw::String)>(&map, NUM).unwrap();
        assert_eq!(size.get() as usize, bytes.len());

        let mut reader = CodedReader::with_slice(&bytes);
        let mut decoded = MapField::<u32, String>::default();
        while reader.read_tag().unwrap().is_some() {
            reader.add_entries_to::<_, (Uint32, crate::raw::String)>(&mut decoded).unwrap();
        }

        assert_eq!(decoded, map);
    }
}
