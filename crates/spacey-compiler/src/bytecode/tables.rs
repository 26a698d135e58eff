// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module-wide constant tables.
//!
//! All tables are append-only and content addressed: inserting an entry that
//! already exists returns its first id or offset. The lookup indexes are not
//! serialized and are rebuilt on the first insertion after a table was
//! deserialized.

use num_bigint::BigInt;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use unicode_xid::UnicodeXID;

use crate::ir::Constant;

/// Whether `s` is usable as an identifier name.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '$' || c == '_' || c.is_xid_start() => {}
        _ => return false,
    }
    chars.all(|c| c == '$' || c.is_xid_continue() || c == '\u{200c}' || c == '\u{200d}')
}

/// One string table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringEntry {
    /// Byte offset into the storage
    pub offset: u32,
    /// Byte length
    pub length: u32,
    /// Every character is ASCII
    pub ascii: bool,
    /// The string is a valid identifier name
    pub identifier: bool,
}

/// The module's strings, stored back to back.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StringTable {
    storage: String,
    entries: Vec<StringEntry>,
    #[serde(skip)]
    index: FxHashMap<String, u32>,
}

impl StringTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `s`, adding it if needed.
    pub fn insert(&mut self, s: &str) -> u32 {
        if self.index.len() != self.entries.len() {
            self.rebuild_index();
        }
        if let Some(id) = self.index.get(s) {
            return *id;
        }
        let id = self.entries.len() as u32;
        self.entries.push(StringEntry {
            offset: self.storage.len() as u32,
            length: s.len() as u32,
            ascii: s.is_ascii(),
            identifier: is_identifier(s),
        });
        self.storage.push_str(s);
        self.index.insert(s.to_string(), id);
        id
    }

    fn rebuild_index(&mut self) {
        self.index = (0..self.entries.len() as u32)
            .filter_map(|id| self.get(id).map(|s| (s.to_string(), id)))
            .collect();
    }

    /// Id of `s`, if present.
    pub fn find(&self, s: &str) -> Option<u32> {
        if self.index.len() == self.entries.len() {
            return self.index.get(s).copied();
        }
        (0..self.entries.len() as u32).find(|id| self.get(*id) == Some(s))
    }

    /// The string with id `id`.
    pub fn get(&self, id: u32) -> Option<&str> {
        let entry = self.entries.get(id as usize)?;
        self.storage
            .get(entry.offset as usize..(entry.offset + entry.length) as usize)
    }

    /// The entry with id `id`.
    pub fn entry(&self, id: u32) -> Option<&StringEntry> {
        self.entries.get(id as usize)
    }

    /// Number of strings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Strings in id order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str, &StringEntry)> {
        self.entries.iter().enumerate().filter_map(|(id, entry)| {
            let id = id as u32;
            self.get(id).map(|s| (id, s, entry))
        })
    }
}

// ============================================================================
// Literal buffers
// ============================================================================

/// Tag of a group of literal buffer entries, in bits 4..7 of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LiteralTag {
    /// null
    Null = 0x00,
    /// true
    True = 0x10,
    /// false
    False = 0x20,
    /// 8-byte double
    Number = 0x30,
    /// 4-byte string id
    LongString = 0x40,
    /// 2-byte string id
    ShortString = 0x50,
    /// 1-byte string id
    ByteString = 0x60,
    /// 4-byte signed integer
    Integer = 0x70,
}

impl LiteralTag {
    fn from_bits(bits: u8) -> LiteralTag {
        match bits & 0x70 {
            0x00 => LiteralTag::Null,
            0x10 => LiteralTag::True,
            0x20 => LiteralTag::False,
            0x30 => LiteralTag::Number,
            0x40 => LiteralTag::LongString,
            0x50 => LiteralTag::ShortString,
            0x60 => LiteralTag::ByteString,
            _ => LiteralTag::Integer,
        }
    }

    fn payload_size(self) -> usize {
        match self {
            LiteralTag::Null | LiteralTag::True | LiteralTag::False => 0,
            LiteralTag::Number => 8,
            LiteralTag::LongString | LiteralTag::Integer => 4,
            LiteralTag::ShortString => 2,
            LiteralTag::ByteString => 1,
        }
    }
}

/// Largest number of entries in one group.
pub const MAX_GROUP: usize = 4095;

/// A decoded literal buffer entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    /// null
    Null,
    /// A boolean
    Bool(bool),
    /// A double
    Number(f64),
    /// A 32-bit integer
    Integer(i32),
    /// A string table id
    String(u32),
}

fn literal_entry(constant: &Constant, strings: &mut StringTable) -> Option<(LiteralTag, Literal)> {
    Some(match constant {
        Constant::Null => (LiteralTag::Null, Literal::Null),
        Constant::Bool(true) => (LiteralTag::True, Literal::Bool(true)),
        Constant::Bool(false) => (LiteralTag::False, Literal::Bool(false)),
        Constant::Number(n) => {
            let int = *n as i32;
            if int as f64 == *n && !(*n == 0.0 && n.is_sign_negative()) {
                (LiteralTag::Integer, Literal::Integer(int))
            } else {
                (LiteralTag::Number, Literal::Number(*n))
            }
        }
        Constant::String(s) => {
            let id = strings.insert(s);
            let tag = if id <= u8::MAX as u32 {
                LiteralTag::ByteString
            } else if id <= u16::MAX as u32 {
                LiteralTag::ShortString
            } else {
                LiteralTag::LongString
            };
            (tag, Literal::String(id))
        }
        Constant::Undefined | Constant::BigInt(_) | Constant::GlobalObject => return None,
    })
}

fn write_group(tag: LiteralTag, items: &[Literal], out: &mut Vec<u8>) {
    let count = items.len();
    if count <= 15 {
        out.push(tag as u8 | count as u8);
    } else {
        out.push(0x80 | tag as u8 | ((count >> 8) & 0x0f) as u8);
        out.push((count & 0xff) as u8);
    }
    for item in items {
        match item {
            Literal::Null | Literal::Bool(_) => {}
            Literal::Number(n) => out.extend_from_slice(&n.to_le_bytes()),
            Literal::Integer(i) => out.extend_from_slice(&i.to_le_bytes()),
            Literal::String(id) => match tag {
                LiteralTag::ByteString => out.push(*id as u8),
                LiteralTag::ShortString => out.extend_from_slice(&(*id as u16).to_le_bytes()),
                _ => out.extend_from_slice(&id.to_le_bytes()),
            },
        }
    }
}

/// Serializes constants into tagged groups. Returns `None` for constants a
/// buffer cannot hold.
pub fn serialize_literals(constants: &[Constant], strings: &mut StringTable) -> Option<Vec<u8>> {
    let entries = constants
        .iter()
        .map(|c| literal_entry(c, strings))
        .collect::<Option<Vec<_>>>()?;
    let mut out = Vec::new();
    let mut start = 0;
    while start < entries.len() {
        let tag = entries[start].0;
        let mut end = start + 1;
        while end < entries.len() && entries[end].0 == tag && end - start < MAX_GROUP {
            end += 1;
        }
        let items: Vec<Literal> = entries[start..end].iter().map(|(_, l)| *l).collect();
        write_group(tag, &items, &mut out);
        start = end;
    }
    Some(out)
}

/// Decodes `count` entries starting at `offset`.
pub fn deserialize_literals(buffer: &[u8], offset: usize, count: usize) -> Option<Vec<Literal>> {
    decode_groups(buffer, offset, |_, decoded| decoded >= count)
}

/// Decodes the entries stored in `buffer[offset..offset + length]`.
pub fn deserialize_range(buffer: &[u8], offset: usize, length: usize) -> Option<Vec<Literal>> {
    decode_groups(buffer, offset, |pos, _| pos >= offset + length)
}

fn decode_groups(buffer: &[u8], offset: usize, done: impl Fn(usize, usize) -> bool) -> Option<Vec<Literal>> {
    let mut out = Vec::new();
    let mut pos = offset;
    while !done(pos, out.len()) {
        let header = *buffer.get(pos)?;
        pos += 1;
        let tag = LiteralTag::from_bits(header);
        let mut group = (header & 0x0f) as usize;
        if header & 0x80 != 0 {
            group = (group << 8) | *buffer.get(pos)? as usize;
            pos += 1;
        }
        for _ in 0..group {
            let bytes = buffer.get(pos..pos + tag.payload_size())?;
            pos += bytes.len();
            out.push(match tag {
                LiteralTag::Null => Literal::Null,
                LiteralTag::True => Literal::Bool(true),
                LiteralTag::False => Literal::Bool(false),
                LiteralTag::Number => Literal::Number(f64::from_le_bytes(bytes.try_into().ok()?)),
                LiteralTag::Integer => Literal::Integer(i32::from_le_bytes(bytes.try_into().ok()?)),
                LiteralTag::LongString => Literal::String(u32::from_le_bytes(bytes.try_into().ok()?)),
                LiteralTag::ShortString => Literal::String(u16::from_le_bytes([bytes[0], bytes[1]]) as u32),
                LiteralTag::ByteString => Literal::String(bytes[0] as u32),
            });
        }
    }
    Some(out)
}

/// One content-addressed byte buffer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiteralBuffer {
    bytes: Vec<u8>,
    /// (offset, length) of every distinct sequence added
    sequences: Vec<(u32, u32)>,
    #[serde(skip)]
    index: FxHashMap<Vec<u8>, u32>,
}

impl LiteralBuffer {
    /// Offset of `sequence`, appending it if it was never added.
    pub fn insert(&mut self, sequence: Vec<u8>) -> u32 {
        if self.index.len() != self.sequences.len() {
            self.index = self
                .sequences
                .iter()
                .map(|(offset, len)| {
                    let range = *offset as usize..(*offset + *len) as usize;
                    (self.bytes[range].to_vec(), *offset)
                })
                .collect();
        }
        if let Some(offset) = self.index.get(&sequence) {
            return *offset;
        }
        let offset = self.bytes.len() as u32;
        self.bytes.extend_from_slice(&sequence);
        self.sequences.push((offset, sequence.len() as u32));
        self.index.insert(sequence, offset);
        offset
    }

    /// The raw bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether nothing was added.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Distinct sequences as (offset, length), in insertion order.
    pub fn sequences(&self) -> &[(u32, u32)] {
        &self.sequences
    }
}

/// The array, object key and object value buffers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiteralBuffers {
    /// Array literal elements
    pub array: LiteralBuffer,
    /// Object literal keys
    pub object_keys: LiteralBuffer,
    /// Object literal values
    pub object_values: LiteralBuffer,
}

impl LiteralBuffers {
    /// Adds array elements, returning the buffer offset.
    pub fn add_array(&mut self, elements: &[Constant], strings: &mut StringTable) -> Option<u32> {
        let bytes = serialize_literals(elements, strings)?;
        Some(self.array.insert(bytes))
    }

    /// Adds object keys and values, returning both offsets.
    pub fn add_object(
        &mut self,
        keys: &[Constant],
        values: &[Constant],
        strings: &mut StringTable,
    ) -> Option<(u32, u32)> {
        let keys = serialize_literals(keys, strings)?;
        let values = serialize_literals(values, strings)?;
        Some((self.object_keys.insert(keys), self.object_values.insert(values)))
    }
}

// ============================================================================
// BigInts
// ============================================================================

/// BigInt constants as little-endian two's complement bytes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BigIntTable {
    entries: Vec<Vec<u8>>,
    #[serde(skip)]
    index: FxHashMap<Vec<u8>, u32>,
}

impl BigIntTable {
    /// Id of the BigInt spelled by `digits`, adding it if needed. Returns
    /// `None` when `digits` is not a decimal integer.
    pub fn insert(&mut self, digits: &str) -> Option<u32> {
        let value = BigInt::parse_bytes(digits.as_bytes(), 10)?;
        let bytes = value.to_signed_bytes_le();
        if self.index.len() != self.entries.len() {
            self.index = self
                .entries
                .iter()
                .enumerate()
                .map(|(i, e)| (e.clone(), i as u32))
                .collect();
        }
        if let Some(id) = self.index.get(&bytes) {
            return Some(*id);
        }
        let id = self.entries.len() as u32;
        self.entries.push(bytes.clone());
        self.index.insert(bytes, id);
        Some(id)
    }

    /// The value with id `id`.
    pub fn get(&self, id: u32) -> Option<BigInt> {
        self.entries
            .get(id as usize)
            .map(|bytes| BigInt::from_signed_bytes_le(bytes))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strings_are_deduplicated() {
        let mut table = StringTable::new();
        assert_eq!(table.insert("foo"), 0);
        assert_eq!(table.insert("bar"), 1);
        assert_eq!(table.insert("foo"), 0);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(1), Some("bar"));
        assert_eq!(table.entry(1).unwrap().offset, 3);
    }

    #[test]
    fn test_identifier_flag() {
        let mut table = StringTable::new();
        let a = table.insert("length");
        let b = table.insert("hello world");
        let c = table.insert("café");
        assert!(table.entry(a).unwrap().identifier);
        assert!(!table.entry(b).unwrap().identifier);
        assert!(table.entry(c).unwrap().identifier);
        assert!(!table.entry(c).unwrap().ascii);
        assert!(!is_identifier("1x"));
        assert!(is_identifier("$_1"));
    }

    #[test]
    fn test_deserialized_table_keeps_deduplicating() {
        let mut table = StringTable::new();
        table.insert("a");
        table.insert("b");
        let json = serde_json::to_string(&table).unwrap();
        let mut back: StringTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back.find("b"), Some(1));
        assert_eq!(back.insert("a"), 0);
        assert_eq!(back.insert("c"), 2);
    }

    #[test]
    fn test_array_buffer_layout() {
        let mut strings = StringTable::new();
        let elements = vec![
            Constant::Bool(true),
            Constant::Bool(false),
            Constant::Number(0.0),
            Constant::Number(1.0),
        ];
        let bytes = serialize_literals(&elements, &mut strings).unwrap();
        assert_eq!(bytes.len(), 11);
        assert_eq!(&bytes[..3], &[0x11, 0x21, 0x72]);
        assert_eq!(&bytes[3..7], &0i32.to_le_bytes());
        assert_eq!(&bytes[7..11], &1i32.to_le_bytes());
    }

    #[test]
    fn test_buffer_offsets_follow_insertion() {
        let mut strings = StringTable::new();
        let mut buffers = LiteralBuffers::default();
        let x = [
            Constant::Bool(true),
            Constant::Bool(false),
            Constant::Number(0.0),
            Constant::Number(1.0),
        ];
        let y = [Constant::Number(1.0), Constant::Number(2.0), Constant::Number(3.0)];
        assert_eq!(buffers.add_array(&x, &mut strings), Some(0));
        assert_eq!(buffers.add_array(&y, &mut strings), Some(11));
        assert_eq!(buffers.add_array(&x, &mut strings), Some(0));
    }

    #[test]
    fn test_numbers_and_strings() {
        let mut strings = StringTable::new();
        let elements = vec![
            Constant::Number(1.5),
            Constant::Number(-0.0),
            Constant::String("a".into()),
            Constant::Null,
        ];
        let bytes = serialize_literals(&elements, &mut strings).unwrap();
        assert_eq!(bytes[0], 0x32);
        assert_eq!(bytes[17], 0x61);
        assert_eq!(bytes[18], 0);
        assert_eq!(bytes[19], 0x01);
        let decoded = deserialize_literals(&bytes, 0, 4).unwrap();
        assert_eq!(decoded[0], Literal::Number(1.5));
        assert_eq!(decoded[2], Literal::String(0));
        assert_eq!(decoded[3], Literal::Null);
    }

    #[test]
    fn test_long_groups() {
        let mut strings = StringTable::new();
        let elements = vec![Constant::Null; 5000];
        let bytes = serialize_literals(&elements, &mut strings).unwrap();
        // 4095 entries, then the remaining 905
        assert_eq!(bytes, vec![0x8f, 0xff, 0x83, 0x89]);
        assert_eq!(deserialize_literals(&bytes, 0, 5000).unwrap().len(), 5000);
        assert_eq!(deserialize_range(&bytes, 0, bytes.len()).unwrap().len(), 5000);
    }

    #[test]
    fn test_unbufferable_constants() {
        let mut strings = StringTable::new();
        assert!(serialize_literals(&[Constant::Undefined], &mut strings).is_none());
    }

    #[test]
    fn test_bigints() {
        let mut table = BigIntTable::default();
        assert_eq!(table.insert("123456789012345678901234567890"), Some(0));
        assert_eq!(table.insert("-5"), Some(1));
        assert_eq!(table.insert("123456789012345678901234567890"), Some(0));
        assert_eq!(table.get(1), Some(BigInt::from(-5)));
        assert_eq!(table.insert("12x"), None);
    }
}
