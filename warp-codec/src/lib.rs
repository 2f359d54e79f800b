//! Canonical CBOR-profile codec.
//!
//! Every content-addressed object in warp — patches, checkpoints, trust
//! records, bitmap shard metadata — is hashed by feeding the canonical
//! encoding of a [`Value`] tree into the hasher in [`warp_crypto`]. Two
//! peers that construct logically equal values MUST produce byte-identical
//! output, or content addressing silently breaks.
//!
//! The wire format follows RFC 7049's "canonical CBOR" profile (§3.9):
//! integers use the shortest possible head, and map keys are sorted by
//! encoded length first, then by lexicographic byte order. `decode` is a
//! left inverse of `encode`: `decode(encode(v)) == v`, modulo the fact that
//! a decoded map no longer remembers the insertion order its encoder used.
#![warn(missing_docs)]

use std::collections::BTreeMap;
use thiserror::Error;

/// A canonical value. This is the only type that ever crosses the
/// content-addressing boundary; every higher-level type in warp converts
/// to and from a `Value` rather than rolling its own encoding.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// The absence of a value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed integer. Canonical CBOR has no separate float-vs-int
    /// ambiguity here: warp never encodes an integer as a float.
    Int(i64),
    /// An IEEE-754 double. Used only where the data model calls for a
    /// float; lamport clocks, counters and ids are always `Int`.
    Float(f64),
    /// An opaque byte string (node ids, labels, signatures, hashes).
    Bytes(Vec<u8>),
    /// A UTF-8 text string.
    Text(String),
    /// An ordered sequence. Order is significant and preserved as-is.
    Array(Vec<Value>),
    /// A mapping. Encoded with keys sorted per the canonical profile;
    /// decoded order is the sorted order, not the original insertion order.
    Map(Vec<(Value, Value)>),
    /// A tagged binary blob, used for content-addressed references such as
    /// an embedded oid inside a larger structure.
    Tag(u64, Box<Value>),
}

impl Value {
    /// Convenience constructor for a map, sorting and deduplicating-by-last
    /// write like a real mapping would.
    pub fn map(entries: impl IntoIterator<Item = (Value, Value)>) -> Self {
        let mut dedup: BTreeMap<Vec<u8>, (Value, Value)> = BTreeMap::new();
        for (k, v) in entries {
            dedup.insert(encode(&k), (k, v));
        }
        Value::Map(dedup.into_values().collect())
    }

    /// Looks up a key in a `Map` value by exact structural equality.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }
}

/// Errors that can occur while decoding a byte string as a [`Value`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The input ended before a complete value was read.
    #[error("unexpected end of input")]
    Eof,
    /// A head byte encoded a major type / additional-info combination this
    /// decoder does not support (e.g. indefinite-length items).
    #[error("unsupported encoding at offset {0}")]
    Unsupported(usize),
    /// Bytes claiming to be UTF-8 text were not valid UTF-8.
    #[error("invalid utf-8 text string")]
    InvalidUtf8,
    /// Trailing bytes remained after a top-level value was fully decoded.
    #[error("trailing bytes after decoded value")]
    TrailingBytes,
}

const MAJOR_UINT: u8 = 0;
const MAJOR_NINT: u8 = 1;
const MAJOR_BYTES: u8 = 2;
const MAJOR_TEXT: u8 = 3;
const MAJOR_ARRAY: u8 = 4;
const MAJOR_MAP: u8 = 5;
const MAJOR_TAG: u8 = 6;
const MAJOR_SIMPLE: u8 = 7;

const SIMPLE_FALSE: u8 = 20;
const SIMPLE_TRUE: u8 = 21;
const SIMPLE_NULL: u8 = 22;
const SIMPLE_F64: u8 = 27;

/// Encodes a [`Value`] into its canonical byte representation.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(head(MAJOR_SIMPLE, SIMPLE_NULL as u64)),
        Value::Bool(false) => out.push(head(MAJOR_SIMPLE, SIMPLE_FALSE as u64)),
        Value::Bool(true) => out.push(head(MAJOR_SIMPLE, SIMPLE_TRUE as u64)),
        Value::Int(n) => {
            if *n >= 0 {
                encode_head(MAJOR_UINT, *n as u64, out);
            } else {
                encode_head(MAJOR_NINT, (-1 - *n) as u64, out);
            }
        }
        Value::Float(f) => {
            out.push(head(MAJOR_SIMPLE, SIMPLE_F64 as u64));
            out.extend_from_slice(&f.to_bits().to_be_bytes());
        }
        Value::Bytes(b) => {
            encode_head(MAJOR_BYTES, b.len() as u64, out);
            out.extend_from_slice(b);
        }
        Value::Text(s) => {
            encode_head(MAJOR_TEXT, s.len() as u64, out);
            out.extend_from_slice(s.as_bytes());
        }
        Value::Array(items) => {
            encode_head(MAJOR_ARRAY, items.len() as u64, out);
            for item in items {
                encode_into(item, out);
            }
        }
        Value::Map(entries) => {
            let mut encoded: Vec<(Vec<u8>, Vec<u8>)> = entries
                .iter()
                .map(|(k, v)| (encode(k), encode(v)))
                .collect();
            encoded.sort_by(|a, b| (a.0.len(), &a.0).cmp(&(b.0.len(), &b.0)));
            encode_head(MAJOR_MAP, encoded.len() as u64, out);
            for (k, v) in encoded {
                out.extend_from_slice(&k);
                out.extend_from_slice(&v);
            }
        }
        Value::Tag(tag, inner) => {
            encode_head(MAJOR_TAG, *tag, out);
            encode_into(inner, out);
        }
    }
}

fn head(major: u8, additional: u64) -> u8 {
    debug_assert!(additional < 24);
    (major << 5) | additional as u8
}

fn encode_head(major: u8, n: u64, out: &mut Vec<u8>) {
    if n < 24 {
        out.push(head(major, n));
    } else if n <= u8::MAX as u64 {
        out.push((major << 5) | 24);
        out.push(n as u8);
    } else if n <= u16::MAX as u64 {
        out.push((major << 5) | 25);
        out.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= u32::MAX as u64 {
        out.push((major << 5) | 26);
        out.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        out.push((major << 5) | 27);
        out.extend_from_slice(&n.to_be_bytes());
    }
}

/// Decodes a canonical byte string back into a [`Value`].
///
/// Rejects trailing bytes: the whole input must be exactly one value.
pub fn decode(bytes: &[u8]) -> Result<Value, DecodeError> {
    let mut cursor = Cursor { bytes, pos: 0 };
    let value = decode_value(&mut cursor)?;
    if cursor.pos != bytes.len() {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(value)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn next_byte(&mut self) -> Result<u8, DecodeError> {
        let b = *self.bytes.get(self.pos).ok_or(DecodeError::Eof)?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).ok_or(DecodeError::Eof)?;
        let slice = self.bytes.get(self.pos..end).ok_or(DecodeError::Eof)?;
        self.pos = end;
        Ok(slice)
    }

    fn read_length(&mut self, additional: u8) -> Result<u64, DecodeError> {
        match additional {
            0..=23 => Ok(additional as u64),
            24 => Ok(self.next_byte()? as u64),
            25 => {
                let bytes = self.take(2)?;
                Ok(u16::from_be_bytes(bytes.try_into().unwrap()) as u64)
            }
            26 => {
                let bytes = self.take(4)?;
                Ok(u32::from_be_bytes(bytes.try_into().unwrap()) as u64)
            }
            27 => {
                let bytes = self.take(8)?;
                Ok(u64::from_be_bytes(bytes.try_into().unwrap()))
            }
            _ => Err(DecodeError::Unsupported(self.pos)),
        }
    }
}

fn decode_value(cursor: &mut Cursor<'_>) -> Result<Value, DecodeError> {
    let start = cursor.pos;
    let byte = cursor.next_byte()?;
    let major = byte >> 5;
    let additional = byte & 0x1f;
    match major {
        MAJOR_UINT => Ok(Value::Int(cursor.read_length(additional)? as i64)),
        MAJOR_NINT => Ok(Value::Int(-1 - cursor.read_length(additional)? as i64)),
        MAJOR_BYTES => {
            let len = cursor.read_length(additional)? as usize;
            Ok(Value::Bytes(cursor.take(len)?.to_vec()))
        }
        MAJOR_TEXT => {
            let len = cursor.read_length(additional)? as usize;
            let bytes = cursor.take(len)?;
            let s = std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;
            Ok(Value::Text(s.to_owned()))
        }
        MAJOR_ARRAY => {
            let len = cursor.read_length(additional)?;
            let mut items = Vec::with_capacity(len.min(1 << 20) as usize);
            for _ in 0..len {
                items.push(decode_value(cursor)?);
            }
            Ok(Value::Array(items))
        }
        MAJOR_MAP => {
            let len = cursor.read_length(additional)?;
            let mut entries = Vec::with_capacity(len.min(1 << 20) as usize);
            for _ in 0..len {
                let k = decode_value(cursor)?;
                let v = decode_value(cursor)?;
                entries.push((k, v));
            }
            Ok(Value::Map(entries))
        }
        MAJOR_TAG => {
            let tag = cursor.read_length(additional)?;
            let inner = decode_value(cursor)?;
            Ok(Value::Tag(tag, Box::new(inner)))
        }
        MAJOR_SIMPLE => match additional {
            SIMPLE_FALSE => Ok(Value::Bool(false)),
            SIMPLE_TRUE => Ok(Value::Bool(true)),
            SIMPLE_NULL => Ok(Value::Null),
            SIMPLE_F64 => {
                let bytes = cursor.take(8)?;
                Ok(Value::Float(f64::from_bits(u64::from_be_bytes(
                    bytes.try_into().unwrap(),
                ))))
            }
            _ => Err(DecodeError::Unsupported(start)),
        },
        _ => Err(DecodeError::Unsupported(start)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            any::<Vec<u8>>().prop_map(Value::Bytes),
            ".*".prop_map(Value::Text),
        ];
        leaf.prop_recursive(4, 64, 8, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..8).prop_map(Value::Array),
                prop::collection::vec((inner.clone(), inner), 0..8).prop_map(Value::map),
            ]
        })
    }

    proptest! {
        #[test]
        fn decode_is_left_inverse_of_encode(v in arb_value()) {
            let bytes = encode(&v);
            let decoded = decode(&bytes).unwrap();
            prop_assert_eq!(decoded, v);
        }

        #[test]
        fn map_encoding_is_independent_of_insertion_order(
            entries in prop::collection::vec((any::<i64>(), any::<i64>()), 0..12)
        ) {
            let entries: Vec<_> = entries
                .into_iter()
                .map(|(k, v)| (Value::Int(k), Value::Int(v)))
                .collect();
            let forward = Value::map(entries.clone());
            let mut shuffled = entries;
            shuffled.reverse();
            let backward = Value::map(shuffled);
            prop_assert_eq!(encode(&forward), encode(&backward));
        }
    }

    #[test]
    fn integers_use_shortest_head() {
        assert_eq!(encode(&Value::Int(0)), vec![0x00]);
        assert_eq!(encode(&Value::Int(23)), vec![0x17]);
        assert_eq!(encode(&Value::Int(24)), vec![0x18, 24]);
        assert_eq!(encode(&Value::Int(-1)), vec![0x20]);
    }

    #[test]
    fn map_sorts_by_encoded_key_length_then_bytes() {
        // Single-byte small int keys 1, 0 versus a longer byte-string key.
        let m = Value::map(vec![
            (Value::Int(1), Value::Null),
            (Value::Bytes(vec![0, 0]), Value::Null),
            (Value::Int(0), Value::Null),
        ]);
        let bytes = encode(&m);
        // map header (3 entries) then: key 0x00, key 0x01, then the 2-byte bytestring key.
        assert_eq!(bytes[0], (MAJOR_MAP << 5) | 3);
        assert_eq!(bytes[1], 0x00);
        assert_eq!(bytes[3], 0x01);
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = encode(&Value::Int(1));
        bytes.push(0xff);
        assert_eq!(decode(&bytes), Err(DecodeError::TrailingBytes));
    }
}
