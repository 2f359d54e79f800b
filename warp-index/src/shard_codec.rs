//! Binary (non-codec) serialization of a shard's bitmap file and its id
//! table. Bitmap files are a length-prefixed sequence of
//! `(localId, labelId, bitmap)` records rather than canonical `Value`,
//! since a roaring bitmap's own compressed wire format is what makes
//! lookups and unions cheap; wrapping it in the generic codec would only
//! cost bytes for no benefit.
//!
//! Every file starts with a fixed header: magic `EGBM`, a `u16` format
//! version, and a `u32` CRC-32 of everything after the header. Readers
//! check all three before touching the body, so a truncated or bit-flipped
//! shard surfaces as [`IndexError::ShardCorruption`] rather than a
//! confusing downstream panic.

use crate::error::{IndexError, Result};
use roaring::RoaringBitmap;
use std::collections::BTreeMap;
use warp_codec::Value;
use warp_crdt::NodeId;

const SHARD_MAGIC: &[u8; 4] = b"EGBM";
const SHARD_VERSION: u16 = 1;
const HEADER_LEN: usize = 4 + 2 + 4;

/// Encodes a shard's forward or reverse adjacency as a flat byte buffer,
/// prefixed with the `EGBM` header.
pub fn encode_shard_bitmaps(entries: &BTreeMap<(u32, u32), RoaringBitmap>) -> Vec<u8> {
    let mut body = Vec::new();
    for (&(local_id, label_id), bitmap) in entries {
        leb128::write::unsigned(&mut body, local_id as u64).expect("writing to a Vec<u8> never fails");
        leb128::write::unsigned(&mut body, label_id as u64).expect("writing to a Vec<u8> never fails");
        let mut bitmap_bytes = Vec::new();
        bitmap
            .serialize_into(&mut bitmap_bytes)
            .expect("writing to a Vec<u8> never fails");
        body.extend_from_slice(&(bitmap_bytes.len() as u32).to_le_bytes());
        body.extend_from_slice(&bitmap_bytes);
    }

    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(SHARD_MAGIC);
    out.extend_from_slice(&SHARD_VERSION.to_le_bytes());
    out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

/// Decodes a shard's bitmap file produced by [`encode_shard_bitmaps`],
/// rejecting a bad magic, an unsupported version, or a checksum mismatch
/// as [`IndexError::ShardCorruption`].
pub fn decode_shard_bitmaps(bytes: &[u8]) -> Result<BTreeMap<(u32, u32), RoaringBitmap>> {
    if bytes.len() < HEADER_LEN {
        return Err(IndexError::ShardCorruption("shard file shorter than its header"));
    }
    let (magic, rest) = bytes.split_at(4);
    if magic != SHARD_MAGIC {
        return Err(IndexError::ShardCorruption("bad magic bytes"));
    }
    let (version_bytes, rest) = rest.split_at(2);
    let version = u16::from_le_bytes(version_bytes.try_into().expect("2 bytes"));
    if version != SHARD_VERSION {
        return Err(IndexError::ShardCorruption("unsupported shard format version"));
    }
    let (checksum_bytes, body) = rest.split_at(4);
    let expected_checksum = u32::from_le_bytes(checksum_bytes.try_into().expect("4 bytes"));
    if crc32fast::hash(body) != expected_checksum {
        return Err(IndexError::ShardCorruption("checksum mismatch"));
    }

    let mut out = BTreeMap::new();
    let mut cursor = 0usize;
    while cursor < body.len() {
        let local_id = read_varuint(body, &mut cursor)?;
        let label_id = read_varuint(body, &mut cursor)?;
        let len = read_u32(body, &mut cursor)? as usize;
        if cursor + len > body.len() {
            return Err(IndexError::Malformed("truncated bitmap record"));
        }
        let bitmap = RoaringBitmap::deserialize_from(&body[cursor..cursor + len])
            .map_err(|_| IndexError::Malformed("corrupt roaring bitmap"))?;
        cursor += len;
        out.insert((local_id, label_id), bitmap);
    }
    Ok(out)
}

fn read_varuint(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
    let mut slice = &bytes[*cursor..];
    let before = slice.len();
    let value = leb128::read::unsigned(&mut slice)
        .map_err(|_| IndexError::Malformed("truncated varuint"))?;
    *cursor += before - slice.len();
    u32::try_from(value).map_err(|_| IndexError::Malformed("varuint overflowed u32"))
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
    if *cursor + 4 > bytes.len() {
        return Err(IndexError::Malformed("truncated shard record header"));
    }
    let mut arr = [0u8; 4];
    arr.copy_from_slice(&bytes[*cursor..*cursor + 4]);
    *cursor += 4;
    Ok(u32::from_le_bytes(arr))
}

/// Encodes a shard's node-id-to-local-id table.
pub fn encode_id_table(table: &BTreeMap<NodeId, u32>) -> Value {
    Value::Array(
        table
            .iter()
            .map(|(id, local)| Value::Array(vec![Value::Bytes(id.as_bytes().to_vec()), Value::Int(*local as i64)]))
            .collect(),
    )
}

/// Decodes a shard's node-id-to-local-id table.
pub fn decode_id_table(value: &Value) -> Result<BTreeMap<NodeId, u32>> {
    let items = match value {
        Value::Array(items) => items,
        _ => return Err(IndexError::Malformed("id table must be an array")),
    };
    let mut table = BTreeMap::new();
    for item in items {
        match item {
            Value::Array(pair) if pair.len() == 2 => {
                let id = match &pair[0] {
                    Value::Bytes(b) => {
                        NodeId::new(b.clone()).map_err(|_| IndexError::Malformed("invalid node id bytes"))?
                    }
                    _ => return Err(IndexError::Malformed("node id must be bytes")),
                };
                let local = match &pair[1] {
                    Value::Int(n) if *n >= 0 => *n as u32,
                    _ => return Err(IndexError::Malformed("local id must be a non-negative integer")),
                };
                table.insert(id, local);
            }
            _ => return Err(IndexError::Malformed("malformed id table entry")),
        }
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_bitmaps_round_trip() {
        let mut entries = BTreeMap::new();
        let mut bm = RoaringBitmap::new();
        bm.insert(1);
        bm.insert(1_000_000);
        entries.insert((7u32, 0u32), bm);
        let bytes = encode_shard_bitmaps(&entries);
        let decoded = decode_shard_bitmaps(&bytes).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn truncated_record_is_rejected() {
        let bytes = vec![1, 2, 3];
        assert!(decode_shard_bitmaps(&bytes).is_err());
    }

    #[test]
    fn id_table_round_trips() {
        let mut table = BTreeMap::new();
        table.insert(NodeId::new(b"a".to_vec()).unwrap(), 0);
        table.insert(NodeId::new(b"b".to_vec()).unwrap(), 1);
        let decoded = decode_id_table(&encode_id_table(&table)).unwrap();
        assert_eq!(decoded, table);
    }
}
