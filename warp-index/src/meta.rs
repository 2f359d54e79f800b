//! Encoding for `meta/frontier.cbor`: the writer frontier the index was
//! built from, used to detect staleness on load.

use crate::error::{IndexError, Result};
use std::collections::BTreeMap;
use warp_codec::Value;
use warp_crdt::WriterId;
use warp_crypto::Oid;

/// Encodes a frontier map to its canonical `Value` form.
pub fn encode_frontier(frontier: &BTreeMap<WriterId, Oid>) -> Value {
    Value::Array(
        frontier
            .iter()
            .map(|(writer, sha)| {
                Value::Array(vec![
                    Value::Bytes(writer.as_bytes().to_vec()),
                    Value::Bytes(sha.as_bytes().to_vec()),
                ])
            })
            .collect(),
    )
}

/// Decodes a frontier map from its canonical `Value` form.
pub fn decode_frontier(value: &Value) -> Result<BTreeMap<WriterId, Oid>> {
    let items = match value {
        Value::Array(items) => items,
        _ => return Err(IndexError::Malformed("frontier must be an array")),
    };
    let mut frontier = BTreeMap::new();
    for item in items {
        match item {
            Value::Array(pair) if pair.len() == 2 => {
                let writer = match &pair[0] {
                    Value::Bytes(b) if b.len() == 32 => {
                        let mut arr = [0u8; 32];
                        arr.copy_from_slice(b);
                        WriterId::from_bytes(arr)
                    }
                    _ => return Err(IndexError::Malformed("frontier writer id")),
                };
                let sha = match &pair[1] {
                    Value::Bytes(b) if b.len() == 32 => {
                        let mut arr = [0u8; 32];
                        arr.copy_from_slice(b);
                        Oid::from_bytes(arr)
                    }
                    _ => return Err(IndexError::Malformed("frontier commit sha")),
                };
                frontier.insert(writer, sha);
            }
            _ => return Err(IndexError::Malformed("malformed frontier entry")),
        }
    }
    Ok(frontier)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer(b: u8) -> WriterId {
        WriterId::from_bytes([b; 32])
    }

    #[test]
    fn frontier_round_trips() {
        let mut frontier = BTreeMap::new();
        frontier.insert(writer(1), Oid::hash(b"a"));
        frontier.insert(writer(2), Oid::hash(b"b"));
        let decoded = decode_frontier(&encode_frontier(&frontier)).unwrap();
        assert_eq!(decoded, frontier);
    }
}
