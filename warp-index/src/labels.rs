//! The per-index label dictionary: edge labels are interned to small
//! integers so shard files can key bitmaps by `(localId, labelId)` instead
//! of repeating label bytes per entry.

use crate::error::{IndexError, Result};
use std::collections::BTreeMap;
use warp_codec::Value;
use warp_crdt::Label;

/// Maps every distinct label present in the indexed graph to a dense id,
/// assigned in sorted label order so two builds over the same edge set
/// agree on the mapping byte-for-byte.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelDict {
    to_id: BTreeMap<Label, u32>,
    to_label: BTreeMap<u32, Label>,
}

impl LabelDict {
    /// Builds a dictionary covering exactly `labels`, deduplicated and
    /// assigned ids in sorted order.
    pub fn build(labels: impl IntoIterator<Item = Label>) -> Self {
        let mut sorted: Vec<Label> = labels.into_iter().collect();
        sorted.sort();
        sorted.dedup();
        let mut to_id = BTreeMap::new();
        let mut to_label = BTreeMap::new();
        for (id, label) in sorted.into_iter().enumerate() {
            to_id.insert(label.clone(), id as u32);
            to_label.insert(id as u32, label);
        }
        Self { to_id, to_label }
    }

    /// The id assigned to `label`, if present.
    pub fn id_of(&self, label: &Label) -> Option<u32> {
        self.to_id.get(label).copied()
    }

    /// The label a given id was assigned to, if present.
    pub fn label_of(&self, id: u32) -> Option<&Label> {
        self.to_label.get(&id)
    }

    /// The canonical codec encoding, sorted by label bytes.
    pub fn to_value(&self) -> Value {
        Value::Array(
            self.to_id
                .iter()
                .map(|(label, id)| {
                    Value::Array(vec![Value::Bytes(label.as_bytes().to_vec()), Value::Int(*id as i64)])
                })
                .collect(),
        )
    }

    /// Decodes a dictionary from its canonical encoding.
    pub fn from_value(value: &Value) -> Result<Self> {
        let items = match value {
            Value::Array(items) => items,
            _ => return Err(IndexError::Malformed("label dictionary must be an array")),
        };
        let mut to_id = BTreeMap::new();
        let mut to_label = BTreeMap::new();
        for item in items {
            match item {
                Value::Array(pair) if pair.len() == 2 => {
                    let label = match &pair[0] {
                        Value::Bytes(b) => {
                            Label::new(b.clone()).map_err(|_| IndexError::Malformed("invalid label bytes"))?
                        }
                        _ => return Err(IndexError::Malformed("label must be bytes")),
                    };
                    let id = match &pair[1] {
                        Value::Int(n) if *n >= 0 => *n as u32,
                        _ => return Err(IndexError::Malformed("label id must be a non-negative integer")),
                    };
                    to_id.insert(label.clone(), id);
                    to_label.insert(id, label);
                }
                _ => return Err(IndexError::Malformed("malformed label dictionary entry")),
            }
        }
        Ok(Self { to_id, to_label })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(s: &str) -> Label {
        Label::new(s.as_bytes().to_vec()).unwrap()
    }

    #[test]
    fn assigns_ids_in_sorted_order() {
        let dict = LabelDict::build([label("follows"), label("blocks"), label("follows")]);
        assert_eq!(dict.id_of(&label("blocks")), Some(0));
        assert_eq!(dict.id_of(&label("follows")), Some(1));
    }

    #[test]
    fn round_trips_through_the_codec() {
        let dict = LabelDict::build([label("a"), label("")]);
        let decoded = LabelDict::from_value(&dict.to_value()).unwrap();
        assert_eq!(decoded, dict);
    }
}
