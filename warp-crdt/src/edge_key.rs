//! [`EdgeKey`]: the canonical identity of a directed, labeled edge.

use crate::ids::{Label, NodeId};
use warp_codec::Value;

/// The canonical serialization of `(from, to, label)`, used as the OR-Set
/// element type for edge aliveness and as the key scope for edge
/// properties.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeKey {
    /// The source node.
    pub from: NodeId,
    /// The destination node.
    pub to: NodeId,
    /// The edge's label (empty for unlabeled edges).
    pub label: Label,
}

impl EdgeKey {
    /// Builds an edge key from its three components.
    pub fn new(from: NodeId, to: NodeId, label: Label) -> Self {
        Self { from, to, label }
    }

    /// The canonical codec `Value` for this edge key, used wherever a
    /// byte-identical cross-peer representation is needed (content
    /// addressing, the bitmap index's per-shard bookkeeping).
    pub fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::Bytes(self.from.as_bytes().to_vec()),
            Value::Bytes(self.to.as_bytes().to_vec()),
            Value::Bytes(self.label.as_bytes().to_vec()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(s: &str) -> crate::ids::Ident {
        crate::ids::Ident::new(s.as_bytes().to_vec()).unwrap()
    }

    #[test]
    fn ordering_is_lexicographic_by_field() {
        let a = EdgeKey::new(ident("a"), ident("b"), ident(""));
        let b = EdgeKey::new(ident("a"), ident("c"), ident(""));
        assert!(a < b);
    }

    #[test]
    fn to_value_round_trips_through_the_codec() {
        let key = EdgeKey::new(ident("a"), ident("b"), ident("follows"));
        let bytes = warp_codec::encode(&key.to_value());
        let decoded = warp_codec::decode(&bytes).unwrap();
        assert_eq!(decoded, key.to_value());
    }
}
