//! [`State`]: the materialized view folded from a writer set's patches.

use crate::dot::Dot;
use crate::edge_key::EdgeKey;
use crate::event_id::EventId;
use crate::ids::{Ident, NodeId, PropKey, WriterId};
use crate::lww::Lww;
use crate::orset::OrSet;
use crate::patch::PatchError;
use crate::version_vector::VersionVector;
use std::collections::{BTreeMap, BTreeSet};
use warp_codec::Value;
use warp_crypto::Oid;

/// The materialized graph state, schema version 5.
///
/// This is the fold target of [`crate::reduce::reduce`]: an empty `State`
/// plus every patch in a writer set, folded in canonical order, always
/// produces the same `State` regardless of which peer computed it
/// (property P1).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct State {
    /// Node aliveness.
    pub node_alive: OrSet<NodeId>,
    /// Edge aliveness, keyed by the canonical `(from, to, label)` triple.
    pub edge_alive: OrSet<EdgeKey>,
    /// Node properties, keyed by `(node, property key)`.
    pub node_props: Lww<(NodeId, PropKey), Value>,
    /// Edge properties, keyed by `(edge, property key)`.
    pub edge_props: Lww<(EdgeKey, PropKey), Value>,
    /// The join of every patch context folded into this state.
    pub version_vector: VersionVector,
}

/// The schema version [`State`] corresponds to.
pub const STATE_SCHEMA: u32 = 5;

impl State {
    /// An empty state, as a fold starts.
    pub fn new() -> Self {
        Self::default()
    }

    /// True iff `node` has at least one surviving add-dot.
    pub fn node_is_alive(&self, node: &NodeId) -> bool {
        self.node_alive.alive(node)
    }

    /// True iff the edge identified by `key` has at least one surviving
    /// add-dot.
    pub fn edge_is_alive(&self, key: &EdgeKey) -> bool {
        self.edge_alive.alive(key)
    }

    /// Lists every alive edge whose endpoints are also both alive
    /// (invariant I9: the view layer filters dangling edges that the
    /// underlying OR-Set may still technically contain).
    pub fn alive_edges(&self) -> impl Iterator<Item = &EdgeKey> {
        self.edge_alive.iter_alive().filter(|key| {
            self.node_is_alive(&key.from) && self.node_is_alive(&key.to)
        })
    }

    /// Lists every alive node.
    pub fn alive_nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.node_alive.iter_alive()
    }

    /// Merges `other`'s CRDT state into `self`. Used when combining a
    /// checkpoint's state with a set of freshly folded patches, or when
    /// two independently materialized states need to be combined directly.
    pub fn merge(&mut self, other: &Self) {
        self.node_alive.merge(&other.node_alive);
        self.edge_alive.merge(&other.edge_alive);
        self.node_props.merge(&other.node_props);
        self.edge_props.merge(&other.edge_props);
        self.version_vector = self.version_vector.join(&other.version_vector);
    }

    /// The canonical `Value` encoding of this state, hashed to produce the
    /// materialization engine's `viewHash`.
    pub fn to_value(&self) -> Value {
        let nodes: Vec<Value> = {
            let mut ids: Vec<&NodeId> = self.alive_nodes_including_dead_edges().collect();
            ids.sort();
            ids.into_iter()
                .map(|n| Value::Bytes(n.as_bytes().to_vec()))
                .collect()
        };
        let edges: Vec<Value> = {
            let mut keys: Vec<&EdgeKey> = self.edge_alive.iter_alive().collect();
            keys.sort();
            keys.into_iter().map(EdgeKey::to_value).collect()
        };
        let node_props: Vec<Value> = {
            let mut entries: Vec<_> = self.node_props.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            entries
                .into_iter()
                .map(|((node, key), value)| {
                    Value::Array(vec![
                        Value::Bytes(node.as_bytes().to_vec()),
                        Value::Bytes(key.as_bytes().to_vec()),
                        value.clone(),
                    ])
                })
                .collect()
        };
        let edge_props: Vec<Value> = {
            let mut entries: Vec<_> = self.edge_props.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            entries
                .into_iter()
                .map(|((edge, key), value)| {
                    Value::Array(vec![
                        edge.to_value(),
                        Value::Bytes(key.as_bytes().to_vec()),
                        value.clone(),
                    ])
                })
                .collect()
        };
        let version_vector: Vec<Value> = {
            let mut entries: Vec<_> = self.version_vector.iter().collect();
            entries.sort_by_key(|(w, _)| *w);
            entries
                .into_iter()
                .map(|(w, n)| Value::Array(vec![Value::Bytes(w.as_bytes().to_vec()), Value::Int(n as i64)]))
                .collect()
        };
        Value::map(vec![
            (Value::Text("schema".into()), Value::Int(STATE_SCHEMA as i64)),
            (Value::Text("nodes".into()), Value::Array(nodes)),
            (Value::Text("edges".into()), Value::Array(edges)),
            (Value::Text("nodeProps".into()), Value::Array(node_props)),
            (Value::Text("edgeProps".into()), Value::Array(edge_props)),
            (Value::Text("versionVector".into()), Value::Array(version_vector)),
        ])
    }

    fn alive_nodes_including_dead_edges(&self) -> impl Iterator<Item = &NodeId> {
        self.node_alive.iter_alive()
    }

    /// The full canonical encoding of this state, including tombstone
    /// (remove-dot) history and LWW timestamps. This is what a checkpoint
    /// persists — unlike [`Self::to_value`], which only captures the
    /// logical view for hashing, this round-trips through [`Self::from_full_value`]
    /// back to an identical `State`.
    pub fn to_full_value(&self) -> Value {
        Value::map(vec![
            (text("schema"), Value::Int(STATE_SCHEMA as i64)),
            (
                text("nodeAlive"),
                orset_to_value(self.node_alive.add_dots(), self.node_alive.remove_dots(), ident_to_value),
            ),
            (
                text("edgeAlive"),
                orset_to_value(self.edge_alive.add_dots(), self.edge_alive.remove_dots(), EdgeKey::to_value),
            ),
            (
                text("nodeProps"),
                lww_to_value(&self.node_props, |(node, key)| {
                    Value::Array(vec![ident_to_value(node), ident_to_value(key)])
                }),
            ),
            (
                text("edgeProps"),
                lww_to_value(&self.edge_props, |(edge, key)| {
                    Value::Array(vec![edge.to_value(), ident_to_value(key)])
                }),
            ),
            (
                text("versionVector"),
                Value::Array(
                    self.version_vector
                        .iter()
                        .map(|(w, n)| Value::Array(vec![writer_to_value(&w), Value::Int(n as i64)]))
                        .collect(),
                ),
            ),
        ])
    }

    /// Reconstructs a `State` from the encoding produced by
    /// [`Self::to_full_value`].
    pub fn from_full_value(value: &Value) -> Result<Self, PatchError> {
        let schema = as_u64(field(value, "schema")?)? as u32;
        if schema > STATE_SCHEMA {
            return Err(PatchError::SchemaUnsupported { found: schema, supported: STATE_SCHEMA });
        }
        let node_alive = orset_from_value(field(value, "nodeAlive")?, ident_from_value)?;
        let edge_alive = orset_from_value(field(value, "edgeAlive")?, edge_key_from_value)?;
        let node_props = lww_from_value(field(value, "nodeProps")?, |k| {
            let (node, key) = pair(k)?;
            Ok((ident_from_value(node)?, ident_from_value(key)?))
        })?;
        let edge_props = lww_from_value(field(value, "edgeProps")?, |k| {
            let (edge, key) = pair(k)?;
            Ok((edge_key_from_value(edge)?, ident_from_value(key)?))
        })?;
        let mut version_vector = VersionVector::new();
        match field(value, "versionVector")? {
            Value::Array(items) => {
                for item in items {
                    let (w, n) = pair(item)?;
                    version_vector.update(writer_from_value(w)?, as_u64(n)?);
                }
            }
            _ => return Err(PatchError::Malformed("versionVector must be an array")),
        }
        Ok(State {
            node_alive,
            edge_alive,
            node_props,
            edge_props,
            version_vector,
        })
    }

    /// Encodes the full checkpoint-grade representation to bytes.
    pub fn encode_full(&self) -> Vec<u8> {
        warp_codec::encode(&self.to_full_value())
    }

    /// Decodes the full checkpoint-grade representation from bytes.
    pub fn decode_full(bytes: &[u8]) -> Result<Self, PatchError> {
        let value = warp_codec::decode(bytes)
            .map_err(|_| PatchError::Malformed("not valid canonical codec bytes"))?;
        Self::from_full_value(&value)
    }
}

fn text(s: &str) -> Value {
    Value::Text(s.to_owned())
}

fn field<'a>(value: &'a Value, key: &str) -> Result<&'a Value, PatchError> {
    value.get(&text(key)).ok_or(PatchError::Malformed("missing field"))
}

fn pair(value: &Value) -> Result<(&Value, &Value), PatchError> {
    match value {
        Value::Array(items) if items.len() == 2 => Ok((&items[0], &items[1])),
        _ => Err(PatchError::Malformed("expected a 2-element array")),
    }
}

fn as_u64(value: &Value) -> Result<u64, PatchError> {
    match value {
        Value::Int(n) if *n >= 0 => Ok(*n as u64),
        _ => Err(PatchError::Malformed("expected a non-negative integer")),
    }
}

fn ident_to_value(ident: &Ident) -> Value {
    Value::Bytes(ident.as_bytes().to_vec())
}

fn ident_from_value(value: &Value) -> Result<Ident, PatchError> {
    match value {
        Value::Bytes(b) => Ident::new(b.clone()).map_err(PatchError::InvalidIdent),
        _ => Err(PatchError::Malformed("expected bytes for identifier")),
    }
}

fn edge_key_from_value(value: &Value) -> Result<EdgeKey, PatchError> {
    match value {
        Value::Array(items) if items.len() == 3 => Ok(EdgeKey::new(
            ident_from_value(&items[0])?,
            ident_from_value(&items[1])?,
            ident_from_value(&items[2])?,
        )),
        _ => Err(PatchError::Malformed("expected [from, to, label] edge key")),
    }
}

fn writer_to_value(writer: &WriterId) -> Value {
    Value::Bytes(writer.as_bytes().to_vec())
}

fn writer_from_value(value: &Value) -> Result<WriterId, PatchError> {
    match value {
        Value::Bytes(b) if b.len() == 32 => {
            let mut arr = [0u8; 32];
            arr.copy_from_slice(b);
            Ok(WriterId::from_bytes(arr))
        }
        _ => Err(PatchError::Malformed("expected a 32-byte writer id")),
    }
}

fn dot_to_value(dot: &Dot) -> Value {
    Value::Array(vec![writer_to_value(&dot.writer), Value::Int(dot.lamport as i64)])
}

fn dot_from_value(value: &Value) -> Result<Dot, PatchError> {
    let (w, n) = pair(value)?;
    Ok(Dot::new(writer_from_value(w)?, as_u64(n)?))
}

fn dots_to_value(dots: &BTreeSet<Dot>) -> Value {
    Value::Array(dots.iter().map(dot_to_value).collect())
}

fn dots_from_value(value: &Value) -> Result<BTreeSet<Dot>, PatchError> {
    match value {
        Value::Array(items) => items.iter().map(dot_from_value).collect(),
        _ => Err(PatchError::Malformed("expected an array of dots")),
    }
}

fn event_id_to_value(event_id: &EventId) -> Value {
    Value::Array(vec![
        Value::Int(event_id.lamport() as i64),
        writer_to_value(&event_id.writer()),
        Value::Bytes(event_id.commit_sha().as_bytes().to_vec()),
        Value::Int(event_id.op_index() as i64),
    ])
}

fn event_id_from_value(value: &Value) -> Result<EventId, PatchError> {
    match value {
        Value::Array(items) if items.len() == 4 => {
            let lamport = as_u64(&items[0])?;
            let writer = writer_from_value(&items[1])?;
            let commit_sha = match &items[2] {
                Value::Bytes(b) if b.len() == 32 => {
                    let mut arr = [0u8; 32];
                    arr.copy_from_slice(b);
                    Oid::from_bytes(arr)
                }
                _ => return Err(PatchError::Malformed("expected a 32-byte commit sha")),
            };
            let op_index = as_u64(&items[3])? as u32;
            Ok(EventId::new(lamport, writer, commit_sha, op_index))
        }
        _ => Err(PatchError::Malformed("malformed event id")),
    }
}

fn orset_to_value<T>(
    add_dots: &BTreeMap<T, BTreeSet<Dot>>,
    remove_dots: &BTreeMap<T, BTreeSet<Dot>>,
    element_to_value: impl Fn(&T) -> Value,
) -> Value
where
    T: Ord + Clone,
{
    Value::map(vec![
        (
            text("add"),
            Value::Array(
                add_dots
                    .iter()
                    .map(|(e, dots)| Value::Array(vec![element_to_value(e), dots_to_value(dots)]))
                    .collect(),
            ),
        ),
        (
            text("remove"),
            Value::Array(
                remove_dots
                    .iter()
                    .map(|(e, dots)| Value::Array(vec![element_to_value(e), dots_to_value(dots)]))
                    .collect(),
            ),
        ),
    ])
}

fn orset_from_value<T>(
    value: &Value,
    element_from_value: impl Fn(&Value) -> Result<T, PatchError>,
) -> Result<OrSet<T>, PatchError>
where
    T: Ord + Clone,
{
    let add = match field(value, "add")? {
        Value::Array(items) => items
            .iter()
            .map(|item| {
                let (e, dots) = pair(item)?;
                Ok((element_from_value(e)?, dots_from_value(dots)?))
            })
            .collect::<Result<BTreeMap<T, BTreeSet<Dot>>, PatchError>>()?,
        _ => return Err(PatchError::Malformed("OR-Set add-dots must be an array")),
    };
    let remove = match field(value, "remove")? {
        Value::Array(items) => items
            .iter()
            .map(|item| {
                let (e, dots) = pair(item)?;
                Ok((element_from_value(e)?, dots_from_value(dots)?))
            })
            .collect::<Result<BTreeMap<T, BTreeSet<Dot>>, PatchError>>()?,
        _ => return Err(PatchError::Malformed("OR-Set remove-dots must be an array")),
    };
    Ok(OrSet::from_parts(add, remove))
}

fn lww_to_value<K>(lww: &Lww<K, Value>, key_to_value: impl Fn(&K) -> Value) -> Value
where
    K: Ord + Clone,
{
    Value::Array(
        lww.entries_raw()
            .map(|(k, e, v)| Value::Array(vec![key_to_value(k), event_id_to_value(e), v.clone()]))
            .collect(),
    )
}

fn lww_from_value<K>(
    value: &Value,
    key_from_value: impl Fn(&Value) -> Result<K, PatchError>,
) -> Result<Lww<K, Value>, PatchError>
where
    K: Ord + Clone,
{
    match value {
        Value::Array(items) => {
            let mut entries = BTreeMap::new();
            for item in items {
                match item {
                    Value::Array(triple) if triple.len() == 3 => {
                        let key = key_from_value(&triple[0])?;
                        let event_id = event_id_from_value(&triple[1])?;
                        entries.insert(key, (event_id, triple[2].clone()));
                    }
                    _ => return Err(PatchError::Malformed("malformed LWW entry")),
                }
            }
            Ok(Lww::from_parts(entries))
        }
        _ => Err(PatchError::Malformed("LWW register must be an array")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dot::Dot;
    use crate::ids::{Ident, WriterId};

    fn ident(s: &str) -> Ident {
        Ident::new(s.as_bytes().to_vec()).unwrap()
    }

    fn writer(b: u8) -> WriterId {
        WriterId::from_bytes([b; 32])
    }

    #[test]
    fn alive_edges_filters_dangling_endpoints() {
        let mut state = State::new();
        state.node_alive.add(ident("a"), Dot::new(writer(1), 1));
        let key = EdgeKey::new(ident("a"), ident("b"), Ident::empty());
        state.edge_alive.add(key.clone(), Dot::new(writer(1), 2));
        // "b" was never added as a node: the edge is alive in the OR-Set
        // but must not appear in the filtered view.
        assert_eq!(state.alive_edges().count(), 0);

        state.node_alive.add(ident("b"), Dot::new(writer(1), 3));
        assert_eq!(state.alive_edges().collect::<Vec<_>>(), vec![&key]);
    }

    #[test]
    fn full_value_round_trips_tombstones_and_lww_timestamps() {
        use crate::event_id::EventId;
        use warp_crypto::Oid;

        let mut state = State::new();
        let d1 = Dot::new(writer(1), 1);
        state.node_alive.add(ident("x"), d1);
        state.node_alive.remove(ident("x"), [d1]);
        state.node_alive.add(ident("x"), Dot::new(writer(2), 1));
        state.node_props.set(
            (ident("x"), ident("name")),
            EventId::new(1, writer(1), Oid::hash(b"c"), 0),
            Value::Text("alice".into()),
        );

        let decoded = State::decode_full(&state.encode_full()).unwrap();
        assert_eq!(decoded, state);
        assert!(decoded.node_is_alive(&ident("x")));
    }

    #[test]
    fn to_value_is_independent_of_internal_btreemap_order_already() {
        let mut a = State::new();
        a.node_alive.add(ident("a"), Dot::new(writer(1), 1));
        a.node_alive.add(ident("b"), Dot::new(writer(2), 1));
        let mut b = State::new();
        b.node_alive.add(ident("b"), Dot::new(writer(2), 1));
        b.node_alive.add(ident("a"), Dot::new(writer(1), 1));
        assert_eq!(warp_codec::encode(&a.to_value()), warp_codec::encode(&b.to_value()));
    }
}
