//! [`Op`] and [`Patch`]: the wire-level unit of CRDT mutation.

use crate::dot::Dot;
use crate::edge_key::EdgeKey;
use crate::ids::{Ident, IdentError, NodeId, PropKey, WriterId};
use crate::version_vector::VersionVector;
use std::collections::BTreeSet;
use thiserror::Error;
use warp_codec::Value;

/// Errors raised while decoding a [`Patch`] or [`Op`] from its canonical
/// `Value` form. Maps onto the `INVALID_INPUT` / `SCHEMA_UNSUPPORTED` error
/// kinds.
#[derive(Debug, Error)]
pub enum PatchError {
    /// A field was missing or had the wrong shape.
    #[error("malformed patch field: {0}")]
    Malformed(&'static str),
    /// An identifier violated the reserved-byte policy (I1).
    #[error("invalid identifier: {0}")]
    InvalidIdent(#[from] IdentError),
    /// An op carried a `type` tag this decoder does not recognise.
    #[error("unknown op type {0:?}")]
    UnknownOpType(String),
    /// A decoded record's `schema` field is newer than this build supports.
    #[error("schema {found} is newer than the {supported} this build supports")]
    SchemaUnsupported {
        /// The schema version found on the wire.
        found: u32,
        /// The newest schema version this build can read.
        supported: u32,
    },
}

type Result<T> = std::result::Result<T, PatchError>;

fn text(s: impl Into<String>) -> Value {
    Value::Text(s.into())
}

fn bytes_of(ident: &Ident) -> Value {
    Value::Bytes(ident.as_bytes().to_vec())
}

fn ident_from(value: &Value) -> Result<Ident> {
    match value {
        Value::Bytes(b) => Ok(Ident::new(b.clone())?),
        _ => Err(PatchError::Malformed("expected bytes for identifier")),
    }
}

fn field<'a>(map: &'a Value, key: &str) -> Result<&'a Value> {
    map.get(&text(key))
        .ok_or(PatchError::Malformed("missing field"))
}

fn as_u64(value: &Value) -> Result<u64> {
    match value {
        Value::Int(n) if *n >= 0 => Ok(*n as u64),
        _ => Err(PatchError::Malformed("expected non-negative integer")),
    }
}

fn as_u32(value: &Value) -> Result<u32> {
    Ok(as_u64(value)? as u32)
}

fn writer_from(value: &Value) -> Result<WriterId> {
    match value {
        Value::Bytes(b) if b.len() == 32 => {
            let mut arr = [0u8; 32];
            arr.copy_from_slice(b);
            Ok(WriterId::from_bytes(arr))
        }
        _ => Err(PatchError::Malformed("expected 32-byte writer id")),
    }
}

fn writer_value(writer: &WriterId) -> Value {
    Value::Bytes(writer.as_bytes().to_vec())
}

fn dot_value(dot: &Dot) -> Value {
    Value::Array(vec![writer_value(&dot.writer), Value::Int(dot.lamport as i64)])
}

fn dot_from(value: &Value) -> Result<Dot> {
    match value {
        Value::Array(items) if items.len() == 2 => {
            Ok(Dot::new(writer_from(&items[0])?, as_u64(&items[1])?))
        }
        _ => Err(PatchError::Malformed("expected [writer, lamport] dot")),
    }
}

fn dots_value(dots: &BTreeSet<Dot>) -> Value {
    Value::Array(dots.iter().map(dot_value).collect())
}

fn dots_from(value: &Value) -> Result<BTreeSet<Dot>> {
    match value {
        Value::Array(items) => items.iter().map(dot_from).collect(),
        _ => Err(PatchError::Malformed("expected array of dots")),
    }
}

/// One CRDT mutation. A [`Patch`] is an ordered sequence of these.
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    /// Adds a node, tagged by its unique add-dot.
    NodeAdd {
        /// The node being added.
        node: NodeId,
        /// The dot tagging this add.
        dot: Dot,
    },
    /// Removes a node, cancelling exactly the add-dots the remover observed.
    NodeRemove {
        /// The node being removed.
        node: NodeId,
        /// The add-dots this remove cancels.
        observed_dots: BTreeSet<Dot>,
    },
    /// Adds a directed labeled edge, tagged by its unique add-dot.
    EdgeAdd {
        /// The edge's source node.
        from: NodeId,
        /// The edge's destination node.
        to: NodeId,
        /// The edge's label (possibly empty).
        label: PropKey,
        /// The dot tagging this add.
        dot: Dot,
    },
    /// Removes an edge, cancelling exactly the add-dots the remover observed.
    EdgeRemove {
        /// The edge's source node.
        from: NodeId,
        /// The edge's destination node.
        to: NodeId,
        /// The edge's label (possibly empty).
        label: PropKey,
        /// The add-dots this remove cancels.
        observed_dots: BTreeSet<Dot>,
    },
    /// Sets a node property. Timestamped at commit time by [`super::event_id::EventId`].
    PropSet {
        /// The node the property is scoped to.
        scope: NodeId,
        /// The property key.
        key: PropKey,
        /// The new value.
        value: Value,
    },
    /// Sets an edge property. Timestamped at commit time.
    EdgePropSet {
        /// The edge's source node.
        from: NodeId,
        /// The edge's destination node.
        to: NodeId,
        /// The edge's label (possibly empty).
        label: PropKey,
        /// The property key.
        key: PropKey,
        /// The new value.
        value: Value,
    },
}

impl Op {
    /// The `EdgeKey` this op addresses, for the two edge op variants.
    pub fn edge_key(&self) -> Option<EdgeKey> {
        match self {
            Op::EdgeAdd { from, to, label, .. } | Op::EdgeRemove { from, to, label, .. } => {
                Some(EdgeKey::new(from.clone(), to.clone(), label.clone()))
            }
            Op::EdgePropSet { from, to, label, .. } => {
                Some(EdgeKey::new(from.clone(), to.clone(), label.clone()))
            }
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Op::NodeAdd { node, dot } => Value::map(vec![
                (text("type"), text("NodeAdd")),
                (text("node"), bytes_of(node)),
                (text("dot"), dot_value(dot)),
            ]),
            Op::NodeRemove { node, observed_dots } => Value::map(vec![
                (text("type"), text("NodeRemove")),
                (text("node"), bytes_of(node)),
                (text("observedDots"), dots_value(observed_dots)),
            ]),
            Op::EdgeAdd { from, to, label, dot } => Value::map(vec![
                (text("type"), text("EdgeAdd")),
                (text("from"), bytes_of(from)),
                (text("to"), bytes_of(to)),
                (text("label"), bytes_of(label)),
                (text("dot"), dot_value(dot)),
            ]),
            Op::EdgeRemove { from, to, label, observed_dots } => Value::map(vec![
                (text("type"), text("EdgeRemove")),
                (text("from"), bytes_of(from)),
                (text("to"), bytes_of(to)),
                (text("label"), bytes_of(label)),
                (text("observedDots"), dots_value(observed_dots)),
            ]),
            Op::PropSet { scope, key, value } => Value::map(vec![
                (text("type"), text("PropSet")),
                (text("scope"), bytes_of(scope)),
                (text("key"), bytes_of(key)),
                (text("value"), value.clone()),
            ]),
            Op::EdgePropSet { from, to, label, key, value } => Value::map(vec![
                (text("type"), text("EdgePropSet")),
                (text("from"), bytes_of(from)),
                (text("to"), bytes_of(to)),
                (text("label"), bytes_of(label)),
                (text("key"), bytes_of(key)),
                (text("value"), value.clone()),
            ]),
        }
    }

    fn from_value(value: &Value) -> Result<Self> {
        let kind = match field(value, "type")? {
            Value::Text(s) => s.as_str(),
            _ => return Err(PatchError::Malformed("op type must be text")),
        };
        match kind {
            "NodeAdd" => Ok(Op::NodeAdd {
                node: ident_from(field(value, "node")?)?,
                dot: dot_from(field(value, "dot")?)?,
            }),
            "NodeRemove" => Ok(Op::NodeRemove {
                node: ident_from(field(value, "node")?)?,
                observed_dots: dots_from(field(value, "observedDots")?)?,
            }),
            "EdgeAdd" => Ok(Op::EdgeAdd {
                from: ident_from(field(value, "from")?)?,
                to: ident_from(field(value, "to")?)?,
                label: ident_from(field(value, "label")?)?,
                dot: dot_from(field(value, "dot")?)?,
            }),
            "EdgeRemove" => Ok(Op::EdgeRemove {
                from: ident_from(field(value, "from")?)?,
                to: ident_from(field(value, "to")?)?,
                label: ident_from(field(value, "label")?)?,
                observed_dots: dots_from(field(value, "observedDots")?)?,
            }),
            "PropSet" => Ok(Op::PropSet {
                scope: ident_from(field(value, "scope")?)?,
                key: ident_from(field(value, "key")?)?,
                value: field(value, "value")?.clone(),
            }),
            "EdgePropSet" => Ok(Op::EdgePropSet {
                from: ident_from(field(value, "from")?)?,
                to: ident_from(field(value, "to")?)?,
                label: ident_from(field(value, "label")?)?,
                key: ident_from(field(value, "key")?)?,
                value: field(value, "value")?.clone(),
            }),
            other => Err(PatchError::UnknownOpType(other.to_owned())),
        }
    }
}

/// A signature envelope attached to a patch. Structural presence is
/// required once signing is enabled; cryptographic verification happens
/// above this crate (the patch builder itself does not sign).
#[derive(Clone, Debug, PartialEq)]
pub struct Signature {
    /// The signing algorithm identifier (e.g. `"ed25519"`).
    pub alg: String,
    /// The raw signature bytes.
    pub sig: Vec<u8>,
}

/// The schema version this crate writes and reads.
pub const PATCH_SCHEMA: u32 = 5;

/// An authored, atomic group of CRDT ops with causal context.
#[derive(Clone, Debug, PartialEq)]
pub struct Patch {
    /// The schema version this patch was written under.
    pub schema: u32,
    /// The writer that authored this patch.
    pub writer: WriterId,
    /// This writer's lamport counter at patch creation.
    pub lamport: u64,
    /// The causal context: the writer's view of every writer's progress.
    pub context: VersionVector,
    /// The ordered ops this patch carries.
    pub ops: Vec<Op>,
    /// Declared read set, for future provenance tracking.
    pub reads: Option<Vec<NodeId>>,
    /// Declared write set, for future provenance tracking.
    pub writes: Option<Vec<NodeId>>,
    /// The signature envelope, if this patch has been signed.
    pub signature: Option<Signature>,
}

impl Patch {
    /// Encodes this patch's canonical `Value` form.
    pub fn to_value(&self) -> Value {
        let mut entries = vec![
            (text("schema"), Value::Int(self.schema as i64)),
            (text("writer"), writer_value(&self.writer)),
            (text("lamport"), Value::Int(self.lamport as i64)),
            (
                text("context"),
                Value::Array(
                    self.context
                        .iter()
                        .map(|(w, n)| {
                            Value::Array(vec![writer_value(&w), Value::Int(n as i64)])
                        })
                        .collect(),
                ),
            ),
            (
                text("ops"),
                Value::Array(self.ops.iter().map(Op::to_value).collect()),
            ),
        ];
        if let Some(reads) = &self.reads {
            entries.push((text("reads"), Value::Array(reads.iter().map(bytes_of).collect())));
        }
        if let Some(writes) = &self.writes {
            entries.push((text("writes"), Value::Array(writes.iter().map(bytes_of).collect())));
        }
        if let Some(sig) = &self.signature {
            entries.push((
                text("signature"),
                Value::map(vec![
                    (text("alg"), text(sig.alg.clone())),
                    (text("sig"), Value::Bytes(sig.sig.clone())),
                ]),
            ));
        }
        Value::map(entries)
    }

    /// Decodes a patch from its canonical `Value` form.
    pub fn from_value(value: &Value) -> Result<Self> {
        let schema = as_u32(field(value, "schema")?)?;
        if schema > PATCH_SCHEMA {
            return Err(PatchError::SchemaUnsupported { found: schema, supported: PATCH_SCHEMA });
        }
        let writer = writer_from(field(value, "writer")?)?;
        let lamport = as_u64(field(value, "lamport")?)?;
        let mut context = VersionVector::new();
        match field(value, "context")? {
            Value::Array(items) => {
                for item in items {
                    match item {
                        Value::Array(pair) if pair.len() == 2 => {
                            context.update(writer_from(&pair[0])?, as_u64(&pair[1])?);
                        }
                        _ => return Err(PatchError::Malformed("malformed context entry")),
                    }
                }
            }
            _ => return Err(PatchError::Malformed("context must be an array")),
        }
        let ops = match field(value, "ops")? {
            Value::Array(items) => items.iter().map(Op::from_value).collect::<Result<_>>()?,
            _ => return Err(PatchError::Malformed("ops must be an array")),
        };
        let reads = match value.get(&text("reads")) {
            Some(Value::Array(items)) => {
                Some(items.iter().map(ident_from).collect::<Result<_>>()?)
            }
            _ => None,
        };
        let writes = match value.get(&text("writes")) {
            Some(Value::Array(items)) => {
                Some(items.iter().map(ident_from).collect::<Result<_>>()?)
            }
            _ => None,
        };
        let signature = match value.get(&text("signature")) {
            Some(sig_value) => {
                let alg = match field(sig_value, "alg")? {
                    Value::Text(s) => s.clone(),
                    _ => return Err(PatchError::Malformed("signature alg must be text")),
                };
                let sig = match field(sig_value, "sig")? {
                    Value::Bytes(b) => b.clone(),
                    _ => return Err(PatchError::Malformed("signature sig must be bytes")),
                };
                Some(Signature { alg, sig })
            }
            None => None,
        };
        Ok(Patch {
            schema,
            writer,
            lamport,
            context,
            ops,
            reads,
            writes,
            signature,
        })
    }

    /// Encodes this patch to its canonical bytes, ready to be written as a
    /// blob.
    pub fn encode(&self) -> Vec<u8> {
        warp_codec::encode(&self.to_value())
    }

    /// Decodes a patch from the canonical bytes of a blob.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value = warp_codec::decode(bytes).map_err(|_| PatchError::Malformed("not valid canonical codec bytes"))?;
        Self::from_value(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(s: &str) -> Ident {
        Ident::new(s.as_bytes().to_vec()).unwrap()
    }

    fn writer(b: u8) -> WriterId {
        WriterId::from_bytes([b; 32])
    }

    #[test]
    fn patch_round_trips_through_the_codec() {
        let mut context = VersionVector::new();
        context.update(writer(1), 3);
        let patch = Patch {
            schema: PATCH_SCHEMA,
            writer: writer(1),
            lamport: 4,
            context,
            ops: vec![
                Op::NodeAdd {
                    node: ident("u:a"),
                    dot: Dot::new(writer(1), 4),
                },
                Op::PropSet {
                    scope: ident("u:a"),
                    key: ident("name"),
                    value: Value::Text("alice".to_owned()),
                },
            ],
            reads: None,
            writes: None,
            signature: None,
        };
        let bytes = patch.encode();
        let decoded = Patch::decode(&bytes).unwrap();
        assert_eq!(decoded, patch);
    }

    #[test]
    fn unknown_op_type_is_rejected() {
        let value = Value::map(vec![(text("type"), text("Bogus"))]);
        assert!(matches!(
            Op::from_value(&value),
            Err(PatchError::UnknownOpType(_))
        ));
    }

    #[test]
    fn signature_envelope_round_trips() {
        let patch = Patch {
            schema: PATCH_SCHEMA,
            writer: writer(2),
            lamport: 1,
            context: VersionVector::new(),
            ops: vec![],
            reads: None,
            writes: None,
            signature: Some(Signature {
                alg: "ed25519".to_owned(),
                sig: vec![9; 64],
            }),
        };
        let decoded = Patch::decode(&patch.encode()).unwrap();
        assert_eq!(decoded.signature, patch.signature);
    }
}
