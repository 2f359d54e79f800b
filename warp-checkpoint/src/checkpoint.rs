//! The [`Checkpoint`] record: a serialized state plus the frontier that
//! produced it.

use std::collections::BTreeMap;
use thiserror::Error;
use warp_codec::Value;
use warp_crdt::{PatchError, State, WriterId};
use warp_crypto::Oid;

/// Errors raised while decoding a persisted checkpoint.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// A required field was missing or malformed.
    #[error("malformed checkpoint field: {0}")]
    Malformed(&'static str),
    /// The embedded state failed to decode.
    #[error("malformed checkpoint state: {0}")]
    State(#[from] PatchError),
    /// The checkpoint's own `schema` field is newer than this build supports.
    #[error("checkpoint schema {found} is newer than the {supported} this build supports")]
    SchemaUnsupported {
        /// The schema version found on the wire.
        found: u32,
        /// The newest schema version this build can read.
        supported: u32,
    },
}

/// The schema version this crate writes and reads for checkpoints.
pub const CHECKPOINT_SCHEMA: u32 = 1;

/// A persisted snapshot: `{schema, state, patchHeads}`.
///
/// `patch_heads` identifies, per writer, the commit sha whose folding (in
/// combination with every other writer's listed head) produced `state`.
/// Loading a checkpoint and then folding only the patches strictly newer
/// than these heads reproduces the same state a cold fold of every patch
/// ever written would.
#[derive(Clone, Debug, PartialEq)]
pub struct Checkpoint {
    /// The schema version this checkpoint was written under.
    pub schema: u32,
    /// The materialized state at checkpoint time.
    pub state: State,
    /// Per-writer commit sha the checkpoint was built from.
    pub patch_heads: BTreeMap<WriterId, Oid>,
}

fn text(s: &str) -> Value {
    Value::Text(s.to_owned())
}

impl Checkpoint {
    /// Builds a checkpoint record from a state and the frontier it was
    /// folded up to.
    pub fn new(state: State, patch_heads: BTreeMap<WriterId, Oid>) -> Self {
        Self {
            schema: CHECKPOINT_SCHEMA,
            state,
            patch_heads,
        }
    }

    /// Encodes this checkpoint to its canonical `Value` form.
    pub fn to_value(&self) -> Value {
        Value::map(vec![
            (text("schema"), Value::Int(self.schema as i64)),
            (text("state"), self.state.to_full_value()),
            (
                text("patchHeads"),
                Value::Array(
                    self.patch_heads
                        .iter()
                        .map(|(w, sha)| {
                            Value::Array(vec![
                                Value::Bytes(w.as_bytes().to_vec()),
                                Value::Bytes(sha.as_bytes().to_vec()),
                            ])
                        })
                        .collect(),
                ),
            ),
        ])
    }

    /// Decodes a checkpoint from its canonical `Value` form.
    pub fn from_value(value: &Value) -> Result<Self, CheckpointError> {
        let schema = match value.get(&text("schema")) {
            Some(Value::Int(n)) if *n >= 0 => *n as u32,
            _ => return Err(CheckpointError::Malformed("schema")),
        };
        if schema > CHECKPOINT_SCHEMA {
            return Err(CheckpointError::SchemaUnsupported { found: schema, supported: CHECKPOINT_SCHEMA });
        }
        let state_value = value
            .get(&text("state"))
            .ok_or(CheckpointError::Malformed("state"))?;
        let state = State::from_full_value(state_value)?;
        let mut patch_heads = BTreeMap::new();
        match value.get(&text("patchHeads")) {
            Some(Value::Array(items)) => {
                for item in items {
                    match item {
                        Value::Array(pair) if pair.len() == 2 => {
                            let writer = match &pair[0] {
                                Value::Bytes(b) if b.len() == 32 => {
                                    let mut arr = [0u8; 32];
                                    arr.copy_from_slice(b);
                                    WriterId::from_bytes(arr)
                                }
                                _ => return Err(CheckpointError::Malformed("patchHeads writer")),
                            };
                            let sha = match &pair[1] {
                                Value::Bytes(b) if b.len() == 32 => {
                                    let mut arr = [0u8; 32];
                                    arr.copy_from_slice(b);
                                    Oid::from_bytes(arr)
                                }
                                _ => return Err(CheckpointError::Malformed("patchHeads sha")),
                            };
                            patch_heads.insert(writer, sha);
                        }
                        _ => return Err(CheckpointError::Malformed("patchHeads entry")),
                    }
                }
            }
            _ => return Err(CheckpointError::Malformed("patchHeads")),
        }
        Ok(Checkpoint {
            schema,
            state,
            patch_heads,
        })
    }

    /// Encodes this checkpoint to bytes, ready to be written as the
    /// `checkpoint.cbor` blob.
    pub fn encode(&self) -> Vec<u8> {
        warp_codec::encode(&self.to_value())
    }

    /// Decodes a checkpoint from the bytes of a `checkpoint.cbor` blob.
    pub fn decode(bytes: &[u8]) -> Result<Self, CheckpointError> {
        let value = warp_codec::decode(bytes)
            .map_err(|_| CheckpointError::Malformed("not valid canonical codec bytes"))?;
        Self::from_value(&value)
    }
}
