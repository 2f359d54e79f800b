//! The two sync wire messages, their canonical encoding, and the DoS-cap
//! validation every inbound response is subject to before a single patch
//! is applied.

use crate::caps::DoSCaps;
use crate::error::{Result, SyncError};
use std::collections::BTreeMap;
use warp_codec::Value;
use warp_crdt::{Patch, WriterId};
use warp_crypto::Oid;

fn text(s: &str) -> Value {
    Value::Text(s.to_owned())
}

fn frontier_to_value(frontier: &BTreeMap<WriterId, Oid>) -> Value {
    Value::Array(
        frontier
            .iter()
            .map(|(w, sha)| {
                Value::Array(vec![Value::Bytes(w.as_bytes().to_vec()), Value::Bytes(sha.as_bytes().to_vec())])
            })
            .collect(),
    )
}

fn frontier_from_value(value: &Value) -> Result<BTreeMap<WriterId, Oid>> {
    let mut frontier = BTreeMap::new();
    match value {
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Array(pair) if pair.len() == 2 => {
                        let writer = match &pair[0] {
                            Value::Bytes(b) if b.len() == 32 => {
                                let mut arr = [0u8; 32];
                                arr.copy_from_slice(b);
                                WriterId::from_bytes(arr)
                            }
                            _ => return Err(SyncError::Malformed("frontier writer")),
                        };
                        let sha = match &pair[1] {
                            Value::Bytes(b) if b.len() == 32 => {
                                let mut arr = [0u8; 32];
                                arr.copy_from_slice(b);
                                Oid::from_bytes(arr)
                            }
                            _ => return Err(SyncError::Malformed("frontier sha")),
                        };
                        frontier.insert(writer, sha);
                    }
                    _ => return Err(SyncError::Malformed("frontier entry")),
                }
            }
        }
        _ => return Err(SyncError::Malformed("frontier")),
    }
    Ok(frontier)
}

/// `sync-request { type: "sync-request", frontier }`: the caller's claimed
/// causal cut, used by the peer to compute what it is missing.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncRequest {
    /// The requester's locally known writer tips.
    pub frontier: BTreeMap<WriterId, Oid>,
}

impl SyncRequest {
    /// Builds a request from a frontier.
    pub fn new(frontier: BTreeMap<WriterId, Oid>) -> Self {
        Self { frontier }
    }

    /// Encodes to the canonical `Value` form.
    pub fn to_value(&self) -> Value {
        Value::map(vec![
            (text("type"), text("sync-request")),
            (text("frontier"), frontier_to_value(&self.frontier)),
        ])
    }

    /// Decodes from the canonical `Value` form.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value.get(&text("type")) {
            Some(Value::Text(t)) if t == "sync-request" => {}
            _ => return Err(SyncError::Malformed("type")),
        }
        let frontier = value
            .get(&text("frontier"))
            .ok_or(SyncError::Malformed("frontier"))
            .and_then(frontier_from_value)?;
        Ok(Self { frontier })
    }

    /// Encodes to bytes.
    pub fn encode(&self) -> Vec<u8> {
        warp_codec::encode(&self.to_value())
    }

    /// Decodes from bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value = warp_codec::decode(bytes).map_err(|_| SyncError::Malformed("not valid canonical codec bytes"))?;
        Self::from_value(&value)
    }
}

/// One patch carried in a sync-response, alongside the writer and commit
/// sha it was read from.
#[derive(Clone, Debug, PartialEq)]
pub struct PatchEnvelope {
    /// The writer whose chain this patch belongs to.
    pub writer_id: WriterId,
    /// The commit sha the patch was stored under on the peer.
    pub sha: Oid,
    /// The decoded patch itself.
    pub patch: Patch,
}

impl PatchEnvelope {
    fn to_value(&self) -> Value {
        Value::map(vec![
            (text("writerId"), Value::Bytes(self.writer_id.as_bytes().to_vec())),
            (text("sha"), Value::Bytes(self.sha.as_bytes().to_vec())),
            (text("patch"), self.patch.to_value()),
        ])
    }

    fn from_value(value: &Value) -> Result<Self> {
        let writer_id = match value.get(&text("writerId")) {
            Some(Value::Bytes(b)) if b.len() == 32 => {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(b);
                WriterId::from_bytes(arr)
            }
            _ => return Err(SyncError::Malformed("writerId")),
        };
        let sha = match value.get(&text("sha")) {
            Some(Value::Bytes(b)) if b.len() == 32 => {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(b);
                Oid::from_bytes(arr)
            }
            _ => return Err(SyncError::Malformed("sha")),
        };
        let patch_value = value.get(&text("patch")).ok_or(SyncError::Malformed("patch"))?;
        let patch = Patch::from_value(patch_value)?;
        Ok(Self { writer_id, sha, patch })
    }
}

/// `sync-response { type: "sync-response", frontier, patches }`: the
/// peer's current frontier plus every patch the requester was missing.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncResponse {
    /// The peer's frontier as of this response.
    pub frontier: BTreeMap<WriterId, Oid>,
    /// Patches the requester was missing, writer-chronological per writer.
    pub patches: Vec<PatchEnvelope>,
}

impl SyncResponse {
    /// Builds a response from a frontier and patch list.
    pub fn new(frontier: BTreeMap<WriterId, Oid>, patches: Vec<PatchEnvelope>) -> Self {
        Self { frontier, patches }
    }

    /// Encodes to the canonical `Value` form.
    pub fn to_value(&self) -> Value {
        Value::map(vec![
            (text("type"), text("sync-response")),
            (text("frontier"), frontier_to_value(&self.frontier)),
            (text("patches"), Value::Array(self.patches.iter().map(PatchEnvelope::to_value).collect())),
        ])
    }

    /// Decodes from the canonical `Value` form.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value.get(&text("type")) {
            Some(Value::Text(t)) if t == "sync-response" => {}
            _ => return Err(SyncError::Malformed("type")),
        }
        let frontier = value
            .get(&text("frontier"))
            .ok_or(SyncError::Malformed("frontier"))
            .and_then(frontier_from_value)?;
        let patches = match value.get(&text("patches")) {
            Some(Value::Array(items)) => {
                items.iter().map(PatchEnvelope::from_value).collect::<Result<Vec<_>>>()?
            }
            _ => return Err(SyncError::Malformed("patches")),
        };
        Ok(Self { frontier, patches })
    }

    /// Encodes to bytes.
    pub fn encode(&self) -> Vec<u8> {
        warp_codec::encode(&self.to_value())
    }

    /// Decodes from bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value = warp_codec::decode(bytes).map_err(|_| SyncError::Malformed("not valid canonical codec bytes"))?;
        Self::from_value(&value)
    }

    /// Validates this response's shape against `caps` before a single
    /// patch is applied: body size, writer-in-frontier count, patch
    /// count, and per-patch op count.
    pub fn validate(&self, caps: &DoSCaps) -> Result<()> {
        let body_len = self.encode().len();
        if body_len > caps.max_body_bytes {
            return Err(SyncError::BodyTooLarge { actual: body_len, limit: caps.max_body_bytes });
        }
        if self.frontier.len() > caps.max_writers_in_frontier {
            return Err(SyncError::TooManyWriters {
                actual: self.frontier.len(),
                limit: caps.max_writers_in_frontier,
            });
        }
        if self.patches.len() > caps.max_patches {
            return Err(SyncError::TooManyPatches { actual: self.patches.len(), limit: caps.max_patches });
        }
        for envelope in &self.patches {
            if envelope.patch.ops.len() > caps.max_ops_per_patch {
                return Err(SyncError::TooManyOps {
                    actual: envelope.patch.ops.len(),
                    limit: caps.max_ops_per_patch,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp_crdt::{Dot, Ident, VersionVector};

    fn writer(b: u8) -> WriterId {
        WriterId::from_bytes([b; 32])
    }

    fn sample_patch() -> Patch {
        Patch {
            schema: warp_crdt::PATCH_SCHEMA,
            writer: writer(1),
            lamport: 1,
            context: VersionVector::new(),
            ops: vec![warp_crdt::Op::NodeAdd {
                node: Ident::new(b"a".to_vec()).unwrap(),
                dot: Dot::new(writer(1), 1),
            }],
            reads: None,
            writes: None,
            signature: None,
        }
    }

    #[test]
    fn request_round_trips() {
        let mut frontier = BTreeMap::new();
        frontier.insert(writer(1), Oid::hash(b"c1"));
        let request = SyncRequest::new(frontier);
        let decoded = SyncRequest::decode(&request.encode()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn response_round_trips() {
        let mut frontier = BTreeMap::new();
        frontier.insert(writer(1), Oid::hash(b"c1"));
        let envelope = PatchEnvelope { writer_id: writer(1), sha: Oid::hash(b"c1"), patch: sample_patch() };
        let response = SyncResponse::new(frontier, vec![envelope]);
        let decoded = SyncResponse::decode(&response.encode()).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn validate_rejects_too_many_patches() {
        let envelope = PatchEnvelope { writer_id: writer(1), sha: Oid::hash(b"c1"), patch: sample_patch() };
        let response = SyncResponse::new(BTreeMap::new(), vec![envelope.clone(), envelope]);
        let caps = DoSCaps { max_patches: 1, ..DoSCaps::default() };
        assert!(matches!(response.validate(&caps), Err(SyncError::TooManyPatches { .. })));
    }

    #[test]
    fn validate_rejects_too_many_ops_in_one_patch() {
        let mut patch = sample_patch();
        patch.ops.push(patch.ops[0].clone());
        let envelope = PatchEnvelope { writer_id: writer(1), sha: Oid::hash(b"c1"), patch };
        let response = SyncResponse::new(BTreeMap::new(), vec![envelope]);
        let caps = DoSCaps { max_ops_per_patch: 1, ..DoSCaps::default() };
        assert!(matches!(response.validate(&caps), Err(SyncError::TooManyOps { .. })));
    }

    #[test]
    fn validate_rejects_too_many_writers_in_frontier() {
        let mut frontier = BTreeMap::new();
        frontier.insert(writer(1), Oid::hash(b"c1"));
        frontier.insert(writer(2), Oid::hash(b"c2"));
        let response = SyncResponse::new(frontier, Vec::new());
        let caps = DoSCaps { max_writers_in_frontier: 1, ..DoSCaps::default() };
        assert!(matches!(response.validate(&caps), Err(SyncError::TooManyWriters { .. })));
    }
}
