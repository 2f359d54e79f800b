//! Folds an ordered trust chain into `{keys, writerBindings, policy}` and
//! answers "which writers are currently trusted".

use crate::record::{TrustRecord, TrustRecordType};
use std::collections::{BTreeMap, BTreeSet};
use warp_codec::Value;
use warp_crdt::WriterId;

fn text(s: &str) -> Value {
    Value::Text(s.to_owned())
}

/// A key known to the chain, and whether it has since been revoked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyRecord {
    /// The raw public key bytes (an Ed25519 point, in practice).
    pub public_key: Vec<u8>,
    /// Set once a `KEY_REVOKE` record names this key.
    pub revoked: bool,
}

/// The state obtained by folding a trust chain prefix: every key ever
/// added, the current writer-to-key binding, and the most recent policy
/// payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChainState {
    /// Every key added so far, keyed by its declared `keyId` bytes.
    pub keys: BTreeMap<Vec<u8>, KeyRecord>,
    /// The key each writer is currently bound to, if any. A writer absent
    /// from this map, or mapped to `None`, has no active binding.
    pub writer_bindings: BTreeMap<WriterId, Option<Vec<u8>>>,
    /// The most recently set policy payload, or `Null` if none has been
    /// set yet.
    pub policy: Value,
}

impl ChainState {
    /// Folds one record's effect into this state. Malformed payloads are
    /// ignored rather than rejected here: schema validity was already
    /// established (or not) at append time; evaluation is best-effort
    /// over whatever is actually in the chain.
    pub fn apply(&mut self, record: &TrustRecord) {
        match record.record_type {
            TrustRecordType::KeyAdd => {
                if let (Some(Value::Bytes(key_id)), Some(Value::Bytes(public_key))) = (
                    record.payload.get(&text("keyId")),
                    record.payload.get(&text("publicKey")),
                ) {
                    self.keys.insert(key_id.clone(), KeyRecord { public_key: public_key.clone(), revoked: false });
                }
            }
            TrustRecordType::KeyRevoke => {
                if let Some(Value::Bytes(key_id)) = record.payload.get(&text("keyId")) {
                    if let Some(key) = self.keys.get_mut(key_id) {
                        key.revoked = true;
                    }
                }
            }
            TrustRecordType::WriterBindAdd => {
                if let (Some(writer), Some(Value::Bytes(key_id))) =
                    (writer_from_payload(&record.payload), record.payload.get(&text("keyId")))
                {
                    self.writer_bindings.insert(writer, Some(key_id.clone()));
                }
            }
            TrustRecordType::WriterBindRevoke => {
                if let Some(writer) = writer_from_payload(&record.payload) {
                    self.writer_bindings.insert(writer, None);
                }
            }
            TrustRecordType::PolicySet => {
                if let Some(policy) = record.payload.get(&text("policy")) {
                    self.policy = policy.clone();
                }
            }
        }
    }

    /// The public key bytes currently bound to `writer`, or `None` if
    /// unbound or bound to a revoked key.
    pub fn active_key_for(&self, writer: &WriterId) -> Option<&[u8]> {
        let key_id = self.writer_bindings.get(writer)?.as_ref()?;
        let key = self.keys.get(key_id)?;
        if key.revoked {
            None
        } else {
            Some(&key.public_key)
        }
    }
}

fn writer_from_payload(payload: &Value) -> Option<WriterId> {
    match payload.get(&text("writerId")) {
        Some(Value::Bytes(b)) if b.len() == 32 => {
            let mut arr = [0u8; 32];
            arr.copy_from_slice(b);
            Some(WriterId::from_bytes(arr))
        }
        _ => None,
    }
}

/// Folds an ordered chain (oldest first) into a [`ChainState`].
pub fn fold(records: &[TrustRecord]) -> ChainState {
    let mut state = ChainState::default();
    for record in records {
        state.apply(record);
    }
    state
}

/// The result of evaluating a writer-id set against a folded chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrustedWriters {
    /// Writers currently bound to an unrevoked key.
    pub trusted: BTreeSet<WriterId>,
}

/// Folds `records` and returns which of `writers` are currently trusted.
pub fn evaluate_writers(records: &[TrustRecord], writers: &BTreeSet<WriterId>) -> TrustedWriters {
    let state = fold(records);
    let trusted = writers
        .iter()
        .filter(|w| state.active_key_for(w).is_some())
        .copied()
        .collect();
    TrustedWriters { trusted }
}
