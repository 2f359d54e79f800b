//! [`TrustChainService`]: CAS-driven append and chain verification over
//! `refs/warp/<graph>/trust/records`.

use crate::error::{Result, TrustError};
use crate::policy::ChainState;
use crate::record::{TrustRecord, TrustRecordType};
use std::collections::{BTreeSet, HashSet};
use warp_codec::Value;
use warp_crypto::{verify_signature, Oid};
use warp_store::{CommitRequest, ObjectStore, RefLayout, StoreError, TreeEntry};

/// A single append makes at most this many CAS attempts before giving up.
pub const MAX_CAS_ATTEMPTS: u32 = 3;

fn text(s: &str) -> Value {
    Value::Text(s.to_owned())
}

/// Appends to and reads the trust chain for one graph.
pub struct TrustChainService<'a> {
    store: &'a dyn ObjectStore,
    graph: String,
}

impl<'a> TrustChainService<'a> {
    /// Builds a chain service bound to `graph` on `store`.
    pub fn new(store: &'a dyn ObjectStore, graph: impl Into<String>) -> Self {
        Self { store, graph: graph.into() }
    }

    /// The chain tip commit, or `None` if the chain is empty.
    pub fn tip(&self) -> Result<Option<Oid>> {
        Ok(self.store.read_ref(&RefLayout::trust_records(&self.graph))?)
    }

    fn record_at(&self, commit: Oid) -> Result<TrustRecord> {
        let tree_oid = self.store.get_commit_tree(&commit)?;
        let entries = self.store.read_tree(&tree_oid)?;
        let blob_oid = entries
            .iter()
            .find(|e| e.name == "record.cbor")
            .map(|e| e.oid)
            .ok_or(TrustError::MissingRecordBlob(commit))?;
        let bytes = self.store.read_blob(&blob_oid)?;
        TrustRecord::decode(&bytes)
    }

    /// Appends `record` as the new chain tip. Validates recordId integrity
    /// (I7) and the prev-link against the current tip (I6), then commits
    /// and CAS-updates the ref, retrying up to [`MAX_CAS_ATTEMPTS`] times
    /// when the ref is observed unchanged between attempts (lock
    /// contention rather than a real concurrent appender).
    pub fn append(&self, record: &TrustRecord) -> Result<Oid> {
        if record.record_id != record.compute_record_id() {
            return Err(TrustError::IdMismatch);
        }

        let ref_name = RefLayout::trust_records(&self.graph);
        let expected_tip = self.store.read_ref(&ref_name)?;
        let expected_prev = match expected_tip {
            Some(commit) => Some(self.record_at(commit)?.record_id),
            None => None,
        };
        if record.prev != expected_prev {
            return Err(TrustError::PrevMismatch);
        }

        let blob_oid = self.store.write_blob(&record.encode())?;
        let tree_oid = self.store.write_tree(&[TreeEntry::blob("record.cbor", blob_oid)])?;
        let parents = expected_tip.into_iter().collect();
        let commit_oid = self.store.commit(CommitRequest {
            tree: tree_oid,
            parents,
            message: format!("trust record {:?}", record.record_id),
        })?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.compare_and_swap_ref(&ref_name, commit_oid, expected_tip) {
                Ok(()) => return Ok(commit_oid),
                Err(StoreError::CasConflict { actual, .. }) => {
                    if actual == expected_tip {
                        if attempt >= MAX_CAS_ATTEMPTS {
                            return Err(TrustError::CasExhausted { attempts: attempt });
                        }
                        continue;
                    }
                    return Err(TrustError::CasConflict { expected: expected_tip, actual });
                }
                Err(other) => return Err(TrustError::Store(other)),
            }
        }
    }

    /// A higher-level append that survives genuine concurrent appenders:
    /// on `CAS_CONFLICT`, rewrites `record.prev` to the observed tip's
    /// recordId, invokes `resign` to recompute the signature over the
    /// rebased record, recomputes `recordId`, and retries. Exhaustion past
    /// `max_retries` raises `CAS_EXHAUSTED`.
    ///
    /// Both a mid-call `CAS_CONFLICT` (the ref moved between this call's
    /// own read and its CAS) and an upfront `PrevMismatch` (the record was
    /// built against a tip that had already moved before this call even
    /// started) are treated as the same kind of staleness here: either way
    /// the fix is to rebase onto the current tip and resign.
    pub fn append_with_retry<F>(&self, mut record: TrustRecord, max_retries: u32, mut resign: F) -> Result<Oid>
    where
        F: FnMut(&mut TrustRecord),
    {
        let mut attempts = 0;
        loop {
            match self.append(&record) {
                Ok(commit) => return Ok(commit),
                Err(TrustError::CasConflict { .. }) | Err(TrustError::PrevMismatch) => {
                    attempts += 1;
                    if attempts > max_retries {
                        return Err(TrustError::CasExhausted { attempts });
                    }
                    let tip = self.tip()?;
                    record.prev = match tip {
                        Some(commit) => Some(self.record_at(commit)?.record_id),
                        None => None,
                    };
                    resign(&mut record);
                    record.record_id = record.compute_record_id();
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Walks the chain tip-to-root, returning records oldest-first.
    pub fn load_chain(&self) -> Result<Vec<TrustRecord>> {
        let mut records = Vec::new();
        let mut current = self.tip()?;
        while let Some(commit) = current {
            let record = self.record_at(commit)?;
            let info = self.store.get_node_info(&commit)?;
            records.push(record);
            current = info.parents.first().copied();
        }
        records.reverse();
        Ok(records)
    }
}

/// Checks schema/recordId/prev-link consistency (I6, I7) and duplicate
/// recordIds across an ordered (oldest-first) chain. Does not verify
/// cryptographic signatures; see [`verify_chain_signatures`].
pub fn verify_chain_links(records: &[TrustRecord]) -> Result<()> {
    let mut seen: HashSet<Oid> = HashSet::new();
    for (i, record) in records.iter().enumerate() {
        if record.record_id != record.compute_record_id() {
            return Err(TrustError::IdMismatch);
        }
        let expected_prev = if i == 0 { None } else { Some(records[i - 1].record_id) };
        if record.prev != expected_prev {
            return Err(TrustError::PrevMismatch);
        }
        if !seen.insert(record.record_id) {
            return Err(TrustError::DuplicateRecordId);
        }
    }
    Ok(())
}

/// Resolves the key a given record's signature should verify against,
/// using the chain state folded up to (but not including) that record.
///
/// `KEY_ADD` records are the one exception: the key they introduce cannot
/// yet be a member of the active set, so they are verified against the
/// public key embedded in their own payload (a self-signed bootstrap).
/// This also covers the genesis record: out-of-band pinning of that first
/// key is the host's responsibility, not this crate's.
fn resolve_signing_key<'a>(prior: &'a ChainState, record: &'a TrustRecord) -> Option<&'a [u8]> {
    match record.record_type {
        TrustRecordType::KeyAdd => match record.payload.get(&text("publicKey")) {
            Some(Value::Bytes(b)) => Some(b.as_slice()),
            _ => None,
        },
        _ => prior.active_key_for(&record.issuer),
    }
}

/// Verifies links (I6/I7, duplicates) and every record's signature
/// against the key set active at that point in the chain.
pub fn verify_chain_signatures(records: &[TrustRecord]) -> Result<()> {
    verify_chain_links(records)?;
    let mut state = ChainState::default();
    for record in records {
        let key = resolve_signing_key(&state, record).ok_or(TrustError::SignatureInvalid)?;
        verify_signature(key, &record.signing_bytes(), &record.signature.sig)
            .map_err(|_| TrustError::SignatureInvalid)?;
        state.apply(record);
    }
    Ok(())
}

/// Folds `records` and reports which of `writers` are currently trusted.
pub fn evaluate_writers(records: &[TrustRecord], writers: &BTreeSet<warp_crdt::WriterId>) -> crate::policy::TrustedWriters {
    crate::policy::evaluate_writers(records, writers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SignatureEnvelope;
    use ed25519_dalek::{Keypair, SecretKey, Signer};
    use warp_store::memory::MemoryStore;

    fn writer(b: u8) -> warp_crdt::WriterId {
        warp_crdt::WriterId::from_bytes([b; 32])
    }

    fn keypair(seed: u8) -> Keypair {
        let secret = SecretKey::from_bytes(&[seed; 32]).unwrap();
        let public = ed25519_dalek::PublicKey::from(&secret);
        Keypair { secret, public }
    }

    fn signed_key_add(prev: Option<Oid>, keypair: &Keypair) -> TrustRecord {
        let payload = Value::map(vec![
            (text("keyId"), Value::Bytes(b"k1".to_vec())),
            (text("publicKey"), Value::Bytes(keypair.public.to_bytes().to_vec())),
        ]);
        let placeholder = SignatureEnvelope { alg: "ed25519".to_owned(), sig: vec![0u8; 64] };
        let mut record = TrustRecord::new(prev, TrustRecordType::KeyAdd, writer(0), payload, placeholder);
        let sig = keypair.sign(&record.signing_bytes());
        record.signature = SignatureEnvelope { alg: "ed25519".to_owned(), sig: sig.to_bytes().to_vec() };
        record
    }

    #[test]
    fn append_then_load_round_trips() {
        let store = MemoryStore::new();
        let service = TrustChainService::new(&store, "g");
        let kp = keypair(1);
        let record = signed_key_add(None, &kp);
        service.append(&record).unwrap();
        let loaded = service.load_chain().unwrap();
        assert_eq!(loaded, vec![record]);
    }

    #[test]
    fn append_rejects_wrong_prev_link() {
        let store = MemoryStore::new();
        let service = TrustChainService::new(&store, "g");
        let kp = keypair(1);
        let stray_prev = Some(Oid::hash(b"not-the-real-tip"));
        let record = signed_key_add(stray_prev, &kp);
        assert!(matches!(service.append(&record), Err(TrustError::PrevMismatch)));
    }

    #[test]
    fn genesis_key_add_is_self_signed_and_verifies() {
        let kp = keypair(3);
        let record = signed_key_add(None, &kp);
        verify_chain_signatures(&[record]).unwrap();
    }

    #[test]
    fn tampered_signature_fails_chain_verification() {
        let kp = keypair(4);
        let mut record = signed_key_add(None, &kp);
        record.signature.sig[0] ^= 0xFF;
        assert!(matches!(verify_chain_signatures(&[record]), Err(TrustError::SignatureInvalid)));
    }

    #[test]
    fn append_with_retry_rebases_past_a_concurrent_appender() {
        let store = MemoryStore::new();
        let service = TrustChainService::new(&store, "g");
        let kp1 = keypair(1);
        let genesis = signed_key_add(None, &kp1);
        service.append(&genesis).unwrap();

        // Build `record` against the stale genesis prev, then let a
        // concurrent appender land a second record first.
        let kp2 = keypair(2);
        let bind_payload = Value::map(vec![
            (text("writerId"), Value::Bytes(writer(7).as_bytes().to_vec())),
            (text("keyId"), Value::Bytes(b"k1".to_vec())),
        ]);
        let placeholder = SignatureEnvelope { alg: "ed25519".to_owned(), sig: vec![0u8; 64] };
        let record = TrustRecord::new(
            Some(genesis.record_id),
            TrustRecordType::WriterBindAdd,
            writer(0),
            bind_payload,
            placeholder,
        );

        let concurrent = signed_key_add(Some(genesis.record_id), &kp2);
        // This isn't a legal second KEY_ADD at the same prev in a real
        // deployment, but it exercises the rebase path identically: any
        // record landing first advances the tip out from under `record`.
        // We bypass `append`'s own prev check by writing it directly via
        // a second service instance sharing the same store.
        TrustChainService::new(&store, "g").append(&concurrent).unwrap();

        let resigned = service.append_with_retry(record, 2, |r| {
            let sig = kp1.sign(&r.signing_bytes());
            r.signature = SignatureEnvelope { alg: "ed25519".to_owned(), sig: sig.to_bytes().to_vec() };
        });
        assert!(resigned.is_ok());
        let chain = service.load_chain().unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[2].prev, Some(concurrent.record_id));
    }
}
