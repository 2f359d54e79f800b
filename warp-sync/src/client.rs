//! The client side of a sync exchange: validate a peer's response against
//! the DoS caps, gate it through the trust chain, cross-check content
//! addressing, and apply it under CAS.

use crate::caps::DoSCaps;
use crate::error::{Result, SyncError};
use crate::message::SyncResponse;
use std::collections::{BTreeMap, BTreeSet};
use warp_crdt::WriterId;
use warp_store::{CommitRequest, ObjectStore, RefLayout, StoreError, TreeEntry};
use warp_trust::GateMode;

/// What happened when a [`SyncResponse`] was applied, so a caller holding
/// cached derived state (materialized views, indexes) knows what to
/// invalidate.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncApplyReport {
    /// Writers whose chains actually advanced.
    pub writers_advanced: BTreeSet<WriterId>,
    /// The new tip committed for each advanced writer.
    pub new_tips: BTreeMap<WriterId, warp_crypto::Oid>,
}

/// Validates, trust-gates and applies a [`SyncResponse`] to `store`.
///
/// On any rejection (cap violation, untrusted writer under `Enforce`,
/// divergent history, or a losing CAS race) local state is left untouched:
/// either nothing has been written yet, or the one write that failed was
/// the last thing attempted.
pub fn apply_response(
    store: &dyn ObjectStore,
    graph: &str,
    response: &SyncResponse,
    caps: &DoSCaps,
    gate_mode: GateMode,
) -> Result<SyncApplyReport> {
    response.validate(caps)?;

    let writers_applied: BTreeSet<WriterId> = response.patches.iter().map(|e| e.writer_id).collect();
    let verdict = warp_trust::evaluate(store, graph, gate_mode, &writers_applied);
    if !verdict.allowed {
        return Err(SyncError::UntrustedWriter(verdict.untrusted));
    }

    let mut per_writer: BTreeMap<WriterId, Vec<&crate::message::PatchEnvelope>> = BTreeMap::new();
    for envelope in &response.patches {
        per_writer.entry(envelope.writer_id).or_default().push(envelope);
    }

    let mut report = SyncApplyReport::default();
    for (writer, envelopes) in per_writer {
        let ref_name = RefLayout::writer(graph, &writer.to_string());
        let mut expected = store.read_ref(&ref_name)?;
        for envelope in envelopes {
            let blob_oid = store.write_blob(&envelope.patch.encode())?;
            let tree_oid = store.write_tree(&[TreeEntry::blob("patch.cbor", blob_oid)])?;
            let parents: Vec<_> = expected.into_iter().collect();
            let commit_oid = store.commit(CommitRequest {
                tree: tree_oid,
                parents,
                message: format!("sync patch from {writer}"),
            })?;
            if commit_oid != envelope.sha {
                return Err(SyncError::DivergentHistory { claimed: envelope.sha, rebuilt: commit_oid });
            }
            match store.compare_and_swap_ref(&ref_name, commit_oid, expected) {
                Ok(()) => {}
                Err(StoreError::CasConflict { expected: e, actual, .. }) => {
                    return Err(SyncError::Conflict { expected: e, actual });
                }
                Err(other) => return Err(SyncError::Store(other)),
            }
            expected = Some(commit_oid);
        }
        report.writers_advanced.insert(writer);
        if let Some(tip) = expected {
            report.new_tips.insert(writer, tip);
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::PatchEnvelope;
    use crate::peer::handle_request;
    use crate::message::SyncRequest;
    use warp_crdt::{PatchBuilder, State, VersionVector};
    use warp_store::memory::MemoryStore;

    fn writer(b: u8) -> WriterId {
        WriterId::from_bytes([b; 32])
    }

    fn seed_writer_patch(store: &MemoryStore, graph: &str, w: WriterId, lamport: u64, node: &str) -> warp_crypto::Oid {
        let base_state = State::new();
        let mut builder = PatchBuilder::new(graph, w, lamport, &base_state, VersionVector::new());
        builder.add_node(node).unwrap();
        let sha = builder.commit(store).unwrap();
        let ref_name = RefLayout::writer(graph, &w.to_string());
        let current = store.read_ref(&ref_name).unwrap();
        store.compare_and_swap_ref(&ref_name, sha, current).unwrap();
        sha
    }

    #[test]
    fn apply_response_advances_the_local_writer_ref() {
        let peer_store = MemoryStore::new();
        let sha = seed_writer_patch(&peer_store, "g", writer(1), 1, "a");
        let request = SyncRequest::new(BTreeMap::new());
        let response = handle_request(&peer_store, "g", &request, &DoSCaps::default()).unwrap();

        let local_store = MemoryStore::new();
        let report = apply_response(&local_store, "g", &response, &DoSCaps::default(), GateMode::Off).unwrap();
        assert!(report.writers_advanced.contains(&writer(1)));
        assert_eq!(
            local_store.read_ref(&RefLayout::writer("g", &writer(1).to_string())).unwrap(),
            Some(sha)
        );
    }

    #[test]
    fn apply_response_is_idempotent_once_fully_caught_up() {
        let peer_store = MemoryStore::new();
        seed_writer_patch(&peer_store, "g", writer(1), 1, "a");
        let request = SyncRequest::new(BTreeMap::new());
        let response = handle_request(&peer_store, "g", &request, &DoSCaps::default()).unwrap();

        let local_store = MemoryStore::new();
        apply_response(&local_store, "g", &response, &DoSCaps::default(), GateMode::Off).unwrap();

        let mut frontier = BTreeMap::new();
        frontier.insert(writer(1), response.frontier[&writer(1)]);
        let second_request = SyncRequest::new(frontier);
        let second_response = handle_request(&peer_store, "g", &second_request, &DoSCaps::default()).unwrap();
        assert!(second_response.patches.is_empty());
        let report = apply_response(&local_store, "g", &second_response, &DoSCaps::default(), GateMode::Off).unwrap();
        assert!(report.writers_advanced.is_empty());
    }

    #[test]
    fn enforce_mode_rejects_untrusted_writers_and_leaves_state_untouched() {
        let peer_store = MemoryStore::new();
        seed_writer_patch(&peer_store, "g", writer(1), 1, "a");
        let request = SyncRequest::new(BTreeMap::new());
        let response = handle_request(&peer_store, "g", &request, &DoSCaps::default()).unwrap();

        let local_store = MemoryStore::new();
        let result = apply_response(&local_store, "g", &response, &DoSCaps::default(), GateMode::Enforce);
        assert!(matches!(result, Err(SyncError::UntrustedWriter(_))));
        assert_eq!(local_store.read_ref(&RefLayout::writer("g", &writer(1).to_string())).unwrap(), None);
    }

    #[test]
    fn a_tampered_claimed_sha_is_rejected_as_divergent_history() {
        let peer_store = MemoryStore::new();
        seed_writer_patch(&peer_store, "g", writer(1), 1, "a");
        let request = SyncRequest::new(BTreeMap::new());
        let mut response = handle_request(&peer_store, "g", &request, &DoSCaps::default()).unwrap();
        response.patches[0] = PatchEnvelope {
            sha: warp_crypto::Oid::hash(b"not-the-real-commit"),
            ..response.patches[0].clone()
        };

        let local_store = MemoryStore::new();
        let result = apply_response(&local_store, "g", &response, &DoSCaps::default(), GateMode::Off);
        assert!(matches!(result, Err(SyncError::DivergentHistory { .. })));
    }

    #[test]
    fn a_concurrently_advanced_local_ref_surfaces_a_conflict() {
        let peer_store = MemoryStore::new();
        seed_writer_patch(&peer_store, "g", writer(1), 1, "a");
        let request = SyncRequest::new(BTreeMap::new());
        let response = handle_request(&peer_store, "g", &request, &DoSCaps::default()).unwrap();

        let local_store = MemoryStore::new();
        // Simulate a local writer already having raced ahead on this ref
        // with unrelated content before the sync apply lands.
        let base_state = State::new();
        let mut builder = PatchBuilder::new("g", writer(1), 1, &base_state, VersionVector::new());
        builder.add_node("local-only").unwrap();
        let local_sha = builder.commit(&local_store).unwrap();
        local_store
            .compare_and_swap_ref(&RefLayout::writer("g", &writer(1).to_string()), local_sha, None)
            .unwrap();

        let result = apply_response(&local_store, "g", &response, &DoSCaps::default(), GateMode::Off);
        assert!(matches!(result, Err(SyncError::DivergentHistory { .. }) | Err(SyncError::Conflict { .. })));
    }
}
