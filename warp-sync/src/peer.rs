//! The peer side of a sync exchange: given a requester's frontier, find
//! every patch it is missing and assemble a response.

use crate::caps::DoSCaps;
use crate::error::{Result, SyncError};
use crate::message::{PatchEnvelope, SyncRequest, SyncResponse};
use std::collections::BTreeMap;
use warp_crdt::{Patch, WriterId};
use warp_store::{ObjectStore, Oid, RefLayout};

/// Answers a [`SyncRequest`] against this store's current state, walking
/// each writer's chain from its tip back to (but excluding) the
/// requester's claimed frontier entry, or to the chain root if the
/// requester had none.
pub fn handle_request(
    store: &dyn ObjectStore,
    graph: &str,
    request: &SyncRequest,
    caps: &DoSCaps,
) -> Result<SyncResponse> {
    let prefix = RefLayout::writers_prefix(graph);
    let refs = store.list_refs(&prefix)?;

    let mut frontier = BTreeMap::new();
    let mut patches = Vec::new();

    for ref_name in &refs {
        let Some(writer_name) = RefLayout::writer_id_from_ref(graph, ref_name) else {
            continue;
        };
        let writer: WriterId = writer_name
            .parse()
            .map_err(|_| SyncError::Malformed("writer ref name is not a valid writer id"))?;
        let Some(tip) = store.read_ref(ref_name)? else {
            continue;
        };
        frontier.insert(writer, tip);

        let stop = request.frontier.get(&writer).copied();
        let chain = walk_chain_since(store, tip, stop)?;
        for (sha, patch) in chain {
            patches.push(PatchEnvelope { writer_id: writer, sha, patch });
        }
    }

    let response = SyncResponse::new(frontier, patches);
    response.validate(caps)?;
    Ok(response)
}

/// Walks a writer's chain from `tip` back to (but excluding) `stop`,
/// returning `(sha, patch)` pairs oldest-first.
fn walk_chain_since(
    store: &dyn ObjectStore,
    tip: Oid,
    stop: Option<Oid>,
) -> Result<Vec<(Oid, Patch)>> {
    let mut collected = Vec::new();
    let mut current = Some(tip);
    while let Some(sha) = current {
        if Some(sha) == stop {
            break;
        }
        let tree_oid = store.get_commit_tree(&sha)?;
        let entries = store.read_tree(&tree_oid)?;
        let blob_oid = entries
            .iter()
            .find(|e| e.name == "patch.cbor")
            .map(|e| e.oid)
            .ok_or(SyncError::MissingPatchBlob(sha))?;
        let bytes = store.read_blob(&blob_oid)?;
        let patch = Patch::decode(&bytes)?;
        collected.push((sha, patch));
        let info = store.get_node_info(&sha)?;
        current = info.parents.first().copied();
    }
    collected.reverse();
    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;
    use warp_crdt::{PatchBuilder, State, VersionVector};
    use warp_store::memory::MemoryStore;

    fn writer(b: u8) -> WriterId {
        WriterId::from_bytes([b; 32])
    }

    #[test]
    fn responds_with_everything_when_requester_has_an_empty_frontier() {
        let store = MemoryStore::new();
        let base_state = State::new();
        let mut builder = PatchBuilder::new("g", writer(1), 1, &base_state, VersionVector::new());
        builder.add_node("a").unwrap();
        let sha = builder.commit(&store).unwrap();
        store.update_ref(&RefLayout::writer("g", &writer(1).to_string()), sha).unwrap();

        let request = SyncRequest::new(Map::new());
        let response = handle_request(&store, "g", &request, &DoSCaps::default()).unwrap();
        assert_eq!(response.patches.len(), 1);
        assert_eq!(response.patches[0].sha, sha);
        assert_eq!(response.frontier.get(&writer(1)), Some(&sha));
    }

    #[test]
    fn responds_with_only_the_delta_past_the_requesters_frontier() {
        let store = MemoryStore::new();
        let base_state = State::new();
        let mut builder1 = PatchBuilder::new("g", writer(1), 1, &base_state, VersionVector::new());
        builder1.add_node("a").unwrap();
        let sha1 = builder1.commit(&store).unwrap();
        store.update_ref(&RefLayout::writer("g", &writer(1).to_string()), sha1).unwrap();

        let mut builder2 = PatchBuilder::new("g", writer(1), 2, &base_state, VersionVector::new());
        builder2.add_node("b").unwrap();
        let sha2 = builder2.commit(&store).unwrap();
        store
            .compare_and_swap_ref(&RefLayout::writer("g", &writer(1).to_string()), sha2, Some(sha1))
            .unwrap();

        let mut frontier = Map::new();
        frontier.insert(writer(1), sha1);
        let request = SyncRequest::new(frontier);
        let response = handle_request(&store, "g", &request, &DoSCaps::default()).unwrap();
        assert_eq!(response.patches.len(), 1);
        assert_eq!(response.patches[0].sha, sha2);
    }

    #[test]
    fn nothing_new_yields_an_empty_patch_list() {
        let store = MemoryStore::new();
        let base_state = State::new();
        let mut builder = PatchBuilder::new("g", writer(1), 1, &base_state, VersionVector::new());
        builder.add_node("a").unwrap();
        let sha = builder.commit(&store).unwrap();
        store.update_ref(&RefLayout::writer("g", &writer(1).to_string()), sha).unwrap();

        let mut frontier = Map::new();
        frontier.insert(writer(1), sha);
        let request = SyncRequest::new(frontier);
        let response = handle_request(&store, "g", &request, &DoSCaps::default()).unwrap();
        assert!(response.patches.is_empty());
    }

    #[test]
    fn caps_reject_an_oversized_would_be_response() {
        let store = MemoryStore::new();
        let base_state = State::new();
        let mut builder = PatchBuilder::new("g", writer(1), 1, &base_state, VersionVector::new());
        builder.add_node("a").unwrap();
        let sha = builder.commit(&store).unwrap();
        store.update_ref(&RefLayout::writer("g", &writer(1).to_string()), sha).unwrap();

        let request = SyncRequest::new(Map::new());
        let caps = DoSCaps { max_patches: 0, ..DoSCaps::default() };
        assert!(matches!(
            handle_request(&store, "g", &request, &caps),
            Err(SyncError::TooManyPatches { .. })
        ));
    }
}
