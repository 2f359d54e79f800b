//! [`CheckpointService`]: persistence and incremental resume (component G).

use crate::checkpoint::{Checkpoint, CheckpointError};
use std::collections::BTreeMap;
use thiserror::Error;
use warp_crdt::{PatchRecord, WriterId};
use warp_crdt::Patch;
use warp_store::{CommitRequest, ObjectStore, Oid, RefLayout, StoreError, TreeEntry};

/// Errors raised by checkpoint operations.
#[derive(Debug, Error)]
pub enum CheckpointServiceError {
    /// The checkpoint blob failed to decode.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    /// A patch blob referenced by a writer chain failed to decode.
    #[error("malformed patch blob in writer chain: {0}")]
    Patch(#[from] warp_crdt::PatchError),
    /// The underlying object store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// `compare_and_swap_ref` lost a race updating the checkpoint ref.
    #[error("conflict creating checkpoint: expected {expected:?}, found {actual:?}")]
    Conflict {
        /// The checkpoint tip the caller expected to extend.
        expected: Option<Oid>,
        /// The checkpoint tip actually found at CAS time.
        actual: Option<Oid>,
    },
    /// A writer chain's tree did not carry the expected `patch.cbor` entry.
    #[error("writer chain commit {0} has no patch.cbor entry")]
    MissingPatchBlob(Oid),
}

type Result<T> = std::result::Result<T, CheckpointServiceError>;

/// Creates, loads and incrementally advances checkpoints for a graph.
pub struct CheckpointService<'a> {
    store: &'a dyn ObjectStore,
    graph: String,
}

impl<'a> CheckpointService<'a> {
    /// Builds a checkpoint service bound to `graph` on `store`.
    pub fn new(store: &'a dyn ObjectStore, graph: impl Into<String>) -> Self {
        Self { store, graph: graph.into() }
    }

    /// Persists `checkpoint` as the new latest checkpoint for this graph,
    /// parented on the prior one (if any), and CAS-updates
    /// `refs/warp/<graph>/checkpoints/latest`.
    pub fn create(&self, checkpoint: &Checkpoint) -> Result<Oid> {
        let bytes = checkpoint.encode();
        let blob_oid = self.store.write_blob(&bytes)?;
        let tree_oid = self
            .store
            .write_tree(&[TreeEntry::blob("checkpoint.cbor", blob_oid)])?;
        let ref_name = RefLayout::checkpoint_latest(&self.graph);
        let current_tip = self.store.read_ref(&ref_name)?;
        let parents = current_tip.into_iter().collect();
        let commit_oid = self.store.commit(CommitRequest {
            tree: tree_oid,
            parents,
            message: "checkpoint".to_owned(),
        })?;
        match self
            .store
            .compare_and_swap_ref(&ref_name, commit_oid, current_tip)
        {
            Ok(()) => Ok(commit_oid),
            Err(StoreError::CasConflict { expected, actual, .. }) => {
                Err(CheckpointServiceError::Conflict { expected, actual })
            }
            Err(other) => Err(CheckpointServiceError::Store(other)),
        }
    }

    /// Loads a checkpoint: by explicit commit sha if given, otherwise by
    /// resolving `refs/warp/<graph>/checkpoints/latest`. Returns `None` if
    /// no sha was given and the ref does not exist.
    pub fn load(&self, sha: Option<Oid>) -> Result<Option<Checkpoint>> {
        let commit_sha = match sha {
            Some(sha) => sha,
            None => {
                let ref_name = RefLayout::checkpoint_latest(&self.graph);
                match self.store.read_ref(&ref_name)? {
                    Some(sha) => sha,
                    None => return Ok(None),
                }
            }
        };
        let tree_oid = self.store.get_commit_tree(&commit_sha)?;
        let entries = self.store.read_tree(&tree_oid)?;
        let blob_oid = entries
            .iter()
            .find(|e| e.name == "checkpoint.cbor")
            .map(|e| e.oid)
            .ok_or(CheckpointServiceError::MissingPatchBlob(commit_sha))?;
        let bytes = self.store.read_blob(&blob_oid)?;
        Ok(Some(Checkpoint::decode(&bytes)?))
    }

    /// Returns the delta patches needed to bring `checkpoint` forward to
    /// `frontier`: for each writer in `frontier`, every patch strictly
    /// newer than `checkpoint.patch_heads[writer]` (or the writer's entire
    /// chain, if the checkpoint has no head for that writer), oldest first.
    pub fn load_incremental_from(
        &self,
        checkpoint: &Checkpoint,
        frontier: &BTreeMap<WriterId, Oid>,
    ) -> Result<Vec<PatchRecord>> {
        let mut records = Vec::new();
        for (writer, &tip) in frontier {
            let stop = checkpoint.patch_heads.get(writer).copied();
            if Some(tip) == stop {
                continue;
            }
            let chain = self.walk_chain_since(tip, stop)?;
            records.extend(chain);
        }
        Ok(records)
    }

    /// Walks a writer's chain from `tip` back to (but excluding) `stop`,
    /// or to the chain root if `stop` is `None` or never found, returning
    /// patch records oldest-first.
    fn walk_chain_since(&self, tip: Oid, stop: Option<Oid>) -> Result<Vec<PatchRecord>> {
        let mut collected = Vec::new();
        let mut current = Some(tip);
        while let Some(sha) = current {
            if Some(sha) == stop {
                break;
            }
            let tree_oid = self.store.get_commit_tree(&sha)?;
            let entries = self.store.read_tree(&tree_oid)?;
            let blob_oid = entries
                .iter()
                .find(|e| e.name == "patch.cbor")
                .map(|e| e.oid)
                .ok_or(CheckpointServiceError::MissingPatchBlob(sha))?;
            let bytes = self.store.read_blob(&blob_oid)?;
            let patch = Patch::decode(&bytes)?;
            collected.push(PatchRecord { commit_sha: sha, patch });
            let info = self.store.get_node_info(&sha)?;
            current = info.parents.first().copied();
        }
        collected.reverse();
        Ok(collected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp_crdt::{Dot, Ident, PatchBuilder, State, VersionVector};
    use warp_store::memory::MemoryStore;

    fn writer(b: u8) -> WriterId {
        WriterId::from_bytes([b; 32])
    }

    #[test]
    fn create_then_load_round_trips() {
        let store = MemoryStore::new();
        let service = CheckpointService::new(&store, "g");
        let mut state = State::new();
        state.node_alive.add(Ident::new(b"a".to_vec()).unwrap(), Dot::new(writer(1), 1));
        let mut heads = BTreeMap::new();
        heads.insert(writer(1), Oid::hash(b"c1"));
        let checkpoint = Checkpoint::new(state, heads);
        service.create(&checkpoint).unwrap();
        let loaded = service.load(None).unwrap().unwrap();
        assert_eq!(loaded, checkpoint);
    }

    #[test]
    fn load_returns_none_when_no_checkpoint_exists() {
        let store = MemoryStore::new();
        let service = CheckpointService::new(&store, "g");
        assert!(service.load(None).unwrap().is_none());
    }

    #[test]
    fn incremental_load_returns_only_patches_after_the_checkpoint() {
        let store = MemoryStore::new();
        let base_state = State::new();
        let mut builder = PatchBuilder::new("g", writer(1), 1, &base_state, VersionVector::new());
        builder.add_node("a").unwrap();
        let sha1 = builder.commit(&store).unwrap();

        let mut heads = BTreeMap::new();
        heads.insert(writer(1), sha1);
        let checkpoint = Checkpoint::new(State::new(), heads.clone());
        let service = CheckpointService::new(&store, "g");
        service.create(&checkpoint).unwrap();

        let mut builder2 = PatchBuilder::new("g", writer(1), 2, &base_state, VersionVector::new());
        builder2.add_node("b").unwrap();
        let sha2 = builder2.commit(&store).unwrap();

        let mut frontier = BTreeMap::new();
        frontier.insert(writer(1), sha2);
        let delta = service.load_incremental_from(&checkpoint, &frontier).unwrap();
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].commit_sha, sha2);
    }
}
