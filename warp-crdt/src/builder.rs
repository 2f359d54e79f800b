//! [`PatchBuilder`]: accumulates ops against a live view of the state and
//! commits them as a new patch on a writer's chain.

use crate::dot::Dot;
use crate::edge_key::EdgeKey;
use crate::ids::{Ident, IdentError, NodeId, PropKey, WriterId};
use crate::patch::{Op, Patch, PATCH_SCHEMA};
use crate::state::State;
use crate::version_vector::VersionVector;
use thiserror::Error;
use warp_codec::Value;
use warp_store::{CommitRequest, ObjectStore, Oid, RefLayout, StoreError, TreeEntry};

/// Errors raised while building or committing a patch.
#[derive(Debug, Error)]
pub enum BuilderError {
    /// An identifier given to the builder violated the reserved-byte
    /// policy (I1).
    #[error("invalid identifier: {0}")]
    InvalidIdent(#[from] IdentError),
    /// The writer ref moved between the builder reading its tip and
    /// attempting the CAS update. The caller must re-read state and rebuild.
    #[error("conflict appending to writer chain: expected {expected:?}, found {actual:?}")]
    Conflict {
        /// The tip the builder expected to extend.
        expected: Option<Oid>,
        /// The tip actually found at CAS time.
        actual: Option<Oid>,
    },
    /// The underlying object store failed for a reason other than a CAS
    /// conflict.
    #[error("object store error: {0}")]
    Store(#[from] StoreError),
}

/// Builds a [`Patch`] against a live view of the current state, then
/// commits it onto a writer's chain.
///
/// Removes snapshot the state's alive-dot sets lazily, on the builder's
/// first mutating call, rather than re-reading on every `remove_*` call.
/// This keeps every remove within one builder call consistent with a
/// single observed moment, rather than racing against state changes the
/// builder itself has no way to cause but an embedding caller might
/// (e.g. a concurrent `materialize()` on the same engine instance).
pub struct PatchBuilder<'a> {
    graph: String,
    writer: WriterId,
    lamport_start: u64,
    next_lamport: u64,
    base_state: &'a State,
    snapshot: Option<State>,
    context: VersionVector,
    ops: Vec<Op>,
    reads: Option<Vec<NodeId>>,
    writes: Option<Vec<NodeId>>,
}

impl<'a> PatchBuilder<'a> {
    /// Starts a new builder for `writer` against `base_state`.
    ///
    /// `lamport_start` must be one greater than the last lamport this
    /// writer has used for a dot anywhere (the caller tracks this,
    /// typically as `1 + ` the highest dot lamport seen in the writer's
    /// own chain tip). `context` is the causal context to record on the
    /// resulting patch.
    pub fn new(
        graph: impl Into<String>,
        writer: WriterId,
        lamport_start: u64,
        base_state: &'a State,
        context: VersionVector,
    ) -> Self {
        Self {
            graph: graph.into(),
            writer,
            lamport_start,
            next_lamport: lamport_start,
            base_state,
            snapshot: None,
            context,
            ops: Vec::new(),
            reads: None,
            writes: None,
        }
    }

    fn take_lamport(&mut self) -> u64 {
        let n = self.next_lamport;
        self.next_lamport += 1;
        n
    }

    fn snapshot(&mut self) -> &State {
        self.snapshot.get_or_insert_with(|| self.base_state.clone())
    }

    /// Adds a node, emitting `NodeAdd{id, dot(writer, nextLamport)}`.
    pub fn add_node(&mut self, id: impl Into<Vec<u8>>) -> Result<&mut Self, BuilderError> {
        let node = Ident::new(id)?;
        let dot = Dot::new(self.writer, self.take_lamport());
        self.ops.push(Op::NodeAdd { node, dot });
        Ok(self)
    }

    /// Removes a node, cancelling exactly the add-dots observed in this
    /// builder's snapshot.
    pub fn remove_node(&mut self, id: impl Into<Vec<u8>>) -> Result<&mut Self, BuilderError> {
        let node = Ident::new(id)?;
        let observed_dots = self.snapshot().node_alive.alive_dots(&node);
        self.ops.push(Op::NodeRemove { node, observed_dots });
        Ok(self)
    }

    /// Adds a directed labeled edge. `label` may be empty for an unlabeled
    /// edge.
    pub fn add_edge(
        &mut self,
        from: impl Into<Vec<u8>>,
        to: impl Into<Vec<u8>>,
        label: impl Into<Vec<u8>>,
    ) -> Result<&mut Self, BuilderError> {
        let from = Ident::new(from)?;
        let to = Ident::new(to)?;
        let label = Ident::new(label)?;
        let dot = Dot::new(self.writer, self.take_lamport());
        self.ops.push(Op::EdgeAdd { from, to, label, dot });
        Ok(self)
    }

    /// Removes an edge, cancelling exactly the add-dots observed in this
    /// builder's snapshot.
    pub fn remove_edge(
        &mut self,
        from: impl Into<Vec<u8>>,
        to: impl Into<Vec<u8>>,
        label: impl Into<Vec<u8>>,
    ) -> Result<&mut Self, BuilderError> {
        let from = Ident::new(from)?;
        let to = Ident::new(to)?;
        let label = Ident::new(label)?;
        let key = EdgeKey::new(from.clone(), to.clone(), label.clone());
        let observed_dots = self.snapshot().edge_alive.alive_dots(&key);
        self.ops.push(Op::EdgeRemove { from, to, label, observed_dots });
        Ok(self)
    }

    /// Sets a node property. No dot or EventId is assigned here; the
    /// EventId is derived at fold time from the patch's lamport, writer,
    /// commit sha and this op's index.
    pub fn set_property(
        &mut self,
        scope: impl Into<Vec<u8>>,
        key: impl Into<Vec<u8>>,
        value: Value,
    ) -> Result<&mut Self, BuilderError> {
        let scope: PropKey = Ident::new(scope)?;
        let key: PropKey = Ident::new(key)?;
        self.ops.push(Op::PropSet { scope, key, value });
        Ok(self)
    }

    /// Sets an edge property.
    pub fn set_edge_property(
        &mut self,
        from: impl Into<Vec<u8>>,
        to: impl Into<Vec<u8>>,
        label: impl Into<Vec<u8>>,
        key: impl Into<Vec<u8>>,
        value: Value,
    ) -> Result<&mut Self, BuilderError> {
        let from = Ident::new(from)?;
        let to = Ident::new(to)?;
        let label = Ident::new(label)?;
        let key: PropKey = Ident::new(key)?;
        self.ops.push(Op::EdgePropSet { from, to, label, key, value });
        Ok(self)
    }

    /// Declares the read set for future provenance tracking.
    pub fn declare_reads(&mut self, reads: Vec<NodeId>) -> &mut Self {
        self.reads = Some(reads);
        self
    }

    /// Declares the write set for future provenance tracking.
    pub fn declare_writes(&mut self, writes: Vec<NodeId>) -> &mut Self {
        self.writes = Some(writes);
        self
    }

    /// Assembles the accumulated ops into a `Patch`, without committing it.
    pub fn build(self) -> Patch {
        let lamport = if self.next_lamport > self.lamport_start {
            self.next_lamport - 1
        } else {
            self.lamport_start
        };
        Patch {
            schema: PATCH_SCHEMA,
            writer: self.writer,
            lamport,
            context: self.context,
            ops: self.ops,
            reads: self.reads,
            writes: self.writes,
            signature: None,
        }
    }

    /// Serializes the accumulated patch, writes it as a blob wrapped in a
    /// tree, commits it parented on the writer's current tip, and
    /// CAS-advances the writer ref.
    ///
    /// On a CAS conflict the ref is left untouched and the caller receives
    /// the tip actually observed, so it can rebuild its builder against
    /// fresh state and retry.
    pub fn commit(self, store: &dyn ObjectStore) -> Result<Oid, BuilderError> {
        let graph = self.graph.clone();
        let writer = self.writer;
        let patch = self.build();
        let bytes = patch.encode();
        let blob_oid = store.write_blob(&bytes)?;
        let tree_oid = store.write_tree(&[TreeEntry::blob("patch.cbor", blob_oid)])?;
        let ref_name = RefLayout::writer(&graph, &writer.to_string());
        let current_tip = store.read_ref(&ref_name)?;
        let parents = current_tip.into_iter().collect();
        let commit_oid = store.commit(CommitRequest {
            tree: tree_oid,
            parents,
            message: format!("patch lamport={}", patch.lamport),
        })?;
        match store.compare_and_swap_ref(&ref_name, commit_oid, current_tip) {
            Ok(()) => Ok(commit_oid),
            Err(StoreError::CasConflict { expected, actual, .. }) => {
                Err(BuilderError::Conflict { expected, actual })
            }
            Err(other) => Err(BuilderError::Store(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp_store::memory::MemoryStore;

    fn writer(b: u8) -> WriterId {
        WriterId::from_bytes([b; 32])
    }

    #[test]
    fn add_node_assigns_increasing_dots() {
        let state = State::new();
        let mut builder = PatchBuilder::new("g", writer(1), 1, &state, VersionVector::new());
        builder.add_node("a").unwrap();
        builder.add_node("b").unwrap();
        let patch = builder.build();
        let dots: Vec<_> = patch
            .ops
            .iter()
            .map(|op| match op {
                Op::NodeAdd { dot, .. } => dot.lamport,
                _ => panic!("expected NodeAdd"),
            })
            .collect();
        assert_eq!(dots, vec![1, 2]);
        assert_eq!(patch.lamport, 2);
    }

    #[test]
    fn remove_node_snapshots_once_lazily() {
        let mut state = State::new();
        state
            .node_alive
            .add(Ident::new(b"x".to_vec()).unwrap(), Dot::new(writer(1), 1));
        let mut builder = PatchBuilder::new("g", writer(1), 2, &state, VersionVector::new());
        builder.remove_node("x").unwrap();
        let patch = builder.build();
        match &patch.ops[0] {
            Op::NodeRemove { observed_dots, .. } => {
                assert_eq!(observed_dots.len(), 1);
            }
            _ => panic!("expected NodeRemove"),
        }
        // No add op occurred, so the patch still reserves lamport_start.
        assert_eq!(patch.lamport, 2);
    }

    #[test]
    fn rejects_invalid_identifiers() {
        let state = State::new();
        let mut builder = PatchBuilder::new("g", writer(1), 1, &state, VersionVector::new());
        assert!(matches!(
            builder.add_node(vec![0x01, b'a']),
            Err(BuilderError::InvalidIdent(_))
        ));
    }

    #[test]
    fn commit_writes_a_patch_and_advances_the_writer_ref() {
        let store = MemoryStore::new();
        let state = State::new();
        let mut builder = PatchBuilder::new("g", writer(1), 1, &state, VersionVector::new());
        builder.add_node("a").unwrap();
        let sha = builder.commit(&store).unwrap();
        let ref_name = RefLayout::writer("g", &writer(1).to_string());
        assert_eq!(store.read_ref(&ref_name).unwrap(), Some(sha));
    }

    #[test]
    fn commit_conflict_surfaces_the_observed_tip() {
        let store = MemoryStore::new();
        let state = State::new();

        let mut first = PatchBuilder::new("g", writer(1), 1, &state, VersionVector::new());
        first.add_node("a").unwrap();
        let first_sha = first.commit(&store).unwrap();

        // Simulate a builder constructed against stale state (tip unknown)
        // racing the one above: force the ref back, then attempt a second
        // commit that still believes the chain is empty by directly
        // invoking the store below the builder's own read.
        let ref_name = RefLayout::writer("g", &writer(1).to_string());
        let stale_builder = PatchBuilder {
            graph: "g".to_owned(),
            writer: writer(1),
            lamport_start: 2,
            next_lamport: 2,
            base_state: &state,
            snapshot: None,
            context: VersionVector::new(),
            ops: vec![Op::NodeAdd {
                node: Ident::new(b"b".to_vec()).unwrap(),
                dot: Dot::new(writer(1), 2),
            }],
            reads: None,
            writes: None,
        };
        // Manually bypass the normal read-then-commit to simulate a racing
        // writer whose expected parent (`None`) is now stale.
        let patch = stale_builder.build();
        let bytes = patch.encode();
        let blob_oid = store.write_blob(&bytes).unwrap();
        let tree_oid = store.write_tree(&[TreeEntry::blob("patch.cbor", blob_oid)]).unwrap();
        let commit_oid = store
            .commit(CommitRequest { tree: tree_oid, parents: vec![], message: "stale".into() })
            .unwrap();
        let err = store
            .compare_and_swap_ref(&ref_name, commit_oid, None)
            .unwrap_err();
        match err {
            StoreError::CasConflict { actual, .. } => assert_eq!(actual, Some(first_sha)),
            other => panic!("expected CasConflict, got {other:?}"),
        }
    }
}
