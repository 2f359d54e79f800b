//! The top-level engine: wires the materialization cache, the bitmap
//! index, and the sync protocol together, owning the one piece none of
//! them own themselves — invalidating derived state after a write lands.

use crate::error::Result;
use std::collections::BTreeMap;
use warp_crdt::{State, WriterId};
use warp_crypto::Oid;
use warp_index::{BitmapIndex, IndexService};
use warp_materialize::{MaterializationEngine, MaterializeOptions, MaterializeReport};
use warp_store::ObjectStore;
use warp_sync::{DoSCaps, SyncApplyReport, SyncResponse};
use warp_trust::GateMode;

/// A single-owner handle on one graph: materialized state, bitmap index,
/// and the coordination between them and the sync protocol.
///
/// Neither `warp-materialize` nor `warp-index` depends on the other, and
/// `warp-sync` depends on neither — this struct is where that topology's
/// missing edge (invalidate caches after a successful sync apply) is
/// implemented, rather than inside any one of those crates.
pub struct Engine<'a> {
    store: &'a dyn ObjectStore,
    graph: String,
    materialize: MaterializationEngine<'a>,
    index: Option<BitmapIndex<'a>>,
}

impl<'a> Engine<'a> {
    /// Builds an engine bound to `graph` on `store`.
    pub fn new(store: &'a dyn ObjectStore, graph: impl Into<String>, options: MaterializeOptions) -> Self {
        let graph = graph.into();
        Self {
            store,
            materialize: MaterializationEngine::new(store, graph.clone(), options),
            graph,
            index: None,
        }
    }

    /// Runs materialization, per [`MaterializationEngine::materialize`].
    pub fn materialize(&mut self) -> Result<MaterializeReport> {
        Ok(self.materialize.materialize()?)
    }

    /// The current materialized state, materializing first if needed.
    pub fn state(&mut self) -> Result<&State> {
        Ok(self.materialize.state()?)
    }

    /// The frontier the current materialized state was folded up to.
    pub fn frontier(&mut self) -> Result<&BTreeMap<WriterId, Oid>> {
        Ok(self.materialize.frontier()?)
    }

    /// Rebuilds the bitmap index from the current materialized state and
    /// caches it for subsequent queries and verification.
    pub fn rebuild_index(&mut self) -> Result<Oid> {
        let frontier = self.materialize.frontier()?.clone();
        let state = self.materialize.state()?;
        let service = IndexService::new(self.store, self.graph.clone());
        let sha = service.build(state, frontier)?;
        self.index = service.load(Some(sha))?;
        Ok(sha)
    }

    /// The cached bitmap index, if [`Self::rebuild_index`] has run.
    pub fn index(&self) -> Option<&BitmapIndex<'a>> {
        self.index.as_ref()
    }

    /// Cross-checks the cached bitmap index against the materialized state
    /// over a seeded sample, per [`warp_index::verify`].
    pub fn verify_index(&mut self, seed: u64, sample_rate: f64) -> Result<warp_index::VerifyReport> {
        if self.index.is_none() {
            self.rebuild_index()?;
        }
        let state = self.materialize.state()?.clone();
        let index = self.index.as_ref().expect("rebuild_index populates the cache");
        Ok(warp_index::verify(index, &state, seed, sample_rate)?)
    }

    /// Applies a sync response under the trust gate, then invalidates both
    /// the materialization cache and the bitmap index so the next read
    /// re-derives them from the newly written patches.
    pub fn sync_apply(
        &mut self,
        response: &SyncResponse,
        caps: &DoSCaps,
        gate_mode: GateMode,
    ) -> Result<SyncApplyReport> {
        let report = warp_sync::apply_response(self.store, &self.graph, response, caps, gate_mode)?;
        if !report.writers_advanced.is_empty() {
            self.materialize.invalidate();
            self.index = None;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp_crdt::{Ident, PatchBuilder, VersionVector};
    use warp_store::memory::MemoryStore;

    fn writer(b: u8) -> WriterId {
        WriterId::from_bytes([b; 32])
    }

    fn commit_node(store: &MemoryStore, graph: &str, w: WriterId, lamport: u64, node: &str) {
        let base = State::new();
        let mut builder = PatchBuilder::new(graph, w, lamport, &base, VersionVector::new());
        builder.add_node(node).unwrap();
        builder.commit(store).unwrap();
    }

    #[test]
    fn materialize_then_rebuild_index_answers_neighbor_queries() {
        let store = MemoryStore::new();
        commit_node(&store, "g", writer(1), 1, "a");
        commit_node(&store, "g", writer(1), 2, "b");
        let mut engine = Engine::new(&store, "g", MaterializeOptions::default());
        engine.materialize().unwrap();
        engine.rebuild_index().unwrap();
        assert!(engine.index().unwrap().has_node(&Ident::new(b"a".to_vec()).unwrap()).unwrap());
    }

    #[test]
    fn sync_apply_invalidates_materialize_cache_and_index() {
        let peer_store = MemoryStore::new();
        commit_node(&peer_store, "g", writer(1), 1, "a");
        let request = warp_sync::SyncRequest::new(BTreeMap::new());
        let response = warp_sync::handle_request(&peer_store, "g", &request, &DoSCaps::default()).unwrap();

        let local_store = MemoryStore::new();
        let mut engine = Engine::new(&local_store, "g", MaterializeOptions::default());
        engine.materialize().unwrap();
        engine.rebuild_index().unwrap();
        assert!(!engine.index().unwrap().has_node(&Ident::new(b"a".to_vec()).unwrap()).unwrap());

        engine.sync_apply(&response, &DoSCaps::default(), GateMode::Off).unwrap();
        engine.materialize().unwrap();
        assert!(engine.state().unwrap().node_is_alive(&Ident::new(b"a".to_vec()).unwrap()));
        assert!(engine.index().is_none());
    }
}
