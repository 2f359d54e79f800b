//! [`MaterializationEngine`]: component H — frontier discovery, cache
//! lifecycle, checkpoint/GC triggering, dirty tracking.

use crate::cancel::{CancellationToken, Never};
use crate::error::{MaterializeError, Result};
use crate::policy::MaterializeOptions;
use std::collections::BTreeMap;
use warp_checkpoint::{Checkpoint, CheckpointService};
use warp_crdt::{reduce, Dot, OrSet, PatchRecord, State, WriterId};
use warp_crypto::Oid;
use warp_store::{ObjectStore, RefLayout};

struct Cache {
    state: State,
    frontier: BTreeMap<WriterId, Oid>,
    view_hash: Oid,
    dirty: bool,
    patches_since_checkpoint: u64,
    patches_since_compaction: u64,
}

/// The outcome of a single `materialize()` call.
#[derive(Clone, Debug, PartialEq)]
pub struct MaterializeReport {
    /// How many ops-bearing patches were folded this call. A warm
    /// incremental materialize after a checkpoint reports only the
    /// patches newer than the checkpoint's frontier.
    pub patches_folded: usize,
    /// The commit sha of a checkpoint created this call, if the
    /// checkpoint policy triggered one.
    pub checkpoint_created: Option<Oid>,
    /// Whether compaction ran this call.
    pub compacted: bool,
}

/// Folds a graph's writer chains into a materialized [`State`], with an
/// invalidation-driven cache and auto checkpoint/GC policies.
///
/// Owns its cache exclusively: per the concurrency model, every engine
/// instance is single-owner, so `materialize` and the read accessors take
/// `&mut self` rather than using interior mutability or locks.
pub struct MaterializationEngine<'a> {
    store: &'a dyn ObjectStore,
    graph: String,
    options: MaterializeOptions,
    cache: Option<Cache>,
}

impl<'a> MaterializationEngine<'a> {
    /// Builds an engine bound to `graph` on `store`.
    pub fn new(store: &'a dyn ObjectStore, graph: impl Into<String>, options: MaterializeOptions) -> Self {
        Self {
            store,
            graph: graph.into(),
            options,
            cache: None,
        }
    }

    /// Marks the cache dirty: called after a local commit completes, after
    /// a sync-apply completes, or explicitly by a caller that knows the
    /// backing store changed underneath it.
    pub fn invalidate(&mut self) {
        if let Some(cache) = &mut self.cache {
            cache.dirty = true;
        }
    }

    /// True iff the cache has never been populated or has been
    /// invalidated since the last `materialize()`.
    pub fn is_dirty(&self) -> bool {
        self.cache.as_ref().map(|c| c.dirty).unwrap_or(true)
    }

    /// The current frontier: `writer -> tip commit sha` for every writer
    /// discovered under this graph's ref prefix.
    fn discover_frontier(&self) -> Result<BTreeMap<WriterId, Oid>> {
        let prefix = RefLayout::writers_prefix(&self.graph);
        let refs = self.store.list_refs(&prefix)?;
        let mut frontier = BTreeMap::new();
        for ref_name in refs {
            let Some(writer_str) = RefLayout::writer_id_from_ref(&self.graph, &ref_name) else {
                continue;
            };
            let Ok(writer) = writer_str.parse::<WriterId>() else {
                continue;
            };
            if let Some(sha) = self.store.read_ref(&ref_name)? {
                frontier.insert(writer, sha);
            }
        }
        Ok(frontier)
    }

    /// Runs the materialization algorithm: loads the latest checkpoint if
    /// one exists, discovers the current frontier, folds only the patches
    /// newer than the checkpoint (or every patch, cold), stores the
    /// result in the cache, and evaluates the checkpoint/GC policies.
    pub fn materialize(&mut self) -> Result<MaterializeReport> {
        self.materialize_cancellable(&Never)
    }

    /// As [`Self::materialize`], checking `cancel` at each suspension
    /// point (once per writer chain walked, and before persisting a
    /// checkpoint or compaction).
    pub fn materialize_cancellable(&mut self, cancel: &dyn CancellationToken) -> Result<MaterializeReport> {
        let service = CheckpointService::new(self.store, self.graph.clone());
        let checkpoint = service.load(None)?;
        let frontier = self.discover_frontier()?;

        let (base_state, records) = match &checkpoint {
            Some(cp) => {
                let mut delta = Vec::new();
                for (writer, &tip) in &frontier {
                    if cancel.is_cancelled() {
                        return Err(MaterializeError::Cancelled);
                    }
                    let mut single = BTreeMap::new();
                    single.insert(*writer, tip);
                    delta.extend(service.load_incremental_from(cp, &single)?);
                }
                (cp.state.clone(), delta)
            }
            None => {
                let mut all: Vec<PatchRecord> = Vec::new();
                let empty_checkpoint = Checkpoint::new(State::new(), BTreeMap::new());
                for (writer, &tip) in &frontier {
                    if cancel.is_cancelled() {
                        return Err(MaterializeError::Cancelled);
                    }
                    let mut single = BTreeMap::new();
                    single.insert(*writer, tip);
                    all.extend(service.load_incremental_from(&empty_checkpoint, &single)?);
                }
                (State::new(), all)
            }
        };

        let patches_folded = records.len();
        let state = reduce(records, Some(base_state));
        let view_hash = Oid::hash_value(&state.to_value());

        let patches_since_checkpoint =
            self.cache.as_ref().map(|c| c.patches_since_checkpoint).unwrap_or(0) + patches_folded as u64;
        let patches_since_compaction =
            self.cache.as_ref().map(|c| c.patches_since_compaction).unwrap_or(0) + patches_folded as u64;

        self.cache = Some(Cache {
            state,
            frontier,
            view_hash,
            dirty: false,
            patches_since_checkpoint,
            patches_since_compaction,
        });

        let mut report = MaterializeReport {
            patches_folded,
            checkpoint_created: None,
            compacted: false,
        };

        if self.options.auto_policies {
            if cancel.is_cancelled() {
                return Err(MaterializeError::Cancelled);
            }
            if let Some(every) = self.options.checkpoint_policy.every {
                if every > 0 && patches_since_checkpoint >= every {
                    report.checkpoint_created = Some(self.create_checkpoint(&service)?);
                }
            }
            let ratio = self.tombstone_ratio();
            let gc = self.options.gc_policy;
            if ratio > gc.tombstone_ratio_threshold && patches_since_compaction >= gc.min_patches_since_compaction {
                self.compact(&service)?;
                report.compacted = true;
            }
        }

        Ok(report)
    }

    fn tombstone_ratio(&self) -> f64 {
        let Some(cache) = &self.cache else { return 0.0 };
        let adds: usize = cache.state.node_alive.add_dots().values().map(|d| d.len()).sum::<usize>()
            + cache.state.edge_alive.add_dots().values().map(|d| d.len()).sum::<usize>();
        let removes: usize = cache.state.node_alive.remove_dots().values().map(|d| d.len()).sum::<usize>()
            + cache.state.edge_alive.remove_dots().values().map(|d| d.len()).sum::<usize>();
        if adds == 0 {
            0.0
        } else {
            removes as f64 / adds as f64
        }
    }

    fn create_checkpoint(&mut self, service: &CheckpointService<'_>) -> Result<Oid> {
        let cache = self.cache.as_ref().expect("materialize populates the cache before policy evaluation");
        let checkpoint = Checkpoint::new(cache.state.clone(), cache.frontier.clone());
        let oid = service.create(&checkpoint)?;
        if let Some(cache) = &mut self.cache {
            cache.patches_since_checkpoint = 0;
        }
        Ok(oid)
    }

    /// Rewrites the cached state to drop tombstone history, retaining only
    /// live nodes and edges, and persists the result as a new checkpoint.
    /// The in-memory cache is swapped only once the checkpoint has been
    /// durably written, so any reader sees either the pre- or
    /// post-compaction state, never a torn one.
    fn compact(&mut self, service: &CheckpointService<'_>) -> Result<Oid> {
        let cache = self.cache.as_ref().expect("materialize populates the cache before policy evaluation");

        let mut fresh_nodes = OrSet::new();
        for (node, _) in cache.state.node_alive.add_dots() {
            for dot in cache.state.node_alive.alive_dots(node) {
                fresh_nodes.add(node.clone(), dot);
            }
        }
        let mut fresh_edges = OrSet::new();
        for (edge, _) in cache.state.edge_alive.add_dots() {
            for dot in cache.state.edge_alive.alive_dots(edge) {
                fresh_edges.add(edge.clone(), dot);
            }
        }

        let mut fresh_state = State::new();
        fresh_state.node_alive = fresh_nodes;
        fresh_state.edge_alive = fresh_edges;
        fresh_state.node_props = cache.state.node_props.clone();
        fresh_state.edge_props = cache.state.edge_props.clone();
        fresh_state.version_vector = cache.state.version_vector.clone();

        let checkpoint = Checkpoint::new(fresh_state.clone(), cache.frontier.clone());
        let oid = service.create(&checkpoint)?;

        let view_hash = Oid::hash_value(&fresh_state.to_value());
        let frontier = cache.frontier.clone();
        self.cache = Some(Cache {
            state: fresh_state,
            frontier,
            view_hash,
            dirty: false,
            patches_since_checkpoint: 0,
            patches_since_compaction: 0,
        });
        Ok(oid)
    }

    fn ensure_fresh(&mut self) -> Result<()> {
        match &self.cache {
            None => {
                self.materialize()?;
                Ok(())
            }
            Some(cache) if cache.dirty => {
                if self.options.auto_materialize {
                    self.materialize()?;
                    Ok(())
                } else if self.options.strict_stale {
                    Err(MaterializeError::StaleState)
                } else {
                    Ok(())
                }
            }
            Some(_) => Ok(()),
        }
    }

    /// Returns the current materialized state, materializing first if the
    /// cache is empty, or re-materializing if dirty and `auto_materialize`
    /// is enabled. In strict mode a dirty read without auto-materialize
    /// fails with [`MaterializeError::StaleState`]; otherwise it serves the
    /// existing (stale) snapshot.
    pub fn state(&mut self) -> Result<&State> {
        self.ensure_fresh()?;
        Ok(&self.cache.as_ref().expect("ensure_fresh populates the cache").state)
    }

    /// The frontier the current cached state was folded up to.
    pub fn frontier(&mut self) -> Result<&BTreeMap<WriterId, Oid>> {
        self.ensure_fresh()?;
        Ok(&self.cache.as_ref().expect("ensure_fresh populates the cache").frontier)
    }

    /// The content hash of the current cached state's logical view.
    pub fn view_hash(&mut self) -> Result<Oid> {
        self.ensure_fresh()?;
        Ok(self.cache.as_ref().expect("ensure_fresh populates the cache").view_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp_crdt::{PatchBuilder, VersionVector};
    use warp_store::memory::MemoryStore;

    fn writer(b: u8) -> WriterId {
        WriterId::from_bytes([b; 32])
    }

    fn commit_node(store: &MemoryStore, graph: &str, w: WriterId, lamport: u64, node: &str) -> Oid {
        let base = State::new();
        let mut builder = PatchBuilder::new(graph, w, lamport, &base, VersionVector::new());
        builder.add_node(node).unwrap();
        builder.commit(store).unwrap()
    }

    #[test]
    fn cold_materialize_folds_every_writer() {
        let store = MemoryStore::new();
        commit_node(&store, "g", writer(1), 1, "u:a");
        commit_node(&store, "g", writer(2), 1, "u:b");
        let mut engine = MaterializationEngine::new(&store, "g", MaterializeOptions::default());
        let report = engine.materialize().unwrap();
        assert_eq!(report.patches_folded, 2);
        let state = engine.state().unwrap();
        assert!(state.node_is_alive(&warp_crdt::Ident::new(b"u:a".to_vec()).unwrap()));
        assert!(state.node_is_alive(&warp_crdt::Ident::new(b"u:b".to_vec()).unwrap()));
    }

    #[test]
    fn checkpoint_policy_triggers_after_threshold() {
        let store = MemoryStore::new();
        commit_node(&store, "g", writer(1), 1, "a");
        let mut options = MaterializeOptions::default();
        options.checkpoint_policy.every = Some(1);
        let mut engine = MaterializationEngine::new(&store, "g", options);
        let report = engine.materialize().unwrap();
        assert!(report.checkpoint_created.is_some());
    }

    #[test]
    fn incremental_materialize_after_checkpoint_folds_only_new_patches() {
        let store = MemoryStore::new();
        commit_node(&store, "g", writer(1), 1, "a");
        let mut options = MaterializeOptions::default();
        options.checkpoint_policy.every = Some(1);
        let mut engine = MaterializationEngine::new(&store, "g", options);
        engine.materialize().unwrap();

        commit_node(&store, "g", writer(1), 2, "b");
        engine.invalidate();
        let report = engine.materialize().unwrap();
        assert_eq!(report.patches_folded, 1);
        assert!(engine.state().unwrap().node_is_alive(&warp_crdt::Ident::new(b"b".to_vec()).unwrap()));
    }

    #[test]
    fn strict_mode_rejects_dirty_reads() {
        let store = MemoryStore::new();
        commit_node(&store, "g", writer(1), 1, "a");
        let mut options = MaterializeOptions::default();
        options.auto_materialize = false;
        options.strict_stale = true;
        let mut engine = MaterializationEngine::new(&store, "g", options);
        engine.materialize().unwrap();
        engine.invalidate();
        assert!(matches!(engine.state(), Err(MaterializeError::StaleState)));
    }
}
