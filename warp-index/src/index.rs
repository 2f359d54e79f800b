//! [`BitmapIndex`]: the loaded index, with per-shard lazy id-table and
//! bitmap caches.

use crate::error::{IndexError, Result};
use crate::ids::{shard_byte, split_global_id};
use crate::labels::LabelDict;
use crate::shard_codec::{decode_id_table, decode_shard_bitmaps};
use roaring::RoaringBitmap;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use warp_crdt::{Label, NodeId, WriterId};
use warp_materialize::Direction;
use warp_store::{ObjectStore, Oid};

/// A loaded bitmap index. File-name-to-oid mappings are recorded at load
/// time; shard id tables and bitmap files are fetched and decoded lazily,
/// on first query, and cached for the lifetime of this handle.
pub struct BitmapIndex<'a> {
    store: &'a dyn ObjectStore,
    tree_oid: Oid,
    id_table_oids: BTreeMap<u8, Oid>,
    fwd_oids: BTreeMap<u8, Oid>,
    rev_oids: BTreeMap<u8, Oid>,
    labels: LabelDict,
    frontier: BTreeMap<WriterId, Oid>,
    id_cache: RefCell<BTreeMap<u8, BTreeMap<NodeId, u32>>>,
    reverse_cache: RefCell<BTreeMap<u8, BTreeMap<u32, NodeId>>>,
    fwd_cache: RefCell<BTreeMap<u8, BTreeMap<(u32, u32), RoaringBitmap>>>,
    rev_cache: RefCell<BTreeMap<u8, BTreeMap<(u32, u32), RoaringBitmap>>>,
}

impl<'a> BitmapIndex<'a> {
    pub(crate) fn new(
        store: &'a dyn ObjectStore,
        tree_oid: Oid,
        id_table_oids: BTreeMap<u8, Oid>,
        fwd_oids: BTreeMap<u8, Oid>,
        rev_oids: BTreeMap<u8, Oid>,
        labels: LabelDict,
        frontier: BTreeMap<WriterId, Oid>,
    ) -> Self {
        Self {
            store,
            tree_oid,
            id_table_oids,
            fwd_oids,
            rev_oids,
            labels,
            frontier,
            id_cache: RefCell::new(BTreeMap::new()),
            reverse_cache: RefCell::new(BTreeMap::new()),
            fwd_cache: RefCell::new(BTreeMap::new()),
            rev_cache: RefCell::new(BTreeMap::new()),
        }
    }

    /// The commit sha this index tree was loaded from.
    pub fn tree_oid(&self) -> Oid {
        self.tree_oid
    }

    /// The frontier recorded at build time.
    pub fn frontier(&self) -> &BTreeMap<WriterId, Oid> {
        &self.frontier
    }

    /// True iff `current` differs from the frontier this index was built
    /// against, meaning queries may be answered against stale data.
    pub fn is_stale(&self, current: &BTreeMap<WriterId, Oid>) -> bool {
        &self.frontier != current
    }

    fn ensure_id_table(&self, shard: u8) -> Result<()> {
        if self.id_cache.borrow().contains_key(&shard) {
            return Ok(());
        }
        let table = match self.id_table_oids.get(&shard) {
            Some(oid) => {
                let bytes = self.store.read_blob(oid)?;
                let value = warp_codec::decode(&bytes).map_err(|_| IndexError::Malformed("ids file"))?;
                decode_id_table(&value)?
            }
            None => BTreeMap::new(),
        };
        let reverse: BTreeMap<u32, NodeId> = table.iter().map(|(id, local)| (*local, id.clone())).collect();
        self.id_cache.borrow_mut().insert(shard, table);
        self.reverse_cache.borrow_mut().insert(shard, reverse);
        Ok(())
    }

    fn ensure_bitmaps(&self, shard: u8, forward: bool) -> Result<()> {
        let (cache, oids) = if forward {
            (&self.fwd_cache, &self.fwd_oids)
        } else {
            (&self.rev_cache, &self.rev_oids)
        };
        if cache.borrow().contains_key(&shard) {
            return Ok(());
        }
        let entries = match oids.get(&shard) {
            Some(oid) => {
                let bytes = self.store.read_blob(oid)?;
                decode_shard_bitmaps(&bytes)?
            }
            None => BTreeMap::new(),
        };
        cache.borrow_mut().insert(shard, entries);
        Ok(())
    }

    fn local_id_of(&self, node: &NodeId) -> Result<Option<(u8, u32)>> {
        let shard = shard_byte(node);
        self.ensure_id_table(shard)?;
        Ok(self.id_cache.borrow()[&shard].get(node).map(|&local| (shard, local)))
    }

    fn node_of_global(&self, global: u32) -> Result<Option<NodeId>> {
        let (shard, local) = split_global_id(global);
        self.ensure_id_table(shard)?;
        Ok(self.reverse_cache.borrow()[&shard].get(&local).cloned())
    }

    /// True iff `node` is known to the index.
    pub fn has_node(&self, node: &NodeId) -> Result<bool> {
        Ok(self.local_id_of(node)?.is_some())
    }

    /// Children of `node` (edges where `node` is the source), optionally
    /// filtered to a label set, sorted by `(neighborId, label)`.
    pub fn get_children(&self, node: &NodeId, labels: Option<&BTreeSet<Label>>) -> Result<Vec<(NodeId, Label)>> {
        self.directional_neighbors(node, true, labels)
    }

    /// Parents of `node` (edges where `node` is the destination), optionally
    /// filtered to a label set, sorted by `(neighborId, label)`.
    pub fn get_parents(&self, node: &NodeId, labels: Option<&BTreeSet<Label>>) -> Result<Vec<(NodeId, Label)>> {
        self.directional_neighbors(node, false, labels)
    }

    fn directional_neighbors(
        &self,
        node: &NodeId,
        forward: bool,
        labels: Option<&BTreeSet<Label>>,
    ) -> Result<Vec<(NodeId, Label)>> {
        let Some((shard, local)) = self.local_id_of(node)? else {
            return Ok(Vec::new());
        };
        self.ensure_bitmaps(shard, forward)?;
        let cache = if forward { &self.fwd_cache } else { &self.rev_cache };
        let shard_map = cache.borrow();
        let entries = &shard_map[&shard];

        let mut result = Vec::new();
        for (&(_, label_id), bitmap) in entries.range((local, 0)..(local + 1, 0)) {
            let Some(label) = self.labels.label_of(label_id) else { continue };
            if let Some(filter) = labels {
                if !filter.contains(label) {
                    continue;
                }
            }
            for global in bitmap.iter() {
                if let Some(neighbor) = self.node_of_global(global)? {
                    result.push((neighbor, label.clone()));
                }
            }
        }
        result.sort();
        result.dedup();
        Ok(result)
    }

    /// Neighbors of `id` in the given `direction`, matching the uniform
    /// neighbor-provider contract (sorted, de-duplicated union for `both`,
    /// empty for an unknown node). Fallible and eager rather than
    /// implementing `NeighborProvider` directly: loading a shard is I/O
    /// that can fail, where the adjacency provider never can.
    pub fn get_neighbors(
        &self,
        id: &NodeId,
        direction: Direction,
        labels: Option<&BTreeSet<Label>>,
    ) -> Result<Vec<(NodeId, Label)>> {
        let mut result: BTreeSet<(NodeId, Label)> = BTreeSet::new();
        if matches!(direction, Direction::Out | Direction::Both) {
            result.extend(self.get_children(id, labels)?);
        }
        if matches!(direction, Direction::In | Direction::Both) {
            result.extend(self.get_parents(id, labels)?);
        }
        Ok(result.into_iter().collect())
    }
}
