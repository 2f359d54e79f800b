//! Pure in-memory construction of per-shard id tables and bitmaps from a
//! materialized state. No I/O here; [`crate::service::IndexService::build`]
//! serializes and persists what this module computes.

use crate::error::{IndexError, Result};
use crate::ids::{global_id, shard_byte, MAX_LOCAL_ID};
use crate::labels::LabelDict;
use roaring::RoaringBitmap;
use std::collections::BTreeMap;
use warp_crdt::{NodeId, State};

/// The in-memory result of walking a materialized state's alive subgraph.
pub struct BuiltShards {
    /// Per-shard, node-id-to-local-id tables, densely assigned starting
    /// at 0 in sorted node-id order.
    pub id_tables: BTreeMap<u8, BTreeMap<NodeId, u32>>,
    /// The label dictionary covering every label present on an alive edge.
    pub labels: LabelDict,
    /// Per-shard forward adjacency: `(localId, labelId) -> children`.
    pub fwd: BTreeMap<u8, BTreeMap<(u32, u32), RoaringBitmap>>,
    /// Per-shard reverse adjacency: `(localId, labelId) -> parents`.
    pub rev: BTreeMap<u8, BTreeMap<(u32, u32), RoaringBitmap>>,
}

/// Walks `state`'s alive nodes and edges, assigning dense per-shard local
/// ids in sorted node-id order (so two builds over the same alive set
/// produce byte-identical id tables, and therefore the same index content
/// address) and filling the forward/reverse bitmaps.
pub fn build_shards(state: &State) -> Result<BuiltShards> {
    let mut id_tables: BTreeMap<u8, BTreeMap<NodeId, u32>> = BTreeMap::new();
    let mut sorted_nodes: Vec<&NodeId> = state.alive_nodes().collect();
    sorted_nodes.sort();
    for node in sorted_nodes {
        let shard = shard_byte(node);
        let table = id_tables.entry(shard).or_default();
        let next_local = table.len() as u32;
        if next_local >= MAX_LOCAL_ID {
            return Err(IndexError::ShardOverflow(shard));
        }
        table.insert(node.clone(), next_local);
    }

    let edges: Vec<_> = state.alive_edges().collect();
    let labels = LabelDict::build(edges.iter().map(|e| e.label.clone()));

    let mut fwd: BTreeMap<u8, BTreeMap<(u32, u32), RoaringBitmap>> = BTreeMap::new();
    let mut rev: BTreeMap<u8, BTreeMap<(u32, u32), RoaringBitmap>> = BTreeMap::new();
    for edge in edges {
        let from_shard = shard_byte(&edge.from);
        let to_shard = shard_byte(&edge.to);
        let from_local = *id_tables[&from_shard]
            .get(&edge.from)
            .expect("alive edge endpoint was assigned an id in the first pass");
        let to_local = *id_tables[&to_shard]
            .get(&edge.to)
            .expect("alive edge endpoint was assigned an id in the first pass");
        let label_id = labels
            .id_of(&edge.label)
            .expect("label was interned from this same edge set");
        let from_global = global_id(from_shard, from_local);
        let to_global = global_id(to_shard, to_local);

        fwd.entry(from_shard)
            .or_default()
            .entry((from_local, label_id))
            .or_insert_with(RoaringBitmap::new)
            .insert(to_global);
        rev.entry(to_shard)
            .or_default()
            .entry((to_local, label_id))
            .or_insert_with(RoaringBitmap::new)
            .insert(from_global);
    }

    Ok(BuiltShards { id_tables, labels, fwd, rev })
}
