//! [`IndexService`]: persists a built index tree and loads one back,
//! without eagerly fetching shard contents.

use crate::build::build_shards;
use crate::error::{IndexError, Result};
use crate::index::BitmapIndex;
use crate::labels::LabelDict;
use crate::meta;
use crate::shard_codec::{encode_id_table, encode_shard_bitmaps};
use std::collections::BTreeMap;
use warp_crdt::{State, WriterId};
use warp_store::{CommitRequest, ObjectStore, Oid, RefLayout, StoreError, TreeEntry};

fn shard_name(prefix: &str, shard: u8, ext: &str) -> String {
    format!("{prefix}_{shard:02x}.{ext}")
}

/// Builds, persists and loads bitmap indices for a graph.
pub struct IndexService<'a> {
    store: &'a dyn ObjectStore,
    graph: String,
}

impl<'a> IndexService<'a> {
    /// Builds a service bound to `graph` on `store`.
    pub fn new(store: &'a dyn ObjectStore, graph: impl Into<String>) -> Self {
        Self { store, graph: graph.into() }
    }

    /// Builds a fresh index from `state`, persists it as a tree parented on
    /// the current `refs/warp/<graph>/index/latest` tip (if any), and
    /// CAS-advances that ref. Returns the new commit sha.
    pub fn build(&self, state: &State, frontier: BTreeMap<WriterId, Oid>) -> Result<Oid> {
        let built = build_shards(state)?;

        let mut meta_entries = Vec::new();
        for (&shard, table) in &built.id_tables {
            if table.is_empty() {
                continue;
            }
            let bytes = warp_codec::encode(&encode_id_table(table));
            let oid = self.store.write_blob(&bytes)?;
            meta_entries.push(TreeEntry::blob(shard_name("ids", shard, "cbor"), oid));
        }
        let labels_oid = self.store.write_blob(&warp_codec::encode(&built.labels.to_value()))?;
        meta_entries.push(TreeEntry::blob("labels.cbor", labels_oid));
        let frontier_oid = self.store.write_blob(&warp_codec::encode(&meta::encode_frontier(&frontier)))?;
        meta_entries.push(TreeEntry::blob("frontier.cbor", frontier_oid));

        let mut shard_entries = Vec::new();
        for (&shard, entries) in &built.fwd {
            if entries.is_empty() {
                continue;
            }
            let oid = self.store.write_blob(&encode_shard_bitmaps(entries))?;
            shard_entries.push(TreeEntry::blob(shard_name("fwd", shard, "bitmap"), oid));
        }
        for (&shard, entries) in &built.rev {
            if entries.is_empty() {
                continue;
            }
            let oid = self.store.write_blob(&encode_shard_bitmaps(entries))?;
            shard_entries.push(TreeEntry::blob(shard_name("rev", shard, "bitmap"), oid));
        }

        let meta_tree = self.store.write_tree(&meta_entries)?;
        let shards_tree = self.store.write_tree(&shard_entries)?;
        let root_tree = self.store.write_tree(&[
            TreeEntry::tree("meta", meta_tree),
            TreeEntry::tree("shards", shards_tree),
        ])?;

        let ref_name = RefLayout::index_latest(&self.graph);
        let current_tip = self.store.read_ref(&ref_name)?;
        let parents = current_tip.into_iter().collect();
        let commit_oid = self.store.commit(CommitRequest {
            tree: root_tree,
            parents,
            message: "bitmap index".to_owned(),
        })?;
        match self.store.compare_and_swap_ref(&ref_name, commit_oid, current_tip) {
            Ok(()) => Ok(commit_oid),
            Err(StoreError::CasConflict { expected, actual, .. }) => {
                Err(IndexError::Conflict { expected, actual })
            }
            Err(other) => Err(IndexError::Store(other)),
        }
    }

    /// Loads the index tree (by explicit sha, or by resolving
    /// `refs/warp/<graph>/index/latest`), recording file-name-to-oid
    /// mappings for every shard file without fetching their contents.
    pub fn load(&self, sha: Option<Oid>) -> Result<Option<BitmapIndex<'a>>> {
        let commit_sha = match sha {
            Some(sha) => sha,
            None => {
                let ref_name = RefLayout::index_latest(&self.graph);
                match self.store.read_ref(&ref_name)? {
                    Some(sha) => sha,
                    None => return Ok(None),
                }
            }
        };
        let tree_oid = self.store.get_commit_tree(&commit_sha)?;
        let root_entries = self.store.read_tree(&tree_oid)?;
        let meta_oid = root_entries
            .iter()
            .find(|e| e.name == "meta")
            .map(|e| e.oid)
            .ok_or(IndexError::MissingFile("meta"))?;
        let shards_oid = root_entries
            .iter()
            .find(|e| e.name == "shards")
            .map(|e| e.oid)
            .ok_or(IndexError::MissingFile("shards"))?;

        let meta_entries = self.store.read_tree(&meta_oid)?;
        let mut id_table_oids = BTreeMap::new();
        let mut labels = LabelDict::default();
        let mut frontier = BTreeMap::new();
        for entry in &meta_entries {
            if let Some(hex) = entry.name.strip_prefix("ids_").and_then(|s| s.strip_suffix(".cbor")) {
                let shard = u8::from_str_radix(hex, 16).map_err(|_| IndexError::Malformed("ids file name"))?;
                id_table_oids.insert(shard, entry.oid);
            } else if entry.name == "labels.cbor" {
                let bytes = self.store.read_blob(&entry.oid)?;
                let value = warp_codec::decode(&bytes).map_err(|_| IndexError::Malformed("labels.cbor"))?;
                labels = LabelDict::from_value(&value)?;
            } else if entry.name == "frontier.cbor" {
                let bytes = self.store.read_blob(&entry.oid)?;
                let value = warp_codec::decode(&bytes).map_err(|_| IndexError::Malformed("frontier.cbor"))?;
                frontier = meta::decode_frontier(&value)?;
            }
        }

        let shard_entries = self.store.read_tree(&shards_oid)?;
        let mut fwd_oids = BTreeMap::new();
        let mut rev_oids = BTreeMap::new();
        for entry in &shard_entries {
            if let Some(hex) = entry.name.strip_prefix("fwd_").and_then(|s| s.strip_suffix(".bitmap")) {
                let shard = u8::from_str_radix(hex, 16).map_err(|_| IndexError::Malformed("fwd file name"))?;
                fwd_oids.insert(shard, entry.oid);
            } else if let Some(hex) = entry.name.strip_prefix("rev_").and_then(|s| s.strip_suffix(".bitmap")) {
                let shard = u8::from_str_radix(hex, 16).map_err(|_| IndexError::Malformed("rev file name"))?;
                rev_oids.insert(shard, entry.oid);
            }
        }

        Ok(Some(BitmapIndex::new(
            self.store,
            commit_sha,
            id_table_oids,
            fwd_oids,
            rev_oids,
            labels,
            frontier,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp_crdt::{Dot, EdgeKey, Ident};
    use warp_store::memory::MemoryStore;

    fn ident(s: &str) -> Ident {
        Ident::new(s.as_bytes().to_vec()).unwrap()
    }

    fn writer(b: u8) -> WriterId {
        WriterId::from_bytes([b; 32])
    }

    #[test]
    fn build_then_load_round_trips_and_answers_queries() {
        let store = MemoryStore::new();
        let mut state = State::new();
        state.node_alive.add(ident("a"), Dot::new(writer(1), 1));
        state.node_alive.add(ident("b"), Dot::new(writer(1), 2));
        state.edge_alive.add(
            EdgeKey::new(ident("a"), ident("b"), ident("follows")),
            Dot::new(writer(1), 3),
        );

        let service = IndexService::new(&store, "g");
        let mut frontier = BTreeMap::new();
        frontier.insert(writer(1), Oid::hash(b"c1"));
        let sha = service.build(&state, frontier.clone()).unwrap();

        let index = service.load(Some(sha)).unwrap().unwrap();
        assert!(index.has_node(&ident("a")).unwrap());
        assert!(!index.has_node(&ident("zzz")).unwrap());
        let children = index
            .get_neighbors(&ident("a"), warp_materialize::Direction::Out, None)
            .unwrap();
        assert_eq!(children, vec![(ident("b"), ident("follows"))]);
    }
}
