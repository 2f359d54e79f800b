//! An in-memory [`ObjectStore`] for tests and embedders without a real
//! backing repository. Oids for trees and commits are derived the same way
//! a real git-like backend would: content-address the canonical encoding
//! of the object, so two `MemoryStore`s that write the same logical object
//! agree on its oid.

use crate::{CommitInfo, CommitRequest, EntryKind, ObjectStore, Result, StoreError, TreeEntry};
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex};
use warp_codec::Value;
use warp_crypto::Oid;

#[derive(Default)]
struct Inner {
    blobs: FxHashMap<Oid, Vec<u8>>,
    trees: FxHashMap<Oid, Vec<TreeEntry>>,
    commits: FxHashMap<Oid, (Oid, CommitInfo)>,
    refs: FxHashMap<String, Oid>,
    config: FxHashMap<String, String>,
}

/// A cloneable, thread-safe, in-memory object store.
///
/// Cloning shares the underlying state: two `MemoryStore` handles cloned
/// from the same origin model two engine instances racing over the same
/// backing repository, which is exactly what the CAS properties in the
/// sync and trust-chain tests exercise.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// Creates a fresh, empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn entry_to_value(entry: &TreeEntry) -> Value {
    Value::map(vec![
        (Value::Text("name".into()), Value::Text(entry.name.clone())),
        (Value::Text("mode".into()), Value::Int(entry.mode as i64)),
        (
            Value::Text("kind".into()),
            Value::Int(match entry.kind {
                EntryKind::Blob => 0,
                EntryKind::Tree => 1,
            }),
        ),
        (
            Value::Text("oid".into()),
            Value::Bytes(entry.oid.as_bytes().to_vec()),
        ),
    ])
}

fn tree_oid(entries: &[TreeEntry]) -> Oid {
    let value = Value::Array(entries.iter().map(entry_to_value).collect());
    Oid::hash_value(&value)
}

fn commit_oid(request: &CommitRequest) -> Oid {
    let value = Value::map(vec![
        (
            Value::Text("tree".into()),
            Value::Bytes(request.tree.as_bytes().to_vec()),
        ),
        (
            Value::Text("parents".into()),
            Value::Array(
                request
                    .parents
                    .iter()
                    .map(|p| Value::Bytes(p.as_bytes().to_vec()))
                    .collect(),
            ),
        ),
        (
            Value::Text("message".into()),
            Value::Text(request.message.clone()),
        ),
    ]);
    Oid::hash_value(&value)
}

impl ObjectStore for MemoryStore {
    fn write_blob(&self, bytes: &[u8]) -> Result<Oid> {
        let oid = Oid::hash(bytes);
        self.inner.lock().unwrap().blobs.insert(oid, bytes.to_vec());
        Ok(oid)
    }

    fn read_blob(&self, oid: &Oid) -> Result<Vec<u8>> {
        self.inner
            .lock()
            .unwrap()
            .blobs
            .get(oid)
            .cloned()
            .ok_or(StoreError::ObjectNotFound(*oid))
    }

    fn write_tree(&self, entries: &[TreeEntry]) -> Result<Oid> {
        let mut entries = entries.to_vec();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let oid = tree_oid(&entries);
        self.inner.lock().unwrap().trees.insert(oid, entries);
        Ok(oid)
    }

    fn read_tree(&self, oid: &Oid) -> Result<Vec<TreeEntry>> {
        self.inner
            .lock()
            .unwrap()
            .trees
            .get(oid)
            .cloned()
            .ok_or(StoreError::ObjectNotFound(*oid))
    }

    fn commit(&self, request: CommitRequest) -> Result<Oid> {
        let oid = commit_oid(&request);
        let info = CommitInfo {
            parents: request.parents.clone(),
            message: request.message.clone(),
            date: None,
        };
        self.inner
            .lock()
            .unwrap()
            .commits
            .insert(oid, (request.tree, info));
        Ok(oid)
    }

    fn get_commit_tree(&self, sha: &Oid) -> Result<Oid> {
        self.inner
            .lock()
            .unwrap()
            .commits
            .get(sha)
            .map(|(tree, _)| *tree)
            .ok_or(StoreError::ObjectNotFound(*sha))
    }

    fn get_node_info(&self, sha: &Oid) -> Result<CommitInfo> {
        self.inner
            .lock()
            .unwrap()
            .commits
            .get(sha)
            .map(|(_, info)| info.clone())
            .ok_or(StoreError::ObjectNotFound(*sha))
    }

    fn read_ref(&self, name: &str) -> Result<Option<Oid>> {
        Ok(self.inner.lock().unwrap().refs.get(name).copied())
    }

    fn update_ref(&self, name: &str, new_value: Oid) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .refs
            .insert(name.to_owned(), new_value);
        Ok(())
    }

    fn compare_and_swap_ref(
        &self,
        name: &str,
        new_value: Oid,
        expected: Option<Oid>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let actual = inner.refs.get(name).copied();
        if actual != expected {
            return Err(StoreError::CasConflict {
                ref_name: name.to_owned(),
                expected,
                actual,
            });
        }
        inner.refs.insert(name.to_owned(), new_value);
        Ok(())
    }

    fn list_refs(&self, prefix: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        let mut names: Vec<String> = inner
            .refs
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    fn delete_ref(&self, name: &str) -> Result<()> {
        self.inner.lock().unwrap().refs.remove(name);
        Ok(())
    }

    fn config_get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().unwrap().config.get(key).cloned())
    }

    fn config_set(&self, key: &str, value: &str) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .config
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}
