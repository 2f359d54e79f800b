//! A minimal filesystem-backed [`ObjectStore`], for embedders and the CLI
//! that need state to persist across process invocations without pulling
//! in a real git toolchain. Objects are content-addressed files under
//! `<root>/objects/{blobs,trees,commits}/<hex-oid>`; refs are plain files
//! under `<root>/<ref-name>` holding a hex oid.
//!
//! This is deliberately not a git-compatible backend: it exists to make
//! the CLI surface runnable against real disk state, not to interoperate
//! with an actual git repository.

use crate::{CommitInfo, CommitRequest, EntryKind, ObjectStore, Result, StoreError, TreeEntry};
use std::fs;
use std::path::{Path, PathBuf};
use warp_codec::Value;
use warp_crypto::Oid;

/// A disk-backed object store rooted at a directory.
pub struct DiskStore {
    root: PathBuf,
}

fn io_err(err: std::io::Error) -> StoreError {
    StoreError::Io(err.to_string())
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
        (Value::Text("oid".into()), Value::Bytes(entry.oid.as_bytes().to_vec())),
    ])
}

fn entry_from_value(value: &Value) -> Result<TreeEntry> {
    let name = match value.get(&Value::Text("name".into())) {
        Some(Value::Text(s)) => s.clone(),
        _ => return Err(StoreError::Io("malformed tree entry: name".into())),
    };
    let mode = match value.get(&Value::Text("mode".into())) {
        Some(Value::Int(n)) => *n as u32,
        _ => return Err(StoreError::Io("malformed tree entry: mode".into())),
    };
    let kind = match value.get(&Value::Text("kind".into())) {
        Some(Value::Int(0)) => EntryKind::Blob,
        Some(Value::Int(1)) => EntryKind::Tree,
        _ => return Err(StoreError::Io("malformed tree entry: kind".into())),
    };
    let oid = match value.get(&Value::Text("oid".into())) {
        Some(Value::Bytes(b)) if b.len() == 32 => {
            let mut arr = [0u8; 32];
            arr.copy_from_slice(b);
            Oid::from_bytes(arr)
        }
        _ => return Err(StoreError::Io("malformed tree entry: oid".into())),
    };
    Ok(TreeEntry { mode, kind, oid, name })
}

fn tree_oid(entries: &[TreeEntry]) -> Oid {
    let value = Value::Array(entries.iter().map(entry_to_value).collect());
    Oid::hash_value(&value)
}

fn commit_value(request: &CommitRequest) -> Value {
    Value::map(vec![
        (Value::Text("tree".into()), Value::Bytes(request.tree.as_bytes().to_vec())),
        (
            Value::Text("parents".into()),
            Value::Array(request.parents.iter().map(|p| Value::Bytes(p.as_bytes().to_vec())).collect()),
        ),
        (Value::Text("message".into()), Value::Text(request.message.clone())),
    ])
}

fn commit_oid(request: &CommitRequest) -> Oid {
    Oid::hash_value(&commit_value(request))
}

impl DiskStore {
    /// Opens (creating if absent) a disk store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("objects/blobs")).map_err(io_err)?;
        fs::create_dir_all(root.join("objects/trees")).map_err(io_err)?;
        fs::create_dir_all(root.join("objects/commits")).map_err(io_err)?;
        fs::create_dir_all(root.join("refs")).map_err(io_err)?;
        fs::create_dir_all(root.join("config")).map_err(io_err)?;
        Ok(Self { root })
    }

    fn object_path(&self, kind: &str, oid: &Oid) -> PathBuf {
        self.root.join("objects").join(kind).join(oid.to_string())
    }

    fn ref_path(&self, name: &str) -> PathBuf {
        let mut path = self.root.join("refs");
        for segment in name.split('/') {
            path.push(segment);
        }
        path
    }

    fn config_path(&self, key: &str) -> PathBuf {
        self.root.join("config").join(key)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, bytes).map_err(io_err)
}

impl ObjectStore for DiskStore {
    fn write_blob(&self, bytes: &[u8]) -> Result<Oid> {
        let oid = Oid::hash(bytes);
        write_atomic(&self.object_path("blobs", &oid), bytes)?;
        Ok(oid)
    }

    fn read_blob(&self, oid: &Oid) -> Result<Vec<u8>> {
        fs::read(self.object_path("blobs", oid)).map_err(|_| StoreError::ObjectNotFound(*oid))
    }

    fn write_tree(&self, entries: &[TreeEntry]) -> Result<Oid> {
        let mut entries = entries.to_vec();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let oid = tree_oid(&entries);
        let bytes = warp_codec::encode(&Value::Array(entries.iter().map(entry_to_value).collect()));
        write_atomic(&self.object_path("trees", &oid), &bytes)?;
        Ok(oid)
    }

    fn read_tree(&self, oid: &Oid) -> Result<Vec<TreeEntry>> {
        let bytes = fs::read(self.object_path("trees", oid)).map_err(|_| StoreError::ObjectNotFound(*oid))?;
        let value = warp_codec::decode(&bytes).map_err(|_| StoreError::ObjectNotFound(*oid))?;
        match value {
            Value::Array(items) => items.iter().map(entry_from_value).collect(),
            _ => Err(StoreError::ObjectNotFound(*oid)),
        }
    }

    fn commit(&self, request: CommitRequest) -> Result<Oid> {
        let oid = commit_oid(&request);
        let payload = Value::map(vec![
            (Value::Text("tree".into()), Value::Bytes(request.tree.as_bytes().to_vec())),
            (
                Value::Text("parents".into()),
                Value::Array(request.parents.iter().map(|p| Value::Bytes(p.as_bytes().to_vec())).collect()),
            ),
            (Value::Text("message".into()), Value::Text(request.message.clone())),
        ]);
        write_atomic(&self.object_path("commits", &oid), &warp_codec::encode(&payload))?;
        Ok(oid)
    }

    fn get_commit_tree(&self, sha: &Oid) -> Result<Oid> {
        self.get_node_info_and_tree(sha).map(|(tree, _)| tree)
    }

    fn get_node_info(&self, sha: &Oid) -> Result<CommitInfo> {
        self.get_node_info_and_tree(sha).map(|(_, info)| info)
    }

    fn read_ref(&self, name: &str) -> Result<Option<Oid>> {
        match fs::read_to_string(self.ref_path(name)) {
            Ok(text) => text.trim().parse().map(Some).map_err(|_| StoreError::Io("corrupt ref file".into())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_err(err)),
        }
    }

    fn update_ref(&self, name: &str, new_value: Oid) -> Result<()> {
        write_atomic(&self.ref_path(name), new_value.to_string().as_bytes())
    }

    fn compare_and_swap_ref(&self, name: &str, new_value: Oid, expected: Option<Oid>) -> Result<()> {
        let actual = self.read_ref(name)?;
        if actual != expected {
            return Err(StoreError::CasConflict { ref_name: name.to_owned(), expected, actual });
        }
        self.update_ref(name, new_value)
    }

    fn list_refs(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        collect_ref_names(&self.root.join("refs"), "refs", &mut names).map_err(io_err)?;
        names.retain(|name| name.starts_with(prefix));
        names.sort();
        Ok(names)
    }

    fn delete_ref(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.ref_path(name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(err)),
        }
    }

    fn config_get(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.config_path(key)) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_err(err)),
        }
    }

    fn config_set(&self, key: &str, value: &str) -> Result<()> {
        write_atomic(&self.config_path(key), value.as_bytes())
    }
}

impl DiskStore {
    fn get_node_info_and_tree(&self, sha: &Oid) -> Result<(Oid, CommitInfo)> {
        let bytes = fs::read(self.object_path("commits", sha)).map_err(|_| StoreError::ObjectNotFound(*sha))?;
        let value = warp_codec::decode(&bytes).map_err(|_| StoreError::ObjectNotFound(*sha))?;
        let tree = match value.get(&Value::Text("tree".into())) {
            Some(Value::Bytes(b)) if b.len() == 32 => {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(b);
                Oid::from_bytes(arr)
            }
            _ => return Err(StoreError::ObjectNotFound(*sha)),
        };
        let parents = match value.get(&Value::Text("parents".into())) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| match v {
                    Value::Bytes(b) if b.len() == 32 => {
                        let mut arr = [0u8; 32];
                        arr.copy_from_slice(b);
                        Some(Oid::from_bytes(arr))
                    }
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };
        let message = match value.get(&Value::Text("message".into())) {
            Some(Value::Text(s)) => s.clone(),
            _ => String::new(),
        };
        Ok((tree, CommitInfo { parents, message, date: None }))
    }
}

fn collect_ref_names(dir: &Path, prefix: &str, out: &mut Vec<String>) -> std::io::Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let child_prefix = format!("{prefix}/{name}");
        if entry.file_type()?.is_dir() {
            collect_ref_names(&entry.path(), &child_prefix, out)?;
        } else {
            out.push(child_prefix);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn blob_round_trips_by_content_address() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let oid = store.write_blob(b"hello").unwrap();
        assert_eq!(store.read_blob(&oid).unwrap(), b"hello");
    }

    #[test]
    fn tree_and_commit_round_trip() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let blob = store.write_blob(b"x").unwrap();
        let tree = store.write_tree(&[TreeEntry::blob("f", blob)]).unwrap();
        assert_eq!(store.read_tree(&tree).unwrap(), vec![TreeEntry::blob("f", blob)]);

        let commit = store
            .commit(CommitRequest { tree, parents: Vec::new(), message: "m".to_owned() })
            .unwrap();
        assert_eq!(store.get_commit_tree(&commit).unwrap(), tree);
    }

    #[test]
    fn ref_state_survives_reopening_the_same_directory() {
        let dir = tempdir().unwrap();
        let oid = {
            let store = DiskStore::open(dir.path()).unwrap();
            let oid = Oid::hash(b"c1");
            store.compare_and_swap_ref("refs/warp/g/writers/alice", oid, None).unwrap();
            oid
        };
        let reopened = DiskStore::open(dir.path()).unwrap();
        assert_eq!(reopened.read_ref("refs/warp/g/writers/alice").unwrap(), Some(oid));
    }

    #[test]
    fn list_refs_filters_by_prefix() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        store.update_ref("refs/warp/g/writers/alice", Oid::hash(b"a")).unwrap();
        store.update_ref("refs/warp/g/checkpoints/latest", Oid::hash(b"b")).unwrap();
        let writers = store.list_refs("refs/warp/g/writers/").unwrap();
        assert_eq!(writers, vec!["refs/warp/g/writers/alice".to_owned()]);
    }
}
