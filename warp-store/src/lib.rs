//! The object-store port.
//!
//! warp does not implement its own blob/tree/commit storage: it is hosted
//! on top of an object store that behaves like a git object database. This
//! crate defines that boundary as a trait ([`ObjectStore`]) plus the ref
//! naming scheme every other component relies on, and ships a
//! [`memory::MemoryStore`] implementation used throughout the test suite
//! and by anything embedding warp without a real backing repository.
//!
//! The only operation with cross-call atomicity is
//! [`ObjectStore::compare_and_swap_ref`]; everything else is additive and
//! race-free, per the concurrency model in the top-level design notes.
#![warn(missing_docs)]

mod refs;

pub mod disk;
pub mod memory;

pub use refs::RefLayout;
pub use warp_crypto::Oid;

use thiserror::Error;

/// The kind of an entry inside a [`TreeEntry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    /// A blob (leaf file).
    Blob,
    /// A subtree (directory).
    Tree,
}

/// One entry in a tree object: a named pointer to a blob or subtree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
    /// Unix-style file mode, preserved verbatim by the store.
    pub mode: u32,
    /// Whether `oid` names a blob or a tree.
    pub kind: EntryKind,
    /// The content address of the entry's contents.
    pub oid: Oid,
    /// The entry's name within its parent tree.
    pub name: String,
}

impl TreeEntry {
    /// Convenience constructor for a regular (mode `0o100644`) blob entry.
    pub fn blob(name: impl Into<String>, oid: Oid) -> Self {
        Self {
            mode: 0o100644,
            kind: EntryKind::Blob,
            oid,
            name: name.into(),
        }
    }

    /// Convenience constructor for a subtree entry.
    pub fn tree(name: impl Into<String>, oid: Oid) -> Self {
        Self {
            mode: 0o040000,
            kind: EntryKind::Tree,
            oid,
            name: name.into(),
        }
    }
}

/// The fields needed to create a new commit object.
#[derive(Clone, Debug)]
pub struct CommitRequest {
    /// The tree this commit records.
    pub tree: Oid,
    /// Parent commit(s); empty for a root commit.
    pub parents: Vec<Oid>,
    /// A human-readable message, not interpreted by warp itself.
    pub message: String,
}

/// Metadata about a commit, as returned by [`ObjectStore::get_node_info`].
#[derive(Clone, Debug)]
pub struct CommitInfo {
    /// The commit's parents, oldest-chain-link first.
    pub parents: Vec<Oid>,
    /// The commit message.
    pub message: String,
    /// An optional commit timestamp, seconds since the Unix epoch.
    pub date: Option<i64>,
}

/// Errors surfaced by the object-store port. These map directly onto the
/// `REF_NOT_FOUND`, `REF_IO` and `CAS_CONFLICT` error kinds in the public
/// failure model.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A blob, tree or commit oid was not found in the store.
    #[error("object {0} not found")]
    ObjectNotFound(Oid),
    /// A ref name had no value.
    #[error("ref {0} not found")]
    RefNotFound(String),
    /// `compare_and_swap_ref` observed a ref value other than the expected
    /// one. Carries the actual current value so the caller can rebuild.
    #[error("cas conflict on {ref_name}: expected {expected:?}, found {actual:?}")]
    CasConflict {
        /// The ref that was being updated.
        ref_name: String,
        /// The value the caller expected to be replacing.
        expected: Option<Oid>,
        /// The value actually found.
        actual: Option<Oid>,
    },
    /// An underlying I/O failure talking to the backing store.
    #[error("object store I/O error: {0}")]
    Io(String),
}

/// Result alias for object-store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// The object-store port consumed by every other warp component.
///
/// Implementations MUST make `compare_and_swap_ref` the sole source of
/// inter-operation atomicity: blob/tree/commit writes are assumed additive
/// and safe under concurrent callers, but two callers racing to move the
/// same ref must have exactly one of them succeed.
pub trait ObjectStore: Send + Sync {
    /// Writes a content-addressed blob, returning its oid.
    fn write_blob(&self, bytes: &[u8]) -> Result<Oid>;

    /// Reads back a blob by oid.
    fn read_blob(&self, oid: &Oid) -> Result<Vec<u8>>;

    /// Writes a tree object from a list of entries, returning its oid.
    fn write_tree(&self, entries: &[TreeEntry]) -> Result<Oid>;

    /// Reads a tree's entries by oid.
    fn read_tree(&self, oid: &Oid) -> Result<Vec<TreeEntry>>;

    /// Creates a commit object, returning its oid (the "commit sha").
    fn commit(&self, request: CommitRequest) -> Result<Oid>;

    /// Returns the tree oid recorded by a commit.
    fn get_commit_tree(&self, sha: &Oid) -> Result<Oid>;

    /// Returns metadata about a commit.
    fn get_node_info(&self, sha: &Oid) -> Result<CommitInfo>;

    /// Reads the current value of a ref, or `None` if it does not exist.
    fn read_ref(&self, name: &str) -> Result<Option<Oid>>;

    /// Unconditionally sets a ref to a new value.
    fn update_ref(&self, name: &str, new_value: Oid) -> Result<()>;

    /// Atomically updates a ref, failing with [`StoreError::CasConflict`]
    /// if its current value is not `expected`.
    fn compare_and_swap_ref(
        &self,
        name: &str,
        new_value: Oid,
        expected: Option<Oid>,
    ) -> Result<()>;

    /// Lists every ref whose name starts with `prefix`.
    fn list_refs(&self, prefix: &str) -> Result<Vec<String>>;

    /// Deletes a ref.
    fn delete_ref(&self, name: &str) -> Result<()>;

    /// Reads a host-level config value (e.g. writer identity).
    fn config_get(&self, key: &str) -> Result<Option<String>>;

    /// Writes a host-level config value.
    fn config_set(&self, key: &str, value: &str) -> Result<()>;
}
