//! Errors raised by the sync protocol, matching the stable `SYNC_*` /
//! `CAS_*` error kinds in the public failure model.

use std::collections::BTreeSet;
use thiserror::Error;
use warp_crdt::{PatchError, WriterId};
use warp_crypto::Oid;
use warp_store::StoreError;

/// Errors produced by this crate.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A sync-request or sync-response failed structural validation.
    #[error("malformed sync message: {0}")]
    Malformed(&'static str),
    /// The message body exceeded `maxBodyBytes`.
    #[error("sync body of {actual} bytes exceeds the {limit}-byte cap")]
    BodyTooLarge {
        /// The encoded body size actually observed.
        actual: usize,
        /// The configured cap.
        limit: usize,
    },
    /// The frontier named more writers than `maxWritersInFrontier`.
    #[error("frontier names {actual} writers, exceeding the cap of {limit}")]
    TooManyWriters {
        /// The writer count actually observed.
        actual: usize,
        /// The configured cap.
        limit: usize,
    },
    /// The response carried more patches than `maxPatches`.
    #[error("response carries {actual} patches, exceeding the cap of {limit}")]
    TooManyPatches {
        /// The patch count actually observed.
        actual: usize,
        /// The configured cap.
        limit: usize,
    },
    /// A single patch carried more ops than `maxOpsPerPatch`.
    #[error("a patch carries {actual} ops, exceeding the cap of {limit}")]
    TooManyOps {
        /// The op count actually observed.
        actual: usize,
        /// The configured cap.
        limit: usize,
    },
    /// The trust gate rejected one or more writers in `enforce` mode.
    /// Local state is left untouched: no patch is applied.
    #[error("untrusted writers rejected by the trust gate: {0:?}")]
    UntrustedWriter(BTreeSet<WriterId>),
    /// A received patch's commit oid, once locally rebuilt, did not match
    /// the sha the peer advertised for it — the two stores disagree about
    /// some ancestor of this writer's chain.
    #[error("divergent history: peer claimed {claimed}, locally rebuilt {rebuilt}")]
    DivergentHistory {
        /// The sha the peer's response claimed for this patch.
        claimed: Oid,
        /// The sha actually produced by committing the same patch locally.
        rebuilt: Oid,
    },
    /// A writer ref moved locally between reading its tip and CAS-applying
    /// a received patch.
    #[error("cas conflict applying writer patch: expected {expected:?}, found {actual:?}")]
    Conflict {
        /// The tip expected to extend.
        expected: Option<Oid>,
        /// The tip actually found at CAS time.
        actual: Option<Oid>,
    },
    /// A patch blob failed to decode.
    #[error(transparent)]
    Patch(#[from] PatchError),
    /// The underlying object store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A writer chain commit had no `patch.cbor` entry.
    #[error("writer chain commit {0} has no patch.cbor entry")]
    MissingPatchBlob(Oid),
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, SyncError>;
