//! Errors surfaced by the top-level [`crate::Engine`] facade.

use thiserror::Error;
use warp_index::IndexError;
use warp_materialize::MaterializeError;
use warp_store::StoreError;
use warp_sync::SyncError;
use warp_trust::TrustError;

/// Errors raised by the engine facade.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The underlying object store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The materialization engine failed.
    #[error(transparent)]
    Materialize(#[from] MaterializeError),
    /// The bitmap index failed to build, load or verify.
    #[error(transparent)]
    Index(#[from] IndexError),
    /// The sync protocol rejected or failed to apply a response.
    #[error(transparent)]
    Sync(#[from] SyncError),
    /// The trust chain failed to append, load or verify.
    #[error(transparent)]
    Trust(#[from] TrustError),
    /// A patch blob failed to decode during audit.
    #[error(transparent)]
    Patch(#[from] warp_crdt::PatchError),
    /// `verify-audit` found an integrity violation: a writer's lamport
    /// counter did not strictly increase along its own chain.
    #[error("writer {writer} chain is not lamport-monotonic at commit {commit}")]
    LamportNotMonotonic {
        /// The writer whose chain violated monotonicity.
        writer: warp_crdt::WriterId,
        /// The offending commit.
        commit: warp_crypto::Oid,
    },
    /// `verify-audit --trust-ref-tip` found the trust chain's tip did not
    /// match the pinned sha.
    #[error("trust chain tip {actual:?} does not match pinned tip {expected}")]
    TrustTipMismatch {
        /// The pinned sha the caller expected.
        expected: warp_crypto::Oid,
        /// The tip actually observed.
        actual: Option<warp_crypto::Oid>,
    },
    /// `verify-audit --trust-required` found an untrusted writer among the
    /// audited patches.
    #[error("untrusted writers found during audit: {0:?}")]
    UntrustedWriter(std::collections::BTreeSet<warp_crdt::WriterId>),
}

/// Result alias for the engine facade.
pub type Result<T> = std::result::Result<T, EngineError>;
