//! Errors raised by the bitmap index.

use thiserror::Error;
use warp_crypto::Oid;
use warp_store::StoreError;

/// Errors raised building, loading or querying a bitmap index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The underlying object store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A persisted index file failed to decode.
    #[error("malformed index file: {0}")]
    Malformed(&'static str),
    /// A shard's dense local-id space overflowed 2^24 entries.
    #[error("shard {0:#04x} overflowed its 2^24 local ids")]
    ShardOverflow(u8),
    /// A shard bitmap file failed its header check: wrong magic, an
    /// unsupported version, or a checksum mismatch against its body.
    #[error("shard corruption: {0}")]
    ShardCorruption(&'static str),
    /// The index tree had no entry for a file the loader expected.
    #[error("index tree is missing expected file {0}")]
    MissingFile(&'static str),
    /// `compare_and_swap_ref` lost a race updating the index ref.
    #[error("conflict updating index ref: expected {expected:?}, found {actual:?}")]
    Conflict {
        /// The index tip the builder expected to extend.
        expected: Option<Oid>,
        /// The index tip actually found at CAS time.
        actual: Option<Oid>,
    },
}

/// Result alias for index operations.
pub type Result<T> = std::result::Result<T, IndexError>;
