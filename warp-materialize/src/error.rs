//! Errors raised by the materialization engine.

use thiserror::Error;
use warp_checkpoint::CheckpointServiceError;
use warp_store::StoreError;

/// Errors raised by [`crate::engine::MaterializationEngine`].
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// The underlying object store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The checkpoint service failed reading, writing or decoding a
    /// checkpoint or a patch blob.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointServiceError),
    /// A read was attempted against dirty cached state while running in
    /// strict mode (`QUERY_STALE_STATE`).
    #[error("read attempted against dirty cached state in strict mode")]
    StaleState,
    /// The caller's cancellation signal fired at a suspension point.
    #[error("materialize cancelled")]
    Cancelled,
}

/// Result alias for materialization operations.
pub type Result<T> = std::result::Result<T, MaterializeError>;
