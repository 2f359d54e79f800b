//! Checkpoint persistence: snapshot creation, loading, and incremental
//! resume (component G).
#![warn(missing_docs)]

mod checkpoint;
mod service;

pub use checkpoint::{Checkpoint, CheckpointError, CHECKPOINT_SCHEMA};
pub use service::{CheckpointService, CheckpointServiceError};
