//! The sharded bitmap index (component I): ID allocation, forward/reverse
//! edge bitmaps, tree-based persistence with lazy shard loading, and a
//! seeded sampling verifier.
#![warn(missing_docs)]

pub mod build;
pub mod error;
pub mod ids;
pub mod index;
pub mod labels;
pub mod meta;
pub mod service;
pub mod shard_codec;
pub mod verify;

pub use build::{build_shards, BuiltShards};
pub use error::{IndexError, Result};
pub use ids::{global_id, shard_byte, split_global_id, MAX_LOCAL_ID, SHARD_COUNT};
pub use index::BitmapIndex;
pub use labels::LabelDict;
pub use service::IndexService;
pub use verify::{verify, VerifyReport};
