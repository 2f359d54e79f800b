//! The CRDT state model: primitives, the patch/builder pair, and the
//! deterministic join reducer (components D, E, F).
//!
//! Nothing in this crate talks to an object store directly except
//! [`builder::PatchBuilder::commit`], which appends a single patch via
//! [`warp_store::ObjectStore`]. Reading a writer's full chain and folding
//! it into a [`state::State`] is the materialization engine's job, one
//! layer up.
#![warn(missing_docs)]

pub mod builder;
pub mod dot;
pub mod edge_key;
pub mod event_id;
pub mod ids;
pub mod lww;
pub mod orset;
pub mod patch;
pub mod reduce;
pub mod state;
pub mod version_vector;

pub use builder::{BuilderError, PatchBuilder};
pub use dot::Dot;
pub use edge_key::EdgeKey;
pub use event_id::EventId;
pub use ids::{Ident, IdentError, Label, NodeId, PropKey, WriterId};
pub use lww::Lww;
pub use orset::OrSet;
pub use patch::{Op, Patch, PatchError, Signature, PATCH_SCHEMA};
pub use reduce::{apply_op, canonical_order, reduce, PatchRecord};
pub use state::{State, STATE_SCHEMA};
pub use version_vector::VersionVector;
