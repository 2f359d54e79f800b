//! The trust chain (component K): a linear, content-addressed, optionally
//! signed record chain at `refs/warp/<graph>/trust/records` used to gate
//! the sync protocol.
#![warn(missing_docs)]

pub mod chain;
pub mod error;
pub mod gate;
pub mod policy;
pub mod record;

pub use chain::{verify_chain_links, verify_chain_signatures, TrustChainService, MAX_CAS_ATTEMPTS};
pub use error::{Result, TrustError};
pub use gate::{evaluate, GateMode, GateVerdict};
pub use policy::{evaluate_writers, fold, ChainState, KeyRecord, TrustedWriters};
pub use record::{SignatureEnvelope, TrustRecord, TrustRecordType, TRUST_RECORD_SCHEMA};
