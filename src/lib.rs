//! The top-level facade crate: wires the materialization engine, the
//! bitmap index, the sync protocol and the trust chain together behind a
//! single [`Engine`] handle, plus the `verify-audit` integrity walk.
#![warn(missing_docs)]

pub mod audit;
pub mod engine;
pub mod error;

pub use audit::{audit, AuditReport};
pub use engine::Engine;
pub use error::{EngineError, Result};
