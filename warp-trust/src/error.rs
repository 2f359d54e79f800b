//! Errors raised by trust record validation, chain verification and
//! CAS-driven append, matching the stable `TRUST_*` and `CAS_*` error
//! kinds in the public failure model.

use thiserror::Error;
use warp_crypto::Oid;
use warp_store::StoreError;

/// Errors produced by this crate.
#[derive(Debug, Error)]
pub enum TrustError {
    /// A record failed schema validation (missing field, wrong type, or
    /// structurally absent signature envelope).
    #[error("invalid trust record: {0}")]
    RecordInvalid(&'static str),
    /// The record's declared `recordId` did not match the recomputed hash
    /// of its canonical encoding (I7).
    #[error("recordId mismatch")]
    IdMismatch,
    /// A record's `prev` did not equal the preceding record's `recordId`
    /// (I6), or the genesis record had a non-null `prev`.
    #[error("prev-link mismatch")]
    PrevMismatch,
    /// A signature envelope had no `alg`/`sig` fields present.
    #[error("signature envelope missing")]
    SignatureMissing,
    /// Cryptographic verification of a record's signature failed against
    /// the key set active at that point in the chain.
    #[error("signature verification failed")]
    SignatureInvalid,
    /// Two records in a chain declared the same `recordId`.
    #[error("duplicate recordId in chain")]
    DuplicateRecordId,
    /// A single append attempt observed the ref move underneath it to a
    /// genuinely different tip (not a retryable no-op race).
    #[error("cas conflict: expected {expected:?}, found {actual:?}")]
    CasConflict {
        /// The tip the caller expected to extend.
        expected: Option<Oid>,
        /// The tip actually found at CAS time.
        actual: Option<Oid>,
    },
    /// `appendWithRetry` exhausted its retry budget without winning the
    /// CAS race.
    #[error("cas exhausted after {attempts} attempts")]
    CasExhausted {
        /// The number of attempts made before giving up.
        attempts: u32,
    },
    /// The underlying object store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A commit in the chain had no `record.cbor` entry in its tree.
    #[error("chain commit {0} has no record.cbor entry")]
    MissingRecordBlob(Oid),
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, TrustError>;
