//! [`TrustRecord`]: the content-addressed, prev-linked record that makes
//! up a graph's trust chain.

use crate::error::{Result, TrustError};
use warp_codec::Value;
use warp_crdt::WriterId;
use warp_crypto::Oid;

/// The schema version this crate writes and reads for trust records.
pub const TRUST_RECORD_SCHEMA: u32 = 1;

/// The kind of fact a trust record asserts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TrustRecordType {
    /// Introduces a signing key into the trust chain's key set.
    KeyAdd,
    /// Revokes a previously added key.
    KeyRevoke,
    /// Binds a writer id to a key, making patches from that writer
    /// verifiable against that key.
    WriterBindAdd,
    /// Revokes a writer-to-key binding.
    WriterBindRevoke,
    /// Sets or replaces the chain's policy payload (sync gate defaults,
    /// DoS caps, whatever the host chooses to govern this way).
    PolicySet,
}

impl TrustRecordType {
    fn as_str(self) -> &'static str {
        match self {
            TrustRecordType::KeyAdd => "KEY_ADD",
            TrustRecordType::KeyRevoke => "KEY_REVOKE",
            TrustRecordType::WriterBindAdd => "WRITER_BIND_ADD",
            TrustRecordType::WriterBindRevoke => "WRITER_BIND_REVOKE",
            TrustRecordType::PolicySet => "POLICY_SET",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "KEY_ADD" => Some(TrustRecordType::KeyAdd),
            "KEY_REVOKE" => Some(TrustRecordType::KeyRevoke),
            "WRITER_BIND_ADD" => Some(TrustRecordType::WriterBindAdd),
            "WRITER_BIND_REVOKE" => Some(TrustRecordType::WriterBindRevoke),
            "POLICY_SET" => Some(TrustRecordType::PolicySet),
            _ => None,
        }
    }
}

/// The structurally-required signature envelope: an algorithm tag plus the
/// raw signature bytes. Cryptographic verification is deferred to chain
/// evaluation, since the active key set is itself derived by folding the
/// chain — a record can be appended before its own signer's key addition
/// has been fully resolved as trusted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureEnvelope {
    /// The signature algorithm, e.g. `"ed25519"`.
    pub alg: String,
    /// The raw signature bytes.
    pub sig: Vec<u8>,
}

fn text(s: &str) -> Value {
    Value::Text(s.to_owned())
}

impl SignatureEnvelope {
    fn to_value(&self) -> Value {
        Value::map(vec![
            (text("alg"), text(&self.alg)),
            (text("sig"), Value::Bytes(self.sig.clone())),
        ])
    }

    fn from_value(value: &Value) -> Result<Self> {
        let alg = match value.get(&text("alg")) {
            Some(Value::Text(s)) => s.clone(),
            _ => return Err(TrustError::SignatureMissing),
        };
        let sig = match value.get(&text("sig")) {
            Some(Value::Bytes(b)) => b.clone(),
            _ => return Err(TrustError::SignatureMissing),
        };
        Ok(Self { alg, sig })
    }
}

/// A single trust record: `{schema, prev, recordId, recordType, issuer,
/// payload, signature}`.
///
/// `recordId` is the SHA-256 digest of the canonical encoding of every
/// other field (I7); `prev` is the preceding record's `recordId`, or
/// `None` for the chain's genesis record (I6).
#[derive(Clone, Debug, PartialEq)]
pub struct TrustRecord {
    /// The schema version this record was written under.
    pub schema: u32,
    /// The preceding record's `recordId`, or `None` for genesis.
    pub prev: Option<Oid>,
    /// The record's own content address, computed over every field but
    /// this one and `signature`.
    pub record_id: Oid,
    /// What kind of fact this record asserts.
    pub record_type: TrustRecordType,
    /// The writer id claiming to have produced this record.
    pub issuer: WriterId,
    /// The record-type-specific body (key material, writer binding,
    /// policy document).
    pub payload: Value,
    /// The signature envelope. Structurally required; cryptographically
    /// checked only during chain verification.
    pub signature: SignatureEnvelope,
}

impl TrustRecord {
    /// Builds an unsigned record and computes its `recordId`, ready to
    /// have a signature attached by the caller (who holds the signing
    /// key, which this crate never does).
    pub fn new(
        prev: Option<Oid>,
        record_type: TrustRecordType,
        issuer: WriterId,
        payload: Value,
        signature: SignatureEnvelope,
    ) -> Self {
        let mut record = Self {
            schema: TRUST_RECORD_SCHEMA,
            prev,
            record_id: Oid::from_bytes([0u8; 32]),
            record_type,
            issuer,
            payload,
            signature,
        };
        record.record_id = record.compute_record_id();
        record
    }

    /// The canonical encoding of every field except `recordId` and
    /// `signature` — the bytes `recordId` is a hash of, and the bytes a
    /// signature is computed over.
    pub fn unsigned_value(&self) -> Value {
        Value::map(vec![
            (text("schema"), Value::Int(self.schema as i64)),
            (
                text("prev"),
                match self.prev {
                    Some(oid) => Value::Bytes(oid.as_bytes().to_vec()),
                    None => Value::Null,
                },
            ),
            (text("recordType"), text(self.record_type.as_str())),
            (text("issuer"), Value::Bytes(self.issuer.as_bytes().to_vec())),
            (text("payload"), self.payload.clone()),
        ])
    }

    /// Recomputes `recordId` from the current field values.
    pub fn compute_record_id(&self) -> Oid {
        Oid::hash_value(&self.unsigned_value())
    }

    /// The bytes a signer signs and a verifier checks: the same bytes
    /// `recordId` hashes, so signing binds the full unsigned record.
    pub fn signing_bytes(&self) -> Vec<u8> {
        warp_codec::encode(&self.unsigned_value())
    }

    /// Full canonical encoding, including `recordId` and `signature`.
    pub fn to_value(&self) -> Value {
        let mut entries = match self.unsigned_value() {
            Value::Map(entries) => entries,
            _ => unreachable!("unsigned_value always builds a map"),
        };
        entries.push((text("recordId"), Value::Bytes(self.record_id.as_bytes().to_vec())));
        entries.push((text("signature"), self.signature.to_value()));
        Value::map(entries)
    }

    /// Decodes a record from its full canonical `Value` form. Performs
    /// only structural validation (I1-shape schema checks, signature
    /// envelope presence); recordId/prev-link/signature verification are
    /// the caller's job via [`crate::chain`].
    pub fn from_value(value: &Value) -> Result<Self> {
        let schema = match value.get(&text("schema")) {
            Some(Value::Int(n)) if *n >= 0 => *n as u32,
            _ => return Err(TrustError::RecordInvalid("schema")),
        };
        let prev = match value.get(&text("prev")) {
            Some(Value::Bytes(b)) if b.len() == 32 => {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(b);
                Some(Oid::from_bytes(arr))
            }
            Some(Value::Null) | None => None,
            _ => return Err(TrustError::RecordInvalid("prev")),
        };
        let record_id = match value.get(&text("recordId")) {
            Some(Value::Bytes(b)) if b.len() == 32 => {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(b);
                Oid::from_bytes(arr)
            }
            _ => return Err(TrustError::RecordInvalid("recordId")),
        };
        let record_type = match value.get(&text("recordType")) {
            Some(Value::Text(s)) => {
                TrustRecordType::from_str(s).ok_or(TrustError::RecordInvalid("recordType"))?
            }
            _ => return Err(TrustError::RecordInvalid("recordType")),
        };
        let issuer = match value.get(&text("issuer")) {
            Some(Value::Bytes(b)) if b.len() == 32 => {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(b);
                WriterId::from_bytes(arr)
            }
            _ => return Err(TrustError::RecordInvalid("issuer")),
        };
        let payload = value.get(&text("payload")).cloned().unwrap_or(Value::Null);
        let signature = value
            .get(&text("signature"))
            .ok_or(TrustError::SignatureMissing)
            .and_then(SignatureEnvelope::from_value)?;

        Ok(Self { schema, prev, record_id, record_type, issuer, payload, signature })
    }

    /// Encodes this record to bytes, ready to be written as the
    /// `record.cbor` blob.
    pub fn encode(&self) -> Vec<u8> {
        warp_codec::encode(&self.to_value())
    }

    /// Decodes a record from the bytes of a `record.cbor` blob.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value = warp_codec::decode(bytes).map_err(|_| TrustError::RecordInvalid("not valid canonical codec bytes"))?;
        Self::from_value(&value)
    }
}
