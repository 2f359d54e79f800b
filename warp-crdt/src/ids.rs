//! Identifiers used throughout the data model: node ids, edge labels,
//! property keys and writer ids, plus the reserved-byte policy (invariant
//! I1) shared by all of them.

use std::fmt;
use thiserror::Error;

/// The byte that may never open an identifier: reserved for future
/// internal namespacing.
const RESERVED_LEADING_BYTE: u8 = 0x01;
/// The byte that may never appear anywhere in an identifier.
const NUL: u8 = 0x00;

/// An opaque byte-string identifier: a node id, an edge label, or a
/// property key. All three share the same validity rule (I1), so they
/// share this one representation.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ident(Vec<u8>);

/// Error returned when an identifier violates the reserved-byte policy.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentError {
    /// The identifier contained a NUL byte.
    #[error("identifier contains a NUL byte")]
    ContainsNul,
    /// The identifier's first byte was the reserved `0x01` marker.
    #[error("identifier begins with the reserved byte 0x01")]
    ReservedLeadingByte,
}

impl Ident {
    /// Validates and wraps a byte string as an identifier.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, IdentError> {
        let bytes = bytes.into();
        validate(&bytes)?;
        Ok(Self(bytes))
    }

    /// Returns the identifier's raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The canonical empty label, used for unlabeled edges.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// True for the empty identifier (the "no label" sentinel).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Checks a candidate identifier against invariant I1 without allocating.
pub fn validate(bytes: &[u8]) -> Result<(), IdentError> {
    if bytes.first() == Some(&RESERVED_LEADING_BYTE) {
        return Err(IdentError::ReservedLeadingByte);
    }
    if bytes.contains(&NUL) {
        return Err(IdentError::ContainsNul);
    }
    Ok(())
}

impl fmt::Debug for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "Ident({s:?})"),
            Err(_) => write!(f, "Ident({:?})", hex::encode(&self.0)),
        }
    }
}

/// A node identifier.
pub type NodeId = Ident;
/// An edge label.
pub type Label = Ident;
/// A property key.
pub type PropKey = Ident;

/// A writer identity. Writers are created once per (graph, agent) and are
/// expected, in practice, to be derived from an Ed25519 public key, though
/// this crate treats them as an opaque, totally ordered byte string.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WriterId([u8; 32]);

impl WriterId {
    /// Wraps a raw 32-byte writer identity.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes of this writer id.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for WriterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for WriterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::str::FromStr for WriterId {
    type Err = IdentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| IdentError::ContainsNul)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| IdentError::ContainsNul)?;
        Ok(Self(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_nul_byte_anywhere() {
        assert_eq!(Ident::new(b"a\0b".to_vec()), Err(IdentError::ContainsNul));
    }

    #[test]
    fn rejects_reserved_leading_byte() {
        assert_eq!(
            Ident::new(vec![0x01, b'a']),
            Err(IdentError::ReservedLeadingByte)
        );
    }

    #[test]
    fn accepts_ordinary_identifiers() {
        assert!(Ident::new(b"user:alice".to_vec()).is_ok());
        assert!(Ident::new(Vec::new()).is_ok());
    }

    #[test]
    fn reserved_byte_is_only_forbidden_when_leading() {
        // 0x01 elsewhere in the string is fine, only a leading 0x01 is reserved.
        assert!(Ident::new(vec![b'a', 0x01, b'b']).is_ok());
    }
}
