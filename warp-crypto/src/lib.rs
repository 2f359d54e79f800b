//! Content-address hashing, HMAC and Ed25519 signature verification.
//!
//! Every content-addressed object in warp (patch blobs, checkpoint blobs,
//! trust records, bitmap shard files) is addressed by the SHA-256 digest of
//! its canonical encoding. Key ceremony — generating and holding signing
//! keys — lives outside this crate's scope; warp only ever *verifies*.
#![warn(missing_docs)]

use ed25519_dalek::{PublicKey, Signature, Verifier};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;
use thiserror::Error;
use warp_codec::Value;

/// A content address: the SHA-256 digest of a canonical encoding.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid([u8; 32]);

impl Oid {
    /// Wraps a raw 32-byte digest.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hashes a raw byte string.
    pub fn hash(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    /// Hashes the canonical encoding of a [`Value`]. This is the content
    /// address used for patches, checkpoints and trust records.
    pub fn hash_value(value: &Value) -> Self {
        Self::hash(&warp_codec::encode(value))
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::str::FromStr for Oid {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| CryptoError::MalformedOid)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::MalformedOid)?;
        Ok(Self(arr))
    }
}

/// Errors produced by this crate's hashing, HMAC and signature operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// An oid string was not 64 hex characters encoding 32 bytes.
    #[error("malformed object id")]
    MalformedOid,
    /// A public key byte string was not a valid Ed25519 point.
    #[error("malformed public key")]
    MalformedPublicKey,
    /// A signature byte string was not 64 bytes.
    #[error("malformed signature")]
    MalformedSignature,
    /// Signature verification failed against the given message and key.
    #[error("signature verification failed")]
    SignatureInvalid,
}

/// Computes HMAC-SHA256 over `data` keyed by `key`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Compares two byte strings in constant time. Used anywhere a timing leak
/// could help an attacker forge a MAC or guess a secret.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Verifies an Ed25519 signature over `message` under `public_key`.
///
/// `public_key` and `signature` are the raw 32- and 64-byte encodings
/// respectively, as stored in a [`warp_trust`](../warp_trust) key record.
pub fn verify_signature(
    public_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    let public_key =
        PublicKey::from_bytes(public_key).map_err(|_| CryptoError::MalformedPublicKey)?;
    let signature_bytes: [u8; 64] = signature
        .try_into()
        .map_err(|_| CryptoError::MalformedSignature)?;
    let signature = Signature::new(signature_bytes);
    public_key
        .verify(message, &signature)
        .map_err(|_| CryptoError::SignatureInvalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Keypair, SecretKey, Signer};

    fn test_keypair(seed: u8) -> Keypair {
        let secret = SecretKey::from_bytes(&[seed; 32]).unwrap();
        let public = PublicKey::from(&secret);
        Keypair { secret, public }
    }

    #[test]
    fn hash_value_is_deterministic_across_map_order() {
        let a = Value::map(vec![(Value::Text("a".into()), Value::Int(1))]);
        let b = Value::map(vec![(Value::Text("a".into()), Value::Int(1))]);
        assert_eq!(Oid::hash_value(&a), Oid::hash_value(&b));
    }

    #[test]
    fn oid_round_trips_through_display_and_from_str() {
        let oid = Oid::hash(b"hello");
        let parsed: Oid = oid.to_string().parse().unwrap();
        assert_eq!(oid, parsed);
    }

    #[test]
    fn valid_signature_verifies() {
        let keypair = test_keypair(1);
        let msg = b"patch blob contents";
        let sig = keypair.sign(msg);
        verify_signature(
            &keypair.public.to_bytes(),
            msg,
            &sig.to_bytes(),
        )
        .unwrap();
    }

    #[test]
    fn tampered_message_fails_verification() {
        let keypair = test_keypair(2);
        let sig = keypair.sign(b"original");
        let result = verify_signature(&keypair.public.to_bytes(), b"tampered", &sig.to_bytes());
        assert!(result.is_err());
    }

    #[test]
    fn constant_time_eq_matches_plain_equality() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }

    #[test]
    fn hmac_is_keyed() {
        let a = hmac_sha256(b"key1", b"data");
        let b = hmac_sha256(b"key2", b"data");
        assert_ne!(a, b);
    }
}
