//! ID allocation: mapping a [`NodeId`] to a 32-bit `(shard, local)` pair.

use warp_crdt::NodeId;

/// Number of shards: one per possible leading byte value.
pub const SHARD_COUNT: usize = 256;

/// Local ids within a shard are 24 bits; overflow raises
/// [`crate::error::IndexError::ShardOverflow`].
pub const MAX_LOCAL_ID: u32 = 1 << 24;

/// Picks the shard a node id belongs to: the first byte of the id when it
/// reads as a 40- or 64-character hex digest (a sha1 or sha256 hex string,
/// the common case for content-derived node ids), otherwise the low byte of
/// the FNV-1a hash of its raw bytes.
pub fn shard_byte(id: &NodeId) -> u8 {
    let bytes = id.as_bytes();
    if is_hex_digest(bytes) {
        (hex_nibble(bytes[0]) << 4) | hex_nibble(bytes[1])
    } else {
        (fnv1a(bytes) & 0xff) as u8
    }
}

fn is_hex_digest(bytes: &[u8]) -> bool {
    (bytes.len() == 40 || bytes.len() == 64) && bytes.iter().all(u8::is_ascii_hexdigit)
}

fn hex_nibble(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        b'A'..=b'F' => b - b'A' + 10,
        _ => unreachable!("caller already checked is_ascii_hexdigit"),
    }
}

/// FNV-1a over raw bytes, 64-bit variant.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Packs a shard byte and a local id into a global id.
pub fn global_id(shard: u8, local: u32) -> u32 {
    ((shard as u32) << 24) | (local & (MAX_LOCAL_ID - 1))
}

/// Splits a global id back into its shard byte and local id.
pub fn split_global_id(id: u32) -> (u8, u32) {
    ((id >> 24) as u8, id & (MAX_LOCAL_ID - 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp_crdt::Ident;

    fn ident(s: &str) -> Ident {
        Ident::new(s.as_bytes().to_vec()).unwrap()
    }

    #[test]
    fn hex_digest_shard_is_its_leading_byte() {
        let id = ident(&"ab".repeat(20)); // 40 hex chars
        assert_eq!(shard_byte(&id), 0xab);
    }

    #[test]
    fn non_hex_id_falls_back_to_fnv() {
        let id = ident("user:alice");
        let expected = (fnv1a(id.as_bytes()) & 0xff) as u8;
        assert_eq!(shard_byte(&id), expected);
    }

    #[test]
    fn global_id_round_trips() {
        let id = global_id(0x7a, 123_456);
        assert_eq!(split_global_id(id), (0x7a, 123_456));
    }
}
