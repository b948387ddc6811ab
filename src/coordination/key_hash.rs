//! Stable lock keys
//!
//! Every process, on every host, must map a component id to the same
//! advisory-lock slot. The key is the first 8 bytes (big-endian) of the
//! SHA-256 digest of the UTF-8 id, read as an unsigned integer and folded
//! into the signed range by subtracting 2^64 when it is >= 2^63.

use sha2::{Digest, Sha256};

/// Deterministic `component_id -> i64` mapping used as the lock key
pub fn stable_key_hash(component_id: &str) -> i64 {
    let digest = Sha256::digest(component_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let unsigned = u64::from_be_bytes(prefix);

    if unsigned >= 1 << 63 {
        (i128::from(unsigned) - (1i128 << 64)) as i64
    } else {
        unsigned as i64
    }
}
