//! Deterministic 64-bit hashing.
//!
//! Ring positions, file IDs, and block IDs must agree across every node in
//! the cluster, so the hash must be stable across builds and platforms.
//! `std`'s SipHash is randomly keyed per process and unusable here; wyhash
//! with a fixed seed gives a stable, well-avalanched 64-bit value.

use std::hash::Hasher;

use wyhash::WyHash;

/// Hashes a byte string to a stable 64-bit value.
pub fn stable_hash(bytes: &[u8]) -> u64 {
    let mut hasher = WyHash::with_seed(0);
    hasher.write(bytes);
    hasher.finish()
}

#[cfg(test)]
mod hashing_tests {
    use super::*;

    #[test]
    fn deterministic() {
        assert_eq!(stable_hash(b"report.log"), stable_hash(b"report.log"));
        assert_eq!(stable_hash(b""), stable_hash(b""));
    }

    #[test]
    fn spreads_close_inputs() {
        let a = stable_hash(b"10.0.0.1:9000:1700000000");
        let b = stable_hash(b"10.0.0.1:9001:1700000000");
        let c = stable_hash(b"10.0.0.1:9000:1700000001");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }
}
