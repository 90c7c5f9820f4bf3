//! Digest primitives used throughout the overlay: plain SHA-256, RIPEMD-160,
//! and the double-hash `RIPEMD160(SHA256(x))` construction used for node ids
//! and shard/leaf hashes.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// RIPEMD-160 of `data`.
pub fn ripemd160(data: &[u8]) -> [u8; 20] {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// `RIPEMD160(SHA256(data))`, the digest used for node ids and shard hashes.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    ripemd160(&sha256(data))
}

/// Double-SHA256, used by the compact "Bitcoin signed message" construction.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// `RIPEMD160(SHA256(""))`, the padding leaf used to round the audit leaf
/// list up to a power of two.
pub fn empty_hash160() -> [u8; 20] {
    hash160(&[])
}

pub fn hex_encode(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

pub fn hex_decode(s: &str) -> anyhow::Result<Vec<u8>> {
    Ok(hex::decode(s)?)
}

/// Incremental `hash160`, for hashing a shard as it streams through without
/// buffering the whole thing in memory.
pub struct StreamingHash160 {
    inner: Sha256,
}

impl StreamingHash160 {
    pub fn new() -> Self {
        Self { inner: Sha256::new() }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
    }

    pub fn finalize(self) -> [u8; 20] {
        let sha = self.inner.finalize();
        ripemd160(&sha)
    }
}

impl Default for StreamingHash160 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash160_matches_nested_hashes() {
        let data = b"test shard";
        assert_eq!(hash160(data), ripemd160(&sha256(data)));
    }

    #[test]
    fn empty_hash160_is_stable() {
        let a = empty_hash160();
        let b = empty_hash160();
        assert_eq!(a, b);
    }

    #[test]
    fn streaming_hash160_matches_whole_buffer() {
        let data = b"shard bytes split across several chunks";
        let mut streaming = StreamingHash160::new();
        for chunk in data.chunks(7) {
            streaming.update(chunk);
        }
        assert_eq!(streaming.finalize(), hash160(data));
    }
}
