//! Secure randomness: audit challenges, tunnel quids/tokens, and nonces
//! all route through here so there is exactly one place that touches the OS RNG.

use rand::rngs::OsRng;
use rand::RngCore;

/// Fill a caller-provided buffer with cryptographically secure random bytes.
pub fn fill_random(buf: &mut [u8]) {
    OsRng.fill_bytes(buf);
}

/// A random 32-byte value, the size used for audit challenges and tunnel entrance tokens.
pub fn random_32() -> [u8; 32] {
    let mut buf = [0u8; 32];
    fill_random(&mut buf);
    buf
}

/// A random 6-byte value, the size used for tunnel datachannel quids.
pub fn random_quid() -> [u8; 6] {
    let mut buf = [0u8; 6];
    fill_random(&mut buf);
    buf
}

/// A random lowercase-hex token string of `len` bytes' worth of entropy.
pub fn random_token_hex(len: usize) -> String {
    let mut buf = vec![0u8; len];
    fill_random(&mut buf);
    hex::encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_32_is_not_all_zero() {
        // Statistically certain; guards against a broken RNG backend.
        assert_ne!(random_32(), [0u8; 32]);
    }

    #[test]
    fn random_quid_has_expected_length() {
        assert_eq!(random_quid().len(), 6);
    }
}
