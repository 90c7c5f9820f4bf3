//! ECDSA signing and verification over secp256k1.
//!
//! Two signature encodings are supported, mirroring the two call sites the
//! overlay needs:
//!
//! - **compact**: the "Bitcoin signed message" construction — a fixed magic
//!   prefix is hashed together with the message (double SHA-256) and a
//!   65-byte recoverable signature is produced, so the signer's public key
//!   does not need to travel alongside the signature.
//! - **DER**: plain ECDSA over `SHA256(msg)`, DER-encoded. Used wherever the
//!   verifier already knows which public key to check against (contract
//!   signatures, which travel with the contract's renter/farmer ids).

use anyhow::{anyhow, Result};
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId, Signature as DerSignature};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

use crate::hashing::{double_sha256, sha256};

const SIGNED_MESSAGE_MAGIC: &[u8] = b"\x18Bitcoin Signed Message:\n";

fn magic_digest(msg: &[u8]) -> [u8; 32] {
    let mut buf = Vec::with_capacity(SIGNED_MESSAGE_MAGIC.len() + 9 + msg.len());
    buf.extend_from_slice(SIGNED_MESSAGE_MAGIC);
    write_varint(&mut buf, msg.len() as u64);
    buf.extend_from_slice(msg);
    double_sha256(&buf)
}

fn write_varint(buf: &mut Vec<u8>, n: u64) {
    if n < 0xfd {
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(0xfd);
        buf.extend_from_slice(&(n as u16).to_le_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(0xfe);
        buf.extend_from_slice(&(n as u32).to_le_bytes());
    } else {
        buf.push(0xff);
        buf.extend_from_slice(&n.to_le_bytes());
    }
}

/// Produce a 65-byte recoverable compact signature (1 recovery byte + r + s).
pub fn sign_compact(secret: &SecretKey, msg: &[u8]) -> Result<[u8; 65]> {
    let secp = Secp256k1::signing_only();
    let digest = magic_digest(msg);
    let message = Message::from_digest(digest);
    let sig: RecoverableSignature = secp.sign_ecdsa_recoverable(&message, secret);
    let (recovery_id, data) = sig.serialize_compact();
    let mut out = [0u8; 65];
    // +31 matches the conventional Bitcoin header byte for a compressed-key
    // recoverable signature (27 + recid + 4 for compressed pubkeys).
    out[0] = 31 + recovery_id.to_i32() as u8;
    out[1..].copy_from_slice(&data);
    Ok(out)
}

/// Verify a compact signature against an expected public key.
pub fn verify_compact(pubkey: &PublicKey, msg: &[u8], sig: &[u8]) -> Result<bool> {
    if sig.len() != 65 {
        return Err(anyhow!("compact signature must be 65 bytes"));
    }
    let header = sig[0];
    if !(27..=34).contains(&header) {
        return Err(anyhow!("invalid compact signature header byte"));
    }
    let recid = ((header - 27) & 0x03) as i32;
    let recovery_id = RecoveryId::from_i32(recid)?;
    let recoverable = RecoverableSignature::from_compact(&sig[1..], recovery_id)?;

    let secp = Secp256k1::verification_only();
    let digest = magic_digest(msg);
    let message = Message::from_digest(digest);
    let recovered = secp.recover_ecdsa(&message, &recoverable)?;
    Ok(recovered == *pubkey)
}

/// Recover the public key that produced a compact signature, without
/// requiring the caller to already know it.
pub fn recover_compact(msg: &[u8], sig: &[u8]) -> Result<PublicKey> {
    if sig.len() != 65 {
        return Err(anyhow!("compact signature must be 65 bytes"));
    }
    let header = sig[0];
    let recid = ((header.wrapping_sub(27)) & 0x03) as i32;
    let recovery_id = RecoveryId::from_i32(recid)?;
    let recoverable = RecoverableSignature::from_compact(&sig[1..], recovery_id)?;

    let secp = Secp256k1::verification_only();
    let digest = magic_digest(msg);
    let message = Message::from_digest(digest);
    Ok(secp.recover_ecdsa(&message, &recoverable)?)
}

/// DER-encoded ECDSA signature over `SHA256(msg)`.
pub fn sign_der(secret: &SecretKey, msg: &[u8]) -> Vec<u8> {
    let secp = Secp256k1::signing_only();
    let digest = sha256(msg);
    let message = Message::from_digest(digest);
    let sig = secp.sign_ecdsa(&message, secret);
    sig.serialize_der().to_vec()
}

/// Verify a DER-encoded ECDSA signature produced by [`sign_der`].
pub fn verify_der(pubkey: &PublicKey, msg: &[u8], sig: &[u8]) -> Result<bool> {
    let secp = Secp256k1::verification_only();
    let digest = sha256(msg);
    let message = Message::from_digest(digest);
    let signature = DerSignature::from_der(sig)?;
    Ok(secp.verify_ecdsa(&message, &signature, pubkey).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn keypair() -> (SecretKey, PublicKey) {
        let secp = Secp256k1::new();
        let secret = SecretKey::new(&mut OsRng);
        let public = PublicKey::from_secret_key(&secp, &secret);
        (secret, public)
    }

    #[test]
    fn compact_roundtrip() {
        let (sk, pk) = keypair();
        let msg = b"hello overlay";
        let sig = sign_compact(&sk, msg).unwrap();
        assert!(verify_compact(&pk, msg, &sig).unwrap());
        assert_eq!(recover_compact(msg, &sig).unwrap(), pk);
    }

    #[test]
    fn compact_rejects_tampered_message() {
        let (sk, pk) = keypair();
        let sig = sign_compact(&sk, b"original").unwrap();
        assert!(!verify_compact(&pk, b"tampered", &sig).unwrap());
    }

    #[test]
    fn der_roundtrip() {
        let (sk, pk) = keypair();
        let msg = b"contract digest";
        let sig = sign_der(&sk, msg);
        assert!(verify_der(&pk, msg, &sig).unwrap());
    }

    #[test]
    fn der_rejects_wrong_key() {
        let (sk, _pk) = keypair();
        let (_sk2, pk2) = keypair();
        let sig = sign_der(&sk, b"msg");
        assert!(!verify_der(&pk2, b"msg", &sig).unwrap());
    }
}
