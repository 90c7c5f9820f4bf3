//! Identity and signing primitives for the storage overlay.
//!
//! A peer's [`Identity`] wraps a secp256k1 key pair, the 20-byte node id
//! derived from it, and the two signature flavors the rest of the workspace
//! needs: compact (recoverable, "Bitcoin signed message" style) and DER.

pub mod ecdsa;
pub mod hashing;
pub mod hd;
pub mod random;

use anyhow::{anyhow, Result};
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

pub use hashing::{double_sha256, empty_hash160, hash160, hex_decode, hex_encode, ripemd160, sha256, StreamingHash160};
pub use hd::{ExtendedPrivateKey, ExtendedPublicKey, STORAGE_DERIVATION_PATH};

/// 20-byte node identity, `RIPEMD160(SHA256(compressed_pubkey))`.
pub type NodeId = [u8; 20];

pub fn node_id_from_pubkey(pubkey: &PublicKey) -> NodeId {
    hash160(&pubkey.serialize())
}

pub fn node_id_to_hex(id: &NodeId) -> String {
    hex::encode(id)
}

pub fn node_id_from_hex(s: &str) -> Result<NodeId> {
    let bytes = hex::decode(s)?;
    if bytes.len() != 20 {
        return Err(anyhow!("node id must be 20 bytes (40 hex chars), got {}", bytes.len()));
    }
    let mut id = [0u8; 20];
    id.copy_from_slice(&bytes);
    Ok(id)
}

/// Whether a signature should be produced/verified using the compact
/// recoverable ("Bitcoin signed message") scheme or plain DER-over-SHA256.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureMode {
    Compact,
    Der,
}

/// A peer's key pair and derived identity.
///
/// Immutable for the lifetime of the process: it is produced once at boot
/// (fresh or loaded from persistent storage) and never mutated afterward.
#[derive(Clone)]
pub struct Identity {
    secret_key: SecretKey,
    public_key: PublicKey,
    node_id: NodeId,
    /// Optional HD extended key used to derive per-contract child keys
    /// along the storage path `m/3000'/0'`.
    hd_key: Option<ExtendedPrivateKey>,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("node_id", &hex::encode(self.node_id))
            .finish_non_exhaustive()
    }
}

impl Identity {
    /// Construct a new identity. Pass `privkey` to load an existing key
    /// (from persistent storage); pass `None` to generate a fresh one.
    pub fn new(privkey: Option<SecretKey>) -> Result<Self> {
        let secp = Secp256k1::new();
        let secret_key = match privkey {
            Some(key) => key,
            None => SecretKey::new(&mut rand::rngs::OsRng),
        };
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        let node_id = node_id_from_pubkey(&public_key);
        Ok(Self {
            secret_key,
            public_key,
            node_id,
            hd_key: None,
        })
    }

    /// Construct an identity and derive its storage HD key from a 64-byte seed.
    pub fn with_hd_seed(privkey: Option<SecretKey>, seed: &[u8]) -> Result<Self> {
        let mut identity = Self::new(privkey)?;
        let master = ExtendedPrivateKey::master(seed)?;
        identity.hd_key = Some(master.derive_path(STORAGE_DERIVATION_PATH)?);
        Ok(identity)
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// Compressed public key bytes (33 bytes).
    pub fn public_key_bytes(&self) -> [u8; 33] {
        self.public_key.serialize()
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn node_id_hex(&self) -> String {
        node_id_to_hex(&self.node_id)
    }

    /// Base58check address derived from the node id, version byte 0x00.
    pub fn address(&self) -> String {
        let mut buf = Vec::with_capacity(21);
        buf.push(0u8);
        buf.extend_from_slice(&self.node_id);
        bs58::encode(buf).with_check().into_string()
    }

    pub fn extended_public_key(&self) -> Option<ExtendedPublicKey> {
        self.hd_key.as_ref().map(|k| k.to_extended_public())
    }

    /// Derive the child key at `index` under the storage HD path and return
    /// its node id, used to validate a counterparty's claimed `hd_index`.
    pub fn child_node_id(&self, index: u32) -> Result<NodeId> {
        let hd = self
            .hd_key
            .as_ref()
            .ok_or_else(|| anyhow!("identity has no HD key configured"))?;
        let child = hd.derive_child(index)?;
        Ok(node_id_from_pubkey(&child.public_key()))
    }

    /// Sign `msg`. `compact` selects the recoverable "Bitcoin signed message"
    /// scheme; otherwise a DER-encoded ECDSA signature over SHA-256(msg) is produced.
    pub fn sign(&self, msg: &[u8], mode: SignatureMode) -> Result<Vec<u8>> {
        match mode {
            SignatureMode::Compact => Ok(ecdsa::sign_compact(&self.secret_key, msg)?.to_vec()),
            SignatureMode::Der => Ok(ecdsa::sign_der(&self.secret_key, msg)),
        }
    }

    /// Verify `sig` against `pubkey`. The signature's own length distinguishes
    /// compact (65 bytes) from DER (variable, but never exactly 65 bytes in
    /// practice for secp256k1 DER signatures).
    pub fn verify(msg: &[u8], sig: &[u8], pubkey: &PublicKey) -> Result<bool> {
        if sig.len() == 65 {
            ecdsa::verify_compact(pubkey, msg, sig)
        } else {
            ecdsa::verify_der(pubkey, msg, sig)
        }
    }
}

impl Drop for Identity {
    fn drop(&mut self) {
        self.secret_key.non_secure_erase();
    }
}

/// Minimal zeroize shim: `secp256k1::SecretKey` does not implement
/// `zeroize::Zeroize` directly, so scrub the best we can on drop.
trait NonSecureErase {
    fn non_secure_erase(&mut self);
}

impl NonSecureErase for SecretKey {
    fn non_secure_erase(&mut self) {
        let mut bytes = self.secret_bytes();
        bytes.zeroize();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializableSignature {
    pub mode: String,
    #[serde(with = "hex_bytes")]
    pub bytes: Vec<u8>,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_is_stable_for_same_key() {
        let identity = Identity::new(None).unwrap();
        assert_eq!(identity.node_id(), node_id_from_pubkey(&identity.public_key()));
    }

    #[test]
    fn compact_sign_and_verify_roundtrip() {
        let identity = Identity::new(None).unwrap();
        let msg = b"offer payload";
        let sig = identity.sign(msg, SignatureMode::Compact).unwrap();
        assert!(Identity::verify(msg, &sig, &identity.public_key()).unwrap());
    }

    #[test]
    fn der_sign_and_verify_roundtrip() {
        let identity = Identity::new(None).unwrap();
        let msg = b"contract digest bytes";
        let sig = identity.sign(msg, SignatureMode::Der).unwrap();
        assert!(Identity::verify(msg, &sig, &identity.public_key()).unwrap());
    }

    #[test]
    fn hd_child_node_id_matches_independent_derivation() {
        let seed = [7u8; 64];
        let identity = Identity::with_hd_seed(None, &seed).unwrap();
        let xpub = identity.extended_public_key().unwrap();
        let child_pub = xpub.derive_child(0).unwrap();
        let expected = node_id_from_pubkey(&child_pub.public_key);
        assert_eq!(identity.child_node_id(0).unwrap(), expected);
    }

    #[test]
    fn node_id_hex_roundtrip() {
        let identity = Identity::new(None).unwrap();
        let hex = identity.node_id_hex();
        assert_eq!(node_id_from_hex(&hex).unwrap(), identity.node_id());
    }
}
