//! The Contract record: a signed, versioned agreement between a renter and
//! a farmer covering one shard hash.

use std::collections::BTreeMap;

use anyhow::Result;
use base64::Engine;
use lib_crypto::hashing::sha256;
use lib_crypto::hd::ExtendedPublicKey;
use secp256k1::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ContractError;
use crate::topic;

pub const CONTRACT_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Renter,
    Farmer,
}

impl Role {
    fn signature_field(self) -> &'static str {
        match self {
            Role::Renter => "renter_signature",
            Role::Farmer => "farmer_signature",
        }
    }
}

/// A storage contract. Every field but `version` is optional so the record
/// can travel through its lifecycle (renter drafts, farmer fills in,
/// both sign) while still being a single concrete type.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Contract {
    pub version: Option<u32>,
    pub renter_id: Option<String>,
    pub farmer_id: Option<String>,
    pub renter_hd_key: Option<String>,
    pub farmer_hd_key: Option<String>,
    pub renter_hd_index: Option<u32>,
    pub farmer_hd_index: Option<u32>,
    pub payment_source: Option<String>,
    pub payment_destination: Option<String>,
    pub payment_download_price: Option<u64>,
    pub payment_storage_price: Option<u64>,
    pub payment_amount: Option<u64>,
    pub data_hash: Option<String>,
    pub data_size: Option<u64>,
    pub store_begin: Option<u64>,
    pub store_end: Option<u64>,
    pub audit_count: Option<u32>,
    pub audit_leaves: Option<Vec<String>>,
    /// Contract-level availability/speed terms: not listed in the original
    /// field table but required by the topic opcode (§3), which is defined
    /// as a function of exactly these plus size/duration. Treated as
    /// recognized contract fields on the same footing as the rest.
    pub availability: Option<f64>,
    pub speed: Option<f64>,
    pub renter_signature: Option<String>,
    pub farmer_signature: Option<String>,
}

/// Fields recognized by `set`/`create`/`update`. Any other JSON key is
/// silently ignored, per the whitelisted-`set` lifecycle rule.
const RECOGNIZED_FIELDS: &[&str] = &[
    "version",
    "renter_id",
    "farmer_id",
    "renter_hd_key",
    "farmer_hd_key",
    "renter_hd_index",
    "farmer_hd_index",
    "payment_source",
    "payment_destination",
    "payment_download_price",
    "payment_storage_price",
    "payment_amount",
    "data_hash",
    "data_size",
    "store_begin",
    "store_end",
    "audit_count",
    "audit_leaves",
    "availability",
    "speed",
    "renter_signature",
    "farmer_signature",
];

impl Contract {
    /// Create a contract from a loosely-typed field map. Unknown keys are
    /// dropped; `version` defaults to [`CONTRACT_VERSION`] if absent.
    pub fn create(fields: serde_json::Map<String, Value>) -> Result<Self, ContractError> {
        let mut contract = Contract {
            version: Some(CONTRACT_VERSION),
            ..Default::default()
        };
        contract.update(fields)?;
        Ok(contract)
    }

    /// Apply a whitelisted set of field updates in place.
    pub fn update(&mut self, fields: serde_json::Map<String, Value>) -> Result<(), ContractError> {
        for (key, value) in fields {
            if RECOGNIZED_FIELDS.contains(&key.as_str()) {
                self.set(&key, value)?;
            }
            // Unrecognized keys are silently ignored.
        }
        Ok(())
    }

    /// Set one recognized field by name. Returns `InvalidContract` if the
    /// value's shape does not match the field's declared type.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), ContractError> {
        macro_rules! as_string {
            () => {
                value
                    .as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| ContractError::InvalidContract(format!("{key} must be a string")))?
            };
        }
        macro_rules! as_u64 {
            () => {
                value
                    .as_u64()
                    .ok_or_else(|| ContractError::InvalidContract(format!("{key} must be a non-negative integer")))?
            };
        }
        macro_rules! as_u32 {
            () => {
                u32::try_from(as_u64!())
                    .map_err(|_| ContractError::InvalidContract(format!("{key} out of range")))?
            };
        }

        match key {
            "version" => self.version = Some(as_u32!()),
            "renter_id" => self.renter_id = Some(as_string!()),
            "farmer_id" => self.farmer_id = Some(as_string!()),
            "renter_hd_key" => self.renter_hd_key = Some(as_string!()),
            "farmer_hd_key" => self.farmer_hd_key = Some(as_string!()),
            "renter_hd_index" => self.renter_hd_index = Some(as_u32!()),
            "farmer_hd_index" => self.farmer_hd_index = Some(as_u32!()),
            "payment_source" => self.payment_source = Some(as_string!()),
            "payment_destination" => self.payment_destination = Some(as_string!()),
            "payment_download_price" => self.payment_download_price = Some(as_u64!()),
            "payment_storage_price" => self.payment_storage_price = Some(as_u64!()),
            "payment_amount" => self.payment_amount = Some(as_u64!()),
            "data_hash" => self.data_hash = Some(as_string!()),
            "data_size" => self.data_size = Some(as_u64!()),
            "store_begin" => self.store_begin = Some(as_u64!()),
            "store_end" => self.store_end = Some(as_u64!()),
            "audit_count" => self.audit_count = Some(as_u32!()),
            "audit_leaves" => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| ContractError::InvalidContract("audit_leaves must be an array".into()))?;
                let mut leaves = Vec::with_capacity(arr.len());
                for item in arr {
                    leaves.push(
                        item.as_str()
                            .map(str::to_owned)
                            .ok_or_else(|| ContractError::InvalidContract("audit_leaves entries must be strings".into()))?,
                    );
                }
                self.audit_leaves = Some(leaves);
            }
            "availability" => {
                self.availability = Some(
                    value
                        .as_f64()
                        .ok_or_else(|| ContractError::InvalidContract("availability must be a number".into()))?,
                )
            }
            "speed" => {
                self.speed = Some(
                    value
                        .as_f64()
                        .ok_or_else(|| ContractError::InvalidContract("speed must be a number".into()))?,
                )
            }
            "renter_signature" => self.renter_signature = Some(as_string!()),
            "farmer_signature" => self.farmer_signature = Some(as_string!()),
            _ => {}
        }
        Ok(())
    }

    /// Strip unrecognized fields by round-tripping through a JSON map.
    /// Since `Contract` only ever holds recognized fields, this is a no-op
    /// on values already shaped as a `Contract`; it matters when building
    /// one from an externally-supplied object.
    pub fn clean(value: serde_json::Map<String, Value>) -> serde_json::Map<String, Value> {
        value
            .into_iter()
            .filter(|(k, _)| RECOGNIZED_FIELDS.contains(&k.as_str()))
            .collect()
    }

    /// Schema validation: required-field shapes and cross-field constraints
    /// from §3, independent of signatures.
    pub fn is_valid(&self) -> Result<(), ContractError> {
        let err = |msg: &str| ContractError::InvalidContract(msg.to_string());

        if let Some(v) = self.version {
            if v != CONTRACT_VERSION {
                return Err(err(&format!("unsupported contract version {v}")));
            }
        }
        if let Some(id) = &self.renter_id {
            validate_hex_id(id).map_err(|e| err(&format!("renter_id: {e}")))?;
        }
        if let Some(id) = &self.farmer_id {
            validate_hex_id(id).map_err(|e| err(&format!("farmer_id: {e}")))?;
        }
        if let Some(hash) = &self.data_hash {
            validate_hex_id(hash).map_err(|e| err(&format!("data_hash: {e}")))?;
        }
        if let Some(size) = self.data_size {
            if size < 1 {
                return Err(err("data_size must be >= 1"));
            }
        }
        if let (Some(begin), Some(end)) = (self.store_begin, self.store_end) {
            if begin >= end {
                return Err(err("store_begin must be strictly before store_end"));
            }
        }
        if let Some(leaves) = &self.audit_leaves {
            for leaf in leaves {
                if leaf.len() != 64 || hex::decode(leaf).is_err() {
                    return Err(err("audit_leaves entries must be 64 hex chars"));
                }
            }
        }
        for (label, key) in [
            (self.renter_hd_key.as_deref(), "renter_hd_key"),
            (self.farmer_hd_key.as_deref(), "farmer_hd_key"),
        ] {
            if let Some(k) = label {
                if k.len() != 111 {
                    return Err(err(&format!("{key} must be a 111-char base58 extended key")));
                }
            }
        }
        for (label, key) in [
            (self.renter_hd_index, "renter_hd_index"),
            (self.farmer_hd_index, "farmer_hd_index"),
        ] {
            if let Some(idx) = label {
                if idx > i32::MAX as u32 {
                    return Err(err(&format!("{key} must be within 0..2^31-1")));
                }
            }
        }
        // Invariant: when an hd_key is present, the claimed id must equal
        // the id derivable from hd_key/hd_index.
        self.check_hd_consistency(Role::Renter)?;
        self.check_hd_consistency(Role::Farmer)?;

        Ok(())
    }

    fn check_hd_consistency(&self, role: Role) -> Result<(), ContractError> {
        let (hd_key, hd_index, claimed_id) = match role {
            Role::Renter => (&self.renter_hd_key, self.renter_hd_index, &self.renter_id),
            Role::Farmer => (&self.farmer_hd_key, self.farmer_hd_index, &self.farmer_id),
        };
        let (hd_key, claimed_id) = match (hd_key, claimed_id) {
            (Some(k), Some(id)) => (k, id),
            _ => return Ok(()),
        };
        let index = hd_index.unwrap_or(0);
        let xpub = ExtendedPublicKey::from_base58(hd_key)
            .map_err(|e| ContractError::InvalidContract(format!("invalid hd key: {e}")))?;
        let child = xpub
            .derive_child(index)
            .map_err(|e| ContractError::InvalidContract(format!("hd derivation failed: {e}")))?;
        let derived_id = hex::encode(lib_crypto::node_id_from_pubkey(&child.public_key));
        if &derived_id != claimed_id {
            return Err(ContractError::InvalidContract(
                "id does not match hd_key/hd_index derivation".into(),
            ));
        }
        Ok(())
    }

    /// Whether both signatures verify and no field required for a
    /// fully-executed contract is missing.
    pub fn is_complete(&self) -> bool {
        let required_present = self.version.is_some()
            && self.renter_id.is_some()
            && self.farmer_id.is_some()
            && self.payment_source.is_some()
            && self.payment_destination.is_some()
            && self.payment_download_price.is_some()
            && self.payment_storage_price.is_some()
            && self.payment_amount.is_some()
            && self.data_hash.is_some()
            && self.data_size.is_some()
            && self.store_begin.is_some()
            && self.store_end.is_some()
            && self.audit_count.is_some()
            && self.renter_signature.is_some()
            && self.farmer_signature.is_some();

        required_present && self.verify(Role::Renter).unwrap_or(false) && self.verify(Role::Farmer).unwrap_or(false)
    }

    /// Canonical signing digest: strip both signature fields, serialize the
    /// remainder with lexicographically sorted keys, SHA-256 the UTF-8 bytes.
    pub fn canonical_digest(&self) -> Result<[u8; 32], ContractError> {
        let value = serde_json::to_value(self)
            .map_err(|e| ContractError::InvalidContract(format!("serialization failed: {e}")))?;
        let mut map = match value {
            Value::Object(m) => m,
            _ => return Err(ContractError::InvalidContract("contract did not serialize to an object".into())),
        };
        map.remove("renter_signature");
        map.remove("farmer_signature");

        let sorted: BTreeMap<String, Value> = map.into_iter().collect();
        let canonical = serde_json::to_string(&sorted)
            .map_err(|e| ContractError::InvalidContract(format!("canonicalization failed: {e}")))?;
        Ok(sha256(canonical.as_bytes()))
    }

    pub fn get_hash(&self) -> Result<[u8; 32], ContractError> {
        self.canonical_digest()
    }

    /// Sign as `role` with `key`, storing the resulting compact recoverable
    /// signature (base64-encoded) in the matching field. The digest is
    /// computed over a clone with both signature fields stripped, so an
    /// existing counterparty signature is left untouched.
    pub fn sign(&mut self, role: Role, key: &SecretKey) -> Result<(), ContractError> {
        let mut unsigned = self.clone();
        unsigned.renter_signature = None;
        unsigned.farmer_signature = None;
        let digest = unsigned.canonical_digest()?;
        let sig = lib_crypto::ecdsa::sign_compact(key, &digest)
            .map_err(|e| ContractError::SignatureInvalid(e.to_string()))?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(sig);
        match role {
            Role::Renter => self.renter_signature = Some(encoded),
            Role::Farmer => self.farmer_signature = Some(encoded),
        }
        Ok(())
    }

    /// Verify `role`'s signature. Recovers the signing public key from the
    /// compact signature, then confirms it maps to the claimed node id
    /// (via `renter_hd_key`/`farmer_hd_key` derivation when present,
    /// otherwise directly against `renter_id`/`farmer_id`).
    pub fn verify(&self, role: Role) -> Result<bool, ContractError> {
        let sig_field = match role {
            Role::Renter => &self.renter_signature,
            Role::Farmer => &self.farmer_signature,
        };
        let claimed_id = match role {
            Role::Renter => &self.renter_id,
            Role::Farmer => &self.farmer_id,
        };
        let (sig_b64, claimed_id) = match (sig_field, claimed_id) {
            (Some(s), Some(id)) => (s, id),
            _ => return Ok(false),
        };

        let sig_bytes = base64::engine::general_purpose::STANDARD
            .decode(sig_b64)
            .map_err(|e| ContractError::SignatureInvalid(format!("invalid base64: {e}")))?;

        // Recompute the digest the same way `sign` did: with both signature
        // fields absent.
        let mut unsigned = self.clone();
        unsigned.renter_signature = None;
        unsigned.farmer_signature = None;
        let digest = unsigned.canonical_digest()?;

        let recovered = lib_crypto::ecdsa::recover_compact(&digest, &sig_bytes)
            .map_err(|e| ContractError::SignatureInvalid(e.to_string()))?;
        let recovered_id = hex::encode(lib_crypto::node_id_from_pubkey(&recovered));

        if &recovered_id != claimed_id {
            return Ok(false);
        }

        // If an HD key was published for this role, the claimed id must
        // also match that derivation (checked independently by `is_valid`,
        // re-checked here since `verify` is the operation callers actually
        // gate acceptance on).
        let hd_key = match role {
            Role::Renter => &self.renter_hd_key,
            Role::Farmer => &self.farmer_hd_key,
        };
        if let Some(hd_key) = hd_key {
            let index = match role {
                Role::Renter => self.renter_hd_index,
                Role::Farmer => self.farmer_hd_index,
            }
            .unwrap_or(0);
            let xpub = ExtendedPublicKey::from_base58(hd_key)
                .map_err(|e| ContractError::SignatureInvalid(format!("invalid hd key: {e}")))?;
            let child = xpub
                .derive_child(index)
                .map_err(|e| ContractError::SignatureInvalid(format!("hd derivation failed: {e}")))?;
            if child.public_key != recovered {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Sign as `role` using a node [`lib_crypto::Identity`] rather than a raw
    /// `SecretKey`, for callers that only hold an `Identity` (the secret key
    /// itself is never exposed outside it).
    pub fn sign_with_identity(&mut self, role: Role, identity: &lib_crypto::Identity) -> Result<(), ContractError> {
        let mut unsigned = self.clone();
        unsigned.renter_signature = None;
        unsigned.farmer_signature = None;
        let digest = unsigned.canonical_digest()?;
        let sig = identity
            .sign(&digest, lib_crypto::SignatureMode::Compact)
            .map_err(|e| ContractError::SignatureInvalid(e.to_string()))?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(sig);
        match role {
            Role::Renter => self.renter_signature = Some(encoded),
            Role::Farmer => self.farmer_signature = Some(encoded),
        }
        Ok(())
    }

    /// Verify with an explicit public key instead of recovering one, for
    /// callers (e.g. OFFER handling) that already know who they expect to
    /// have signed.
    pub fn verify_with_key(&self, role: Role, expected: &PublicKey) -> Result<bool, ContractError> {
        let sig_field = match role {
            Role::Renter => &self.renter_signature,
            Role::Farmer => &self.farmer_signature,
        };
        let Some(sig_b64) = sig_field else { return Ok(false) };
        let sig_bytes = base64::engine::general_purpose::STANDARD
            .decode(sig_b64)
            .map_err(|e| ContractError::SignatureInvalid(format!("invalid base64: {e}")))?;
        let mut unsigned = self.clone();
        unsigned.renter_signature = None;
        unsigned.farmer_signature = None;
        let digest = unsigned.canonical_digest()?;
        lib_crypto::ecdsa::verify_compact(expected, &digest, &sig_bytes)
            .map_err(|e| ContractError::SignatureInvalid(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, ContractError> {
        serde_json::to_string(self).map_err(|e| ContractError::InvalidContract(e.to_string()))
    }

    pub fn from_json(s: &str) -> Result<Self, ContractError> {
        serde_json::from_str(s).map_err(|e| ContractError::InvalidContract(e.to_string()))
    }

    pub fn to_buffer(&self) -> Result<Vec<u8>, ContractError> {
        Ok(self.to_json()?.into_bytes())
    }

    pub fn from_buffer(buf: &[u8]) -> Result<Self, ContractError> {
        let s = std::str::from_utf8(buf).map_err(|e| ContractError::InvalidContract(e.to_string()))?;
        Self::from_json(s)
    }

    /// List of keys whose values differ between `a` and `b`.
    pub fn diff(a: &Contract, b: &Contract) -> Vec<&'static str> {
        let av = serde_json::to_value(a).unwrap_or_default();
        let bv = serde_json::to_value(b).unwrap_or_default();
        RECOGNIZED_FIELDS
            .iter()
            .copied()
            .filter(|key| av.get(key) != bv.get(key))
            .collect()
    }

    /// Equality on canonical form (identical to `PartialEq` since the
    /// struct only ever holds recognized, typed fields).
    pub fn compare(a: &Contract, b: &Contract) -> bool {
        a == b
    }

    /// The 5-byte topic opcode for this contract's (size, duration,
    /// availability, speed).
    pub fn topic_buffer(&self) -> Result<[u8; 5], ContractError> {
        let size = self
            .data_size
            .ok_or_else(|| ContractError::InvalidContract("data_size required for topic".into()))?;
        let begin = self
            .store_begin
            .ok_or_else(|| ContractError::InvalidContract("store_begin required for topic".into()))?;
        let end = self
            .store_end
            .ok_or_else(|| ContractError::InvalidContract("store_end required for topic".into()))?;
        let availability = self
            .availability
            .ok_or_else(|| ContractError::InvalidContract("availability required for topic".into()))?;
        let speed = self
            .speed
            .ok_or_else(|| ContractError::InvalidContract("speed required for topic".into()))?;
        Ok(topic::topic_bytes(size, end.saturating_sub(begin), availability, speed))
    }

    pub fn topic_string(&self) -> Result<String, ContractError> {
        Ok(hex::encode(self.topic_buffer()?))
    }
}

fn validate_hex_id(s: &str) -> Result<(), String> {
    if s.len() != 40 {
        return Err(format!("expected 40 hex chars, got {}", s.len()));
    }
    hex::decode(s).map_err(|e| e.to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use secp256k1::Secp256k1;
    use serde_json::json;

    fn keypair() -> (SecretKey, PublicKey) {
        let secp = Secp256k1::new();
        let sk = SecretKey::new(&mut OsRng);
        let pk = PublicKey::from_secret_key(&secp, &sk);
        (sk, pk)
    }

    fn base_fields(renter_id: &str, farmer_id: &str) -> serde_json::Map<String, Value> {
        json!({
            "renter_id": renter_id,
            "farmer_id": farmer_id,
            "payment_source": "1BoatSLRHtKNngkdXEeobR76b53LETtpyT",
            "payment_destination": "1BoatSLRHtKNngkdXEeobR76b53LETtpyT",
            "payment_download_price": 100,
            "payment_storage_price": 100,
            "payment_amount": 1000,
            "data_hash": "a".repeat(40),
            "data_size": 10,
            "store_begin": 1000,
            "store_end": 2000,
            "audit_count": 0,
            "availability": 0.5,
            "speed": 5.0,
        })
        .as_object()
        .unwrap()
        .clone()
    }

    #[test]
    fn create_strips_unknown_fields() {
        let mut fields = base_fields(&"0".repeat(40), &"1".repeat(40));
        fields.insert("bogus_field".into(), json!("should be dropped"));
        let contract = Contract::create(fields).unwrap();
        assert_eq!(contract.version, Some(CONTRACT_VERSION));
        assert!(contract.is_valid().is_ok());
    }

    #[test]
    fn json_roundtrip_is_lossless() {
        let (sk, pk) = keypair();
        let renter_id = hex::encode(lib_crypto::node_id_from_pubkey(&pk));
        let fields = base_fields(&renter_id, &"2".repeat(40));
        let mut contract = Contract::create(fields).unwrap();
        contract.sign(Role::Renter, &sk).unwrap();

        let json = contract.to_json().unwrap();
        let restored = Contract::from_json(&json).unwrap();
        assert_eq!(contract, restored);

        let buf = contract.to_buffer().unwrap();
        let restored_buf = Contract::from_buffer(&buf).unwrap();
        assert_eq!(contract, restored_buf);
    }

    #[test]
    fn sign_then_verify_succeeds_and_mutation_invalidates() {
        let (sk, pk) = keypair();
        let renter_id = hex::encode(lib_crypto::node_id_from_pubkey(&pk));
        let fields = base_fields(&renter_id, &"3".repeat(40));
        let mut contract = Contract::create(fields).unwrap();
        contract.sign(Role::Renter, &sk).unwrap();
        assert!(contract.verify(Role::Renter).unwrap());

        contract.data_size = Some(999);
        assert!(!contract.verify(Role::Renter).unwrap());
    }

    #[test]
    fn is_complete_requires_both_signatures() {
        let (renter_sk, renter_pk) = keypair();
        let (farmer_sk, farmer_pk) = keypair();
        let renter_id = hex::encode(lib_crypto::node_id_from_pubkey(&renter_pk));
        let farmer_id = hex::encode(lib_crypto::node_id_from_pubkey(&farmer_pk));
        let mut contract = Contract::create(base_fields(&renter_id, &farmer_id)).unwrap();
        assert!(!contract.is_complete());

        contract.sign(Role::Renter, &renter_sk).unwrap();
        assert!(!contract.is_complete());

        contract.sign(Role::Farmer, &farmer_sk).unwrap();
        assert!(contract.is_complete());
    }

    #[test]
    fn topic_depends_only_on_declared_dimensions() {
        let fields = base_fields(&"4".repeat(40), &"5".repeat(40));
        let contract = Contract::create(fields).unwrap();
        let topic = contract.topic_string().unwrap();
        assert_eq!(topic.len(), 10);
        assert!(topic.starts_with("0f"));
    }

    #[test]
    fn hd_key_mismatch_fails_validation() {
        use lib_crypto::hd::ExtendedPrivateKey;
        let seed = [9u8; 64];
        let master = ExtendedPrivateKey::master(&seed).unwrap();
        let storage_key = master.derive_path(lib_crypto::STORAGE_DERIVATION_PATH).unwrap();
        let xpub = storage_key.to_extended_public();

        let mut fields = base_fields(&"f".repeat(40), &"6".repeat(40));
        fields.insert("renter_hd_key".into(), json!(xpub.to_base58()));
        fields.insert("renter_hd_index".into(), json!(0));
        let contract = Contract::create(fields).unwrap();
        assert!(contract.is_valid().is_err());
    }

    #[test]
    fn diff_reports_changed_keys() {
        let a = Contract::create(base_fields(&"7".repeat(40), &"8".repeat(40))).unwrap();
        let mut b = a.clone();
        b.data_size = Some(20);
        let diff = Contract::diff(&a, &b);
        assert_eq!(diff, vec!["data_size"]);
    }
}
