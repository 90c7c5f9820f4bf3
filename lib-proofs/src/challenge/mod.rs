//! Challenge generation and audit response/verification.
//!
//! At contract creation the renter produces `audit_count` random 32-byte
//! challenges, builds the Merkle tree of their leaves over the shard, and
//! keeps the challenges privately while publishing the tree root. Later, an
//! `AUDIT` request names one challenge by index; the farmer recomputes the
//! leaf from its local shard copy and returns a proof path, which the
//! renter checks against the root it already holds.

use anyhow::{anyhow, Result};
use lib_crypto::random::random_32;
use serde::{Deserialize, Serialize};

use crate::merkle::{compute_leaf, AuditMerkleTree, LeafHash, ProofStep};

pub const AUDIT_BYTES: usize = 32;

/// One random challenge, 32 bytes per `AUDIT_BYTES`.
pub type Challenge = [u8; AUDIT_BYTES];

/// The renter-side state produced at contract creation: the challenges
/// (kept private) and the tree built over them, whose root is published.
#[derive(Debug, Clone)]
pub struct ChallengeSet {
    challenges: Vec<Challenge>,
    tree: AuditMerkleTree,
}

impl ChallengeSet {
    /// Generate `audit_count` fresh random challenges against `shard` and
    /// build the corresponding Merkle tree. `audit_count == 0` yields an
    /// empty challenge set (no leaves, audit not offered for this contract).
    pub fn generate(audit_count: usize, shard: &[u8]) -> Self {
        let challenges: Vec<Challenge> = (0..audit_count).map(|_| random_32()).collect();
        let leaves: Vec<LeafHash> = challenges
            .iter()
            .map(|c| compute_leaf(c, shard))
            .collect();
        Self {
            challenges,
            tree: AuditMerkleTree::build(leaves),
        }
    }

    pub fn root(&self) -> LeafHash {
        self.tree.root()
    }

    pub fn challenge_count(&self) -> usize {
        self.challenges.len()
    }

    pub fn challenge(&self, index: usize) -> Option<&Challenge> {
        self.challenges.get(index)
    }

    pub fn challenges(&self) -> &[Challenge] {
        &self.challenges
    }
}

/// The farmer's reply to one `AUDIT` challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditResponse {
    #[serde(with = "hex20")]
    pub root: LeafHash,
    #[serde(with = "hex20")]
    pub pre_leaf: LeafHash,
    pub proof: Vec<ProofStep>,
}

mod hex20 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 20], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 20], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 20-byte hex string"))
    }
}

/// Farmer side: given every leaf the farmer stored for this
/// renter at CONSIGN time, answer challenge `index` with a real inclusion
/// proof against the whole tree.
pub fn respond_with_tree(leaves: &[LeafHash], index: usize) -> Result<AuditResponse> {
    if index >= leaves.len() {
        return Err(anyhow!("challenge index {index} out of range for {} leaves", leaves.len()));
    }
    let tree = AuditMerkleTree::build(leaves.to_vec());
    let proof = tree
        .proof(index)
        .ok_or_else(|| anyhow!("no proof available for index {index}"))?;
    Ok(AuditResponse {
        root: tree.root(),
        pre_leaf: leaves[index],
        proof,
    })
}

/// Renter side: verify a farmer's audit response against the root recorded
/// at contract creation.
pub fn verify_response(response: &AuditResponse, expected_root: LeafHash) -> bool {
    response.root == expected_root
        && AuditMerkleTree::verify_proof(response.pre_leaf, &response.proof, expected_root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_to_end_audit_round_trip() {
        let shard = b"test shard";
        let challenge_set = ChallengeSet::generate(4, shard);
        let root = challenge_set.root();

        let leaves: Vec<LeafHash> = challenge_set
            .challenges()
            .iter()
            .map(|c| compute_leaf(c, shard))
            .collect();

        let response = respond_with_tree(&leaves, 2).unwrap();
        assert!(verify_response(&response, root));
    }

    #[test]
    fn tampered_shard_fails_verification() {
        let shard = b"test shard";
        let challenge_set = ChallengeSet::generate(4, shard);
        let root = challenge_set.root();

        // Farmer lost the real bytes and answers from different shard content.
        let tampered_leaves: Vec<LeafHash> = challenge_set
            .challenges()
            .iter()
            .map(|c| compute_leaf(c, b"not the real shard"))
            .collect();
        let response = respond_with_tree(&tampered_leaves, 0).unwrap();
        assert!(!verify_response(&response, root));
    }

    #[test]
    fn zero_audit_count_yields_no_challenges() {
        let challenge_set = ChallengeSet::generate(0, b"shard");
        assert_eq!(challenge_set.challenge_count(), 0);
        assert!(challenge_set.challenge(0).is_none());
    }
}
