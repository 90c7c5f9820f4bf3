//! Merkle tree over storage-audit leaves.
//!
//! A leaf is `RIPEMD160(SHA256(RIPEMD160(SHA256(challenge || shard))))`; the
//! leaf list is padded to a power of two with `RIPEMD160(SHA256(""))` before
//! the tree is built. Internal nodes use the same `hash160` combinator over
//! the concatenation of their children, so the whole tree uses one digest
//! throughout.

use lib_crypto::{empty_hash160, hash160};
use serde::{Deserialize, Serialize};

pub type LeafHash = [u8; 20];

/// Compute the leaf for one `(challenge, shard)` pair.
pub fn compute_leaf(challenge: &[u8], shard: &[u8]) -> LeafHash {
    let mut inner = Vec::with_capacity(challenge.len() + shard.len());
    inner.extend_from_slice(challenge);
    inner.extend_from_slice(shard);
    hash160(&hash160(&inner))
}

fn hash_pair(left: &LeafHash, right: &LeafHash) -> LeafHash {
    let mut buf = Vec::with_capacity(40);
    buf.extend_from_slice(left);
    buf.extend_from_slice(right);
    hash160(&buf)
}

fn next_power_of_two(n: usize) -> usize {
    if n <= 1 {
        1
    } else {
        n.next_power_of_two()
    }
}

/// One step of a Merkle inclusion proof: the sibling hash and whether it
/// sits to the left of the node being proven at that level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProofStep {
    #[serde(with = "hex20")]
    pub sibling: LeafHash,
    pub sibling_is_left: bool,
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

/// Audit Merkle tree over a padded leaf list. Levels are stored bottom-up,
/// `levels[0]` being the (padded) leaves and `levels.last()` the single root.
#[derive(Debug, Clone)]
pub struct AuditMerkleTree {
    levels: Vec<Vec<LeafHash>>,
    original_leaf_count: usize,
}

impl AuditMerkleTree {
    /// Build a tree from a (possibly empty) set of raw leaves, padding with
    /// `RIPEMD160(SHA256(""))` up to the next power of two.
    pub fn build(leaves: Vec<LeafHash>) -> Self {
        let original_leaf_count = leaves.len();
        let padded_len = next_power_of_two(leaves.len().max(1));
        let mut padded = leaves;
        padded.resize(padded_len, empty_hash160());

        let mut levels = vec![padded];
        while levels.last().unwrap().len() > 1 {
            let current = levels.last().unwrap();
            let mut next = Vec::with_capacity(current.len() / 2);
            for pair in current.chunks(2) {
                next.push(hash_pair(&pair[0], &pair[1]));
            }
            levels.push(next);
        }

        Self {
            levels,
            original_leaf_count,
        }
    }

    pub fn root(&self) -> LeafHash {
        self.levels.last().expect("tree always has at least one level")[0]
    }

    pub fn leaf_count(&self) -> usize {
        self.original_leaf_count
    }

    pub fn padded_leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    pub fn leaves(&self) -> &[LeafHash] {
        &self.levels[0]
    }

    /// Build the inclusion proof path for the leaf at `index` (0-based,
    /// within the padded leaf list).
    pub fn proof(&self, index: usize) -> Option<Vec<ProofStep>> {
        if index >= self.levels[0].len() {
            return None;
        }
        let mut steps = Vec::with_capacity(self.levels.len() - 1);
        let mut idx = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_idx = idx ^ 1;
            let sibling = level[sibling_idx];
            steps.push(ProofStep {
                sibling,
                sibling_is_left: sibling_idx < idx,
            });
            idx /= 2;
        }
        Some(steps)
    }

    /// Verify that `leaf` at its claimed position reconstructs to `root`
    /// given `proof`.
    pub fn verify_proof(leaf: LeafHash, proof: &[ProofStep], root: LeafHash) -> bool {
        let mut current = leaf;
        for step in proof {
            current = if step.sibling_is_left {
                hash_pair(&step.sibling, &current)
            } else {
                hash_pair(&current, &step.sibling)
            };
        }
        current == root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_leaf_tree_root_is_leaf_itself_after_self_pad() {
        let leaf = compute_leaf(b"challenge", b"shard bytes");
        let tree = AuditMerkleTree::build(vec![leaf]);
        assert_eq!(tree.padded_leaf_count(), 1);
        assert_eq!(tree.root(), leaf);
    }

    #[test]
    fn proof_roundtrip_for_every_leaf() {
        let leaves: Vec<LeafHash> = (0..5u8)
            .map(|i| compute_leaf(&[i], b"shard bytes"))
            .collect();
        let tree = AuditMerkleTree::build(leaves.clone());
        let root = tree.root();
        for (i, leaf) in tree.leaves().to_vec().iter().enumerate() {
            let proof = tree.proof(i).unwrap();
            assert!(AuditMerkleTree::verify_proof(*leaf, &proof, root));
        }
    }

    #[test]
    fn tampered_leaf_fails_verification() {
        let leaves: Vec<LeafHash> = (0..4u8)
            .map(|i| compute_leaf(&[i], b"shard bytes"))
            .collect();
        let tree = AuditMerkleTree::build(leaves);
        let root = tree.root();
        let proof = tree.proof(0).unwrap();
        let wrong_leaf = compute_leaf(b"wrong", b"shard bytes");
        assert!(!AuditMerkleTree::verify_proof(wrong_leaf, &proof, root));
    }

    #[test]
    fn empty_leaf_set_pads_to_single_empty_hash() {
        let tree = AuditMerkleTree::build(vec![]);
        assert_eq!(tree.leaf_count(), 0);
        assert_eq!(tree.padded_leaf_count(), 1);
        assert_eq!(tree.root(), empty_hash160());
    }

    #[test]
    fn pads_to_power_of_two() {
        let leaves: Vec<LeafHash> = (0..5u8)
            .map(|i| compute_leaf(&[i], b"x"))
            .collect();
        let tree = AuditMerkleTree::build(leaves);
        assert_eq!(tree.padded_leaf_count(), 8);
    }
}
