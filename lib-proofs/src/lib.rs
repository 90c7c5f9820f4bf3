//! Storage-audit Merkle proofs.

pub mod challenge;
pub mod merkle;

pub use challenge::{AuditResponse, Challenge, ChallengeSet, respond_with_tree, verify_response, AUDIT_BYTES};
pub use merkle::{compute_leaf, AuditMerkleTree, LeafHash, ProofStep};
