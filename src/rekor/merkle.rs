//! RFC 6962 Merkle tree hashing and inclusion-proof folding.
//!
//! The log pairs nodes with the fixed rule from RFC 6962: leaves hash
//! with a `0x00` prefix, interior nodes with `0x01`, and an audit path
//! folds from the leaf up to the root following the leaf index and tree
//! size (the verification loop of RFC 9162 §2.1.3.2).

use sha2::{Digest, Sha256};
use thiserror::Error;

/// A node hash in the log's Merkle tree.
pub type Hash = [u8; 32];

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// Errors from inclusion-proof folding.
#[derive(Debug, Error)]
pub enum ProofError {
    #[error("leaf index {index} is outside tree of size {tree_size}")]
    IndexOutOfRange { index: u64, tree_size: u64 },

    #[error("audit path has wrong length for leaf index and tree size")]
    PathLength,
}

/// Hash a leaf entry: `SHA-256(0x00 || leaf)`.
pub fn leaf_hash(leaf: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(leaf);
    hasher.finalize().into()
}

/// Hash two children: `SHA-256(0x01 || left || right)`.
pub fn node_hash(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Fold a leaf hash with its audit path up to the root of a tree with
/// `tree_size` leaves, where the leaf sits at `leaf_index`.
pub fn root_from_inclusion_proof(
    leaf_index: u64,
    tree_size: u64,
    leaf: Hash,
    path: &[Hash],
) -> Result<Hash, ProofError> {
    if leaf_index >= tree_size {
        return Err(ProofError::IndexOutOfRange {
            index: leaf_index,
            tree_size,
        });
    }

    let mut fn_ = leaf_index;
    let mut sn = tree_size - 1;
    let mut hash = leaf;

    for sibling in path {
        if sn == 0 {
            return Err(ProofError::PathLength);
        }
        if fn_ & 1 == 1 || fn_ == sn {
            hash = node_hash(sibling, &hash);
            if fn_ & 1 == 0 {
                // Right-border node: climb until this subtree has a
                // left sibling.
                while fn_ & 1 == 0 && fn_ != 0 {
                    fn_ >>= 1;
                    sn >>= 1;
                }
            }
        } else {
            hash = node_hash(&hash, sibling);
        }
        fn_ >>= 1;
        sn >>= 1;
    }

    if sn != 0 {
        return Err(ProofError::PathLength);
    }
    Ok(hash)
}
