//! Merkle root computation with mutation detection
//!
//! MerkleRoot: ℍ* → ℍ × 𝔹
//!
//! The tree is built in a single pass over the leaves, keeping at most one
//! pending hash per level. A level with an odd number of nodes pairs its last
//! node with itself. Because `[a, b, c]` and `[a, b, c, c]` then produce the
//! same root, the returned flag reports any level where two identical
//! siblings were combined (CVE-2012-2459).

use crate::serialize::{calculate_tx_id, calculate_wtx_id, double_sha256};
use crate::types::*;

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut combined = [0u8; 64];
    combined[..32].copy_from_slice(left);
    combined[32..].copy_from_slice(right);
    double_sha256(&combined)
}

/// Compute the merkle root of `leaves` and whether the tree is mutated.
///
/// 1. No leaves: all-zero root, not mutated
/// 2. One leaf: the leaf itself
/// 3. Otherwise: pairwise double SHA-256 up to a single root
pub fn compute_merkle_root(leaves: &[Hash]) -> (Hash, bool) {
    if leaves.is_empty() {
        return ([0u8; 32], false);
    }

    let mut mutated = false;
    let mut inner = [[0u8; 32]; 64];
    let mut count: u64 = 0;

    // Fold each leaf in, merging completed subtrees upwards
    for leaf in leaves {
        let mut h = *leaf;
        count += 1;
        let mut level = 0;
        while count & (1u64 << level) == 0 {
            mutated |= inner[level] == h;
            h = hash_pair(&inner[level], &h);
            level += 1;
        }
        inner[level] = h;
    }

    // Lowest level holding a pending subtree
    let mut level = 0;
    while count & (1u64 << level) == 0 {
        level += 1;
    }
    let mut h = inner[level];

    // Self-pair the trailing subtree until it joins the others
    while count != (1u64 << level) {
        h = hash_pair(&h, &h);
        count += 1u64 << level;
        level += 1;
        while count & (1u64 << level) == 0 {
            h = hash_pair(&inner[level], &h);
            level += 1;
        }
    }

    (h, mutated)
}

/// Merkle root over the block's transaction ids
pub fn block_merkle_root(block: &Block) -> (Hash, bool) {
    let leaves: Vec<Hash> = block.transactions.iter().map(calculate_tx_id).collect();
    compute_merkle_root(&leaves)
}

/// Witness merkle root: wtxids, with the coinbase leaf replaced by zero
pub fn block_witness_merkle_root(block: &Block) -> (Hash, bool) {
    let leaves: Vec<Hash> = block
        .transactions
        .iter()
        .enumerate()
        .map(|(i, tx)| if i == 0 { [0u8; 32] } else { calculate_wtx_id(tx) })
        .collect();
    compute_merkle_root(&leaves)
}
