//! Merkle tree over transaction hashes
//!
//! The tree is returned flattened, layer after layer, starting with the
//! leaves. The root is the last element.

use crate::hash::hash_pair;
use crate::types::{Hash, NULL_HASH};

/// Build the flattened Merkle tree for `leaves`.
///
/// - no leaves: `[NULL_HASH]`
/// - one leaf `h`: `[h, hash_pair(h, h)]`
/// - otherwise adjacent nodes are paired layer by layer; the last node of an
///   odd layer is paired with itself.
pub fn build_merkle_tree(leaves: &[Hash]) -> Vec<Hash> {
    match leaves {
        [] => vec![NULL_HASH],
        [leaf] => vec![*leaf, hash_pair(leaf, leaf)],
        _ => {
            let mut tree = leaves.to_vec();
            let mut offset = 0;
            let mut length = leaves.len();
            while length > 1 {
                for left in (0..length).step_by(2) {
                    let right = (left + 1).min(length - 1);
                    let parent = hash_pair(&tree[offset + left], &tree[offset + right]);
                    tree.push(parent);
                }
                offset += length;
                length = length.div_ceil(2);
            }
            tree
        }
    }
}

/// Root of a flattened tree built by [`build_merkle_tree`]
pub fn merkle_root(tree: &[Hash]) -> Hash {
    tree.last().copied().unwrap_or(NULL_HASH)
}
