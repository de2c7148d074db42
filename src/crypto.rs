use crate::types::Hash;
use sha3::{Digest, Sha3_256};

pub fn sha3(data: &[u8]) -> Hash {
    Sha3_256::digest(data).into()
}

pub fn sha3_concat(a: &[u8], b: &[u8]) -> Hash {
    let mut hasher = Sha3_256::new();
    hasher.update(a);
    hasher.update(b);
    hasher.finalize().into()
}

/// Merkle root over `leaves`.
///
/// Levels pair left-to-right; an odd trailing node is promoted to the next
/// level unhashed. The empty tree roots to all zeroes. Inclusion proofs in
/// `crate::proofs` reproduce exactly this shape.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return [0u8; 32];
    }

    let mut level: Vec<Hash> = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for chunk in level.chunks(2) {
            if chunk.len() == 2 {
                next.push(sha3_concat(&chunk[0], &chunk[1]));
            } else {
                next.push(chunk[0]);
            }
        }
        level = next;
    }

    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(n: u8) -> Hash {
        [n; 32]
    }

    #[test]
    fn merkle_root_empty_and_single() {
        assert_eq!(merkle_root(&[]), [0u8; 32]);
        assert_eq!(merkle_root(&[leaf(7)]), leaf(7));
    }

    #[test]
    fn merkle_root_pairs_and_promotes() {
        let ab = sha3_concat(&leaf(1), &leaf(2));
        assert_eq!(merkle_root(&[leaf(1), leaf(2)]), ab);

        // Odd leaf is promoted unhashed: root([a, b, c]) = H(H(a,b), c).
        assert_eq!(
            merkle_root(&[leaf(1), leaf(2), leaf(3)]),
            sha3_concat(&ab, &leaf(3))
        );
    }

    #[test]
    fn merkle_root_depends_on_order() {
        let forward = merkle_root(&[leaf(1), leaf(2), leaf(3), leaf(4)]);
        let reversed = merkle_root(&[leaf(4), leaf(3), leaf(2), leaf(1)]);
        assert_ne!(forward, reversed);
    }
}
