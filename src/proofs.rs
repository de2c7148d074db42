//! Proof objects served to and verified from peers.
//!
//! A `BlockProof` is a chain of headers linked through parent or interlink
//! references, proving that its tail block is an ancestor of its head. A
//! `TransactionsProof` is a Merkle inclusion proof tying a set of
//! transactions to a block's `body_hash`.

use crate::crypto::sha3_concat;
use crate::types::{BlockHeader, Hash, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MerkleError {
    #[error("proof operation underflowed the stack")]
    StackUnderflow,
    #[error("proof did not reduce to a single root")]
    NoRoot,
    #[error("proof left nodes or inputs unconsumed")]
    UnconsumedValues,
    #[error("proof referenced more nodes or inputs than provided")]
    MissingValues,
}

// =============================================================================
// BLOCK PROOF
// =============================================================================

/// Interlink chain from the proved block (tail) up to a recent block (head).
///
/// The requester checks separately that its own reference block is an
/// interlink successor of `head()`, closing the gap to known chain state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockProof {
    pub blocks: Vec<BlockHeader>,
}

impl BlockProof {
    pub fn new(blocks: Vec<BlockHeader>) -> Self {
        Self { blocks }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Oldest header in the proof: the block being proved.
    pub fn tail(&self) -> Option<&BlockHeader> {
        self.blocks.first()
    }

    /// Newest header in the proof.
    pub fn head(&self) -> Option<&BlockHeader> {
        self.blocks.last()
    }

    /// Structural check: every adjacent pair must be linked by parent or
    /// interlink reference with strictly increasing height.
    pub fn verify(&self) -> bool {
        if self.blocks.is_empty() {
            return false;
        }
        self.blocks
            .windows(2)
            .all(|pair| pair[1].is_interlink_successor_of(&pair[0]))
    }
}

// =============================================================================
// MERKLE INCLUSION PROOF
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MerkleOp {
    /// Push the next pre-computed node hash.
    ConsumeProof = 0,
    /// Push the hash of the next input leaf.
    ConsumeInput = 1,
    /// Pop two values, push their parent hash.
    Hash = 2,
}

/// Postorder inclusion proof over the tree shape of `crypto::merkle_root`
/// (odd trailing nodes promoted unhashed, never duplicated).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub nodes: Vec<Hash>,
    pub operations: Vec<MerkleOp>,
}

impl MerkleProof {
    /// Build a proof over `leaves` revealing exactly the leaves whose hash
    /// is in `included`. Absent subtrees collapse to one proof node each;
    /// the empty tree collapses to its all-zero root, matching
    /// `crypto::merkle_root`.
    pub fn from_leaves(leaves: &[Hash], included: &HashSet<Hash>) -> Self {
        let mut proof = MerkleProof { nodes: Vec::new(), operations: Vec::new() };
        if leaves.is_empty() {
            proof.nodes.push([0u8; 32]);
            proof.operations.push(MerkleOp::ConsumeProof);
            return proof;
        }
        let size = leaves.len().next_power_of_two();
        build_range(leaves, included, 0, size, &mut proof);
        proof
    }

    /// Execute the proof against `inputs` (revealed leaf hashes, in leaf
    /// order) and return the reconstructed root.
    pub fn compute_root(&self, inputs: &[Hash]) -> Result<Hash, MerkleError> {
        let mut stack: Vec<Hash> = Vec::new();
        let mut nodes = self.nodes.iter();
        let mut leaves = inputs.iter();

        for op in &self.operations {
            match op {
                MerkleOp::ConsumeProof => {
                    stack.push(*nodes.next().ok_or(MerkleError::MissingValues)?);
                }
                MerkleOp::ConsumeInput => {
                    stack.push(*leaves.next().ok_or(MerkleError::MissingValues)?);
                }
                MerkleOp::Hash => {
                    let right = stack.pop().ok_or(MerkleError::StackUnderflow)?;
                    let left = stack.pop().ok_or(MerkleError::StackUnderflow)?;
                    stack.push(sha3_concat(&left, &right));
                }
            }
        }

        if nodes.next().is_some() || leaves.next().is_some() {
            return Err(MerkleError::UnconsumedValues);
        }
        match (stack.pop(), stack.pop()) {
            (Some(root), None) => Ok(root),
            _ => Err(MerkleError::NoRoot),
        }
    }
}

/// Emit operations for the padded range `[lo, lo + size)`; `size` is a power
/// of two and the range is known to contain at least one real leaf.
fn build_range(leaves: &[Hash], included: &HashSet<Hash>, lo: usize, size: usize, out: &mut MerkleProof) {
    let hi = (lo + size).min(leaves.len());
    if !leaves[lo..hi].iter().any(|leaf| included.contains(leaf)) {
        out.nodes.push(range_root(leaves, lo, size));
        out.operations.push(MerkleOp::ConsumeProof);
        return;
    }
    if size == 1 {
        out.operations.push(MerkleOp::ConsumeInput);
        return;
    }

    let half = size / 2;
    build_range(leaves, included, lo, half, out);
    if lo + half < leaves.len() {
        build_range(leaves, included, lo + half, half, out);
        out.operations.push(MerkleOp::Hash);
    }
    // Right half past the end: the left result is promoted as-is.
}

/// Root of the padded range `[lo, lo + size)`, promoting across empty right
/// halves exactly like `crypto::merkle_root`.
fn range_root(leaves: &[Hash], lo: usize, size: usize) -> Hash {
    if size == 1 {
        return leaves[lo];
    }
    let half = size / 2;
    let left = range_root(leaves, lo, half);
    if lo + half < leaves.len() {
        sha3_concat(&left, &range_root(leaves, lo + half, half))
    } else {
        left
    }
}

// =============================================================================
// TRANSACTIONS PROOF
// =============================================================================

/// Merkle proof that `transactions` are included in a block body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionsProof {
    pub transactions: Vec<Transaction>,
    pub proof: MerkleProof,
}

impl TransactionsProof {
    /// Reconstructed body root; compare against `BlockHeader::body_hash`.
    pub fn root(&self) -> Result<Hash, MerkleError> {
        let inputs: Vec<Hash> = self.transactions.iter().map(|tx| tx.hash()).collect();
        self.proof.compute_root(&inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::merkle_root;
    use crate::types::HEADER_VERSION;

    fn leaf(n: u8) -> Hash {
        [n; 32]
    }

    fn header(height: u32, prev: &BlockHeader) -> BlockHeader {
        BlockHeader {
            version: HEADER_VERSION,
            prev_hash: prev.hash(),
            interlink: Vec::new(),
            body_hash: [0u8; 32],
            height,
            timestamp: 1_000 + height as u64,
        }
    }

    fn genesis_like(height: u32) -> BlockHeader {
        BlockHeader {
            version: HEADER_VERSION,
            prev_hash: [0u8; 32],
            interlink: Vec::new(),
            body_hash: [0u8; 32],
            height,
            timestamp: 1_000,
        }
    }

    #[test]
    fn block_proof_verifies_linked_chain() {
        let a = genesis_like(1);
        let b = header(2, &a);
        let c = header(5, &b);
        let proof = BlockProof::new(vec![a.clone(), b, c]);
        assert!(proof.verify());
        assert_eq!(proof.tail(), Some(&a));
    }

    #[test]
    fn block_proof_rejects_broken_link_and_empty() {
        let a = genesis_like(1);
        let b = header(2, &a);
        let unrelated = genesis_like(9);
        assert!(!BlockProof::new(vec![a, b, unrelated]).verify());
        assert!(!BlockProof::new(Vec::new()).verify());
    }

    #[test]
    fn block_proof_accepts_interlink_hop() {
        let a = genesis_like(1);
        let mut hop = genesis_like(40);
        hop.interlink = vec![a.hash()];
        assert!(BlockProof::new(vec![a, hop]).verify());
    }

    fn subset_proof_roundtrip(n: u8, include: &[u8]) {
        let leaves: Vec<Hash> = (0..n).map(leaf).collect();
        let included: HashSet<Hash> = include.iter().map(|i| leaf(*i)).collect();
        let proof = MerkleProof::from_leaves(&leaves, &included);

        let inputs: Vec<Hash> = leaves
            .iter()
            .filter(|l| included.contains(*l))
            .copied()
            .collect();
        assert_eq!(proof.compute_root(&inputs).unwrap(), merkle_root(&leaves));
    }

    #[test]
    fn merkle_proof_empty_tree_roots_to_zero() {
        let proof = MerkleProof::from_leaves(&[], &HashSet::new());
        assert_eq!(proof.compute_root(&[]).unwrap(), merkle_root(&[]));
        assert_eq!(proof.compute_root(&[]).unwrap(), [0u8; 32]);
    }

    #[test]
    fn merkle_proof_matches_root_across_shapes() {
        subset_proof_roundtrip(1, &[0]);
        subset_proof_roundtrip(2, &[1]);
        subset_proof_roundtrip(3, &[2]);
        subset_proof_roundtrip(5, &[1, 3]);
        subset_proof_roundtrip(6, &[0, 5]);
        subset_proof_roundtrip(7, &[6]);
        subset_proof_roundtrip(8, &[0, 3, 7]);
    }

    #[test]
    fn merkle_proof_detects_tampered_input() {
        let leaves: Vec<Hash> = (0..5).map(leaf).collect();
        let included: HashSet<Hash> = [leaf(2)].into_iter().collect();
        let proof = MerkleProof::from_leaves(&leaves, &included);

        let root = proof.compute_root(&[leaf(2)]).unwrap();
        assert_eq!(root, merkle_root(&leaves));
        assert_ne!(proof.compute_root(&[leaf(9)]).unwrap(), root);
    }

    #[test]
    fn merkle_proof_rejects_wrong_input_count() {
        let leaves: Vec<Hash> = (0..4).map(leaf).collect();
        let included: HashSet<Hash> = [leaf(1)].into_iter().collect();
        let proof = MerkleProof::from_leaves(&leaves, &included);

        assert_eq!(proof.compute_root(&[]), Err(MerkleError::MissingValues));
        assert_eq!(
            proof.compute_root(&[leaf(1), leaf(2)]),
            Err(MerkleError::UnconsumedValues)
        );
    }

    #[test]
    fn transactions_proof_root_matches_body() {
        let txs: Vec<Transaction> = (0..4u8)
            .map(|i| Transaction {
                sender: [i; 20],
                recipient: [i + 1; 20],
                value: i as u64,
                fee: 1,
                validity_start_height: 0,
                data: Vec::new(),
            })
            .collect();
        let leaves: Vec<Hash> = txs.iter().map(|tx| tx.hash()).collect();
        let body_root = merkle_root(&leaves);

        let included: HashSet<Hash> = [txs[2].hash()].into_iter().collect();
        let tx_proof = TransactionsProof {
            transactions: vec![txs[2].clone()],
            proof: MerkleProof::from_leaves(&leaves, &included),
        };
        assert_eq!(tx_proof.root().unwrap(), body_root);
    }
}
