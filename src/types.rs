//! Chain data model shared across the crate.
//!
//! Blocks carry an interlink (hashes of selected ancestors) in addition to
//! the usual parent reference, which is what block proofs walk. Bodies are
//! optional: light parts of the protocol move headers only.

use crate::crypto::{merkle_root, sha3};
use serde::{Deserialize, Serialize};

/// SHA3-256 digest.
pub type Hash = [u8; 32];

/// Account address (truncated digest of the owner key).
pub type Address = [u8; 20];

/// Current UNIX timestamp in seconds.
pub fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Short hex prefix for log lines.
pub fn fmt_hash(hash: &Hash) -> String {
    hex::encode(&hash[..8])
}

// =============================================================================
// BLOCKS
// =============================================================================

/// Maximum tolerated clock drift for header timestamps (10 minutes).
/// Headers stamped further in the future fail `verify()`.
pub const TIMESTAMP_DRIFT_MAX: u64 = 600;

/// Highest header version this node understands.
pub const HEADER_VERSION: u16 = 1;

/// Block header.
///
/// `interlink` lists the hashes of selected superchain ancestors; a block
/// proof is a chain of headers linked through `prev_hash` or `interlink`.
/// `body_hash` is the Merkle root over the body's transaction hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u16,
    pub prev_hash: Hash,
    pub interlink: Vec<Hash>,
    pub body_hash: Hash,
    pub height: u32,
    pub timestamp: u64,
}

impl BlockHeader {
    pub fn hash(&self) -> Hash {
        // Serialization of a plain struct cannot fail.
        let bytes = postcard::to_allocvec(self).unwrap_or_default();
        sha3(&bytes)
    }

    /// Intrinsic header checks: supported version, non-genesis height,
    /// timestamp not too far in the future.
    pub fn verify(&self, now: u64) -> bool {
        if self.version == 0 || self.version > HEADER_VERSION {
            return false;
        }
        if self.height == 0 {
            return false;
        }
        self.timestamp <= now.saturating_add(TIMESTAMP_DRIFT_MAX)
    }

    /// True if this header directly references `predecessor`, either as its
    /// parent or through its interlink, at a strictly greater height.
    pub fn is_interlink_successor_of(&self, predecessor: &BlockHeader) -> bool {
        if self.height <= predecessor.height {
            return false;
        }
        let pred_hash = predecessor.hash();
        self.prev_hash == pred_hash || self.interlink.contains(&pred_hash)
    }
}

/// Block body: the transaction list committed to by `BlockHeader::body_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockBody {
    pub transactions: Vec<Transaction>,
}

impl BlockBody {
    pub fn hash(&self) -> Hash {
        let leaves: Vec<Hash> = self.transactions.iter().map(|tx| tx.hash()).collect();
        merkle_root(&leaves)
    }
}

/// Block: header plus optional body. Light representations drop the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub body: Option<BlockBody>,
}

impl Block {
    pub fn new(header: BlockHeader, body: BlockBody) -> Self {
        Self { header, body: Some(body) }
    }

    pub fn light(header: BlockHeader) -> Self {
        Self { header, body: None }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn height(&self) -> u32 {
        self.header.height
    }

    pub fn is_light(&self) -> bool {
        self.body.is_none()
    }

    pub fn verify(&self, now: u64) -> bool {
        if !self.header.verify(now) {
            return false;
        }
        match &self.body {
            Some(body) => body.hash() == self.header.body_hash,
            None => true,
        }
    }
}

// =============================================================================
// TRANSACTIONS
// =============================================================================

/// Transaction.
///
/// `fee` is an absolute amount; relay policy works in fee per serialized
/// byte. `data` is an opaque payload, bounded at the message layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: Address,
    pub recipient: Address,
    pub value: u64,
    pub fee: u64,
    pub validity_start_height: u32,
    pub data: Vec<u8>,
}

impl Transaction {
    pub fn hash(&self) -> Hash {
        let bytes = postcard::to_allocvec(self).unwrap_or_default();
        sha3(&bytes)
    }

    /// Wire size of this transaction in bytes.
    pub fn serialized_size(&self) -> usize {
        postcard::to_allocvec(self).map(|b| b.len()).unwrap_or(0)
    }

    /// True if the fee clears `min_fee_per_byte` for this transaction's size.
    pub fn meets_fee_per_byte(&self, min_fee_per_byte: u64) -> bool {
        self.fee >= min_fee_per_byte.saturating_mul(self.serialized_size() as u64)
    }

    /// True if the transaction touches `address` as sender or recipient.
    pub fn touches(&self, address: &Address) -> bool {
        self.sender == *address || self.recipient == *address
    }
}

// =============================================================================
// RECEIPTS
// =============================================================================

/// Compact attestation that a transaction is included in the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub transaction_hash: Hash,
    pub block_hash: Hash,
    pub block_height: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(height: u32) -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_hash: [0u8; 32],
            interlink: Vec::new(),
            body_hash: [0u8; 32],
            height,
            timestamp: 1_000,
        }
    }

    #[test]
    fn header_hash_changes_with_content() {
        let a = header(1);
        let mut b = header(1);
        b.timestamp += 1;
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash(), header(1).hash());
    }

    #[test]
    fn header_verify_rejects_future_timestamp() {
        let mut h = header(5);
        h.timestamp = 10_000 + TIMESTAMP_DRIFT_MAX + 1;
        assert!(!h.verify(10_000));
        h.timestamp = 10_000 + TIMESTAMP_DRIFT_MAX;
        assert!(h.verify(10_000));
    }

    #[test]
    fn header_verify_rejects_bad_version_and_genesis_height() {
        let mut h = header(5);
        h.version = 0;
        assert!(!h.verify(10_000));
        h.version = HEADER_VERSION + 1;
        assert!(!h.verify(10_000));

        let g = header(0);
        assert!(!g.verify(10_000));
    }

    #[test]
    fn interlink_successor_via_prev_and_interlink() {
        let parent = header(7);
        let mut child = header(8);
        child.prev_hash = parent.hash();
        assert!(child.is_interlink_successor_of(&parent));

        let ancestor = header(4);
        let mut skip = header(8);
        skip.interlink = vec![ancestor.hash()];
        assert!(skip.is_interlink_successor_of(&ancestor));

        // Height must strictly increase.
        let mut stale = header(4);
        stale.prev_hash = parent.hash();
        assert!(!stale.is_interlink_successor_of(&parent));
    }

    #[test]
    fn block_verify_checks_body_commitment() {
        let tx = Transaction {
            sender: [1u8; 20],
            recipient: [2u8; 20],
            value: 10,
            fee: 1,
            validity_start_height: 1,
            data: Vec::new(),
        };
        let body = BlockBody { transactions: vec![tx] };
        let mut h = header(3);
        h.body_hash = body.hash();
        assert!(Block::new(h.clone(), body.clone()).verify(10_000));

        h.body_hash = [9u8; 32];
        assert!(!Block::new(h.clone(), body).verify(10_000));
        assert!(Block::light(h).verify(10_000));
    }

    #[test]
    fn fee_per_byte_threshold() {
        let mut tx = Transaction {
            sender: [1u8; 20],
            recipient: [2u8; 20],
            value: 1,
            fee: 1_000,
            validity_start_height: 0,
            data: vec![0u8; 300],
        };
        // ~350 bytes on the wire, fee 1000 clears 1 sat/byte comfortably.
        assert!(tx.serialized_size() > 300);
        assert!(tx.meets_fee_per_byte(1));

        tx.fee = 100;
        assert!(!tx.meets_fee_per_byte(1));
    }
}
