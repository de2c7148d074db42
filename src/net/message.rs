//! Consensus protocol messages with bounded collections (defense-in-depth)

use super::serde_safe::BoundedVec;
use super::types::{
    CloseCode, InvVector, Subscription, PROOF_ADDRESSES_MAX_COUNT, PROOF_HASHES_MAX_COUNT,
    RECEIPTS_MAX_COUNT, VECTORS_MAX_COUNT,
};
use crate::proofs::{BlockProof, TransactionsProof};
use crate::types::{Address, Block, BlockHeader, Hash, Transaction, TransactionReceipt};
use serde::{Deserialize, Serialize};

/// Type aliases for bounded collections
pub type InvVectors = BoundedVec<InvVector, VECTORS_MAX_COUNT>;
pub type ProofAddresses = BoundedVec<Address, PROOF_ADDRESSES_MAX_COUNT>;
pub type ProofHashes = BoundedVec<Hash, PROOF_HASHES_MAX_COUNT>;
pub type Receipts = BoundedVec<TransactionReceipt, RECEIPTS_MAX_COUNT>;

/// Proof-response payloads are optional: `None` is the peer's way of
/// declining the request ("rejected").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    Subscribe(Subscription),
    GetHead,
    Head(BlockHeader),
    Inv(InvVectors),
    GetData(InvVectors),
    GetHeader(InvVectors),
    Block(Box<Block>),
    Header(BlockHeader),
    Tx(Box<Transaction>),
    NotFound(InvVectors),
    Mempool,
    GetBlockProof { block_hash_to_prove: Hash, known_block_hash: Hash },
    GetBlockProofAt { block_height_to_prove: u32, known_block_hash: Hash },
    BlockProof(Option<BlockProof>),
    GetTransactionsProofByAddresses { block_hash: Hash, addresses: ProofAddresses },
    GetTransactionsProofByHashes { block_hash: Hash, hashes: ProofHashes },
    TransactionsProof { block_hash: Hash, proof: Option<TransactionsProof> },
    GetTransactionReceiptsByAddress { address: Address },
    GetTransactionReceiptsByHashes { hashes: ProofHashes },
    TransactionReceipts(Option<Receipts>),
    Close { code: CloseCode, reason: String },
}

impl Message {
    pub fn command(&self) -> &'static str {
        match self {
            Message::Subscribe(_) => "subscribe",
            Message::GetHead => "get-head",
            Message::Head(_) => "head",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "get-data",
            Message::GetHeader(_) => "get-header",
            Message::Block(_) => "block",
            Message::Header(_) => "header",
            Message::Tx(_) => "tx",
            Message::NotFound(_) => "not-found",
            Message::Mempool => "mempool",
            Message::GetBlockProof { .. } => "get-block-proof",
            Message::GetBlockProofAt { .. } => "get-block-proof-at",
            Message::BlockProof(_) => "block-proof",
            Message::GetTransactionsProofByAddresses { .. } => "get-transactions-proof-by-addresses",
            Message::GetTransactionsProofByHashes { .. } => "get-transactions-proof-by-hashes",
            Message::TransactionsProof { .. } => "transactions-proof",
            Message::GetTransactionReceiptsByAddress { .. } => "get-transaction-receipts-by-address",
            Message::GetTransactionReceiptsByHashes { .. } => "get-transaction-receipts-by-hashes",
            Message::TransactionReceipts(_) => "transaction-receipts",
            Message::Close { .. } => "close",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::serde_safe::{from_bytes, to_bytes};

    #[test]
    fn inv_roundtrips_through_postcard() {
        let vectors: Vec<InvVector> =
            (0..3u8).map(|n| InvVector::transaction([n; 32])).collect();
        let msg = Message::Inv(InvVectors::new(vectors.clone()).unwrap());

        let bytes = to_bytes(&msg).unwrap();
        let decoded: Message = from_bytes(&bytes).unwrap();
        match decoded {
            Message::Inv(decoded_vectors) => assert_eq!(decoded_vectors.into_inner(), vectors),
            other => panic!("decoded {} instead of inv", other.command()),
        }
    }

    #[test]
    fn oversized_inv_fails_to_decode() {
        let vectors: Vec<InvVector> = (0..VECTORS_MAX_COUNT + 1)
            .map(|n| InvVector::transaction([(n % 251) as u8; 32]))
            .collect();
        // Encode through the unbounded inner representation.
        let bytes = to_bytes(&vectors).unwrap();
        assert!(from_bytes::<InvVectors>(&bytes).is_err());
    }
}
