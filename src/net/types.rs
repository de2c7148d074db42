//! Consensus protocol constants and types.
//!
//! # Design Goals
//!
//! 1. **Bounded memory usage** — every per-peer collection has an explicit
//!    cap with FIFO eviction or silent rejection; a flooding peer cannot
//!    grow agent state without bound.
//!
//! 2. **Flow control** — transaction announcements leave through token
//!    bucket queues; low-fee announcements are budgeted separately and by
//!    byte size.
//!
//! 3. **One outcome per request** — every pending request resolves exactly
//!    once: response, not-found, timeout, or cancellation at shutdown.

use crate::types::{Address, Hash, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// REQUEST SCHEDULING
// =============================================================================

/// Queued unknown vectors that trigger an immediate `get-data` batch.
/// Below this the agent waits REQUEST_THROTTLE for more announcements.
pub const REQUEST_THRESHOLD: usize = 50;

/// Collection window after an `inv` before a partial batch is requested.
pub const REQUEST_THROTTLE: Duration = Duration::from_millis(500);

/// Response deadline for an outstanding `get-data`/`get-header` batch and
/// for direct block/transaction requests.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum vectors per `inv`/`get-data`/`get-header`/`not-found` frame.
pub const VECTORS_MAX_COUNT: usize = 1_000;

/// Backlog caps for the to-request queues. Announcements beyond these are
/// dropped; the peer will re-announce anything that matters.
pub const REQUEST_BLOCKS_WAITING_MAX: usize = 5_000;
pub const REQUEST_TRANSACTIONS_WAITING_MAX: usize = 5_000;

// =============================================================================
// PROOF REQUESTS
// =============================================================================

pub const BLOCK_PROOF_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const TRANSACTIONS_PROOF_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const TRANSACTION_RECEIPTS_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// First protocol version that understands the by-height and by-hashes
/// proof request forms. Older peers fail such calls synchronously.
pub const PROOF_BY_HASH_MIN_VERSION: u32 = 2;

/// Payload caps for proof request/response messages.
pub const PROOF_ADDRESSES_MAX_COUNT: usize = 256;
pub const PROOF_HASHES_MAX_COUNT: usize = 256;
pub const RECEIPTS_MAX_COUNT: usize = 500;

// =============================================================================
// RELAY
// =============================================================================

/// Flush interval of the paid transaction announcement queue.
pub const TRANSACTION_RELAY_INTERVAL: Duration = Duration::from_secs(5);

/// Flush interval of the free (low-fee) announcement queue.
pub const FREE_TRANSACTION_RELAY_INTERVAL: Duration = Duration::from_secs(6);

/// Token bucket for paid announcements: burst 100, refill 10 per second.
pub const TRANSACTIONS_AT_ONCE: usize = 100;
pub const TRANSACTIONS_PER_SECOND: usize = 10;

/// Token bucket for free announcements: burst 10, refill 1 per second.
pub const FREE_TRANSACTIONS_AT_ONCE: usize = 10;
pub const FREE_TRANSACTIONS_PER_SECOND: usize = 1;

/// Byte budget of announced free transactions per free relay interval.
pub const FREE_TRANSACTION_SIZE_PER_INTERVAL: usize = 15_000;

/// Transactions below this fee per serialized byte relay as "free".
pub const TRANSACTION_RELAY_FEE_MIN: u64 = 1;

/// Token refill period shared by all throttled queues.
pub const TOKEN_REFILL_INTERVAL: Duration = Duration::from_secs(1);

/// After announcing an object, assume the peer knows it this much later.
pub const KNOWS_OBJECT_AFTER_INV_DELAY: Duration = Duration::from_secs(3);

// =============================================================================
// SUBSCRIPTION & HEAD TRACKING
// =============================================================================

/// A peer may keep sending non-matching transactions for this long after we
/// change our subscription; past it, non-matching traffic is a violation.
pub const SUBSCRIPTION_CHANGE_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Poll the peer's head when no head update arrived for this long.
pub const HEAD_REQUEST_INTERVAL: Duration = Duration::from_secs(100);

// =============================================================================
// BOOKKEEPING LIMITS
// =============================================================================

/// Maximum objects remembered as known per peer.
/// 40k × 33 bytes ≈ 1.3 MB per peer; oldest entries are evicted FIFO.
pub const KNOWN_OBJECTS_COUNT_MAX: usize = 40_000;

/// Default delay between mempool inv batches, keeping a large mempool dump
/// from monopolizing the agent task.
pub const MEMPOOL_THROTTLE: Duration = Duration::from_millis(1_000);

// =============================================================================
// INVENTORY VECTORS
// =============================================================================

/// Inventory object types carried in `inv`/`get-data`/`not-found`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum InvType {
    Block = 1,
    Transaction = 2,
}

/// Typed object identifier: the universal key across all agent bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvVector {
    pub ty: InvType,
    pub hash: Hash,
}

impl InvVector {
    pub fn block(hash: Hash) -> Self {
        Self { ty: InvType::Block, hash }
    }

    pub fn transaction(hash: Hash) -> Self {
        Self { ty: InvType::Transaction, hash }
    }

    pub fn from_transaction(tx: &Transaction) -> Self {
        Self::transaction(tx.hash())
    }

    pub fn is_block(&self) -> bool {
        self.ty == InvType::Block
    }
}

/// Inventory vector of a low-fee transaction together with its serialized
/// size, which the free relay flush budgets against.
///
/// Equality and hashing delegate to the inner vector, so a bare `InvVector`
/// removes the entry from keyed collections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreeTransactionVector {
    pub vector: InvVector,
    pub serialized_size: usize,
}

impl FreeTransactionVector {
    pub fn from_transaction(tx: &Transaction) -> Self {
        Self {
            vector: InvVector::from_transaction(tx),
            serialized_size: tx.serialized_size(),
        }
    }
}

impl PartialEq for FreeTransactionVector {
    fn eq(&self, other: &Self) -> bool {
        self.vector == other.vector
    }
}

impl Eq for FreeTransactionVector {}

impl std::hash::Hash for FreeTransactionVector {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.vector.hash(state);
    }
}

// =============================================================================
// SUBSCRIPTIONS
// =============================================================================

/// Announcement filter a party declares to its peer.
///
/// The predicate is total and side-effect free: `None` matches nothing,
/// every other kind matches all blocks and filters transactions only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Subscription {
    /// Match nothing.
    None,
    /// Match everything.
    Any,
    /// Match transactions touching any listed address.
    Addresses(HashSet<Address>),
    /// Match transactions paying at least this fee per byte.
    MinFee(u64),
}

impl Subscription {
    pub fn matches_block(&self) -> bool {
        !matches!(self, Subscription::None)
    }

    pub fn matches_transaction(&self, tx: &Transaction) -> bool {
        match self {
            Subscription::None => false,
            Subscription::Any => true,
            Subscription::Addresses(addresses) => {
                addresses.iter().any(|address| tx.touches(address))
            }
            Subscription::MinFee(min_fee) => tx.meets_fee_per_byte(*min_fee),
        }
    }
}

// =============================================================================
// CLOSE CODES
// =============================================================================

/// Reasons the agent closes the peer channel.
///
/// The connection layer above maps these onto peer scoring; an invalid
/// proof is ban-worthy, a timeout merely disconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CloseCode {
    TransactionNotMatchingSubscription = 1,
    InvalidBlockProof = 2,
    InvalidTransactionProof = 3,
    GetTransactionsProofTimeout = 4,
    GetTransactionReceiptsTimeout = 5,
}

// =============================================================================
// REQUEST ERRORS
// =============================================================================

/// Outcome delivered to waiters when a request does not resolve with data.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    /// No response within the per-operation timeout.
    #[error("request timed out")]
    Timeout,
    /// The peer declared it does not have the object.
    #[error("object not found by peer")]
    NotFound,
    /// The peer answered the proof request without a proof payload.
    #[error("request was rejected by peer")]
    Rejected,
    /// Proof validation failed.
    #[error("invalid proof: {0}")]
    InvalidProof(&'static str),
    /// The request form is not supported by the peer's protocol version.
    #[error("request not supported by peer version")]
    Unsupported,
    /// The agent shut down before the request resolved.
    #[error("request cancelled")]
    Cancelled,
}
