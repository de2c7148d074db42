//! Backend contract between the agent and the owning node.
//!
//! The agent speaks the protocol; the backend supplies chain and mempool
//! access and decides node-type policy (what to fetch, whether to serve
//! headers instead of bodies). Full, light, and nano nodes differ only in
//! their backend.

use super::types::{InvVector, Subscription, MEMPOOL_THROTTLE};
use crate::types::{Block, BlockHeader, Hash, Transaction};
use std::time::Duration;

/// Store access and policy hooks for one agent.
///
/// Async hooks may suspend (database reads, validation); the agent
/// serializes inventory processing around them so announcements from the
/// same peer are handled in arrival order.
#[allow(async_fn_in_trait)]
pub trait ConsensusBackend {
    // -- store access (required) ---------------------------------------------

    /// Look up a block by hash. `include_forks` widens the search beyond
    /// the main chain; `include_body` requests the transaction list.
    async fn get_block(&self, hash: &Hash, include_forks: bool, include_body: bool)
        -> Option<Block>;

    /// Block in wire form (full body), for serving `get-data`.
    async fn get_raw_block(&self, hash: &Hash, include_forks: bool) -> Option<Block>;

    /// Look up a transaction by hash (mempool or chain, per node type).
    async fn get_transaction(&self, hash: &Hash) -> Option<Transaction>;

    /// Current local chain head, served on `get-head`.
    fn head_header(&self) -> Option<BlockHeader>;

    // -- policy (optional) ---------------------------------------------------

    /// Whether this node wants the announced object at all.
    fn should_request_data(&self, _vector: &InvVector) -> bool {
        true
    }

    /// True to fetch announced blocks as headers (`get-header`) instead of
    /// bodies (`get-data`). Light clients override this.
    fn will_request_headers(&self) -> bool {
        false
    }

    /// Verified mempool instance of a transaction, used to swap payload
    /// duplicates out of received block bodies.
    fn get_mempool_transaction(&self, _hash: &Hash) -> Option<Transaction> {
        None
    }

    /// Mempool transactions matching the peer's subscription, for the
    /// `mempool` service.
    async fn get_subscribed_mempool_transactions(
        &self,
        _subscription: &Subscription,
    ) -> Vec<Transaction> {
        Vec::new()
    }

    /// Pause between mempool inv batches.
    fn mempool_throttle(&self) -> Duration {
        MEMPOOL_THROTTLE
    }

    // -- object intake (optional) --------------------------------------------

    async fn process_block(&mut self, _hash: &Hash, _block: &Block) {}

    async fn process_header(&mut self, _hash: &Hash, _header: &BlockHeader) {}

    async fn process_transaction(&mut self, _hash: &Hash, _transaction: &Transaction) {}

    // -- notifications (optional) --------------------------------------------

    fn on_new_block_announced(&mut self, _hash: &Hash) {}

    fn on_known_block_announced(&mut self, _hash: &Hash, _block: &Block) {}

    fn on_new_transaction_announced(&mut self, _hash: &Hash) {}

    fn on_known_transaction_announced(&mut self, _hash: &Hash) {}

    /// An `inv` carried nothing we did not already know.
    fn on_no_unknown_objects(&mut self) {}

    /// The current request batch fully resolved and no queued work remains.
    fn on_all_objects_received(&mut self) {}

    /// The last received object finished processing.
    fn on_all_objects_processed(&mut self) {}
}
