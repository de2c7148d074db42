//! Per-peer consensus agent.
//!
//! One agent mediates one peer link: it exchanges inventory announcements,
//! requests and delivers blocks and transactions, relays new objects
//! respecting the peer's subscription, and verifies proof responses. The
//! agent is a single task; inbound messages and timer fires mutate its
//! state to completion between awaits on backend hooks, so bookkeeping
//! updates never interleave.
//!
//! The owning node supplies a [`ConsensusBackend`] for chain access and
//! node-type policy, and a shared [`InvRequestManager`] that arbitrates
//! which of its agents fetches each announced object.

use super::backend::ConsensusBackend;
use super::inventory::{InvRequestManager, LimitHashSet};
use super::message::{InvVectors, Message, ProofAddresses, ProofHashes, Receipts};
use super::peer::{Peer, PeerChannel};
use super::queue::{ThrottledQueue, UniqueQueue};
use super::synchronizer::MultiSynchronizer;
use super::timers::TimerRegistry;
use super::types::{
    CloseCode, FreeTransactionVector, InvType, InvVector, RequestError, Subscription,
    BLOCK_PROOF_REQUEST_TIMEOUT, FREE_TRANSACTION_RELAY_INTERVAL,
    FREE_TRANSACTION_SIZE_PER_INTERVAL, FREE_TRANSACTIONS_AT_ONCE, FREE_TRANSACTIONS_PER_SECOND,
    HEAD_REQUEST_INTERVAL, KNOWN_OBJECTS_COUNT_MAX, KNOWS_OBJECT_AFTER_INV_DELAY,
    PROOF_BY_HASH_MIN_VERSION, REQUEST_BLOCKS_WAITING_MAX, REQUEST_THRESHOLD, REQUEST_THROTTLE,
    REQUEST_TIMEOUT, REQUEST_TRANSACTIONS_WAITING_MAX, SUBSCRIPTION_CHANGE_GRACE_PERIOD,
    TOKEN_REFILL_INTERVAL, TRANSACTION_RECEIPTS_REQUEST_TIMEOUT, TRANSACTION_RELAY_FEE_MIN,
    TRANSACTION_RELAY_INTERVAL, TRANSACTIONS_AT_ONCE, TRANSACTIONS_PER_SECOND,
    TRANSACTIONS_PROOF_REQUEST_TIMEOUT, VECTORS_MAX_COUNT,
};
use crate::proofs::{BlockProof, TransactionsProof};
use crate::types::{fmt_hash, now, Address, Block, BlockHeader, Hash, Transaction,
    TransactionReceipt};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Synchronizer keys: jobs under the same key run strictly in order.
const SYNC_INV: &str = "on-inv";
const SYNC_BLOCK_PROOF: &str = "get-block-proof";
const SYNC_TRANSACTIONS_PROOF: &str = "get-transactions-proof";
const SYNC_TRANSACTION_RECEIPTS: &str = "get-transaction-receipts";

// =============================================================================
// TIMERS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum AgentTimer {
    /// Collection window before a partial batch is requested.
    RequestThrottle,
    /// Deadline of the outstanding `get-data`/`get-header` batch.
    GetData,
    /// Head poll, re-armed on every head update.
    GetHead,
    /// Paid relay queue flush.
    TxRelay,
    /// Free relay queue flush.
    FreeTxRelay,
    /// Assume the peer knows an announced object after this fires.
    KnowsObject(InvVector),
    /// Per-vector deadline of a direct block/transaction request.
    Request(InvVector),
    BlockProof,
    TransactionsProof,
    TransactionReceipts,
}

// =============================================================================
// PENDING REQUESTS
// =============================================================================

type Waiter<T> = oneshot::Sender<Result<T, RequestError>>;

/// Future handed to callers of the request APIs. Resolves exactly once:
/// with the object, or with a [`RequestError`].
pub struct PendingRequest<T> {
    receiver: oneshot::Receiver<Result<T, RequestError>>,
}

impl<T> PendingRequest<T> {
    fn new(receiver: oneshot::Receiver<Result<T, RequestError>>) -> Self {
        Self { receiver }
    }

    fn resolved(result: Result<T, RequestError>) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(result);
        Self { receiver }
    }
}

impl<T> Future for PendingRequest<T> {
    type Output = Result<T, RequestError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // Sender dropped: the agent shut down without resolving.
            Poll::Ready(Err(_)) => Poll::Ready(Err(RequestError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

enum BlockProofTarget {
    Hash(Hash),
    Height(u32),
}

enum TransactionsSelector {
    Addresses(Vec<Address>),
    Hashes(Vec<Hash>),
}

enum ReceiptsSelector {
    Address(Address),
    Hashes(Vec<Hash>),
}

struct BlockProofRequest {
    target: BlockProofTarget,
    known_block: BlockHeader,
    waiter: Waiter<BlockHeader>,
}

struct TransactionsProofRequest {
    block: BlockHeader,
    selector: TransactionsSelector,
    waiter: Waiter<Vec<Transaction>>,
}

struct TransactionReceiptsRequest {
    selector: ReceiptsSelector,
    waiter: Waiter<Vec<TransactionReceipt>>,
}

/// Work serialized through the synchronizer.
enum AgentJob {
    Inv(Vec<InvVector>),
    BlockProof(BlockProofRequest),
    TransactionsProof(TransactionsProofRequest),
    TransactionReceipts(TransactionReceiptsRequest),
}

impl AgentJob {
    /// Reject the job's waiter without running it.
    fn cancel(self) {
        match self {
            AgentJob::Inv(_) => {}
            AgentJob::BlockProof(request) => {
                let _ = request.waiter.send(Err(RequestError::Cancelled));
            }
            AgentJob::TransactionsProof(request) => {
                let _ = request.waiter.send(Err(RequestError::Cancelled));
            }
            AgentJob::TransactionReceipts(request) => {
                let _ = request.waiter.send(Err(RequestError::Cancelled));
            }
        }
    }
}

// =============================================================================
// AGENT
// =============================================================================

pub struct ConsensusAgent<B: ConsensusBackend> {
    channel: PeerChannel,
    peer: Peer,
    backend: B,
    inv_mgr: Arc<dyn InvRequestManager>,

    timers: TimerRegistry<AgentTimer>,
    synchronizer: MultiSynchronizer<AgentJob>,

    /// Set by the owning node once initial sync with this peer completed.
    synced: bool,

    /// Objects the peer has seen: announced, requested, or announced by us
    /// (after a short delay).
    known_objects: LimitHashSet<InvVector>,

    /// Announced unknown vectors waiting to be batched into a request.
    blocks_to_request: UniqueQueue<InvVector>,
    txs_to_request: ThrottledQueue<InvVector>,

    /// Vectors of the outstanding request batch.
    objects_in_flight: HashSet<InvVector>,
    /// Vectors whose batch timed out; late deliveries are accepted but are
    /// no longer treated as pending.
    objects_that_flew: LimitHashSet<InvVector>,
    /// Vectors whose payload the backend is currently processing.
    objects_processing: HashSet<InvVector>,

    remote_subscription: Subscription,
    local_subscription: Subscription,
    target_subscription: Subscription,
    last_subscription_change: Option<Instant>,

    /// Relay out-queues: paid and free announcements.
    waiting_inv_vectors: ThrottledQueue<InvVector>,
    waiting_free_inv_vectors: ThrottledQueue<FreeTransactionVector>,

    pending_block_requests: HashMap<InvVector, Vec<Waiter<Block>>>,
    pending_tx_requests: HashMap<InvVector, Vec<Waiter<Transaction>>>,

    block_proof_request: Option<BlockProofRequest>,
    transactions_proof_request: Option<TransactionsProofRequest>,
    transaction_receipts_request: Option<TransactionReceiptsRequest>,

    closed: bool,
}

impl<B: ConsensusBackend> ConsensusAgent<B> {
    pub fn new(
        channel: PeerChannel,
        peer: Peer,
        backend: B,
        inv_mgr: Arc<dyn InvRequestManager>,
    ) -> Self {
        let mut agent = Self {
            channel,
            peer,
            backend,
            inv_mgr,
            timers: TimerRegistry::new(),
            synchronizer: MultiSynchronizer::new(),
            synced: false,
            known_objects: LimitHashSet::new(KNOWN_OBJECTS_COUNT_MAX),
            blocks_to_request: UniqueQueue::new(),
            txs_to_request: ThrottledQueue::new(
                TRANSACTIONS_AT_ONCE,
                TRANSACTIONS_PER_SECOND,
                TOKEN_REFILL_INTERVAL,
                REQUEST_TRANSACTIONS_WAITING_MAX,
            ),
            objects_in_flight: HashSet::new(),
            objects_that_flew: LimitHashSet::new(KNOWN_OBJECTS_COUNT_MAX),
            objects_processing: HashSet::new(),
            remote_subscription: Subscription::None,
            local_subscription: Subscription::None,
            target_subscription: Subscription::None,
            last_subscription_change: None,
            waiting_inv_vectors: ThrottledQueue::new(
                TRANSACTIONS_AT_ONCE,
                TRANSACTIONS_PER_SECOND,
                TOKEN_REFILL_INTERVAL,
                REQUEST_TRANSACTIONS_WAITING_MAX,
            ),
            waiting_free_inv_vectors: ThrottledQueue::new(
                FREE_TRANSACTIONS_AT_ONCE,
                FREE_TRANSACTIONS_PER_SECOND,
                TOKEN_REFILL_INTERVAL,
                REQUEST_TRANSACTIONS_WAITING_MAX,
            ),
            pending_block_requests: HashMap::new(),
            pending_tx_requests: HashMap::new(),
            block_proof_request: None,
            transactions_proof_request: None,
            transaction_receipts_request: None,
            closed: false,
        };

        // Learn the peer's head right away, then poll on inactivity.
        agent.channel.send(Message::GetHead);
        agent.timers.set_interval(AgentTimer::TxRelay, TRANSACTION_RELAY_INTERVAL);
        agent
            .timers
            .set_interval(AgentTimer::FreeTxRelay, FREE_TRANSACTION_RELAY_INTERVAL);
        agent
    }

    // -- accessors -----------------------------------------------------------

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn channel(&self) -> &PeerChannel {
        &self.channel
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Owning node signals that initial sync with this peer completed.
    pub fn mark_synced(&mut self) {
        self.synced = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn local_subscription(&self) -> &Subscription {
        &self.local_subscription
    }

    /// The subscription the owner last asked for; `local_subscription` is
    /// what has actually been sent to the peer.
    pub fn target_subscription(&self) -> &Subscription {
        &self.target_subscription
    }

    pub fn remote_subscription(&self) -> &Subscription {
        &self.remote_subscription
    }

    pub fn known_objects(&self) -> &LimitHashSet<InvVector> {
        &self.known_objects
    }

    pub fn objects_in_flight(&self) -> &HashSet<InvVector> {
        &self.objects_in_flight
    }

    pub fn objects_that_flew(&self) -> &LimitHashSet<InvVector> {
        &self.objects_that_flew
    }

    pub fn objects_processing(&self) -> &HashSet<InvVector> {
        &self.objects_processing
    }

    // -- event loop ----------------------------------------------------------

    /// Drive the agent: inbound messages and timer deadlines, until the
    /// link closes.
    pub async fn run(mut self, mut messages: mpsc::UnboundedReceiver<Message>) {
        loop {
            if self.channel.is_closed() {
                self.shutdown();
            }
            if self.closed {
                break;
            }
            let deadline = self.timers.next_deadline();
            tokio::select! {
                inbound = messages.recv() => match inbound {
                    Some(msg) => self.on_message(msg).await,
                    None => self.shutdown(),
                },
                _ = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                } => self.process_due_timers().await,
            }
        }
    }

    /// Dispatch one inbound message.
    pub async fn on_message(&mut self, msg: Message) {
        if self.closed {
            return;
        }
        match msg {
            Message::Inv(vectors) => self.on_inv(vectors.into_inner()).await,
            Message::Block(block) => self.on_block(*block).await,
            Message::Header(header) => self.on_header(header).await,
            Message::Tx(transaction) => self.on_tx(*transaction).await,
            Message::NotFound(vectors) => self.on_not_found(vectors.into_inner()),
            Message::Subscribe(subscription) => self.on_subscribe(subscription),
            Message::GetData(vectors) => self.on_get_data(vectors.into_inner()).await,
            Message::GetHeader(vectors) => self.on_get_header(vectors.into_inner()).await,
            Message::Mempool => self.on_mempool().await,
            Message::GetHead => self.on_get_head(),
            Message::Head(header) => self.on_head(header),
            Message::BlockProof(proof) => self.on_block_proof(proof),
            Message::TransactionsProof { block_hash, proof } => {
                self.on_transactions_proof(block_hash, proof)
            }
            Message::TransactionReceipts(receipts) => {
                self.on_transaction_receipts(receipts.map(Receipts::into_inner))
            }
            Message::Close { code, reason } => {
                debug!("Peer {} closed the link ({:?}: {})", self.peer.addr, code, reason);
                self.shutdown();
            }
            other => {
                // Request forms this core does not service (the owning node
                // decides whether to answer proof queries).
                debug!("Peer {}: ignoring {}", self.peer.addr, other.command());
            }
        }
    }

    /// Fire every timer whose deadline passed.
    pub async fn process_due_timers(&mut self) {
        loop {
            if self.closed {
                return;
            }
            match self.timers.pop_due() {
                Some(timer) => self.on_timer(timer).await,
                None => return,
            }
        }
    }

    async fn on_timer(&mut self, timer: AgentTimer) {
        match timer {
            AgentTimer::RequestThrottle => self.request_data(),
            AgentTimer::GetData => self.no_more_data(),
            AgentTimer::GetHead => self.channel.send(Message::GetHead),
            AgentTimer::TxRelay => self.send_waiting_inv_vectors(),
            AgentTimer::FreeTxRelay => self.send_free_waiting_inv_vectors(),
            AgentTimer::KnowsObject(vector) => {
                // The peer had time to process our inv; it knows the object.
                self.known_objects.add(vector);
            }
            AgentTimer::Request(vector) => self.on_request_timeout(vector),
            AgentTimer::BlockProof => self.on_block_proof_timeout(),
            AgentTimer::TransactionsProof => self.on_transactions_proof_timeout(),
            AgentTimer::TransactionReceipts => self.on_transaction_receipts_timeout(),
        }
    }

    // -- inventory ingress ---------------------------------------------------

    async fn on_inv(&mut self, vectors: Vec<InvVector>) {
        // Serialized: concurrent invs are handled strictly in arrival order
        // even though processing awaits chain lookups.
        let mut job = self.synchronizer.submit(SYNC_INV, AgentJob::Inv(vectors));
        while let Some(current) = job {
            match current {
                AgentJob::Inv(vectors) => self.process_inv(vectors).await,
                other => self.start_proof_job(other),
            }
            job = self.synchronizer.settle(SYNC_INV);
        }
    }

    async fn process_inv(&mut self, vectors: Vec<InvVector>) {
        // The peer demonstrated knowledge of every advertised object; there
        // is no point announcing any of them back.
        for vector in &vectors {
            self.mark_known(vector);
        }

        // Find the objects we do not have yet.
        let mut unknown = Vec::new();
        for vector in vectors {
            if self.objects_in_flight.contains(&vector)
                || self.objects_processing.contains(&vector)
                || !self.backend.should_request_data(&vector)
            {
                continue;
            }
            match vector.ty {
                InvType::Block => {
                    match self.backend.get_block(&vector.hash, true, false).await {
                        None => {
                            self.backend.on_new_block_announced(&vector.hash);
                            unknown.push(vector);
                        }
                        Some(block) => self.backend.on_known_block_announced(&vector.hash, &block),
                    }
                }
                InvType::Transaction => match self.backend.get_transaction(&vector.hash).await {
                    None => {
                        self.backend.on_new_transaction_announced(&vector.hash);
                        unknown.push(vector);
                    }
                    Some(_) => self.backend.on_known_transaction_announced(&vector.hash),
                },
            }
        }

        if unknown.is_empty() {
            self.backend.on_no_unknown_objects();
            return;
        }
        debug!("Peer {}: {} unknown objects announced", self.peer.addr, unknown.len());

        // The coordinator decides which agent fetches each object.
        let mut to_request = Vec::new();
        for vector in unknown {
            if self.inv_mgr.ask_to_request_vector(self.peer.addr, &vector) {
                to_request.push(vector);
            }
        }
        if !to_request.is_empty() {
            self.request_vectors(to_request);
        }
    }

    // -- request scheduler ---------------------------------------------------

    /// Queue vectors for fetching from this peer. Entry point for both the
    /// agent's own inv handling and the cross-peer coordinator.
    pub fn request_vectors(&mut self, vectors: Vec<InvVector>) {
        if self.closed {
            return;
        }
        for vector in vectors {
            match vector.ty {
                InvType::Block => {
                    if self.blocks_to_request.len() < REQUEST_BLOCKS_WAITING_MAX {
                        self.blocks_to_request.enqueue(vector);
                    }
                }
                InvType::Transaction => {
                    self.txs_to_request.enqueue(vector);
                }
            }
        }

        self.timers.clear(&AgentTimer::RequestThrottle);
        if self.blocks_to_request.len() + self.txs_to_request.available_now() >= REQUEST_THRESHOLD
        {
            self.request_data();
        } else {
            // Wait a moment for more announcements to batch up.
            self.timers.set(AgentTimer::RequestThrottle, REQUEST_THROTTLE);
        }
    }

    fn request_data(&mut self) {
        // One batch in flight per agent.
        if !self.objects_in_flight.is_empty() {
            return;
        }

        let mut vectors = self.blocks_to_request.dequeue_multi(VECTORS_MAX_COUNT);
        vectors.extend(
            self.txs_to_request
                .dequeue_multi(VECTORS_MAX_COUNT - vectors.len()),
        );
        if vectors.is_empty() {
            return;
        }

        for vector in &vectors {
            self.objects_in_flight.insert(vector.clone());
        }
        self.do_request_data(vectors);
        self.timers.set(AgentTimer::GetData, REQUEST_TIMEOUT);
    }

    fn do_request_data(&mut self, vectors: Vec<InvVector>) {
        if self.backend.will_request_headers() {
            let (blocks, transactions): (Vec<_>, Vec<_>) =
                vectors.into_iter().partition(InvVector::is_block);
            if !blocks.is_empty() {
                self.channel.send(Message::GetHeader(InvVectors::new_unchecked(blocks)));
            }
            if !transactions.is_empty() {
                self.channel
                    .send(Message::GetData(InvVectors::new_unchecked(transactions)));
            }
        } else {
            self.channel.send(Message::GetData(InvVectors::new_unchecked(vectors)));
        }
    }

    // -- direct requests -----------------------------------------------------

    /// Request a single block. Resolves with the block, or rejects with
    /// `Timeout`/`NotFound`. Concurrent requests for the same hash share
    /// one wire request.
    pub fn request_block(&mut self, hash: Hash) -> PendingRequest<Block> {
        if self.closed {
            return PendingRequest::resolved(Err(RequestError::Cancelled));
        }
        let vector = InvVector::block(hash);
        let (sender, receiver) = oneshot::channel();
        if let Some(waiters) = self.pending_block_requests.get_mut(&vector) {
            waiters.push(sender);
        } else {
            self.pending_block_requests.insert(vector.clone(), vec![sender]);
            self.channel
                .send(Message::GetData(InvVectors::new_unchecked(vec![vector.clone()])));
            self.timers.set(AgentTimer::Request(vector), REQUEST_TIMEOUT);
        }
        PendingRequest::new(receiver)
    }

    /// Request a single transaction. Unlike blocks, the vector also enters
    /// the in-flight set so batch accounting sees the delivery.
    pub fn request_transaction(&mut self, hash: Hash) -> PendingRequest<Transaction> {
        if self.closed {
            return PendingRequest::resolved(Err(RequestError::Cancelled));
        }
        let vector = InvVector::transaction(hash);
        let (sender, receiver) = oneshot::channel();
        if let Some(waiters) = self.pending_tx_requests.get_mut(&vector) {
            waiters.push(sender);
        } else {
            self.pending_tx_requests.insert(vector.clone(), vec![sender]);
            if !self.objects_in_flight.contains(&vector) {
                self.objects_in_flight.insert(vector.clone());
                if !self.timers.is_armed(&AgentTimer::GetData) {
                    self.timers.set(AgentTimer::GetData, REQUEST_TIMEOUT);
                }
            }
            self.channel
                .send(Message::GetData(InvVectors::new_unchecked(vec![vector.clone()])));
            self.timers.set(AgentTimer::Request(vector), REQUEST_TIMEOUT);
        }
        PendingRequest::new(receiver)
    }

    fn on_request_timeout(&mut self, vector: InvVector) {
        match vector.ty {
            InvType::Block => {
                if let Some(waiters) = self.pending_block_requests.remove(&vector) {
                    for waiter in waiters {
                        let _ = waiter.send(Err(RequestError::Timeout));
                    }
                }
            }
            InvType::Transaction => {
                if let Some(waiters) = self.pending_tx_requests.remove(&vector) {
                    for waiter in waiters {
                        let _ = waiter.send(Err(RequestError::Timeout));
                    }
                }
            }
        }
    }

    // -- responses -----------------------------------------------------------

    async fn on_block(&mut self, mut block: Block) {
        let hash = block.hash();
        let vector = InvVector::block(hash);

        // Directly requested blocks (proof-supporting fetches) resolve out
        // of band and skip relay bookkeeping.
        if let Some(waiters) = self.pending_block_requests.remove(&vector) {
            self.timers.clear(&AgentTimer::Request(vector));
            for waiter in waiters {
                let _ = waiter.send(Ok(block.clone()));
            }
            return;
        }

        if !self.objects_in_flight.contains(&vector) && !self.objects_that_flew.contains(&vector)
        {
            debug!("Peer {}: unsolicited block {}", self.peer.addr, fmt_hash(&hash));
            return;
        }

        // Swap payload duplicates for verified mempool instances.
        if let Some(body) = block.body.as_mut() {
            for transaction in body.transactions.iter_mut() {
                if let Some(known) = self.backend.get_mempool_transaction(&transaction.hash()) {
                    *transaction = known;
                }
            }
        }

        let is_new_head = match &self.peer.head {
            None => self.peer.head_hash == Some(hash),
            Some(head) => block.header.height > head.height,
        };
        if is_new_head {
            self.peer.record_head(block.header.clone());
            self.timers.set(AgentTimer::GetHead, HEAD_REQUEST_INTERVAL);
        }

        self.on_object_received(&vector);
        self.objects_processing.insert(vector.clone());
        self.backend.process_block(&hash, &block).await;
        self.on_object_processed(&vector);
        self.inv_mgr.note_vector_received(&vector);
    }

    async fn on_header(&mut self, header: BlockHeader) {
        let hash = header.hash();
        let vector = InvVector::block(hash);

        if !self.objects_in_flight.contains(&vector) && !self.objects_that_flew.contains(&vector)
        {
            debug!("Peer {}: unsolicited header {}", self.peer.addr, fmt_hash(&hash));
            return;
        }

        let is_new_head = match &self.peer.head {
            None => self.peer.head_hash == Some(hash),
            Some(head) => header.height > head.height,
        };
        if is_new_head {
            self.peer.record_head(header.clone());
            self.timers.set(AgentTimer::GetHead, HEAD_REQUEST_INTERVAL);
        }

        self.on_object_received(&vector);
        self.objects_processing.insert(vector.clone());
        self.backend.process_header(&hash, &header).await;
        self.on_object_processed(&vector);
        self.inv_mgr.note_vector_received(&vector);
    }

    async fn on_tx(&mut self, transaction: Transaction) {
        let hash = transaction.hash();
        let vector = InvVector::transaction(hash);

        if !self.objects_in_flight.contains(&vector) && !self.objects_that_flew.contains(&vector)
        {
            debug!("Peer {}: unsolicited transaction {}", self.peer.addr, fmt_hash(&hash));
            return;
        }

        self.inv_mgr.note_vector_received(&vector);
        self.on_object_received(&vector);
        self.objects_processing.insert(vector.clone());

        let matches = self.local_subscription.matches_transaction(&transaction);
        if matches {
            self.backend.process_transaction(&hash, &transaction).await;
        }

        if let Some(waiters) = self.pending_tx_requests.remove(&vector) {
            self.timers.clear(&AgentTimer::Request(vector.clone()));
            for waiter in waiters {
                let _ = waiter.send(Ok(transaction.clone()));
            }
        }

        // A peer may keep sending stale-filtered transactions briefly after
        // we change our subscription; past the grace period it is a
        // protocol violation.
        if !matches && self.subscription_grace_expired() {
            warn!(
                "Peer {}: transaction {} does not match our subscription",
                self.peer.addr,
                fmt_hash(&hash)
            );
            self.channel.close(
                CloseCode::TransactionNotMatchingSubscription,
                "transaction does not match subscription",
            );
        }

        self.on_object_processed(&vector);
    }

    fn subscription_grace_expired(&self) -> bool {
        match self.last_subscription_change {
            None => true,
            Some(changed_at) => {
                Instant::now().duration_since(changed_at) > SUBSCRIPTION_CHANGE_GRACE_PERIOD
            }
        }
    }

    fn on_not_found(&mut self, vectors: Vec<InvVector>) {
        debug!("Peer {}: {} objects not found", self.peer.addr, vectors.len());
        for vector in vectors {
            match vector.ty {
                InvType::Block => {
                    if let Some(waiters) = self.pending_block_requests.remove(&vector) {
                        self.timers.clear(&AgentTimer::Request(vector.clone()));
                        for waiter in waiters {
                            let _ = waiter.send(Err(RequestError::NotFound));
                        }
                    }
                }
                InvType::Transaction => {
                    if let Some(waiters) = self.pending_tx_requests.remove(&vector) {
                        self.timers.clear(&AgentTimer::Request(vector.clone()));
                        for waiter in waiters {
                            let _ = waiter.send(Err(RequestError::NotFound));
                        }
                    }
                }
            }

            if self.objects_in_flight.contains(&vector) {
                self.inv_mgr.note_vector_not_received(self.peer.addr, &vector);
                self.on_object_received(&vector);
            }
        }
    }

    // -- batch accounting ----------------------------------------------------

    fn on_object_received(&mut self, vector: &InvVector) {
        if self.objects_in_flight.is_empty() {
            // Late delivery of a flown vector; no batch to account.
            return;
        }
        self.objects_in_flight.remove(vector);
        if self.objects_in_flight.is_empty() {
            self.no_more_data();
        } else {
            self.timers.reset(AgentTimer::GetData, REQUEST_TIMEOUT);
        }
    }

    fn no_more_data(&mut self) {
        self.timers.clear(&AgentTimer::GetData);

        // Whatever is still in flight never arrived: hand the vectors back
        // to the coordinator and accept late deliveries silently.
        let leftovers: Vec<InvVector> = self.objects_in_flight.drain().collect();
        for vector in leftovers {
            self.inv_mgr.note_vector_not_received(self.peer.addr, &vector);
            self.objects_that_flew.add(vector);
        }

        if !self.blocks_to_request.is_empty() || self.txs_to_request.is_available() {
            self.request_data();
        } else {
            self.backend.on_all_objects_received();
        }
    }

    fn on_object_processed(&mut self, vector: &InvVector) {
        self.objects_processing.remove(vector);
        if self.objects_processing.is_empty() {
            self.backend.on_all_objects_processed();
        }
    }

    // -- inventory service ---------------------------------------------------

    async fn on_get_data(&mut self, vectors: Vec<InvVector>) {
        let mut unknown = Vec::new();
        for vector in vectors {
            // Asking for an object proves the peer knows of it.
            self.mark_known(&vector);
            match vector.ty {
                InvType::Block => match self.backend.get_raw_block(&vector.hash, false).await {
                    Some(block) => self.channel.send(Message::Block(Box::new(block))),
                    None => unknown.push(vector),
                },
                InvType::Transaction => match self.backend.get_transaction(&vector.hash).await {
                    Some(transaction) => {
                        self.channel.send(Message::Tx(Box::new(transaction)))
                    }
                    None => unknown.push(vector),
                },
            }
        }
        if !unknown.is_empty() {
            self.channel
                .send(Message::NotFound(InvVectors::new_unchecked(unknown)));
        }
    }

    async fn on_get_header(&mut self, vectors: Vec<InvVector>) {
        let mut unknown = Vec::new();
        for vector in vectors {
            self.mark_known(&vector);
            match vector.ty {
                InvType::Block => match self.backend.get_block(&vector.hash, false, false).await {
                    Some(block) => self.channel.send(Message::Header(block.header)),
                    None => unknown.push(vector),
                },
                // Transactions have no header form.
                InvType::Transaction => unknown.push(vector),
            }
        }
        if !unknown.is_empty() {
            self.channel
                .send(Message::NotFound(InvVectors::new_unchecked(unknown)));
        }
    }

    async fn on_mempool(&mut self) {
        let transactions = self
            .backend
            .get_subscribed_mempool_transactions(&self.remote_subscription)
            .await;
        debug!(
            "Peer {}: serving mempool with {} transactions",
            self.peer.addr,
            transactions.len()
        );

        let throttle = self.backend.mempool_throttle();
        let mut vectors = Vec::new();
        for transaction in &transactions {
            vectors.push(InvVector::from_transaction(transaction));
            if vectors.len() >= VECTORS_MAX_COUNT {
                let batch = std::mem::take(&mut vectors);
                self.channel.send(Message::Inv(InvVectors::new_unchecked(batch)));
                // Yield between batches so one mempool dump does not stall
                // the agent task.
                tokio::time::sleep(throttle).await;
            }
        }
        if !vectors.is_empty() {
            self.channel.send(Message::Inv(InvVectors::new_unchecked(vectors)));
        }
    }

    // -- subscription & head tracking ----------------------------------------

    /// Declare which announcements we want from this peer.
    pub fn subscribe(&mut self, subscription: Subscription) {
        self.target_subscription = subscription.clone();
        self.local_subscription = subscription.clone();
        self.last_subscription_change = Some(Instant::now());
        self.channel.send(Message::Subscribe(subscription));
    }

    fn on_subscribe(&mut self, subscription: Subscription) {
        debug!("Peer {}: updated subscription", self.peer.addr);
        self.remote_subscription = subscription;
    }

    fn on_head(&mut self, header: BlockHeader) {
        debug!("Peer {}: head at height {}", self.peer.addr, header.height);
        self.peer.record_head(header);
        // Poll again after a quiet period.
        self.timers.set(AgentTimer::GetHead, HEAD_REQUEST_INTERVAL);
    }

    fn on_get_head(&mut self) {
        if let Some(header) = self.backend.head_header() {
            self.channel.send(Message::Head(header));
        }
    }

    // -- relay ---------------------------------------------------------------

    /// Announce a block to the peer. Returns false when suppressed: not
    /// synced, filtered by the peer's subscription, or already known.
    pub fn relay_block(&mut self, block: &Block) -> bool {
        if !self.synced || !self.remote_subscription.matches_block() {
            return false;
        }
        let vector = InvVector::block(block.hash());
        if self.known_objects.contains(&vector) {
            return false;
        }

        // Ride waiting transaction announcements along in the same frame.
        let mut vectors = vec![vector.clone()];
        vectors.extend(self.waiting_inv_vectors.dequeue_multi(VECTORS_MAX_COUNT - 1));
        self.channel.send(Message::Inv(InvVectors::new_unchecked(vectors)));

        self.timers
            .set(AgentTimer::KnowsObject(vector), KNOWS_OBJECT_AFTER_INV_DELAY);
        true
    }

    /// Queue a transaction announcement. Low-fee transactions go through
    /// the tighter free budget.
    pub fn relay_transaction(&mut self, transaction: &Transaction) -> bool {
        if !self.remote_subscription.matches_transaction(transaction) {
            return false;
        }
        let vector = InvVector::from_transaction(transaction);
        if self.known_objects.contains(&vector) {
            return false;
        }

        if transaction.meets_fee_per_byte(TRANSACTION_RELAY_FEE_MIN) {
            self.waiting_inv_vectors.enqueue(vector.clone());
        } else {
            self.waiting_free_inv_vectors
                .enqueue(FreeTransactionVector::from_transaction(transaction));
        }

        self.timers
            .set(AgentTimer::KnowsObject(vector), KNOWS_OBJECT_AFTER_INV_DELAY);
        true
    }

    /// Withdraw a queued announcement (e.g. the transaction left the
    /// mempool).
    pub fn remove_transaction(&mut self, transaction: &Transaction) {
        let vector = InvVector::from_transaction(transaction);
        self.waiting_inv_vectors.remove(&vector);
        self.waiting_free_inv_vectors.remove(&vector);
    }

    fn send_waiting_inv_vectors(&mut self) {
        let vectors = self.waiting_inv_vectors.dequeue_multi(VECTORS_MAX_COUNT);
        if !vectors.is_empty() {
            debug!("Peer {}: relaying {} transactions", self.peer.addr, vectors.len());
            self.channel.send(Message::Inv(InvVectors::new_unchecked(vectors)));
        }
    }

    fn send_free_waiting_inv_vectors(&mut self) {
        let mut vectors = Vec::new();
        let mut size = 0usize;
        while vectors.len() < VECTORS_MAX_COUNT
            && self.waiting_free_inv_vectors.is_available()
            && size < FREE_TRANSACTION_SIZE_PER_INTERVAL
        {
            match self.waiting_free_inv_vectors.dequeue() {
                Some(free) => {
                    size += free.serialized_size;
                    vectors.push(free.vector);
                }
                None => break,
            }
        }
        if !vectors.is_empty() {
            debug!(
                "Peer {}: relaying {} free transactions ({} bytes)",
                self.peer.addr,
                vectors.len(),
                size
            );
            self.channel.send(Message::Inv(InvVectors::new_unchecked(vectors)));
        }
    }

    /// Record peer knowledge demonstrated by an inbound message and stop
    /// announcing the object ourselves.
    fn mark_known(&mut self, vector: &InvVector) {
        self.known_objects.add(vector.clone());
        self.waiting_inv_vectors.remove(vector);
        self.waiting_free_inv_vectors.remove(vector);
    }

    // -- proof requests ------------------------------------------------------

    /// Request a proof that `block_hash_to_prove` is an ancestor of
    /// `known_block`. Resolves with the proved block's header.
    pub fn get_block_proof(
        &mut self,
        block_hash_to_prove: Hash,
        known_block: BlockHeader,
    ) -> PendingRequest<BlockHeader> {
        self.submit_block_proof(BlockProofTarget::Hash(block_hash_to_prove), known_block)
    }

    /// Like [`get_block_proof`](Self::get_block_proof), addressing the
    /// block by height. Requires a v2 peer.
    pub fn get_block_proof_at(
        &mut self,
        block_height_to_prove: u32,
        known_block: BlockHeader,
    ) -> PendingRequest<BlockHeader> {
        if self.peer.version < PROOF_BY_HASH_MIN_VERSION {
            return PendingRequest::resolved(Err(RequestError::Unsupported));
        }
        self.submit_block_proof(BlockProofTarget::Height(block_height_to_prove), known_block)
    }

    fn submit_block_proof(
        &mut self,
        target: BlockProofTarget,
        known_block: BlockHeader,
    ) -> PendingRequest<BlockHeader> {
        if self.closed {
            return PendingRequest::resolved(Err(RequestError::Cancelled));
        }
        let (sender, receiver) = oneshot::channel();
        let job = AgentJob::BlockProof(BlockProofRequest {
            target,
            known_block,
            waiter: sender,
        });
        if let Some(job) = self.synchronizer.submit(SYNC_BLOCK_PROOF, job) {
            self.start_proof_job(job);
        }
        PendingRequest::new(receiver)
    }

    /// Request a Merkle proof of the transactions in `block` touching any
    /// of `addresses`.
    pub fn get_transactions_proof_by_addresses(
        &mut self,
        block: BlockHeader,
        addresses: Vec<Address>,
    ) -> PendingRequest<Vec<Transaction>> {
        self.submit_transactions_proof(block, TransactionsSelector::Addresses(addresses))
    }

    /// Request a Merkle proof of the listed transactions in `block`.
    /// Requires a v2 peer.
    pub fn get_transactions_proof_by_hashes(
        &mut self,
        block: BlockHeader,
        hashes: Vec<Hash>,
    ) -> PendingRequest<Vec<Transaction>> {
        if self.peer.version < PROOF_BY_HASH_MIN_VERSION {
            return PendingRequest::resolved(Err(RequestError::Unsupported));
        }
        self.submit_transactions_proof(block, TransactionsSelector::Hashes(hashes))
    }

    fn submit_transactions_proof(
        &mut self,
        block: BlockHeader,
        selector: TransactionsSelector,
    ) -> PendingRequest<Vec<Transaction>> {
        if self.closed {
            return PendingRequest::resolved(Err(RequestError::Cancelled));
        }
        let (sender, receiver) = oneshot::channel();
        let job = AgentJob::TransactionsProof(TransactionsProofRequest {
            block,
            selector,
            waiter: sender,
        });
        if let Some(job) = self.synchronizer.submit(SYNC_TRANSACTIONS_PROOF, job) {
            self.start_proof_job(job);
        }
        PendingRequest::new(receiver)
    }

    /// Request inclusion receipts for transactions touching `address`.
    /// The caller cross-checks the receipts against the address; receipts
    /// carry no address to verify here.
    pub fn get_transaction_receipts_by_address(
        &mut self,
        address: Address,
    ) -> PendingRequest<Vec<TransactionReceipt>> {
        self.submit_transaction_receipts(ReceiptsSelector::Address(address))
    }

    /// Request inclusion receipts for the listed transactions. Requires a
    /// v2 peer.
    pub fn get_transaction_receipts_by_hashes(
        &mut self,
        hashes: Vec<Hash>,
    ) -> PendingRequest<Vec<TransactionReceipt>> {
        if self.peer.version < PROOF_BY_HASH_MIN_VERSION {
            return PendingRequest::resolved(Err(RequestError::Unsupported));
        }
        self.submit_transaction_receipts(ReceiptsSelector::Hashes(hashes))
    }

    fn submit_transaction_receipts(
        &mut self,
        selector: ReceiptsSelector,
    ) -> PendingRequest<Vec<TransactionReceipt>> {
        if self.closed {
            return PendingRequest::resolved(Err(RequestError::Cancelled));
        }
        let (sender, receiver) = oneshot::channel();
        let job =
            AgentJob::TransactionReceipts(TransactionReceiptsRequest { selector, waiter: sender });
        if let Some(job) = self.synchronizer.submit(SYNC_TRANSACTION_RECEIPTS, job) {
            self.start_proof_job(job);
        }
        PendingRequest::new(receiver)
    }

    /// Start a proof job whose synchronizer key is idle: occupy the slot,
    /// send the request, arm the timeout.
    fn start_proof_job(&mut self, job: AgentJob) {
        match job {
            // Inv jobs are serialized under their own key and never queue
            // behind a proof key.
            AgentJob::Inv(_) => debug_assert!(false, "inv job under proof key"),
            AgentJob::BlockProof(request) => {
                debug_assert!(self.block_proof_request.is_none());
                let known_block_hash = request.known_block.hash();
                match &request.target {
                    BlockProofTarget::Hash(hash) => self.channel.send(Message::GetBlockProof {
                        block_hash_to_prove: *hash,
                        known_block_hash,
                    }),
                    BlockProofTarget::Height(height) => {
                        self.channel.send(Message::GetBlockProofAt {
                            block_height_to_prove: *height,
                            known_block_hash,
                        })
                    }
                }
                self.block_proof_request = Some(request);
                self.timers.set(AgentTimer::BlockProof, BLOCK_PROOF_REQUEST_TIMEOUT);
            }
            AgentJob::TransactionsProof(request) => {
                debug_assert!(self.transactions_proof_request.is_none());
                let block_hash = request.block.hash();
                match &request.selector {
                    TransactionsSelector::Addresses(addresses) => {
                        self.channel.send(Message::GetTransactionsProofByAddresses {
                            block_hash,
                            addresses: ProofAddresses::truncated(addresses.clone()),
                        })
                    }
                    TransactionsSelector::Hashes(hashes) => {
                        self.channel.send(Message::GetTransactionsProofByHashes {
                            block_hash,
                            hashes: ProofHashes::truncated(hashes.clone()),
                        })
                    }
                }
                self.transactions_proof_request = Some(request);
                self.timers
                    .set(AgentTimer::TransactionsProof, TRANSACTIONS_PROOF_REQUEST_TIMEOUT);
            }
            AgentJob::TransactionReceipts(request) => {
                debug_assert!(self.transaction_receipts_request.is_none());
                match &request.selector {
                    ReceiptsSelector::Address(address) => self
                        .channel
                        .send(Message::GetTransactionReceiptsByAddress { address: *address }),
                    ReceiptsSelector::Hashes(hashes) => {
                        self.channel.send(Message::GetTransactionReceiptsByHashes {
                            hashes: ProofHashes::truncated(hashes.clone()),
                        })
                    }
                }
                self.transaction_receipts_request = Some(request);
                self.timers
                    .set(AgentTimer::TransactionReceipts, TRANSACTION_RECEIPTS_REQUEST_TIMEOUT);
            }
        }
    }

    fn settle_proof_key(&mut self, key: &'static str) {
        if let Some(job) = self.synchronizer.settle(key) {
            self.start_proof_job(job);
        }
    }

    // -- proof responses -----------------------------------------------------

    fn on_block_proof(&mut self, proof: Option<BlockProof>) {
        self.timers.clear(&AgentTimer::BlockProof);
        let Some(request) = self.block_proof_request.take() else {
            debug!("Peer {}: unsolicited block proof", self.peer.addr);
            return;
        };

        // An empty or missing payload is the peer declining the request.
        let (proof, tail, head) = match proof {
            Some(proof) => match (proof.tail().cloned(), proof.head().cloned()) {
                (Some(tail), Some(head)) => (proof, tail, head),
                _ => {
                    let _ = request.waiter.send(Err(RequestError::Rejected));
                    self.settle_proof_key(SYNC_BLOCK_PROOF);
                    return;
                }
            },
            None => {
                let _ = request.waiter.send(Err(RequestError::Rejected));
                self.settle_proof_key(SYNC_BLOCK_PROOF);
                return;
            }
        };

        // The proof must actually prove the block we asked about.
        let tail_matches = match &request.target {
            BlockProofTarget::Hash(hash) => tail.hash() == *hash,
            BlockProofTarget::Height(height) => tail.height == *height,
        };
        if !tail_matches {
            let _ = request
                .waiter
                .send(Err(RequestError::InvalidProof("invalid tail block")));
            self.settle_proof_key(SYNC_BLOCK_PROOF);
            return;
        }

        // The proof must link up to the block we already know.
        if !request.known_block.is_interlink_successor_of(&head) {
            let _ = request
                .waiter
                .send(Err(RequestError::InvalidProof("proof head does not connect")));
            self.settle_proof_key(SYNC_BLOCK_PROOF);
            return;
        }

        if !proof.verify() {
            warn!("Peer {}: invalid block proof chain", self.peer.addr);
            self.channel
                .close(CloseCode::InvalidBlockProof, "block proof does not verify");
            let _ = request
                .waiter
                .send(Err(RequestError::InvalidProof("proof chain does not verify")));
            self.settle_proof_key(SYNC_BLOCK_PROOF);
            return;
        }

        let time = now();
        if !proof.blocks.iter().all(|header| header.verify(time)) {
            warn!("Peer {}: block proof contains invalid block", self.peer.addr);
            self.channel
                .close(CloseCode::InvalidBlockProof, "invalid block in proof");
            let _ = request
                .waiter
                .send(Err(RequestError::InvalidProof("invalid block in proof")));
            self.settle_proof_key(SYNC_BLOCK_PROOF);
            return;
        }

        let _ = request.waiter.send(Ok(tail));
        self.settle_proof_key(SYNC_BLOCK_PROOF);
    }

    fn on_block_proof_timeout(&mut self) {
        if let Some(request) = self.block_proof_request.take() {
            let _ = request.waiter.send(Err(RequestError::Timeout));
        }
        self.settle_proof_key(SYNC_BLOCK_PROOF);
    }

    fn on_transactions_proof(&mut self, block_hash: Hash, proof: Option<TransactionsProof>) {
        self.timers.clear(&AgentTimer::TransactionsProof);
        let Some(request) = self.transactions_proof_request.take() else {
            debug!("Peer {}: unsolicited transactions proof", self.peer.addr);
            return;
        };

        let Some(proof) = proof else {
            let _ = request.waiter.send(Err(RequestError::Rejected));
            self.settle_proof_key(SYNC_TRANSACTIONS_PROOF);
            return;
        };

        if block_hash != request.block.hash() {
            let _ = request
                .waiter
                .send(Err(RequestError::InvalidProof("proof references a different block")));
            self.settle_proof_key(SYNC_TRANSACTIONS_PROOF);
            return;
        }

        let root_matches = matches!(proof.root(), Ok(root) if root == request.block.body_hash);
        if !root_matches {
            warn!("Peer {}: transactions proof root mismatch", self.peer.addr);
            self.channel
                .close(CloseCode::InvalidTransactionProof, "merkle root mismatch");
            let _ = request
                .waiter
                .send(Err(RequestError::InvalidProof("merkle root mismatch")));
            self.settle_proof_key(SYNC_TRANSACTIONS_PROOF);
            return;
        }

        // Every proven transaction must be one we asked about.
        let relevant = proof.transactions.iter().all(|tx| match &request.selector {
            TransactionsSelector::Addresses(addresses) => {
                addresses.iter().any(|address| tx.touches(address))
            }
            TransactionsSelector::Hashes(hashes) => hashes.contains(&tx.hash()),
        });
        if !relevant {
            warn!("Peer {}: transactions proof contains foreign transaction", self.peer.addr);
            self.channel
                .close(CloseCode::InvalidTransactionProof, "foreign transaction in proof");
            let _ = request
                .waiter
                .send(Err(RequestError::InvalidProof("foreign transaction in proof")));
            self.settle_proof_key(SYNC_TRANSACTIONS_PROOF);
            return;
        }

        let _ = request.waiter.send(Ok(proof.transactions));
        self.settle_proof_key(SYNC_TRANSACTIONS_PROOF);
    }

    fn on_transactions_proof_timeout(&mut self) {
        if let Some(request) = self.transactions_proof_request.take() {
            let _ = request.waiter.send(Err(RequestError::Timeout));
        }
        self.channel.close(
            CloseCode::GetTransactionsProofTimeout,
            "transactions proof request timed out",
        );
        self.settle_proof_key(SYNC_TRANSACTIONS_PROOF);
    }

    fn on_transaction_receipts(&mut self, receipts: Option<Vec<TransactionReceipt>>) {
        self.timers.clear(&AgentTimer::TransactionReceipts);
        let Some(request) = self.transaction_receipts_request.take() else {
            debug!("Peer {}: unsolicited transaction receipts", self.peer.addr);
            return;
        };

        let Some(receipts) = receipts else {
            let _ = request.waiter.send(Err(RequestError::Rejected));
            self.settle_proof_key(SYNC_TRANSACTION_RECEIPTS);
            return;
        };

        // By-hashes requests are checkable: every receipt must reference a
        // requested transaction. By-address receipts carry no address; the
        // caller cross-checks those.
        if let ReceiptsSelector::Hashes(hashes) = &request.selector
            && !receipts.iter().all(|receipt| hashes.contains(&receipt.transaction_hash))
        {
            let _ = request
                .waiter
                .send(Err(RequestError::InvalidProof("receipt for unrequested transaction")));
            self.settle_proof_key(SYNC_TRANSACTION_RECEIPTS);
            return;
        }

        let _ = request.waiter.send(Ok(receipts));
        self.settle_proof_key(SYNC_TRANSACTION_RECEIPTS);
    }

    fn on_transaction_receipts_timeout(&mut self) {
        if let Some(request) = self.transaction_receipts_request.take() {
            let _ = request.waiter.send(Err(RequestError::Timeout));
        }
        self.channel.close(
            CloseCode::GetTransactionReceiptsTimeout,
            "transaction receipts request timed out",
        );
        self.settle_proof_key(SYNC_TRANSACTION_RECEIPTS);
    }

    // -- shutdown ------------------------------------------------------------

    /// Tear the agent down: cancel queued work, disarm timers, stop the
    /// throttled queues, and reject every outstanding request. Idempotent.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        for job in self.synchronizer.clear() {
            job.cancel();
        }
        self.timers.clear_all();
        self.txs_to_request.stop();
        self.waiting_inv_vectors.stop();
        self.waiting_free_inv_vectors.stop();

        for (_, waiters) in self.pending_block_requests.drain() {
            for waiter in waiters {
                let _ = waiter.send(Err(RequestError::Cancelled));
            }
        }
        for (_, waiters) in self.pending_tx_requests.drain() {
            for waiter in waiters {
                let _ = waiter.send(Err(RequestError::Cancelled));
            }
        }
        if let Some(request) = self.block_proof_request.take() {
            let _ = request.waiter.send(Err(RequestError::Cancelled));
        }
        if let Some(request) = self.transactions_proof_request.take() {
            let _ = request.waiter.send(Err(RequestError::Cancelled));
        }
        if let Some(request) = self.transaction_receipts_request.take() {
            let _ = request.waiter.send(Err(RequestError::Cancelled));
        }

        debug!("Peer {}: agent shut down", self.peer.addr);
    }
}
