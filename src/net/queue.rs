//! Deduplicating FIFO queues with token bucket flow control.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// Item storable in a [`UniqueQueue`]. The key decides identity; a
/// `FreeTransactionVector` keys on its inner vector so a bare `InvVector`
/// removes it.
pub trait UniqueItem: Clone {
    type Key: Eq + std::hash::Hash + Clone;

    fn key(&self) -> Self::Key;
}

impl UniqueItem for super::types::InvVector {
    type Key = super::types::InvVector;

    fn key(&self) -> Self::Key {
        self.clone()
    }
}

impl UniqueItem for super::types::FreeTransactionVector {
    type Key = super::types::InvVector;

    fn key(&self) -> Self::Key {
        self.vector.clone()
    }
}

// =============================================================================
// UNIQUE QUEUE
// =============================================================================

/// FIFO queue rejecting duplicate enqueues, with O(1) expected removal.
///
/// Removal only deletes from the presence set; the queue slot becomes a
/// tombstone that dequeues skip. `len()` always reports live entries.
pub struct UniqueQueue<T: UniqueItem> {
    queue: VecDeque<T>,
    present: HashSet<T::Key>,
}

impl<T: UniqueItem> UniqueQueue<T> {
    pub fn new() -> Self {
        Self { queue: VecDeque::new(), present: HashSet::new() }
    }

    /// Enqueue unless an entry with the same key is already queued.
    pub fn enqueue(&mut self, item: T) -> bool {
        if !self.present.insert(item.key()) {
            return false;
        }
        self.queue.push_back(item);
        true
    }

    /// Enqueue all items, keeping input order for first occurrences.
    pub fn enqueue_all<I: IntoIterator<Item = T>>(&mut self, items: I) {
        for item in items {
            self.enqueue(item);
        }
    }

    pub fn dequeue(&mut self) -> Option<T> {
        while let Some(item) = self.queue.pop_front() {
            if self.present.remove(&item.key()) {
                return Some(item);
            }
            // Tombstone of a removed entry.
        }
        None
    }

    /// Up to `n` elements in FIFO order.
    pub fn dequeue_multi(&mut self, n: usize) -> Vec<T> {
        let mut out = Vec::with_capacity(n.min(self.len()));
        while out.len() < n {
            match self.dequeue() {
                Some(item) => out.push(item),
                None => break,
            }
        }
        out
    }

    pub fn remove(&mut self, key: &T::Key) -> bool {
        self.present.remove(key)
    }

    pub fn contains(&self, key: &T::Key) -> bool {
        self.present.contains(key)
    }

    pub fn len(&self) -> usize {
        self.present.len()
    }

    pub fn is_empty(&self) -> bool {
        self.present.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.present.clear();
    }
}

impl<T: UniqueItem> Default for UniqueQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// THROTTLED QUEUE
// =============================================================================

/// Unique queue gated by a token bucket.
///
/// The counter starts at `max_at_once` and regains `tokens_per_interval`
/// per elapsed `interval`, capped at `max_at_once`. Refill is computed
/// lazily from the monotonic clock on each access — no background task.
///
/// When the backlog is at `max_backlog`, the oldest queued entry is dropped
/// to make room for the new one.
pub struct ThrottledQueue<T: UniqueItem> {
    inner: UniqueQueue<T>,
    max_at_once: usize,
    tokens_per_interval: usize,
    interval: Duration,
    max_backlog: usize,
    available_tokens: usize,
    last_refill: Instant,
    stopped: bool,
}

impl<T: UniqueItem> ThrottledQueue<T> {
    pub fn new(
        max_at_once: usize,
        tokens_per_interval: usize,
        interval: Duration,
        max_backlog: usize,
    ) -> Self {
        Self {
            inner: UniqueQueue::new(),
            max_at_once,
            tokens_per_interval,
            interval,
            max_backlog,
            available_tokens: max_at_once,
            last_refill: Instant::now(),
            stopped: false,
        }
    }

    fn refill(&mut self) {
        if self.stopped {
            return;
        }
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        let periods = (elapsed.as_millis() / self.interval.as_millis().max(1)) as u64;
        if periods == 0 {
            return;
        }

        let gained = (periods as usize).saturating_mul(self.tokens_per_interval);
        self.available_tokens = self.available_tokens.saturating_add(gained).min(self.max_at_once);
        if self.available_tokens == self.max_at_once {
            // Saturated; further backlog of elapsed time earns nothing.
            self.last_refill = now;
        } else {
            self.last_refill += self.interval.saturating_mul(periods as u32);
        }
    }

    /// Enqueue unless duplicate or stopped. A full backlog drops its oldest
    /// entry first.
    pub fn enqueue(&mut self, item: T) -> bool {
        if self.stopped || self.inner.contains(&item.key()) {
            return false;
        }
        while self.inner.len() >= self.max_backlog {
            self.inner.dequeue();
        }
        self.inner.enqueue(item)
    }

    /// True iff the backlog is non-empty and a token is available.
    pub fn is_available(&mut self) -> bool {
        self.refill();
        !self.stopped && self.available_tokens > 0 && !self.inner.is_empty()
    }

    /// Elements dequeueable right now: `min(backlog, tokens)`.
    pub fn available_now(&mut self) -> usize {
        self.refill();
        if self.stopped {
            return 0;
        }
        self.available_tokens.min(self.inner.len())
    }

    /// Dequeue one element, consuming one token.
    pub fn dequeue(&mut self) -> Option<T> {
        self.refill();
        if self.stopped || self.available_tokens == 0 {
            return None;
        }
        let item = self.inner.dequeue()?;
        self.available_tokens -= 1;
        Some(item)
    }

    /// Dequeue `min(n, backlog, tokens)` elements in FIFO order.
    pub fn dequeue_multi(&mut self, n: usize) -> Vec<T> {
        self.refill();
        if self.stopped {
            return Vec::new();
        }
        let take = n.min(self.available_tokens);
        let out = self.inner.dequeue_multi(take);
        self.available_tokens -= out.len();
        out
    }

    pub fn remove(&mut self, key: &T::Key) -> bool {
        self.inner.remove(key)
    }

    pub fn contains(&self, key: &T::Key) -> bool {
        self.inner.contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Halt refills permanently and drain the backlog.
    pub fn stop(&mut self) {
        self.stopped = true;
        self.available_tokens = 0;
        self.inner.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::types::{FreeTransactionVector, InvVector};

    fn vector(n: u8) -> InvVector {
        InvVector::transaction([n; 32])
    }

    #[test]
    fn unique_queue_rejects_duplicates() {
        let mut queue: UniqueQueue<InvVector> = UniqueQueue::new();
        assert!(queue.enqueue(vector(1)));
        assert!(!queue.enqueue(vector(1)));
        assert!(queue.enqueue(vector(2)));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue_multi(5), vec![vector(1), vector(2)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn unique_queue_remove_skips_tombstones() {
        let mut queue: UniqueQueue<InvVector> = UniqueQueue::new();
        queue.enqueue_all([vector(1), vector(2), vector(3)]);
        assert!(queue.remove(&vector(2)));
        assert!(!queue.remove(&vector(2)));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue_multi(5), vec![vector(1), vector(3)]);
    }

    #[test]
    fn unique_queue_readd_after_remove() {
        let mut queue: UniqueQueue<InvVector> = UniqueQueue::new();
        queue.enqueue(vector(1));
        queue.remove(&vector(1));
        assert!(queue.enqueue(vector(1)));
        assert_eq!(queue.dequeue(), Some(vector(1)));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn free_vector_removed_by_inner_key() {
        let mut queue: UniqueQueue<FreeTransactionVector> = UniqueQueue::new();
        queue.enqueue(FreeTransactionVector { vector: vector(1), serialized_size: 120 });
        assert!(queue.remove(&vector(1)));
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_queue_tokens_gate_dequeue() {
        let mut queue: ThrottledQueue<InvVector> =
            ThrottledQueue::new(3, 1, Duration::from_secs(1), 100);
        for n in 0..10 {
            queue.enqueue(vector(n));
        }

        // Burst capped at max_at_once.
        assert_eq!(queue.dequeue_multi(10).len(), 3);
        assert!(!queue.is_available());
        assert_eq!(queue.dequeue(), None);

        // One token per interval afterwards.
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(queue.available_now(), 1);
        assert!(queue.dequeue().is_some());
        assert_eq!(queue.dequeue(), None);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(queue.dequeue_multi(10).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_queue_backlog_drops_oldest() {
        let mut queue: ThrottledQueue<InvVector> =
            ThrottledQueue::new(10, 1, Duration::from_secs(1), 3);
        for n in 0..5 {
            queue.enqueue(vector(n));
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(
            queue.dequeue_multi(10),
            vec![vector(2), vector(3), vector(4)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_queue_stop_is_permanent() {
        let mut queue: ThrottledQueue<InvVector> =
            ThrottledQueue::new(10, 1, Duration::from_secs(1), 100);
        queue.enqueue(vector(1));
        queue.stop();
        assert!(queue.is_empty());
        assert!(!queue.enqueue(vector(2)));
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(!queue.is_available());
        assert_eq!(queue.dequeue(), None);
    }
}
