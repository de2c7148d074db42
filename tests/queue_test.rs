//! Throttled queue flow control tests
//!
//! Run with: cargo test --test queue_test

use meridian::net::{InvVector, ThrottledQueue, UniqueQueue};
use std::time::Duration;
use tokio::time::advance;

fn vector(n: u16) -> InvVector {
    let mut hash = [0u8; 32];
    hash[..2].copy_from_slice(&n.to_le_bytes());
    InvVector::transaction(hash)
}

// =============================================================================
// TOKEN BUCKET BEHAVIOR
// =============================================================================

#[tokio::test(start_paused = true)]
async fn burst_then_steady_rate() {
    let mut queue: ThrottledQueue<InvVector> =
        ThrottledQueue::new(100, 10, Duration::from_secs(1), 5_000);
    for n in 0..300 {
        assert!(queue.enqueue(vector(n)));
    }

    // Full burst up front.
    assert_eq!(queue.dequeue_multi(1_000).len(), 100);
    assert_eq!(queue.dequeue_multi(1_000).len(), 0);

    // 10 tokens per second afterwards.
    advance(Duration::from_secs(1)).await;
    assert_eq!(queue.dequeue_multi(1_000).len(), 10);

    // Refill accumulates across elapsed intervals but caps at capacity.
    advance(Duration::from_secs(30)).await;
    assert_eq!(queue.dequeue_multi(1_000).len(), 100);
}

#[tokio::test(start_paused = true)]
async fn partial_interval_earns_nothing() {
    let mut queue: ThrottledQueue<InvVector> =
        ThrottledQueue::new(5, 1, Duration::from_secs(1), 100);
    for n in 0..20 {
        queue.enqueue(vector(n));
    }
    assert_eq!(queue.dequeue_multi(100).len(), 5);

    advance(Duration::from_millis(999)).await;
    assert!(!queue.is_available());
    advance(Duration::from_millis(1)).await;
    assert!(queue.is_available());
    assert_eq!(queue.available_now(), 1);
}

#[tokio::test(start_paused = true)]
async fn tokens_do_not_leak_across_consumptions() {
    let mut queue: ThrottledQueue<InvVector> =
        ThrottledQueue::new(10, 2, Duration::from_secs(1), 100);
    for n in 0..50 {
        queue.enqueue(vector(n));
    }
    assert_eq!(queue.dequeue_multi(100).len(), 10);

    // 2.5 intervals: only two full intervals count, the half carries over.
    advance(Duration::from_millis(2_500)).await;
    assert_eq!(queue.dequeue_multi(100).len(), 4);
    advance(Duration::from_millis(500)).await;
    assert_eq!(queue.dequeue_multi(100).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn single_dequeue_consumes_one_token() {
    let mut queue: ThrottledQueue<InvVector> =
        ThrottledQueue::new(2, 1, Duration::from_secs(1), 100);
    queue.enqueue(vector(1));
    queue.enqueue(vector(2));
    queue.enqueue(vector(3));

    assert_eq!(queue.dequeue(), Some(vector(1)));
    assert_eq!(queue.dequeue(), Some(vector(2)));
    assert_eq!(queue.dequeue(), None);
    assert!(!queue.is_available());
    assert_eq!(queue.len(), 1);
}

// =============================================================================
// DEDUP AND REMOVAL UNDER THROTTLING
// =============================================================================

#[tokio::test(start_paused = true)]
async fn duplicate_enqueue_is_rejected() {
    let mut queue: ThrottledQueue<InvVector> =
        ThrottledQueue::new(10, 1, Duration::from_secs(1), 100);
    assert!(queue.enqueue(vector(1)));
    assert!(!queue.enqueue(vector(1)));
    assert_eq!(queue.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn removed_entry_is_not_dequeued_and_spends_no_token() {
    let mut queue: ThrottledQueue<InvVector> =
        ThrottledQueue::new(10, 1, Duration::from_secs(1), 100);
    queue.enqueue(vector(1));
    queue.enqueue(vector(2));
    queue.remove(&vector(1));

    assert_eq!(queue.dequeue(), Some(vector(2)));
    assert_eq!(queue.dequeue(), None);
    // Only one token spent for the one real dequeue.
    assert_eq!(queue.available_now(), 0);
    advance(Duration::from_secs(1)).await;
    assert_eq!(queue.available_now(), 0); // backlog empty
    queue.enqueue(vector(3));
    assert!(queue.is_available());
}

// =============================================================================
// UNIQUE QUEUE ORDERING
// =============================================================================

#[test]
fn unique_queue_preserves_first_occurrence_order() {
    let mut queue: UniqueQueue<InvVector> = UniqueQueue::new();
    queue.enqueue_all([vector(3), vector(1), vector(3), vector(2), vector(1)]);
    assert_eq!(queue.len(), 3);
    assert_eq!(
        queue.dequeue_multi(10),
        vec![vector(3), vector(1), vector(2)]
    );
}
