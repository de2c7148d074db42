//! Inventory bookkeeping: bounded known-object tracking and cross-peer
//! request arbitration.

use super::types::InvVector;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Mutex;

// =============================================================================
// LIMIT HASH SET
// =============================================================================

/// Hash set with FIFO eviction of the oldest entries past capacity.
///
/// O(1) insert/contains with bounded memory: a peer announcing unique
/// objects forever cannot grow this set past its capacity. Re-adding an
/// existing element is a no-op and does not refresh its age.
pub struct LimitHashSet<T: Eq + std::hash::Hash + Clone> {
    set: HashSet<T>,
    /// Insertion order, front = oldest.
    order: VecDeque<T>,
    capacity: usize,
}

impl<T: Eq + std::hash::Hash + Clone> LimitHashSet<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            set: HashSet::with_capacity(capacity.min(4_096)),
            order: VecDeque::with_capacity(capacity.min(4_096)),
            capacity,
        }
    }

    /// Insert, evicting the oldest entries while over capacity.
    /// Returns false if the element was already present.
    pub fn add(&mut self, value: T) -> bool {
        if !self.set.insert(value.clone()) {
            return false;
        }
        self.order.push_back(value);
        while self.set.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }
        true
    }

    pub fn contains(&self, value: &T) -> bool {
        self.set.contains(value)
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Iterate in insertion order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.order.iter()
    }
}

// =============================================================================
// INV REQUEST ARBITRATION
// =============================================================================

/// Cross-peer coordinator deciding which agent fetches an announced object.
///
/// Shared by every agent of a node; implementations use interior
/// mutability. An agent asks before queueing an unknown vector; a deferred
/// vector is later routed to some agent's `request_vectors` by the
/// coordinator.
pub trait InvRequestManager: Send + Sync {
    /// True iff the asking agent should fetch the vector now.
    fn ask_to_request_vector(&self, peer: SocketAddr, vector: &InvVector) -> bool;

    /// The object behind `vector` arrived (from whichever peer).
    fn note_vector_received(&self, vector: &InvVector);

    /// `peer` failed to deliver `vector` (timeout or not-found).
    fn note_vector_not_received(&self, peer: SocketAddr, vector: &InvVector);
}

/// Single-process reference coordinator: first asker wins, the assignment
/// is released when the object arrives or the assignee fails, so the next
/// announcing peer picks it up.
pub struct InvRequestTracker {
    assignments: Mutex<HashMap<InvVector, SocketAddr>>,
}

impl InvRequestTracker {
    pub fn new() -> Self {
        Self { assignments: Mutex::new(HashMap::new()) }
    }

    pub fn assigned_count(&self) -> usize {
        self.assignments.lock().map(|a| a.len()).unwrap_or(0)
    }
}

impl Default for InvRequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl InvRequestManager for InvRequestTracker {
    fn ask_to_request_vector(&self, peer: SocketAddr, vector: &InvVector) -> bool {
        let Ok(mut assignments) = self.assignments.lock() else {
            return false;
        };
        match assignments.get(vector) {
            Some(assignee) => *assignee == peer,
            None => {
                assignments.insert(vector.clone(), peer);
                true
            }
        }
    }

    fn note_vector_received(&self, vector: &InvVector) {
        if let Ok(mut assignments) = self.assignments.lock() {
            assignments.remove(vector);
        }
    }

    fn note_vector_not_received(&self, peer: SocketAddr, vector: &InvVector) {
        if let Ok(mut assignments) = self.assignments.lock()
            && assignments.get(vector) == Some(&peer)
        {
            assignments.remove(vector);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(n: u8) -> InvVector {
        InvVector::block([n; 32])
    }

    #[test]
    fn limit_set_evicts_oldest() {
        let mut set = LimitHashSet::new(3);
        for n in 0..5u8 {
            set.add(vector(n));
        }
        assert_eq!(set.len(), 3);
        assert!(!set.contains(&vector(0)));
        assert!(!set.contains(&vector(1)));
        assert!(set.contains(&vector(2)));
        assert!(set.contains(&vector(4)));
    }

    #[test]
    fn limit_set_readd_does_not_refresh_age() {
        let mut set = LimitHashSet::new(2);
        set.add(vector(1));
        set.add(vector(2));
        // Re-adding the oldest is a no-op...
        assert!(!set.add(vector(1)));
        // ...so it is still the first to go.
        set.add(vector(3));
        assert!(!set.contains(&vector(1)));
        assert!(set.contains(&vector(2)));
        assert!(set.contains(&vector(3)));
    }

    #[test]
    fn limit_set_iterates_in_insertion_order() {
        let mut set = LimitHashSet::new(10);
        set.add(vector(3));
        set.add(vector(1));
        set.add(vector(2));
        let order: Vec<_> = set.iter().cloned().collect();
        assert_eq!(order, vec![vector(3), vector(1), vector(2)]);
    }

    #[test]
    fn tracker_assigns_first_asker() {
        let tracker = InvRequestTracker::new();
        let a: SocketAddr = "10.0.0.1:8444".parse().unwrap();
        let b: SocketAddr = "10.0.0.2:8444".parse().unwrap();

        assert!(tracker.ask_to_request_vector(a, &vector(1)));
        assert!(!tracker.ask_to_request_vector(b, &vector(1)));
        // Re-asking by the assignee stays affirmative.
        assert!(tracker.ask_to_request_vector(a, &vector(1)));
    }

    #[test]
    fn tracker_releases_on_receive_and_failure() {
        let tracker = InvRequestTracker::new();
        let a: SocketAddr = "10.0.0.1:8444".parse().unwrap();
        let b: SocketAddr = "10.0.0.2:8444".parse().unwrap();

        assert!(tracker.ask_to_request_vector(a, &vector(1)));
        tracker.note_vector_received(&vector(1));
        assert_eq!(tracker.assigned_count(), 0);
        assert!(tracker.ask_to_request_vector(b, &vector(1)));

        // A failure by a non-assignee does not release.
        tracker.note_vector_not_received(a, &vector(1));
        assert_eq!(tracker.assigned_count(), 1);
        tracker.note_vector_not_received(b, &vector(1));
        assert!(tracker.ask_to_request_vector(a, &vector(1)));
    }
}
