//! Keyed FIFO job serialization.
//!
//! Jobs sharing a key run one at a time in submission order; different keys
//! are independent. The synchronizer is poll-style: `submit` hands the job
//! back when its key is idle and the caller runs it; once the job settles
//! (success or failure) the caller calls `settle` to obtain the next queued
//! job for that key. A failed job therefore never blocks its successors.

use std::collections::{HashMap, VecDeque};

struct KeyState<J> {
    busy: bool,
    queue: VecDeque<J>,
}

impl<J> Default for KeyState<J> {
    fn default() -> Self {
        Self { busy: false, queue: VecDeque::new() }
    }
}

pub struct MultiSynchronizer<J> {
    keys: HashMap<&'static str, KeyState<J>>,
}

impl<J> MultiSynchronizer<J> {
    pub fn new() -> Self {
        Self { keys: HashMap::new() }
    }

    /// Submit a job under `key`. Returns the job if the key is idle — the
    /// caller must run it and later call [`settle`](Self::settle). Returns
    /// None if a predecessor is still running; the job is queued.
    pub fn submit(&mut self, key: &'static str, job: J) -> Option<J> {
        let state = self.keys.entry(key).or_default();
        if state.busy {
            state.queue.push_back(job);
            return None;
        }
        state.busy = true;
        Some(job)
    }

    /// Mark the running job of `key` settled. Returns the next queued job,
    /// which the caller must run (the key stays busy); None if the key is
    /// now idle.
    pub fn settle(&mut self, key: &'static str) -> Option<J> {
        let Some(state) = self.keys.get_mut(key) else {
            return None;
        };
        match state.queue.pop_front() {
            Some(next) => Some(next),
            None => {
                state.busy = false;
                None
            }
        }
    }

    pub fn is_busy(&self, key: &'static str) -> bool {
        self.keys.get(key).map(|state| state.busy).unwrap_or(false)
    }

    pub fn queued_len(&self, key: &'static str) -> usize {
        self.keys.get(key).map(|state| state.queue.len()).unwrap_or(0)
    }

    /// Drop all queued (not yet started) jobs, returning them so the caller
    /// can reject their waiters with a cancellation error. Busy flags are
    /// cleared as well; running jobs are the caller's to abandon.
    pub fn clear(&mut self) -> Vec<J> {
        let mut dropped = Vec::new();
        for state in self.keys.values_mut() {
            dropped.extend(state.queue.drain(..));
            state.busy = false;
        }
        dropped
    }
}

impl<J> Default for MultiSynchronizer<J> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_serializes_in_order() {
        let mut sync: MultiSynchronizer<u32> = MultiSynchronizer::new();

        assert_eq!(sync.submit("a", 1), Some(1));
        assert_eq!(sync.submit("a", 2), None);
        assert_eq!(sync.submit("a", 3), None);
        assert_eq!(sync.queued_len("a"), 2);

        assert_eq!(sync.settle("a"), Some(2));
        assert_eq!(sync.settle("a"), Some(3));
        assert_eq!(sync.settle("a"), None);
        assert!(!sync.is_busy("a"));
    }

    #[test]
    fn different_keys_are_independent() {
        let mut sync: MultiSynchronizer<u32> = MultiSynchronizer::new();
        assert_eq!(sync.submit("a", 1), Some(1));
        assert_eq!(sync.submit("b", 2), Some(2));
        assert!(sync.is_busy("a"));
        assert!(sync.is_busy("b"));
    }

    #[test]
    fn settle_idle_key_is_noop() {
        let mut sync: MultiSynchronizer<u32> = MultiSynchronizer::new();
        assert_eq!(sync.settle("a"), None);
        assert_eq!(sync.submit("a", 1), Some(1));
        assert_eq!(sync.settle("a"), None);
        // Key idles again; a new submission starts immediately.
        assert_eq!(sync.submit("a", 2), Some(2));
    }

    #[test]
    fn clear_returns_queued_jobs() {
        let mut sync: MultiSynchronizer<u32> = MultiSynchronizer::new();
        sync.submit("a", 1);
        sync.submit("a", 2);
        sync.submit("b", 3);
        sync.submit("b", 4);

        let mut dropped = sync.clear();
        dropped.sort_unstable();
        assert_eq!(dropped, vec![2, 4]);
        assert!(!sync.is_busy("a"));
        assert!(!sync.is_busy("b"));
    }
}
