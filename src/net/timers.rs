//! Named one-shot and interval timers.
//!
//! The registry only tracks deadlines; the owner drives it by sleeping
//! until [`TimerRegistry::next_deadline`] and then draining
//! [`TimerRegistry::pop_due`]. Keeping dispatch in the owner's task means
//! timer handlers take `&mut` state like every other event handler.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

struct TimerEntry {
    deadline: Instant,
    /// Some = interval timer, re-armed on fire.
    period: Option<Duration>,
}

pub struct TimerRegistry<K: Eq + std::hash::Hash + Clone> {
    timers: HashMap<K, TimerEntry>,
}

impl<K: Eq + std::hash::Hash + Clone> TimerRegistry<K> {
    pub fn new() -> Self {
        Self { timers: HashMap::new() }
    }

    /// Arm a one-shot timer, replacing any timer under the same key.
    pub fn set(&mut self, key: K, delay: Duration) {
        self.timers
            .insert(key, TimerEntry { deadline: Instant::now() + delay, period: None });
    }

    /// Arm an interval timer; the first fire is one period from now.
    pub fn set_interval(&mut self, key: K, period: Duration) {
        self.timers
            .insert(key, TimerEntry { deadline: Instant::now() + period, period: Some(period) });
    }

    /// Re-arm a timer from now, one-shot. Same as `set`; reads better at
    /// call sites that extend an already armed deadline.
    pub fn reset(&mut self, key: K, delay: Duration) {
        self.set(key, delay);
    }

    pub fn clear(&mut self, key: &K) -> bool {
        self.timers.remove(key).is_some()
    }

    pub fn clear_all(&mut self) {
        self.timers.clear();
    }

    pub fn is_armed(&self, key: &K) -> bool {
        self.timers.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Earliest armed deadline, if any. The owner sleeps until this.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().map(|entry| entry.deadline).min()
    }

    /// Pop the earliest due timer, re-arming intervals. Returns None when
    /// nothing is due yet.
    pub fn pop_due(&mut self) -> Option<K> {
        let now = Instant::now();
        let key = self
            .timers
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .min_by_key(|(_, entry)| entry.deadline)
            .map(|(key, _)| key.clone())?;

        match self.timers.get_mut(&key) {
            Some(entry) => match entry.period {
                Some(period) => entry.deadline = now + period,
                None => {
                    self.timers.remove(&key);
                }
            },
            None => return None,
        }
        Some(key)
    }
}

impl<K: Eq + std::hash::Hash + Clone> Default for TimerRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn one_shot_fires_once() {
        let mut timers: TimerRegistry<&'static str> = TimerRegistry::new();
        timers.set("a", Duration::from_secs(5));
        assert_eq!(timers.pop_due(), None);

        advance(Duration::from_secs(5)).await;
        assert_eq!(timers.pop_due(), Some("a"));
        assert_eq!(timers.pop_due(), None);
        assert!(!timers.is_armed(&"a"));
    }

    #[tokio::test(start_paused = true)]
    async fn interval_rearms() {
        let mut timers: TimerRegistry<&'static str> = TimerRegistry::new();
        timers.set_interval("tick", Duration::from_secs(2));

        advance(Duration::from_secs(2)).await;
        assert_eq!(timers.pop_due(), Some("tick"));
        assert_eq!(timers.pop_due(), None);

        advance(Duration::from_secs(2)).await;
        assert_eq!(timers.pop_due(), Some("tick"));
        assert!(timers.is_armed(&"tick"));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_replaces_deadline() {
        let mut timers: TimerRegistry<&'static str> = TimerRegistry::new();
        timers.set("a", Duration::from_secs(2));
        timers.reset("a", Duration::from_secs(10));

        advance(Duration::from_secs(2)).await;
        assert_eq!(timers.pop_due(), None);
        advance(Duration::from_secs(8)).await;
        assert_eq!(timers.pop_due(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn due_timers_pop_earliest_first() {
        let mut timers: TimerRegistry<&'static str> = TimerRegistry::new();
        timers.set("late", Duration::from_secs(3));
        timers.set("early", Duration::from_secs(1));

        advance(Duration::from_secs(3)).await;
        assert_eq!(timers.pop_due(), Some("early"));
        assert_eq!(timers.pop_due(), Some("late"));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_all_disarms() {
        let mut timers: TimerRegistry<&'static str> = TimerRegistry::new();
        timers.set("a", Duration::from_secs(1));
        timers.set_interval("b", Duration::from_secs(1));
        timers.clear_all();
        advance(Duration::from_secs(5)).await;
        assert_eq!(timers.pop_due(), None);
        assert!(timers.is_empty());
    }
}
