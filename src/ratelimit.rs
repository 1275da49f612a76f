//! Per-key sliding-window rate limiter.
//!
//! Each key keeps the timestamps of its admitted events inside the window.
//! Expired timestamps are purged before every admission check, so a window
//! never holds more than `max_events` entries. Rejected events are not
//! recorded.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

pub struct RateLimiter<K> {
    max_events: usize,
    window: Duration,
    windows: HashMap<K, VecDeque<Instant>>,
}

impl<K: Hash + Eq + Copy> RateLimiter<K> {
    pub fn new(max_events: usize, window: Duration) -> Self {
        Self {
            max_events,
            window,
            windows: HashMap::new(),
        }
    }

    /// Admit an event for `key` now.
    pub fn admit(&mut self, key: K) -> bool {
        self.admit_at(key, Instant::now())
    }

    /// Admit an event for `key` at `now`. Returns `false` when the window
    /// is full; the event is then dropped.
    pub fn admit_at(&mut self, key: K, now: Instant) -> bool {
        let window = self.window;
        let events = self.windows.entry(key).or_default();
        while events
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= window)
        {
            events.pop_front();
        }
        if events.len() >= self.max_events {
            return false;
        }
        events.push_back(now);
        true
    }

    /// Drop all bookkeeping for `key`.
    pub fn forget(&mut self, key: K) {
        self.windows.remove(&key);
    }

    /// Number of keys currently tracked.
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }

    /// Events currently counted against `key`.
    #[cfg(test)]
    fn in_window(&self, key: K) -> usize {
        self.windows.get(&key).map_or(0, VecDeque::len)
    }
}
