//! Per-key exponential backoff for reconcile retries.
use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// Determines how long to back off before performing a retry.
pub trait BackoffStrategy: Send {
    /// Resets the strategy after a success.
    fn reset(&mut self);
    /// Gets how long to wait before retrying.
    fn next_duration(&mut self) -> Duration;
}

/// A `BackoffStrategy` in which the durations increase exponentially
/// until hitting a cap.
#[derive(Clone, Debug)]
pub struct ExponentialBackoffStrategy {
    base_duration: Duration,
    cap: Duration,
    last_duration: Duration,
}

impl Default for ExponentialBackoffStrategy {
    /// Gets a backoff strategy with the federation controller defaults.
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(60))
    }
}

impl ExponentialBackoffStrategy {
    /// Starts at `base_duration` and doubles up to `cap`.
    pub fn new(base_duration: Duration, cap: Duration) -> Self {
        Self {
            base_duration,
            cap,
            last_duration: Duration::from_secs(0),
        }
    }

    /// The most recently returned duration, zero after a reset.
    pub fn last_duration(&self) -> Duration {
        self.last_duration
    }

    fn capped_next_duration(&self) -> Duration {
        let next_duration = if self.last_duration == Duration::from_secs(0) {
            self.base_duration
        } else {
            self.last_duration * 2
        };

        if next_duration > self.cap {
            self.cap
        } else {
            next_duration
        }
    }
}

impl BackoffStrategy for ExponentialBackoffStrategy {
    fn reset(&mut self) {
        self.last_duration = Duration::from_secs(0);
    }

    fn next_duration(&mut self) -> Duration {
        let next_duration = self.capped_next_duration();
        self.last_duration = next_duration;
        next_duration
    }
}

struct Entry {
    strategy: ExponentialBackoffStrategy,
    last_update: Instant,
}

/// Independent exponential backoffs, one per key.
///
/// A key that has not failed for more than twice the cap starts over from
/// the base duration, and [`gc`](KeyedBackoff::gc) forgets it entirely.
pub struct KeyedBackoff {
    base_duration: Duration,
    cap: Duration,
    entries: HashMap<String, Entry>,
}

impl KeyedBackoff {
    /// Creates an empty set of backoffs.
    pub fn new(base_duration: Duration, cap: Duration) -> Self {
        KeyedBackoff {
            base_duration,
            cap,
            entries: HashMap::new(),
        }
    }

    /// Records a failure of `key` at `now` and returns how long to wait
    /// before retrying it.
    pub fn next(&mut self, key: &str, now: Instant) -> Duration {
        let (base, cap) = (self.base_duration, self.cap);
        let expired = self.is_expired(key, now);
        let entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            strategy: ExponentialBackoffStrategy::new(base, cap),
            last_update: now,
        });
        if expired {
            entry.strategy.reset();
        }
        entry.last_update = now;
        entry.strategy.next_duration()
    }

    /// The current delay of `key`, zero if it has not failed.
    pub fn get(&self, key: &str) -> Duration {
        self.entries
            .get(key)
            .map(|entry| entry.strategy.last_duration())
            .unwrap_or_default()
    }

    /// Forgets `key` after a success.
    pub fn reset(&mut self, key: &str) {
        self.entries.remove(key);
    }

    /// Drops every key idle for more than twice the cap.
    pub fn gc(&mut self, now: Instant) {
        let max_idle = self.cap * 2;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.last_update) <= max_idle);
    }

    /// Number of keys currently backing off.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no key is backing off.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_expired(&self, key: &str, now: Instant) -> bool {
        match self.entries.get(key) {
            Some(entry) => now.saturating_duration_since(entry.last_update) > self.cap * 2,
            None => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn first_backoff_is_5_seconds() {
        let mut backoff = ExponentialBackoffStrategy::default();
        assert_eq!(backoff.next_duration(), Duration::from_secs(5));
    }

    #[test]
    fn backoff_doubles_each_time() {
        let mut backoff = ExponentialBackoffStrategy::default();
        assert_eq!(backoff.next_duration(), Duration::from_secs(5));
        assert_eq!(backoff.next_duration(), Duration::from_secs(10));
        assert_eq!(backoff.next_duration(), Duration::from_secs(20));
        assert_eq!(backoff.next_duration(), Duration::from_secs(40));
    }

    #[test]
    fn backoff_is_capped_at_1_minute() {
        let mut backoff = ExponentialBackoffStrategy::default();
        for _ in 0..4 {
            backoff.next_duration();
        }
        assert_eq!(backoff.next_duration(), Duration::from_secs(60));
        assert_eq!(backoff.next_duration(), Duration::from_secs(60));
        backoff.reset();
        assert_eq!(backoff.next_duration(), Duration::from_secs(5));
    }

    #[test]
    fn keys_back_off_independently() {
        let mut backoff = KeyedBackoff::new(Duration::from_secs(5), Duration::from_secs(60));
        let now = Instant::now();
        assert_eq!(backoff.next("a", now), Duration::from_secs(5));
        assert_eq!(backoff.next("a", now), Duration::from_secs(10));
        assert_eq!(backoff.next("b", now), Duration::from_secs(5));
        assert_eq!(backoff.get("a"), Duration::from_secs(10));
        assert_eq!(backoff.get("c"), Duration::from_secs(0));

        backoff.reset("a");
        assert_eq!(backoff.get("a"), Duration::from_secs(0));
        assert_eq!(backoff.next("a", now), Duration::from_secs(5));
    }

    #[test]
    fn idle_keys_start_over_and_are_collected() {
        let mut backoff = KeyedBackoff::new(Duration::from_secs(5), Duration::from_secs(60));
        let start = Instant::now();
        backoff.next("a", start);
        backoff.next("a", start);
        backoff.next("b", start + Duration::from_secs(100));

        let later = start + Duration::from_secs(121);
        assert_eq!(backoff.next("a", later), Duration::from_secs(5));

        backoff.gc(start + Duration::from_secs(230));
        assert_eq!(backoff.len(), 1);
        backoff.gc(start + Duration::from_secs(400));
        assert!(backoff.is_empty());
    }
}
