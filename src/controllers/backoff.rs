//! Per-key exponential retry backoff
//!
//! Consecutive failures of the same ApacheWeb double its requeue delay, from
//! `base` up to `max`. A successful pass resets the key.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::key::ObjectKey;

#[derive(Debug)]
pub struct RetryTracker {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<ObjectKey, u32>>,
}

impl RetryTracker {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure of `key` and return the delay before its next attempt
    pub fn next_delay(&self, key: &ObjectKey) -> Duration {
        let attempt = {
            let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
            let count = failures.entry(key.clone()).or_insert(0);
            let attempt = *count;
            *count = count.saturating_add(1);
            attempt
        };
        Self::delay_for_attempt(attempt, self.base, self.max)
    }

    /// Forget the failures of `key`
    pub fn reset(&self, key: &ObjectKey) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    /// Stateless delay for the nth consecutive failure (0-indexed)
    pub fn delay_for_attempt(attempt: u32, base: Duration, max: Duration) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        base.checked_mul(factor).unwrap_or(max).min(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_until_capped() {
        let tracker = RetryTracker::new(Duration::from_secs(5), Duration::from_secs(60));
        let key = ObjectKey::new("default", "web");

        let delays: Vec<u64> = (0..6).map(|_| tracker.next_delay(&key).as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60]);
    }

    #[test]
    fn reset_starts_over() {
        let tracker = RetryTracker::new(Duration::from_secs(5), Duration::from_secs(60));
        let key = ObjectKey::new("default", "web");

        tracker.next_delay(&key);
        tracker.next_delay(&key);
        tracker.reset(&key);

        assert_eq!(tracker.next_delay(&key), Duration::from_secs(5));
    }

    #[test]
    fn keys_back_off_independently() {
        let tracker = RetryTracker::new(Duration::from_secs(1), Duration::from_secs(60));
        let a = ObjectKey::new("default", "a");
        let b = ObjectKey::new("default", "b");

        tracker.next_delay(&a);
        tracker.next_delay(&a);

        assert_eq!(tracker.next_delay(&a), Duration::from_secs(4));
        assert_eq!(tracker.next_delay(&b), Duration::from_secs(1));
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let max = Duration::from_secs(300);
        assert_eq!(RetryTracker::delay_for_attempt(u32::MAX, Duration::from_secs(5), max), max);
    }
}
