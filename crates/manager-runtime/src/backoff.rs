//! # Fibonacci Backoff
//!
//! Requeue delays for failed reconciles. Each object gets its own sequence,
//! so one failing object does not slow down retries for its neighbours.
//!
//! Sequence with the defaults: 5s, 5s, 10s, 15s, 25s, 40s, 65s, 105s, 170s,
//! 275s, 300s (max). A successful reconcile resets the object's sequence,
//! and sequences of deleted objects are dropped.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::client::ObjectKey;

/// Default first delay.
pub const DEFAULT_MIN_BACKOFF: Duration = Duration::from_secs(5);
/// Default cap.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Fibonacci backoff calculator
///
/// Each backoff is the sum of the previous two, capped at `max_seconds`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Minimum backoff value in seconds (for reset)
    min_seconds: u64,
    /// Previous backoff value in seconds
    prev_seconds: u64,
    /// Current backoff value in seconds
    current_seconds: u64,
    /// Maximum backoff value in seconds
    max_seconds: u64,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff with minimum and maximum values in seconds
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            min_seconds,
            prev_seconds: 0,
            current_seconds: min_seconds,
            max_seconds,
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current_seconds;
        let next = self.prev_seconds + self.current_seconds;
        self.prev_seconds = self.current_seconds;
        self.current_seconds = std::cmp::min(next, self.max_seconds);
        Duration::from_secs(result)
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.prev_seconds = 0;
        self.current_seconds = self.min_seconds;
    }
}

/// Per-object backoff table shared by a controller's workers.
#[derive(Debug)]
pub struct KeyedBackoff {
    min_seconds: u64,
    max_seconds: u64,
    entries: Mutex<HashMap<ObjectKey, FibonacciBackoff>>,
}

impl Default for KeyedBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_BACKOFF, DEFAULT_MAX_BACKOFF)
    }
}

impl KeyedBackoff {
    /// Creates a table whose sequences run from `min` to `max`.
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min_seconds: min.as_secs().max(1),
            max_seconds: max.as_secs().max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Next delay for `key`, advancing its sequence.
    pub fn next(&self, key: &ObjectKey) -> Duration {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_insert_with(|| FibonacciBackoff::new(self.min_seconds, self.max_seconds))
            .next_backoff()
    }

    /// Forgets `key` after a successful reconcile.
    pub fn reset(&self, key: &ObjectKey) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Drops every sequence whose key `keep` rejects.
    pub fn retain(&self, mut keep: impl FnMut(&ObjectKey) -> bool) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|key, _| keep(key));
    }

    /// Number of objects currently backing off.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no object is backing off.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(5, 300);

        let seconds: Vec<u64> = (0..12).map(|_| backoff.next_backoff().as_secs()).collect();
        assert_eq!(
            seconds,
            vec![5, 5, 10, 15, 25, 40, 65, 105, 170, 275, 300, 300]
        );
    }

    #[test]
    fn test_fibonacci_backoff_reset() {
        let mut backoff = FibonacciBackoff::new(5, 300);

        backoff.next_backoff();
        backoff.next_backoff();
        assert_eq!(backoff.next_backoff(), Duration::from_secs(10));

        backoff.reset();

        // Should restart from beginning after success
        assert_eq!(backoff.next_backoff(), Duration::from_secs(5));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(5));
    }

    #[test]
    fn test_keyed_backoff_is_per_object() {
        let table = KeyedBackoff::default();
        let a = ObjectKey::namespaced("default", "a");
        let b = ObjectKey::namespaced("default", "b");

        table.next(&a);
        table.next(&a);
        assert_eq!(table.next(&a), Duration::from_secs(10));
        assert_eq!(
            table.next(&b),
            Duration::from_secs(5),
            "Another object's failures must not advance this sequence"
        );

        table.reset(&a);
        assert_eq!(table.next(&a), Duration::from_secs(5));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_retain_drops_rejected_keys() {
        let table = KeyedBackoff::default();
        let kept = ObjectKey::namespaced("default", "kept");
        let deleted = ObjectKey::namespaced("default", "deleted");
        table.next(&kept);
        table.next(&deleted);

        table.retain(|key| key == &kept);

        assert_eq!(table.len(), 1);
        assert_eq!(table.next(&kept), Duration::from_secs(5), "kept sequence continues");
    }
}
