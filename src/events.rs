//! Capped append-only logs
//!
//! Scaling events, failover events and health-check results are all kept in
//! a bounded ring. Appending past capacity evicts the oldest entry while the
//! same lock is held, so concurrent appenders never observe a log above its
//! capacity.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Default retention for scaling and failover events
pub const EVENT_LOG_CAPACITY: usize = 1_000;

/// Default retention for health-check results
pub const HEALTH_LOG_CAPACITY: usize = 10_000;

/// A bounded, oldest-evicted-first log
#[derive(Debug)]
pub struct EventLog<T> {
    capacity: usize,
    entries: Mutex<VecDeque<T>>,
}

impl<T: Clone> EventLog<T> {
    /// Create a log retaining at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    /// Append an entry, evicting the oldest if the log is full
    pub fn push(&self, entry: T) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy of every retained entry, oldest first
    pub fn snapshot(&self) -> Vec<T> {
        self.entries.lock().iter().cloned().collect()
    }

    /// The newest `limit` entries, oldest first
    pub fn recent(&self, limit: usize) -> Vec<T> {
        self.recent_matching(limit, |_| true)
    }

    /// The newest `limit` entries accepted by `filter`, oldest first
    pub fn recent_matching(&self, limit: usize, filter: impl Fn(&T) -> bool) -> Vec<T> {
        let entries = self.entries.lock();
        let mut matched: Vec<T> = entries
            .iter()
            .rev()
            .filter(|e| filter(e))
            .take(limit)
            .cloned()
            .collect();
        matched.reverse();
        matched
    }

    /// The newest entry accepted by `filter`
    pub fn last_matching(&self, filter: impl Fn(&T) -> bool) -> Option<T> {
        self.entries.lock().iter().rev().find(|e| filter(e)).cloned()
    }

    /// Fold over retained entries, oldest first, under a single lock
    pub fn fold<A>(&self, init: A, f: impl FnMut(A, &T) -> A) -> A {
        self.entries.lock().iter().fold(init, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest_at_capacity() {
        let log = EventLog::new(3);
        for i in 0..5 {
            log.push(i);
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.snapshot(), vec![2, 3, 4]);
    }

    #[test]
    fn test_recent_is_oldest_first() {
        let log = EventLog::new(10);
        for i in 0..6 {
            log.push(i);
        }
        assert_eq!(log.recent(2), vec![4, 5]);
        assert_eq!(log.recent(100).len(), 6);
    }

    #[test]
    fn test_recent_matching_and_last() {
        let log = EventLog::new(10);
        for i in 0..10 {
            log.push(i);
        }
        assert_eq!(log.recent_matching(3, |v| v % 2 == 0), vec![4, 6, 8]);
        assert_eq!(log.last_matching(|v| *v < 5), Some(4));
        assert_eq!(log.last_matching(|v| *v > 100), None);
    }

    #[test]
    fn test_fold() {
        let log = EventLog::new(4);
        for i in 1..=4 {
            log.push(i);
        }
        assert_eq!(log.fold(0, |acc, v| acc + v), 10);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let log = EventLog::new(0);
        log.push("a");
        log.push("b");
        assert_eq!(log.capacity(), 1);
        assert_eq!(log.snapshot(), vec!["b"]);
    }

    #[test]
    fn test_concurrent_appenders_respect_capacity() {
        use std::sync::Arc;

        let log = Arc::new(EventLog::new(50));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        log.push(t * 1000 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(log.len(), 50);
    }
}
