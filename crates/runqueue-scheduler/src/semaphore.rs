//! Per-repository admission primitive.
//!
//! A semaphore holds the runs waiting for a slot, ordered by arrival time, and
//! the runs currently admitted. It has no locking of its own; the
//! [`QueueManager`](crate::QueueManager) serializes every access.

use chrono::{DateTime, Utc};
use runqueue_core::QueueKey;
use std::collections::{BTreeSet, HashMap};

/// Why a run was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    /// Every slot is taken.
    AtCapacity,
    /// A run that arrived earlier is still waiting.
    EarlierRun,
    /// The run is neither waiting nor running.
    NotQueued,
}

impl std::fmt::Display for WaitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitReason::AtCapacity => write!(f, "at capacity"),
            WaitReason::EarlierRun => write!(f, "waiting for earlier run"),
            WaitReason::NotQueued => write!(f, "not queued"),
        }
    }
}

/// Waiting set and running set for one repository, bounded by `limit`.
#[derive(Debug)]
pub struct Semaphore {
    limit: usize,
    /// Ordered by arrival, ties broken by key.
    waiting: BTreeSet<(DateTime<Utc>, QueueKey)>,
    arrivals: HashMap<QueueKey, DateTime<Utc>>,
    running: BTreeSet<QueueKey>,
}

impl Semaphore {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            waiting: BTreeSet::new(),
            arrivals: HashMap::new(),
            running: BTreeSet::new(),
        }
    }

    /// Insert `key` into the waiting queue. No-op if it is already waiting or running.
    pub fn add_to_queue(&mut self, key: QueueKey, arrived_at: DateTime<Utc>) {
        if self.arrivals.contains_key(&key) || self.running.contains(&key) {
            return;
        }
        self.waiting.insert((arrived_at, key.clone()));
        self.arrivals.insert(key, arrived_at);
    }

    /// Admit `key` if a slot is free and it is the earliest waiting run.
    pub fn try_acquire(&mut self, key: &QueueKey) -> Result<(), WaitReason> {
        if self.running.contains(key) {
            return Ok(());
        }
        let arrived_at = *self.arrivals.get(key).ok_or(WaitReason::NotQueued)?;
        if self.running.len() >= self.limit {
            return Err(WaitReason::AtCapacity);
        }
        match self.waiting.first() {
            Some((_, head)) if head == key => {}
            _ => return Err(WaitReason::EarlierRun),
        }
        self.waiting.remove(&(arrived_at, key.clone()));
        self.arrivals.remove(key);
        self.running.insert(key.clone());
        Ok(())
    }

    /// Promote the earliest waiting run if a slot is free.
    pub fn acquire_latest(&mut self) -> Option<QueueKey> {
        if self.running.len() >= self.limit {
            return None;
        }
        let (_, key) = self.waiting.pop_first()?;
        self.arrivals.remove(&key);
        self.running.insert(key.clone());
        Some(key)
    }

    /// Mark `key` as running regardless of capacity or queue position.
    ///
    /// Only recovery uses this, to restore runs that were already executing.
    pub fn acquire(&mut self, key: QueueKey) {
        self.remove_from_queue(&key);
        self.running.insert(key);
    }

    pub fn release(&mut self, key: &QueueKey) {
        self.running.remove(key);
    }

    pub fn remove_from_queue(&mut self, key: &QueueKey) {
        if let Some(arrived_at) = self.arrivals.remove(key) {
            self.waiting.remove(&(arrived_at, key.clone()));
        }
    }

    /// Change the limit. Refuses to shrink below the number of running runs.
    pub fn resize(&mut self, limit: usize) -> bool {
        if limit < self.running.len() {
            return false;
        }
        self.limit = limit;
        true
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Waiting runs, earliest arrival first.
    pub fn current_pending(&self) -> Vec<QueueKey> {
        self.waiting.iter().map(|(_, key)| key.clone()).collect()
    }

    pub fn current_running(&self) -> Vec<QueueKey> {
        self.running.iter().cloned().collect()
    }

    pub fn is_idle(&self) -> bool {
        self.waiting.is_empty() && self.running.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key(name: &str) -> QueueKey {
        QueueKey::new("ci", name)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_pending_ordered_by_arrival_not_call_order() {
        let mut sema = Semaphore::new(1);
        sema.add_to_queue(key("c"), at(30));
        sema.add_to_queue(key("a"), at(10));
        sema.add_to_queue(key("b"), at(20));

        assert_eq!(sema.current_pending(), vec![key("a"), key("b"), key("c")]);
    }

    #[test]
    fn test_equal_arrivals_break_ties_by_key() {
        let mut sema = Semaphore::new(1);
        sema.add_to_queue(key("zeta"), at(10));
        sema.add_to_queue(key("alpha"), at(10));

        assert_eq!(sema.current_pending(), vec![key("alpha"), key("zeta")]);
    }

    #[test]
    fn test_add_is_noop_for_known_keys() {
        let mut sema = Semaphore::new(1);
        sema.add_to_queue(key("a"), at(10));
        sema.add_to_queue(key("a"), at(5));
        assert_eq!(sema.current_pending(), vec![key("a")]);

        sema.try_acquire(&key("a")).unwrap();
        sema.add_to_queue(key("a"), at(1));
        assert!(sema.current_pending().is_empty());
        assert_eq!(sema.current_running(), vec![key("a")]);
    }

    #[test]
    fn test_try_acquire_respects_fifo() {
        let mut sema = Semaphore::new(2);
        sema.add_to_queue(key("late"), at(20));
        sema.add_to_queue(key("early"), at(10));

        assert_eq!(sema.try_acquire(&key("late")), Err(WaitReason::EarlierRun));
        assert_eq!(sema.try_acquire(&key("early")), Ok(()));
        assert_eq!(sema.try_acquire(&key("late")), Ok(()));
    }

    #[test]
    fn test_try_acquire_at_capacity() {
        let mut sema = Semaphore::new(1);
        sema.add_to_queue(key("a"), at(1));
        sema.add_to_queue(key("b"), at(2));
        sema.try_acquire(&key("a")).unwrap();

        let reason = sema.try_acquire(&key("b")).unwrap_err();
        assert_eq!(reason, WaitReason::AtCapacity);
        assert_eq!(reason.to_string(), "at capacity");
        assert_eq!(sema.current_pending(), vec![key("b")]);
    }

    #[test]
    fn test_try_acquire_unknown_key() {
        let mut sema = Semaphore::new(1);
        assert_eq!(sema.try_acquire(&key("ghost")), Err(WaitReason::NotQueued));
    }

    #[test]
    fn test_acquire_latest_promotes_one() {
        let mut sema = Semaphore::new(2);
        sema.add_to_queue(key("b"), at(2));
        sema.add_to_queue(key("a"), at(1));

        assert_eq!(sema.acquire_latest(), Some(key("a")));
        assert_eq!(sema.current_pending(), vec![key("b")]);
        assert_eq!(sema.acquire_latest(), Some(key("b")));
        assert_eq!(sema.acquire_latest(), None);
    }

    #[test]
    fn test_acquire_latest_at_capacity() {
        let mut sema = Semaphore::new(1);
        sema.acquire(key("running"));
        sema.add_to_queue(key("a"), at(1));

        assert_eq!(sema.acquire_latest(), None);
        assert_eq!(sema.current_pending(), vec![key("a")]);
    }

    #[test]
    fn test_acquire_bypasses_limit() {
        let mut sema = Semaphore::new(1);
        sema.add_to_queue(key("a"), at(1));
        sema.acquire(key("a"));
        sema.acquire(key("b"));

        assert!(sema.current_pending().is_empty());
        assert_eq!(sema.current_running(), vec![key("a"), key("b")]);
    }

    #[test]
    fn test_release_and_remove_are_idempotent() {
        let mut sema = Semaphore::new(1);
        sema.release(&key("ghost"));
        sema.remove_from_queue(&key("ghost"));

        sema.add_to_queue(key("a"), at(1));
        sema.remove_from_queue(&key("a"));
        sema.remove_from_queue(&key("a"));
        assert!(sema.is_idle());
    }

    #[test]
    fn test_resize_refuses_shrink_below_running() {
        let mut sema = Semaphore::new(2);
        sema.acquire(key("a"));
        sema.acquire(key("b"));

        assert!(!sema.resize(1));
        assert_eq!(sema.limit(), 2);
        assert!(sema.resize(2));
        assert!(sema.resize(3));
        assert_eq!(sema.limit(), 3);
    }

    #[test]
    fn test_resize_changes_future_admission() {
        let mut sema = Semaphore::new(1);
        sema.add_to_queue(key("a"), at(1));
        sema.add_to_queue(key("b"), at(2));
        sema.try_acquire(&key("a")).unwrap();
        assert_eq!(sema.try_acquire(&key("b")), Err(WaitReason::AtCapacity));

        assert!(sema.resize(2));
        assert_eq!(sema.try_acquire(&key("b")), Ok(()));
    }
}
