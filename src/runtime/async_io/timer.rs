//! Deadline timers for the event loop.
//!
//! The wheel only stores deadlines and the promises to settle; it never runs
//! continuations itself. Callers drain expired entries and settle the
//! returned promises once they no longer hold any loop state borrowed.

use crate::future::{pair, Future, Promise};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Identifies a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

struct TimerEntry {
    deadline: Instant,
    promise: Promise<()>,
}

/// Pending timers keyed by id
pub struct TimerWheel {
    timers: HashMap<TimerId, TimerEntry>,
    next_id: u64,
}

impl TimerWheel {
    pub fn new() -> Self {
        Self {
            timers: HashMap::new(),
            next_id: 1,
        }
    }

    /// Schedule a timer firing at `deadline`.
    pub fn insert(&mut self, deadline: Instant) -> (TimerId, Future<()>) {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        let (promise, future) = pair();
        self.timers.insert(id, TimerEntry { deadline, promise });
        (id, future)
    }

    /// Schedule a timer firing `duration` from now.
    pub fn insert_after(&mut self, duration: Duration) -> (TimerId, Future<()>) {
        self.insert(Instant::now() + duration)
    }

    /// Remove a timer, handing back its unsettled promise.
    pub fn remove(&mut self, id: TimerId) -> Option<Promise<()>> {
        self.timers.remove(&id).map(|entry| entry.promise)
    }

    /// Move a pending timer to a new deadline.
    pub fn reset(&mut self, id: TimerId, deadline: Instant) -> bool {
        match self.timers.get_mut(&id) {
            Some(entry) => {
                entry.deadline = deadline;
                true
            }
            None => false,
        }
    }

    /// Earliest pending deadline (for calculating the poll timeout).
    pub fn next_expiry(&self) -> Option<Instant> {
        self.timers.values().map(|e| e.deadline).min()
    }

    /// Time left until the earliest deadline, zero if already due.
    pub fn timeout_until_next(&self, now: Instant) -> Option<Duration> {
        self.next_expiry()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Remove every timer due at `now`, ordered by deadline then id.
    pub fn drain_expired(&mut self, now: Instant) -> Vec<(TimerId, Promise<()>)> {
        let mut due: Vec<(Instant, TimerId)> = self
            .timers
            .iter()
            .filter(|(_, e)| e.deadline <= now)
            .map(|(id, e)| (e.deadline, *id))
            .collect();
        due.sort();

        due.into_iter()
            .filter_map(|(_, id)| self.timers.remove(&id).map(|e| (id, e.promise)))
            .collect()
    }

    /// Remove every timer, handing back the promises.
    pub fn drain_all(&mut self) -> Vec<Promise<()>> {
        self.timers.drain().map(|(_, e)| e.promise).collect()
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_wheel_insert_remove() {
        let mut wheel = TimerWheel::new();
        let (id, _future) = wheel.insert_after(Duration::from_millis(100));
        assert_eq!(wheel.len(), 1);

        let promise = wheel.remove(id).unwrap();
        assert!(!promise.is_settled());
        assert!(wheel.is_empty());
        assert!(wheel.remove(id).is_none());
    }

    #[test]
    fn test_next_expiry() {
        let mut wheel = TimerWheel::new();
        assert!(wheel.next_expiry().is_none());

        let now = Instant::now();
        wheel.insert(now + Duration::from_millis(100));
        wheel.insert(now + Duration::from_millis(50));
        wheel.insert(now + Duration::from_millis(200));

        assert_eq!(wheel.next_expiry(), Some(now + Duration::from_millis(50)));
        assert_eq!(
            wheel.timeout_until_next(now + Duration::from_millis(60)),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_drain_expired_in_deadline_order() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();
        let (late, _a) = wheel.insert(now + Duration::from_millis(30));
        let (early, _b) = wheel.insert(now + Duration::from_millis(10));
        let (pending, _c) = wheel.insert(now + Duration::from_secs(60));

        let fired: Vec<TimerId> = wheel
            .drain_expired(now + Duration::from_millis(40))
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(fired, vec![early, late]);
        assert_eq!(wheel.len(), 1);
        assert!(wheel.remove(pending).is_some());
    }

    #[test]
    fn test_timer_reset() {
        let mut wheel = TimerWheel::new();
        let now = Instant::now();
        let (id, _future) = wheel.insert(now);
        assert!(wheel.reset(id, now + Duration::from_secs(5)));
        assert!(wheel.drain_expired(now).is_empty());
        assert!(!wheel.reset(TimerId(999), now));
    }
}
