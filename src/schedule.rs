//! Single-threaded timer queue polled from the event loop.
//!
//! Tasks are plain values; whoever owns the scheduler decides what firing
//! means. A task re-arms itself by scheduling a new entry when it runs.
//! Cancelling works on the specific [`TimerHandle`] returned at scheduling
//! time, and ids are never reused, so a cancelled handle can never fire.

use std::time::{Duration, Instant};

/// Identifies one scheduled entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

struct Entry<T> {
    id: u64,
    due: Instant,
    task: T,
}

/// Timer queue ordered by due time, ties broken by scheduling order.
pub struct Scheduler<T> {
    next_id: u64,
    entries: Vec<Entry<T>>,
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }

    /// Schedule `task` to become due `delay` after `now`.
    pub fn schedule(&mut self, now: Instant, delay: Duration, task: T) -> TimerHandle {
        self.schedule_at(now + delay, task)
    }

    /// Schedule `task` to become due at `due`.
    pub fn schedule_at(&mut self, due: Instant, task: T) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(Entry { id, due, task });
        TimerHandle(id)
    }

    /// Remove the entry behind `handle`. Returns false if it already fired or was cancelled.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != handle.0);
        self.entries.len() != before
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.entries.iter().any(|e| e.id == handle.0)
    }

    /// Earliest due time, used to park the event loop.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|e| e.due).min()
    }

    /// Remove and return every entry due at or before `now`, in firing order.
    pub fn take_due(&mut self, now: Instant) -> Vec<(TimerHandle, T)> {
        let mut due = Vec::new();
        let mut i = 0;
        while i < self.entries.len() {
            if self.entries[i].due <= now {
                due.push(self.entries.swap_remove(i));
            } else {
                i += 1;
            }
        }
        due.sort_by(|a, b| a.due.cmp(&b.due).then(a.id.cmp(&b.id)));
        due.into_iter().map(|e| (TimerHandle(e.id), e.task)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every pending entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_in_due_order() {
        let start = Instant::now();
        let mut scheduler = Scheduler::new();
        scheduler.schedule(start, Duration::from_millis(30), "late");
        scheduler.schedule(start, Duration::from_millis(10), "early");
        scheduler.schedule(start, Duration::from_millis(10), "early-second");

        assert!(scheduler.take_due(start).is_empty());
        let fired: Vec<_> = scheduler
            .take_due(start + Duration::from_millis(20))
            .into_iter()
            .map(|(_, t)| t)
            .collect();
        assert_eq!(fired, vec!["early", "early-second"]);
        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.next_deadline(), Some(start + Duration::from_millis(30)));
    }

    #[test]
    fn test_cancelled_handle_never_fires() {
        let start = Instant::now();
        let mut scheduler = Scheduler::new();
        let handle = scheduler.schedule(start, Duration::from_millis(5), 1);
        let other = scheduler.schedule(start, Duration::from_millis(5), 2);

        assert!(scheduler.cancel(handle));
        assert!(!scheduler.cancel(handle));
        assert!(!scheduler.is_pending(handle));
        assert!(scheduler.is_pending(other));

        let fired: Vec<_> = scheduler
            .take_due(start + Duration::from_secs(1))
            .into_iter()
            .map(|(h, t)| (h, t))
            .collect();
        assert_eq!(fired, vec![(other, 2)]);
    }

    #[test]
    fn test_handles_are_not_reused() {
        let now = Instant::now();
        let mut scheduler = Scheduler::new();
        let first = scheduler.schedule(now, Duration::ZERO, ());
        scheduler.take_due(now);
        let second = scheduler.schedule(now, Duration::ZERO, ());
        assert_ne!(first, second);
        assert!(!scheduler.cancel(first));
        assert!(scheduler.is_pending(second));
    }
}
