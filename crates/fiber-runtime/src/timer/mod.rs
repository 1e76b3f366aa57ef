//! Per-worker deadline-ordered timer queue.
//!
//! Owned exclusively by the worker whose `Scheduler` holds it; the
//! scheduling loop drains expired entries once per iteration instead of
//! running a dedicated timer thread, so no lock or atomic is needed
//! here at all.

use std::collections::{BinaryHeap, HashSet};
use std::time::{Duration, Instant};

use fiber_core::id::FiberId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    fn next() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        TimerHandle(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

struct TimerEntry {
    handle: TimerHandle,
    deadline: Instant,
    fiber: FiberId,
    periodic: Option<Duration>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.handle == other.handle
    }
}
impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed so the BinaryHeap (a max-heap) yields the earliest
        // deadline first.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.handle.0.cmp(&self.handle.0))
    }
}

/// A timer that has fired. `periodic_handle` is `Some` when the timer
/// was re-armed and remains cancellable under the same handle.
pub struct ExpiredTimer {
    pub fiber: FiberId,
    pub periodic_handle: Option<TimerHandle>,
}

#[derive(Default)]
pub struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    cancelled: HashSet<TimerHandle>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            cancelled: HashSet::new(),
        }
    }

    pub fn schedule_at(&mut self, fiber: FiberId, deadline: Instant) -> TimerHandle {
        let handle = TimerHandle::next();
        self.heap.push(TimerEntry {
            handle,
            deadline,
            fiber,
            periodic: None,
        });
        handle
    }

    pub fn schedule(&mut self, fiber: FiberId, delay: Duration) -> TimerHandle {
        self.schedule_at(fiber, Instant::now() + delay)
    }

    pub fn schedule_periodic(&mut self, fiber: FiberId, interval: Duration) -> TimerHandle {
        let handle = TimerHandle::next();
        self.heap.push(TimerEntry {
            handle,
            deadline: Instant::now() + interval,
            fiber,
            periodic: Some(interval),
        });
        handle
    }

    /// Best-effort cancellation; the timer may already have fired.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.cancelled.insert(handle)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.deadline)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Pop every entry due by `now`. A periodic entry's next deadline is
    /// computed as `deadline += interval` from its own prior deadline
    /// before it's reported expired, so a late poll drifts the schedule
    /// forward instead of bursting missed ticks.
    pub fn drain_expired(&mut self, now: Instant) -> Vec<ExpiredTimer> {
        let mut expired = Vec::new();

        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let entry = self.heap.pop().unwrap();

            if self.cancelled.remove(&entry.handle) {
                continue;
            }

            let fiber = entry.fiber;
            let periodic_handle = entry.periodic.map(|interval| {
                let handle = entry.handle;
                self.heap.push(TimerEntry {
                    handle,
                    deadline: entry.deadline + interval,
                    fiber: entry.fiber,
                    periodic: Some(interval),
                });
                handle
            });

            expired.push(ExpiredTimer {
                fiber,
                periodic_handle,
            });
        }

        if self.heap.is_empty() {
            self.cancelled.clear();
        }

        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_deadline_order() {
        let mut q = TimerQueue::new();
        let now = Instant::now();
        q.schedule_at(FiberId::new(3), now + Duration::from_millis(30));
        q.schedule_at(FiberId::new(1), now + Duration::from_millis(10));
        q.schedule_at(FiberId::new(2), now + Duration::from_millis(20));

        let expired = q.drain_expired(now + Duration::from_millis(50));
        let fibers: Vec<u32> = expired.iter().map(|e| e.fiber.as_u32()).collect();
        assert_eq!(fibers, vec![1, 2, 3]);
    }

    #[test]
    fn cancelled_timer_does_not_fire() {
        let mut q = TimerQueue::new();
        let handle = q.schedule(FiberId::new(1), Duration::ZERO);
        assert!(q.cancel(handle));
        let expired = q.drain_expired(Instant::now() + Duration::from_millis(1));
        assert!(expired.is_empty());
    }

    #[test]
    fn periodic_timer_rearms_with_drift_forward() {
        let mut q = TimerQueue::new();
        let interval = Duration::from_millis(10);
        q.schedule_periodic(FiberId::new(1), interval);

        let first = q.drain_expired(Instant::now() + Duration::from_millis(15));
        assert_eq!(first.len(), 1);
        assert_eq!(q.len(), 1);

        let second = q.drain_expired(Instant::now() + Duration::from_millis(30));
        assert_eq!(second.len(), 1);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn next_deadline_reports_soonest() {
        let mut q = TimerQueue::new();
        assert!(q.next_deadline().is_none());
        let now = Instant::now();
        q.schedule_at(FiberId::new(1), now + Duration::from_millis(100));
        assert!(q.next_deadline().unwrap() > now);
    }
}
