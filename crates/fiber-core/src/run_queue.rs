//! Priority run queue (component C).
//!
//! A fixed array of FIFO lists, one per [`Priority`] level, plus a summary
//! bitmap so the highest-priority non-empty list is found in O(1) via
//! `trailing_zeros` instead of a linear scan. The queue is owned exclusively
//! by a single worker — no locking, no atomics, matching the scheduler's
//! single-threaded-per-worker model.

use crate::id::FiberId;
use crate::state::Priority;
use std::collections::VecDeque;

/// `put`/`get` priority-ordered FIFO queue, local to one worker.
pub struct RunQueue {
    lists: [VecDeque<FiberId>; Priority::COUNT],
    /// Bit `i` set iff `lists[i]` is non-empty.
    summary: u8,
}

impl RunQueue {
    pub fn new() -> Self {
        Self {
            lists: Default::default(),
            summary: 0,
        }
    }

    /// Append to the tail of `priority`'s list.
    pub fn put(&mut self, id: FiberId, priority: Priority) {
        let idx = priority.as_index();
        self.lists[idx].push_back(id);
        self.summary |= 1 << idx;
    }

    /// Remove the head of the lowest-indexed (highest priority) non-empty list.
    pub fn get(&mut self) -> Option<(FiberId, Priority)> {
        if self.summary == 0 {
            return None;
        }
        let idx = self.summary.trailing_zeros() as usize;
        let list = &mut self.lists[idx];
        let id = list.pop_front().expect("summary bit set implies non-empty list");
        if list.is_empty() {
            self.summary &= !(1 << idx);
        }
        Some((id, Priority::from_index(idx).expect("idx < COUNT")))
    }

    pub fn is_empty(&self) -> bool {
        self.summary == 0
    }

    pub fn len(&self) -> usize {
        self.lists.iter().map(VecDeque::len).sum()
    }
}

impl Default for RunQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_order() {
        let mut q = RunQueue::new();
        q.put(FiberId::new(1), Priority::LOW);
        q.put(FiberId::new(2), Priority::HIGHEST);
        q.put(FiberId::new(3), Priority::NORMAL);

        assert_eq!(q.get().unwrap().0, FiberId::new(2));
        assert_eq!(q.get().unwrap().0, FiberId::new(3));
        assert_eq!(q.get().unwrap().0, FiberId::new(1));
        assert!(q.get().is_none());
    }

    #[test]
    fn fifo_within_priority() {
        let mut q = RunQueue::new();
        for i in 0..5u32 {
            q.put(FiberId::new(i), Priority::NORMAL);
        }
        for i in 0..5u32 {
            assert_eq!(q.get().unwrap().0, FiberId::new(i));
        }
    }

    #[test]
    fn fairness_one_round_visits_each_once() {
        let mut q = RunQueue::new();
        let ids: Vec<_> = (0..16u32).map(FiberId::new).collect();
        for &id in &ids {
            q.put(id, Priority::NORMAL);
        }
        let mut visited = Vec::new();
        for _ in 0..ids.len() {
            let (id, _) = q.get().unwrap();
            visited.push(id);
            q.put(id, Priority::NORMAL); // simulate re-enqueue on yield
        }
        assert_eq!(visited, ids);
    }

    #[test]
    fn empty_queue() {
        let mut q = RunQueue::new();
        assert!(q.is_empty());
        assert_eq!(q.len(), 0);
        assert!(q.get().is_none());
    }
}
