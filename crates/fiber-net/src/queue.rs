//! Cross-worker work submission (component H).
//!
//! Each worker has two inboxes: a private `VecDeque` that only its own
//! thread ever touches, and a shared `ArrayQueue` that other workers push
//! onto. A submission originating on the owning worker goes straight to
//! the private queue; one originating elsewhere goes on the shared queue
//! and the worker's self-pipe is notified so its dispatcher wakes up to
//! drain it. Draining always happens on the owning thread, so applying a
//! work item (waking a fiber, spawning one) never crosses threads.

use crate::selfpipe::SelfPipe;
use crossbeam_queue::ArrayQueue;
use fiber_core::cancel::CancelState;
use fiber_core::id::FiberId;
use fiber_core::state::Priority;
use fiber_runtime::scheduler;
use std::collections::VecDeque;
use std::sync::Arc;

type SpawnFn = Box<dyn FnOnce(&CancelState) + Send + 'static>;
type RunFn = Box<dyn FnOnce() + Send + 'static>;

pub enum WorkItem {
    /// Wake a fiber already known to the target worker.
    WakeFiber(FiberId),
    /// Create and run a new fiber with `routine` as its entry point.
    Spawn(SpawnFn, Priority),
    /// Invoke `routine` inline on the boot fiber rather than spawning a
    /// new one — used for short callbacks such as handing an accepted
    /// connection's fd to its target worker, which then spawns its own
    /// reader fiber locally.
    Run(RunFn),
}

/// Worker-local endpoint: owns the private deque, drains both inboxes,
/// and applies work items against the calling thread's scheduler.
pub struct WorkQueue {
    private: VecDeque<WorkItem>,
    shared: Arc<ArrayQueue<WorkItem>>,
    pipe: Arc<SelfPipe>,
}

impl WorkQueue {
    pub fn new(shared_capacity: usize) -> Self {
        Self::with_shared(Arc::new(ArrayQueue::new(shared_capacity)))
    }

    fn with_shared(shared: Arc<ArrayQueue<WorkItem>>) -> Self {
        Self {
            private: VecDeque::new(),
            shared,
            pipe: Arc::new(SelfPipe::new().expect("failed to create worker self-pipe")),
        }
    }

    pub fn self_pipe(&self) -> &SelfPipe {
        &self.pipe
    }

    /// A cloneable, `Send` handle other workers use to submit into this
    /// queue and wake it up.
    pub fn handle(&self) -> WorkQueueHandle {
        WorkQueueHandle {
            shared: Arc::clone(&self.shared),
            pipe: Arc::clone(&self.pipe),
        }
    }

    /// Submit from code already running on this worker's own thread.
    pub fn submit_local(&mut self, item: WorkItem) {
        self.private.push_back(item);
    }

    /// Drain both inboxes and apply every pending item against the
    /// calling thread's active scheduler. Must run on the owning worker.
    pub fn drain(&mut self) {
        self.pipe.drain();

        while let Some(item) = self.private.pop_front() {
            apply(item);
        }
        while let Some(item) = self.shared.pop() {
            apply(item);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.private.is_empty() && self.shared.is_empty()
    }
}

fn apply(item: WorkItem) {
    match item {
        WorkItem::WakeFiber(id) => scheduler::wake(id),
        WorkItem::Spawn(f, priority) => {
            let _ = scheduler::spawn(move |cancel: &CancelState| f(cancel), priority);
        }
        WorkItem::Run(f) => f(),
    }
}

/// Handle another thread uses to hand work to a worker it does not own.
#[derive(Clone)]
pub struct WorkQueueHandle {
    shared: Arc<ArrayQueue<WorkItem>>,
    pipe: Arc<SelfPipe>,
}

impl WorkQueueHandle {
    /// Enqueue and wake the target worker. Drops the item and returns
    /// `false` if the shared queue is full; callers treat this the same
    /// as backpressure anywhere else in the system.
    pub fn submit(&self, item: WorkItem) -> bool {
        match self.shared.push(item) {
            Ok(()) => {
                self.pipe.notify();
                true
            }
            Err(_) => false,
        }
    }

    pub fn wake_fiber(&self, id: FiberId) -> bool {
        self.submit(WorkItem::WakeFiber(id))
    }

    pub fn run(&self, f: impl FnOnce() + Send + 'static) -> bool {
        self.submit(WorkItem::Run(Box::new(f)))
    }

    /// Spawn a new fiber on the target worker, running at `priority`.
    pub fn spawn(&self, f: impl FnOnce(&CancelState) + Send + 'static, priority: Priority) -> bool {
        self.submit(WorkItem::Spawn(Box::new(f), priority))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn local_submissions_queue_fifo() {
        let mut q = WorkQueue::new(16);
        assert!(q.is_empty());
        q.submit_local(WorkItem::WakeFiber(FiberId::new(1)));
        q.submit_local(WorkItem::WakeFiber(FiberId::new(2)));
        assert!(!q.is_empty());
        // draining outside a worker thread is safe: wake() on a null
        // scheduler pointer is a documented no-op.
        q.drain();
        assert!(q.is_empty());
    }

    #[test]
    fn remote_handle_notifies_pipe() {
        static SEEN: AtomicUsize = AtomicUsize::new(0);
        let mut q = WorkQueue::new(4);
        let handle = q.handle();
        assert!(handle.wake_fiber(FiberId::new(7)));
        q.drain();
        SEEN.fetch_add(1, Ordering::Relaxed);
        assert_eq!(SEEN.load(Ordering::Relaxed), 1);
    }
}
