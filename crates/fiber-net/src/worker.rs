//! Per-worker bundle tying the fiber scheduler to the event dispatcher
//! (component K).
//!
//! One `NetWorker` per OS thread, same exclusive-ownership discipline as
//! `fiber_runtime::Scheduler`: reached through a thread-local raw pointer
//! rather than passed explicitly through every call, so `Listener`/
//! `Stream` methods can register/park without threading a context
//! argument through the whole public API.

use crate::dispatcher::{DispatchEvent, Dispatcher};
use crate::queue::{WorkItem, WorkQueue, WorkQueueHandle};
use crate::sink::Sink;
use fiber_core::error::SchedResult;
use fiber_error::metrics::ConnectionMetrics;
use fiber_runtime::{RuntimeConfig, Scheduler};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::os::fd::{AsFd, RawFd};
use std::rc::Rc;
use std::time::{Duration, Instant};

thread_local! {
    static CURRENT: Cell<*mut NetWorker> = Cell::new(std::ptr::null_mut());
}

pub struct NetWorker {
    pub scheduler: Scheduler,
    dispatcher: Dispatcher,
    queue: WorkQueue,
    sinks: HashMap<RawFd, Rc<RefCell<Sink>>>,
    self_pipe_fd: RawFd,
    pub metrics: ConnectionMetrics,
}

impl NetWorker {
    pub fn new(config: &RuntimeConfig, max_events: usize, queue_capacity: usize) -> SchedResult<Self> {
        Self::with_queue(config, max_events, WorkQueue::new(queue_capacity))
    }

    /// Build from a [`WorkQueue`] created ahead of time, so a pool can
    /// hand out [`WorkQueueHandle`]s to every worker before any of
    /// their threads start running (see `pool::NetWorkerPool`).
    pub fn with_queue(config: &RuntimeConfig, max_events: usize, queue: WorkQueue) -> SchedResult<Self> {
        let scheduler = Scheduler::new(config)?;
        let mut dispatcher = Dispatcher::new(max_events)
            .expect("failed to create worker epoll instance");
        let self_pipe_fd = queue.self_pipe().raw_fd();
        dispatcher
            .register(queue.self_pipe().as_fd(), true, false)
            .expect("failed to register worker self-pipe");

        Ok(Self {
            scheduler,
            dispatcher,
            queue,
            sinks: HashMap::new(),
            self_pipe_fd,
            metrics: ConnectionMetrics::new(),
        })
    }

    /// Make this worker's scheduler and dispatcher reachable from the
    /// free functions in this module. Must run once on the owning
    /// thread before any fiber on it touches networking.
    pub fn activate(&mut self) {
        self.scheduler.activate();
        let ptr = self as *mut NetWorker;
        CURRENT.with(|cell| cell.set(ptr));
    }

    pub fn work_handle(&self) -> WorkQueueHandle {
        self.queue.handle()
    }

    pub fn register_fd<F: AsFd>(&mut self, fd_raw: RawFd, fd: &F) -> Rc<RefCell<Sink>> {
        let _ = self.dispatcher.register(fd.as_fd(), true, true);
        let sink = Rc::new(RefCell::new(Sink::new()));
        self.sinks.insert(fd_raw, Rc::clone(&sink));
        sink
    }

    pub fn deregister_fd<F: AsFd>(&mut self, fd_raw: RawFd, fd: &F) {
        let _ = self.dispatcher.deregister(fd.as_fd());
        self.sinks.remove(&fd_raw);
    }

    /// Run one step: drain cross-worker work, advance timers, run a
    /// ready fiber if any, otherwise block in the dispatcher until an
    /// fd becomes ready, the self-pipe fires, or the next timer is due.
    pub fn tick(&mut self) {
        self.queue.drain();
        self.scheduler.poll_timers();

        if !self.scheduler.is_idle() {
            self.scheduler.run_ready_one();
            return;
        }

        let timeout = self.park_timeout();
        if let Ok(events) = self.dispatcher.poll(Some(timeout)) {
            self.apply_events(events);
        }
    }

    fn park_timeout(&self) -> Duration {
        match self.scheduler.next_timer_deadline() {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => Duration::from_millis(250),
        }
    }

    fn apply_events(&mut self, events: Vec<DispatchEvent>) {
        for ev in events {
            if ev.fd == self.self_pipe_fd {
                continue;
            }
            if let Some(sink) = self.sinks.get(&ev.fd) {
                sink.borrow_mut()
                    .on_event(ev.readiness.readable, ev.readiness.writable, ev.readiness.error);
            }
        }
    }
}

/// The calling thread's active `NetWorker`, or null if none is active.
/// Mirrors `fiber_runtime::scheduler::current_scheduler`'s raw-pointer
/// thread-local pattern.
pub fn current() -> *mut NetWorker {
    CURRENT.with(|cell| cell.get())
}

pub fn wake_fiber_remote(id: fiber_core::id::FiberId, handle: &WorkQueueHandle) -> bool {
    handle.submit(WorkItem::WakeFiber(id))
}
