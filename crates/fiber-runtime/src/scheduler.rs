//! Per-worker fiber scheduler.
//!
//! Exactly one `Scheduler` lives per worker OS thread and every field on
//! it — run queue, stack region, timer queue, free-slot list — is
//! touched only by that thread. There is no global scheduler instance
//! and no lock or atomic on any of these structures; cross-worker fiber
//! delivery is the job of the work queue one layer up, which only ever
//! calls into a `Scheduler` from the thread that owns it.

use crate::config::RuntimeConfig;
use crate::control::{FiberContext, FiberControlBlock};
use crate::current_arch;
use crate::memory::StackRegion;
use crate::tls;
use crate::timer::TimerQueue;

use fiber_core::cancel::{CancelState, CancelType};
use fiber_core::error::{SchedError, SchedResult};
use fiber_core::id::FiberId;
use fiber_core::run_queue::RunQueue;
use fiber_core::state::{FiberState, Priority};

use std::cell::Cell;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A fiber's entry closure. Receives its own cancel state so it can
/// check for a pending cancellation at a safepoint of its choosing.
type Entry = Box<dyn FnOnce(&CancelState) + Send>;

thread_local! {
    static CURRENT_SCHEDULER: Cell<*mut Scheduler> = const { Cell::new(std::ptr::null_mut()) };
}

fn current_scheduler() -> *mut Scheduler {
    CURRENT_SCHEDULER.with(|cell| cell.get())
}

pub struct Scheduler {
    run_queue: RunQueue,
    stacks: StackRegion,
    timers: TimerQueue,
    free_slots: VecDeque<u32>,
    /// Register state the scheduler loop resumes into whenever a fiber
    /// yields, blocks, or finishes.
    return_ctx: FiberContext,
    current: Cell<FiberId>,
}

impl Scheduler {
    pub fn new(config: &RuntimeConfig) -> SchedResult<Self> {
        let mut stacks = StackRegion::uninit();
        stacks.init(config.max_fibers_per_worker, config.stack_slot_size)?;

        let free_slots = (0..config.max_fibers_per_worker as u32).collect();

        Ok(Self {
            run_queue: RunQueue::new(),
            stacks,
            timers: TimerQueue::new(),
            free_slots,
            return_ctx: FiberContext::default(),
            current: Cell::new(FiberId::NONE),
        })
    }

    /// Register this scheduler as the one reachable from free functions
    /// (`spawn`, `yield_now`, `sleep`, ...) on the calling OS thread.
    /// Must be called once, from the worker thread that owns `self`,
    /// before running any fiber.
    pub fn activate(&mut self) {
        CURRENT_SCHEDULER.with(|cell| cell.set(self as *mut Scheduler));
    }

    pub fn current_fiber(&self) -> FiberId {
        self.current.get()
    }

    pub fn is_idle(&self) -> bool {
        self.run_queue.is_empty()
    }

    pub fn ready_len(&self) -> usize {
        self.run_queue.len()
    }

    pub fn next_timer_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Allocate a stack slot, set up its initial register context, and
    /// enqueue it on this worker's run queue.
    pub fn fiber_create<F>(&mut self, f: F, priority: Priority) -> SchedResult<FiberId>
    where
        F: FnOnce(&CancelState) + Send + 'static,
    {
        let slot = self.free_slots.pop_front().ok_or(SchedError::NoStackSlots)?;
        if let Err(e) = self.stacks.activate_slot(slot) {
            self.free_slots.push_back(slot);
            return Err(e);
        }

        let id = FiberId::new(slot);
        let parent = if tls::is_in_fiber() {
            tls::current_fiber_id()
        } else {
            FiberId::NONE
        };

        let meta_addr = self.stacks.metadata_addr(slot);
        let mut block = FiberControlBlock::new(id, priority);
        block.parent = parent;
        let block_ptr = unsafe { FiberControlBlock::write_at(meta_addr, block) };

        let boxed: Entry = Box::new(f);
        let closure_ptr = Box::into_raw(Box::new(boxed)) as usize;

        let stack_top = self.stacks.stack_top(slot);
        let ctx_ptr = unsafe { &mut (*block_ptr).context as *mut FiberContext };

        unsafe {
            current_arch::init_context(
                ctx_ptr,
                stack_top,
                fiber_trampoline_entry as usize,
                closure_ptr,
            );
        }

        unsafe {
            (*block_ptr).state = FiberState::Pending;
        }
        self.run_queue.put(id, priority);

        Ok(id)
    }

    /// Pop the highest-priority ready fiber and run it until it yields,
    /// blocks, or finishes. Returns `false` if nothing was ready.
    pub fn run_ready_one(&mut self) -> bool {
        let Some((id, _priority)) = self.run_queue.get() else {
            return false;
        };
        self.run_one(id);
        true
    }

    fn control_block(&self, id: FiberId) -> *mut FiberControlBlock {
        self.stacks.metadata_addr(id.as_u32()) as *mut FiberControlBlock
    }

    fn run_one(&mut self, id: FiberId) {
        let meta_base = self.stacks.metadata_addr(id.as_u32());
        let block = unsafe { &mut *(meta_base as *mut FiberControlBlock) };
        block.state = FiberState::Running;

        self.current.set(id);
        tls::set_current_fiber(id, meta_base);

        let fiber_ctx = &mut block.context as *mut FiberContext;
        let sched_ctx = &mut self.return_ctx as *mut FiberContext;

        unsafe {
            current_arch::switch_context(sched_ctx, fiber_ctx);
        }

        // Resumed here once the fiber yields, blocks, or finishes.
        let state = block.state;
        tls::clear_current_fiber();
        self.current.set(FiberId::NONE);

        if matches!(state, FiberState::Finished | FiberState::Cancelled) {
            self.reclaim(id);
        }
        // Pending: the fiber already re-enqueued itself in yield_current.
        // Blocked: a wait queue / timer / sink now owns waking it.
        // The scheduler itself is regaining control here, not a fiber, so
        // there is no async-cancellation checkpoint to run on this side of
        // the switch — that only matters to the fiber being resumed.
    }

    /// Mark a fiber ready and put it back on the run queue. Used by
    /// timers, wait queues, and sinks waking a blocked fiber.
    pub fn mark_ready(&mut self, id: FiberId) {
        let block = unsafe { &mut *self.control_block(id) };
        block.state = FiberState::Pending;
        self.run_queue.put(id, block.priority);
    }

    /// Mark a fiber blocked, removing it from scheduling until a later
    /// `mark_ready` call. Does not itself cause a context switch.
    pub fn mark_blocked(&mut self, id: FiberId) {
        let block = unsafe { &mut *self.control_block(id) };
        block.state = FiberState::Blocked;
    }

    /// Request cancellation. Only the worker that owns `id` may call
    /// this. A blocked fiber is woken so it observes the request at its
    /// next `CancelState::check()`.
    pub fn cancel(&mut self, id: FiberId) -> SchedResult<()> {
        let block = unsafe { &mut *self.control_block(id) };
        block.cancel.request();
        if block.state == FiberState::Blocked {
            self.mark_ready(id);
        }
        Ok(())
    }

    fn reclaim(&mut self, id: FiberId) {
        let slot = id.as_u32();
        let _ = self.stacks.deactivate_slot(slot);
        self.free_slots.push_back(slot);
    }

    /// Drain expired timers, moving their fibers back onto the run
    /// queue. Called once per scheduling-loop iteration.
    pub fn poll_timers(&mut self) {
        let now = Instant::now();
        let expired = self.timers.drain_expired(now);
        for timer in expired {
            self.mark_ready(timer.fiber);
        }
    }

    fn yield_current(&mut self) {
        let id = self.current.get();
        let meta_base = tls::current_fiber_base();
        let block = unsafe { &mut *(meta_base as *mut FiberControlBlock) };

        block.state = FiberState::Pending;
        self.run_queue.put(id, block.priority);

        let fiber_ctx = &mut block.context as *mut FiberContext;
        let sched_ctx = &mut self.return_ctx as *mut FiberContext;

        unsafe {
            current_arch::switch_context(fiber_ctx, sched_ctx);
        }
        // Resumed here once this fiber is picked again by run_one.
        check_async_cancel_on_resume();
    }

    fn sleep_current(&mut self, duration: Duration) {
        let id = self.current.get();
        self.timers.schedule(id, duration);
        self.mark_blocked(id);
        self.yield_current();
    }

    fn park_current(&mut self) {
        let id = self.current.get();
        self.mark_blocked(id);
        self.yield_current();
    }

    /// Arm a one-shot wake for `id` without changing its run state. Used
    /// to race a parked wait against a deadline: the caller parks the
    /// fiber itself (e.g. via a sink) and separately arms this timer, so
    /// either the readiness event or the timer can be the one that calls
    /// `mark_ready`.
    pub fn schedule_wake(&mut self, id: FiberId, delay: Duration) -> crate::timer::TimerHandle {
        self.timers.schedule(id, delay)
    }

    /// Best-effort cancellation of a timer armed via `schedule_wake`.
    pub fn cancel_timer(&mut self, handle: crate::timer::TimerHandle) -> bool {
        self.timers.cancel(handle)
    }
}

/// Returns the register block the scheduling loop switches back into
/// when the currently running fiber finishes. Called only from
/// `arch::x86_64::fiber_finished`, on the worker thread that owns the
/// active `Scheduler`.
pub(crate) fn current_return_context() -> *const FiberContext {
    let sched = current_scheduler();
    debug_assert!(!sched.is_null(), "fiber running without an active scheduler");
    unsafe { &(*sched).return_ctx as *const FiberContext }
}

extern "C" fn fiber_trampoline_entry(closure_ptr: usize) {
    // First switch into this stack is itself a stack switch, so an
    // asynchronous-cancel fiber that got cancelled between creation and
    // its first run must observe it here too.
    check_async_cancel_on_resume();
    let boxed: Box<Entry> = unsafe { Box::from_raw(closure_ptr as *mut Entry) };
    let meta_base = tls::current_fiber_base();
    let block = unsafe { &*(meta_base as *const FiberControlBlock) };
    (*boxed)(&block.cancel);
}

/// Unwind the current fiber's cleanup stack, mark it terminated, and
/// switch back into the owning worker's scheduling loop. Shared by the
/// normal fall-off-the-end path (`arch::fiber_finished`) and every
/// explicit/cancellation exit, so cleanup records run exactly once no
/// matter which door a fiber leaves through.
pub(crate) fn terminate_current(state: FiberState) -> ! {
    let meta_base = tls::current_fiber_base();
    debug_assert!(!meta_base.is_null(), "terminate_current outside a fiber");
    let block = unsafe { &mut *(meta_base as *mut FiberControlBlock) };
    block.cleanup.unwind();
    block.state = state;

    let fiber_ctx = &mut block.context as *mut FiberContext;
    let sched_ctx = current_return_context();

    unsafe {
        current_arch::switch_context(fiber_ctx, sched_ctx);
    }
    unreachable!("terminate_current resumed after switching back to its worker")
}

/// Run on every resumption of a fiber after a stack switch (first entry
/// and every return from `yield_current`). With deferred cancellation
/// this is a no-op: that mode only fires at an explicit `testcancel`.
fn check_async_cancel_on_resume() {
    let meta_base = tls::current_fiber_base();
    if meta_base.is_null() {
        return;
    }
    let block = unsafe { &*(meta_base as *const FiberControlBlock) };
    if block.cancel.cancel_type() != CancelType::Asynchronous {
        return;
    }
    if block.cancel.check().is_err() {
        terminate_current(FiberState::Cancelled);
    }
}

/// Explicit cancellation checkpoint: if cancellation is requested and
/// enabled on the calling fiber, unwinds its cleanup stack and
/// terminates it as cancelled. Never returns in that case; otherwise a
/// no-op, including outside a fiber.
pub fn testcancel() {
    if !tls::is_in_fiber() {
        return;
    }
    let meta_base = tls::current_fiber_base();
    let block = unsafe { &*(meta_base as *const FiberControlBlock) };
    if block.cancel.check().is_err() {
        terminate_current(FiberState::Cancelled);
    }
}

/// Terminate the calling fiber normally, running its cleanup stack in
/// LIFO order first. Must be called from within a running fiber.
pub fn exit() -> ! {
    if !tls::is_in_fiber() {
        panic!("fiber::exit() called outside a running fiber");
    }
    terminate_current(FiberState::Finished)
}

/// Push a cleanup record onto the calling fiber's cleanup stack. A
/// no-op outside a fiber.
pub fn cleanup_push(routine: unsafe fn(*mut u8), arg: *mut u8) {
    if !tls::is_in_fiber() {
        return;
    }
    let meta_base = tls::current_fiber_base();
    let block = unsafe { &mut *(meta_base as *mut FiberControlBlock) };
    block.cleanup.push(routine, arg);
}

/// Pop the calling fiber's most recently pushed cleanup record, running
/// it immediately if `execute`. A no-op outside a fiber.
pub fn cleanup_pop(execute: bool) {
    if !tls::is_in_fiber() {
        return;
    }
    let meta_base = tls::current_fiber_base();
    let block = unsafe { &mut *(meta_base as *mut FiberControlBlock) };
    block.cleanup.pop(execute);
}

/// Spawn a fiber onto the calling worker's scheduler.
///
/// Must be called from within a running fiber, or from the worker's own
/// setup code after `Scheduler::activate()`. There is no cross-worker
/// variant here: routing a fiber to a different worker is the work
/// queue's job.
pub fn spawn<F>(f: F, priority: Priority) -> SchedResult<FiberId>
where
    F: FnOnce(&CancelState) + Send + 'static,
{
    let sched = current_scheduler();
    if sched.is_null() {
        return Err(SchedError::NotInitialized);
    }
    unsafe { (*sched).fiber_create(f, priority) }
}

pub fn yield_now() {
    if !tls::is_in_fiber() {
        std::thread::yield_now();
        return;
    }
    let sched = current_scheduler();
    unsafe { (*sched).yield_current() }
}

pub fn sleep(duration: Duration) {
    if !tls::is_in_fiber() {
        std::thread::sleep(duration);
        return;
    }
    let sched = current_scheduler();
    unsafe { (*sched).sleep_current(duration) }
}

#[inline]
pub fn sleep_ms(ms: u64) {
    sleep(Duration::from_millis(ms))
}

#[inline]
pub fn sleep_us(us: u64) {
    sleep(Duration::from_micros(us))
}

#[inline]
pub fn sleep_ns(ns: u64) {
    sleep(Duration::from_nanos(ns))
}

/// Block the calling fiber until some other code on this worker calls
/// `wake(id)`. Used by wait queues and sink readiness waits; the caller
/// is responsible for recording `id` somewhere it will be woken from.
pub fn park_current() {
    if !tls::is_in_fiber() {
        return;
    }
    let sched = current_scheduler();
    unsafe { (*sched).park_current() }
}

/// Wake a fiber blocked via `park_current`. Must be called from the
/// fiber's owning worker.
pub fn wake(id: FiberId) {
    let sched = current_scheduler();
    if sched.is_null() {
        return;
    }
    unsafe { (*sched).mark_ready(id) }
}

/// Arm a one-shot wake for the calling fiber, delivered alongside
/// whatever else might wake it first. Returns `None` outside a fiber.
pub fn schedule_wake(delay: Duration) -> Option<crate::timer::TimerHandle> {
    if !tls::is_in_fiber() {
        return None;
    }
    let sched = current_scheduler();
    let id = tls::current_fiber_id();
    Some(unsafe { (*sched).schedule_wake(id, delay) })
}

pub fn cancel_timer(handle: crate::timer::TimerHandle) -> bool {
    let sched = current_scheduler();
    if sched.is_null() {
        return false;
    }
    unsafe { (*sched).cancel_timer(handle) }
}

/// Id of the fiber currently running on this worker, or `FiberId::NONE`
/// outside a fiber.
pub fn current_fiber() -> FiberId {
    tls::current_fiber_id()
}

/// Request cancellation of `id`, which must belong to the calling
/// worker. The target observes it at its next `CancelState::check()`;
/// nothing here unwinds or interrupts it directly.
pub fn cancel(id: FiberId) -> SchedResult<()> {
    let sched = current_scheduler();
    if sched.is_null() {
        return Err(SchedError::NotInitialized);
    }
    unsafe { (*sched).cancel(id) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn test_config() -> RuntimeConfig {
        RuntimeConfig::new()
            .max_fibers_per_worker(8)
            .stack_slot_size(64 * 1024)
    }

    #[test]
    fn spawn_and_run_to_completion() {
        let mut sched = Scheduler::new(&test_config()).unwrap();
        sched.activate();

        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);
        sched
            .fiber_create(
                move |_cancel| {
                    ran2.fetch_add(1, Ordering::SeqCst);
                },
                Priority::default(),
            )
            .unwrap();

        assert_eq!(sched.ready_len(), 1);
        assert!(sched.run_ready_one());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(sched.is_idle());
    }

    #[test]
    fn yielding_fiber_is_resumed_next_turn() {
        let mut sched = Scheduler::new(&test_config()).unwrap();
        sched.activate();

        let steps = Arc::new(AtomicUsize::new(0));
        let steps2 = Arc::clone(&steps);
        sched
            .fiber_create(
                move |_cancel| {
                    steps2.fetch_add(1, Ordering::SeqCst);
                    crate::scheduler::yield_now();
                    steps2.fetch_add(1, Ordering::SeqCst);
                },
                Priority::default(),
            )
            .unwrap();

        assert!(sched.run_ready_one());
        assert_eq!(steps.load(Ordering::SeqCst), 1);
        assert!(!sched.is_idle());

        assert!(sched.run_ready_one());
        assert_eq!(steps.load(Ordering::SeqCst), 2);
        assert!(sched.is_idle());
    }

    #[test]
    fn nested_spawn_from_running_fiber() {
        let mut sched = Scheduler::new(&test_config()).unwrap();
        sched.activate();

        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        sched
            .fiber_create(
                move |_cancel| {
                    crate::scheduler::spawn(
                        {
                            let count3 = Arc::clone(&count2);
                            move |_cancel| {
                                count3.fetch_add(1, Ordering::SeqCst);
                            }
                        },
                        Priority::default(),
                    )
                    .unwrap();
                },
                Priority::default(),
            )
            .unwrap();

        assert!(sched.run_ready_one()); // runs parent, which spawns child
        assert_eq!(sched.ready_len(), 1);
        assert!(sched.run_ready_one()); // runs child
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_wakes_blocked_fiber() {
        let mut sched = Scheduler::new(&test_config()).unwrap();
        sched.activate();

        let observed = Arc::new(AtomicUsize::new(0));
        let observed2 = Arc::clone(&observed);
        let id = sched
            .fiber_create(
                move |cancel| {
                    crate::scheduler::park_current();
                    if cancel.is_requested() {
                        observed2.fetch_add(1, Ordering::SeqCst);
                    }
                },
                Priority::default(),
            )
            .unwrap();

        assert!(sched.run_ready_one()); // fiber parks itself, goes Blocked
        assert!(sched.is_idle());

        sched.cancel(id).unwrap(); // request + wake, since it's Blocked
        assert!(!sched.is_idle());
        assert!(sched.run_ready_one());
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    thread_local! {
        static CLEANUP_LOG: std::cell::RefCell<Vec<u32>> = std::cell::RefCell::new(Vec::new());
    }

    unsafe fn log_cleanup(arg: *mut u8) {
        let val = arg as usize as u32;
        CLEANUP_LOG.with(|l| l.borrow_mut().push(val));
    }

    #[test]
    fn exit_unwinds_cleanup_stack_in_lifo_order() {
        CLEANUP_LOG.with(|l| l.borrow_mut().clear());
        let mut sched = Scheduler::new(&test_config()).unwrap();
        sched.activate();

        sched
            .fiber_create(
                move |_cancel| {
                    crate::scheduler::cleanup_push(log_cleanup, 1usize as *mut u8);
                    crate::scheduler::cleanup_push(log_cleanup, 2usize as *mut u8);
                    crate::scheduler::cleanup_push(log_cleanup, 3usize as *mut u8);
                    crate::scheduler::exit();
                },
                Priority::default(),
            )
            .unwrap();

        assert!(sched.run_ready_one());
        CLEANUP_LOG.with(|l| assert_eq!(*l.borrow(), vec![3, 2, 1]));
    }

    #[test]
    fn cancelled_fiber_unwinds_cleanup_stack_via_testcancel() {
        CLEANUP_LOG.with(|l| l.borrow_mut().clear());
        let mut sched = Scheduler::new(&test_config()).unwrap();
        sched.activate();

        let id = sched
            .fiber_create(
                move |_cancel| loop {
                    crate::scheduler::cleanup_push(log_cleanup, 9usize as *mut u8);
                    crate::scheduler::park_current();
                    crate::scheduler::testcancel();
                    crate::scheduler::cleanup_pop(false);
                },
                Priority::default(),
            )
            .unwrap();

        assert!(sched.run_ready_one()); // parks after pushing its cleanup record
        sched.cancel(id).unwrap();
        assert!(sched.run_ready_one()); // wakes, testcancel() terminates it
        CLEANUP_LOG.with(|l| assert_eq!(*l.borrow(), vec![9]));
    }

    #[test]
    fn asynchronous_cancellation_is_observed_at_next_yield_not_only_testcancel() {
        let mut sched = Scheduler::new(&test_config()).unwrap();
        sched.activate();

        let reached_second_half = Arc::new(AtomicUsize::new(0));
        let reached2 = Arc::clone(&reached_second_half);
        let id = sched
            .fiber_create(
                move |cancel| {
                    cancel.set_type(CancelType::Asynchronous);
                    crate::scheduler::yield_now();
                    // A fiber cancelled asynchronously while blocked on this
                    // yield must never resume here.
                    reached2.fetch_add(1, Ordering::SeqCst);
                },
                Priority::default(),
            )
            .unwrap();

        assert!(sched.run_ready_one()); // runs until its own yield_now
        sched.cancel(id).unwrap(); // request only; fiber is Pending, not Blocked
        assert!(sched.run_ready_one()); // resumes, observes async cancel, terminates
        assert_eq!(reached_second_half.load(Ordering::SeqCst), 0);
        assert!(sched.is_idle());
    }
}
