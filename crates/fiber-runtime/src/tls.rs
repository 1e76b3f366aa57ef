//! Thread-local worker/fiber context.
//!
//! The caller must re-read the current fiber pointer after every context
//! switch rather than caching it across a `yield`/block point — switching
//! stacks changes what these cells report.

use fiber_core::constants::FIBER_NONE;
use fiber_core::id::FiberId;
use std::cell::Cell;

thread_local! {
    static WORKER_ID: Cell<usize> = const { Cell::new(usize::MAX) };
    static CURRENT_FIBER: Cell<u32> = const { Cell::new(FIBER_NONE) };
    static FIBER_BASE: Cell<*mut u8> = const { Cell::new(std::ptr::null_mut()) };
}

#[inline]
pub fn set_worker_id(id: usize) {
    WORKER_ID.with(|cell| cell.set(id));
}

#[inline]
pub fn worker_id() -> usize {
    WORKER_ID.with(|cell| cell.get())
}

#[inline]
pub fn set_current_fiber(id: FiberId, base: *mut u8) {
    CURRENT_FIBER.with(|cell| cell.set(id.as_u32()));
    FIBER_BASE.with(|cell| cell.set(base));
}

/// Called when a worker finishes running a fiber and returns to its
/// scheduling loop.
#[inline]
pub fn clear_current_fiber() {
    CURRENT_FIBER.with(|cell| cell.set(FIBER_NONE));
    FIBER_BASE.with(|cell| cell.set(std::ptr::null_mut()));
}

#[inline]
pub fn current_fiber_id() -> FiberId {
    FiberId::new(CURRENT_FIBER.with(|cell| cell.get()))
}

#[inline]
pub fn current_fiber_base() -> *mut u8 {
    FIBER_BASE.with(|cell| cell.get())
}

#[inline]
pub fn is_in_fiber() -> bool {
    CURRENT_FIBER.with(|cell| cell.get() != FIBER_NONE)
}

#[inline]
pub fn try_current_worker_id() -> Option<usize> {
    let id = WORKER_ID.with(|cell| cell.get());
    if id == usize::MAX {
        None
    } else {
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_id_roundtrip() {
        assert_eq!(try_current_worker_id(), None);
        set_worker_id(3);
        assert_eq!(worker_id(), 3);
        assert_eq!(try_current_worker_id(), Some(3));
    }

    #[test]
    fn fiber_context_roundtrip() {
        assert!(!is_in_fiber());
        set_current_fiber(FiberId::new(7), std::ptr::null_mut());
        assert!(is_in_fiber());
        assert_eq!(current_fiber_id(), FiberId::new(7));
        clear_current_fiber();
        assert!(!is_in_fiber());
    }
}
