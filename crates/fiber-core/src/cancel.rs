//! Cooperative cancellation state for a single fiber.
//!
//! `fiber_cancel` is only ever invoked by the worker that owns the target
//! fiber — a request originating elsewhere travels through the work-item
//! queue and is applied by that worker, not written cross-thread. So unlike
//! a shared cancellation token, this state needs no atomics or `Arc`: it is
//! plain fields read and written on one thread.
//!
//! Fields are `Cell`-wrapped rather than requiring `&mut self`: a running
//! fiber's entry closure only ever holds a shared `&CancelState` (the
//! scheduler keeps its own mutable path into the same control block for
//! `request`), so every fiber-facing operation — including `check` at a
//! self-chosen checkpoint — has to work through a shared reference.

use crate::error::{SchedError, SchedResult};
use std::cell::Cell;

/// Whether a pending cancellation takes effect only at explicit checkpoints
/// or at the next checkpoint encountered, including ones inside blocking calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelType {
    Deferred,
    Asynchronous,
}

impl Default for CancelType {
    fn default() -> Self {
        CancelType::Deferred
    }
}

/// Per-fiber cancellation bookkeeping.
#[derive(Debug)]
pub struct CancelState {
    enabled: Cell<bool>,
    cancel_type: Cell<CancelType>,
    requested: Cell<bool>,
    occurred: Cell<bool>,
}

impl CancelState {
    pub fn new() -> Self {
        Self {
            enabled: Cell::new(true),
            cancel_type: Cell::new(CancelType::Deferred),
            requested: Cell::new(false),
            occurred: Cell::new(false),
        }
    }

    /// Disable/enable cancellation checks (a fiber may mask a critical section).
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    pub fn set_type(&self, cancel_type: CancelType) {
        self.cancel_type.set(cancel_type);
    }

    pub fn cancel_type(&self) -> CancelType {
        self.cancel_type.get()
    }

    /// Mark cancellation as requested. Idempotent.
    pub fn request(&self) {
        self.requested.set(true);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.get()
    }

    pub fn has_occurred(&self) -> bool {
        self.occurred.get()
    }

    /// Evaluate a cancellation checkpoint. Returns `Err(Cancelled)` exactly
    /// once cancellation has been requested and is not masked; the caller
    /// is then expected to unwind its cleanup stack and exit.
    #[inline]
    pub fn check(&self) -> SchedResult<()> {
        if self.requested.get() && self.enabled.get() {
            self.occurred.set(true);
            Err(SchedError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Reset for slot reuse after the fiber struct is recycled.
    pub fn reset(&self) {
        self.enabled.set(true);
        self.cancel_type.set(CancelType::Deferred);
        self.requested.set(false);
        self.occurred.set(false);
    }
}

impl Default for CancelState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_then_check() {
        let s = CancelState::new();
        assert!(s.check().is_ok());
        s.request();
        assert!(matches!(s.check(), Err(SchedError::Cancelled)));
        assert!(s.has_occurred());
    }

    #[test]
    fn masked_cancellation_does_not_fire() {
        let s = CancelState::new();
        s.set_enabled(false);
        s.request();
        assert!(s.check().is_ok());
        assert!(!s.has_occurred());

        s.set_enabled(true);
        assert!(matches!(s.check(), Err(SchedError::Cancelled)));
    }

    #[test]
    fn reset_clears_state() {
        let s = CancelState::new();
        s.request();
        let _ = s.check();
        s.reset();
        assert!(!s.is_requested());
        assert!(!s.has_occurred());
        assert!(s.check().is_ok());
    }
}
