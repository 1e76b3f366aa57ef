//! Per-fd readiness state machine (component I).
//!
//! A `Sink` sits between one fd and the fibers that read or write it. It
//! is touched only by the worker that owns the fd — by the fiber doing
//! I/O on it, and by that same worker's dispatch loop delivering
//! readiness events — so like the scheduler it needs no atomics or
//! locks. At most one fiber may be parked waiting on each direction at a
//! time; a second concurrent waiter on the same direction is a caller
//! bug; SPEC_FULL's per-connection model has exactly one reader and one
//! writer per stream.

use fiber_core::id::FiberId;
use fiber_runtime::{scheduler, tls};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    Error,
    /// Woken for a reason other than this direction becoming ready —
    /// a racing deadline timer, most likely. The caller decides whether
    /// that means "time's up" or "spurious, wait again".
    TimedOut,
}

pub struct Sink {
    input_ready: bool,
    output_ready: bool,
    errored: bool,
    reader: Option<FiberId>,
    writer: Option<FiberId>,
}

impl Sink {
    pub fn new() -> Self {
        Self {
            input_ready: false,
            output_ready: false,
            errored: false,
            reader: None,
            writer: None,
        }
    }

    /// Record a readiness transition delivered by the dispatcher and wake
    /// whichever fiber is waiting on the affected direction(s).
    pub fn on_event(&mut self, readable: bool, writable: bool, error: bool) {
        if error {
            self.errored = true;
        }
        if readable {
            self.input_ready = true;
            if let Some(id) = self.reader.take() {
                scheduler::wake(id);
            }
        }
        if writable {
            self.output_ready = true;
            if let Some(id) = self.writer.take() {
                scheduler::wake(id);
            }
        }
        if error {
            if let Some(id) = self.reader.take() {
                scheduler::wake(id);
            }
            if let Some(id) = self.writer.take() {
                scheduler::wake(id);
            }
        }
    }

    /// Block the calling fiber until the fd is readable (or errored).
    /// Consumes the readiness edge: the caller must re-attempt its read
    /// and park again on a fresh `WouldBlock`.
    pub fn wait_readable(&mut self) -> WaitOutcome {
        if self.errored {
            return WaitOutcome::Error;
        }
        if self.input_ready {
            self.input_ready = false;
            return WaitOutcome::Ready;
        }
        debug_assert!(self.reader.is_none(), "two fibers parked reading the same sink");
        self.reader = Some(tls::current_fiber_id());
        scheduler::park_current();
        self.reader = None;
        if self.errored {
            return WaitOutcome::Error;
        }
        if self.input_ready {
            self.input_ready = false;
            return WaitOutcome::Ready;
        }
        WaitOutcome::TimedOut
    }

    pub fn wait_writable(&mut self) -> WaitOutcome {
        if self.errored {
            return WaitOutcome::Error;
        }
        if self.output_ready {
            self.output_ready = false;
            return WaitOutcome::Ready;
        }
        debug_assert!(self.writer.is_none(), "two fibers parked writing the same sink");
        self.writer = Some(tls::current_fiber_id());
        scheduler::park_current();
        self.writer = None;
        if self.errored {
            return WaitOutcome::Error;
        }
        if self.output_ready {
            self.output_ready = false;
            return WaitOutcome::Ready;
        }
        WaitOutcome::TimedOut
    }

    pub fn mark_error(&mut self) {
        self.on_event(false, false, true);
    }

    /// Take the parked reader, if any, without touching readiness flags.
    /// Used by half-close to wake a blocked reader so it observes
    /// `EBADF` rather than waiting forever on a direction that will
    /// never become ready again.
    pub fn take_reader(&mut self) -> Option<FiberId> {
        self.reader.take()
    }

    pub fn take_writer(&mut self) -> Option<FiberId> {
        self.writer.take()
    }
}

impl Default for Sink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_set_before_wait_returns_immediately() {
        let mut sink = Sink::new();
        sink.on_event(true, false, false);
        assert_eq!(sink.wait_readable(), WaitOutcome::Ready);
    }

    #[test]
    fn error_short_circuits_both_directions() {
        let mut sink = Sink::new();
        sink.mark_error();
        assert_eq!(sink.wait_readable(), WaitOutcome::Error);
        assert_eq!(sink.wait_writable(), WaitOutcome::Error);
    }
}
