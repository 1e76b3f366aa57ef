//! Error taxonomy for the scheduler and its supporting subsystems.

use core::fmt;

/// Result type for scheduler operations.
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors surfaced by the fiber scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    /// Operation was cancelled via [`crate::cancel::CancelState`].
    Cancelled,
    /// A timed wait (timer, join, channel recv) expired.
    Timeout,
    /// The stack slot allocator has no free slots.
    NoStackSlots,
    /// Referenced fiber id does not exist on this worker.
    FiberNotFound,
    /// Operation invalid for the fiber's current state (e.g. join on a
    /// still-running fiber from the wrong worker).
    InvalidState,
    /// Runtime not started yet.
    NotInitialized,
    /// Runtime already started.
    AlreadyInitialized,
    /// Stack/slot memory management failure.
    MemoryError(MemoryError),
    /// Worker thread lifecycle failure.
    WorkerError(WorkerError),
    /// Raw errno from a platform call that doesn't fit another variant.
    PlatformError(i32),
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::Cancelled => write!(f, "operation cancelled"),
            SchedError::Timeout => write!(f, "operation timed out"),
            SchedError::NoStackSlots => write!(f, "no stack slots available"),
            SchedError::FiberNotFound => write!(f, "fiber not found"),
            SchedError::InvalidState => write!(f, "invalid fiber state for operation"),
            SchedError::NotInitialized => write!(f, "runtime not initialized"),
            SchedError::AlreadyInitialized => write!(f, "runtime already initialized"),
            SchedError::MemoryError(e) => write!(f, "memory error: {}", e),
            SchedError::WorkerError(e) => write!(f, "worker error: {}", e),
            SchedError::PlatformError(code) => write!(f, "platform error: {}", code),
        }
    }
}

impl std::error::Error for SchedError {}

/// Stack-slot and memory-mapping errors (component B/E).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// `mmap` of the worker's slot region failed.
    AllocationFailed,
    /// `mprotect` on slot activation failed.
    ProtectionFailed,
    /// `madvise(MADV_DONTNEED)` on slot release failed.
    AdviseFailed,
    /// Slot region already initialized for this worker.
    AlreadyInitialized,
    /// Requested slot count exceeds the region's capacity.
    TooManySlots,
    /// Slot index out of range.
    InvalidSlot,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::AllocationFailed => write!(f, "stack region allocation failed"),
            MemoryError::ProtectionFailed => write!(f, "stack slot protection change failed"),
            MemoryError::AdviseFailed => write!(f, "stack slot advise failed"),
            MemoryError::AlreadyInitialized => write!(f, "stack region already initialized"),
            MemoryError::TooManySlots => write!(f, "too many stack slots requested"),
            MemoryError::InvalidSlot => write!(f, "invalid stack slot index"),
        }
    }
}

impl From<MemoryError> for SchedError {
    fn from(e: MemoryError) -> Self {
        SchedError::MemoryError(e)
    }
}

/// Worker thread lifecycle errors (component K).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// Failed to spawn the worker's OS thread.
    SpawnFailed,
    /// Worker thread panicked and was not restarted.
    Panicked,
    /// Failed to pin the worker to a core.
    AffinityFailed,
    /// Dispatcher (epoll instance, self-pipe) setup failed.
    DispatcherSetupFailed,
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::SpawnFailed => write!(f, "failed to spawn worker thread"),
            WorkerError::Panicked => write!(f, "worker thread panicked"),
            WorkerError::AffinityFailed => write!(f, "failed to set thread affinity"),
            WorkerError::DispatcherSetupFailed => write!(f, "event dispatcher setup failed"),
        }
    }
}

impl From<WorkerError> for SchedError {
    fn from(e: WorkerError) -> Self {
        SchedError::WorkerError(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(format!("{}", SchedError::Cancelled), "operation cancelled");
        let e = SchedError::MemoryError(MemoryError::AllocationFailed);
        assert_eq!(format!("{}", e), "memory error: stack region allocation failed");
    }

    #[test]
    fn error_conversion() {
        let mem_err = MemoryError::TooManySlots;
        let sched_err: SchedError = mem_err.into();
        assert!(matches!(sched_err, SchedError::MemoryError(MemoryError::TooManySlots)));

        let worker_err = WorkerError::SpawnFailed;
        let sched_err: SchedError = worker_err.into();
        assert!(matches!(sched_err, SchedError::WorkerError(WorkerError::SpawnFailed)));
    }
}
