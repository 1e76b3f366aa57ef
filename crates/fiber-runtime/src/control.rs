//! Fiber control block: the layout written into the first bytes of a
//! stack slot's metadata page.
//!
//! A worker reaches a fiber's control block only through its own
//! `StackRegion::metadata_addr(slot_id)` — never shared across threads,
//! so no field here needs to be atomic.

use fiber_core::cancel::CancelState;
use fiber_core::cleanup::CleanupStack;
use fiber_core::id::FiberId;
use fiber_core::state::{FiberState, Priority};

/// Callee-saved register block used by `switch_context`.
///
/// Field order and size must match the offsets hardcoded in
/// `arch::x86_64::switch_context`'s `naked_asm!` body exactly.
#[repr(C)]
#[derive(Default)]
pub struct FiberContext {
    pub rsp: u64,
    pub rip: u64,
    pub rbx: u64,
    pub rbp: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
}

/// Per-fiber bookkeeping living at the start of its stack slot.
///
/// `entry_fn`/`entry_arg` mirror the two words the trampoline reads out
/// of `r12`/`r13` on first entry — they exist here only so
/// `fiber_finished` can find its way back to the owning worker, not
/// because the running fiber ever reads them itself.
#[repr(C)]
pub struct FiberControlBlock {
    pub id: FiberId,
    pub state: FiberState,
    pub priority: Priority,
    pub parent: FiberId,
    pub cancel: CancelState,
    /// LIFO cleanup records, run in order by `cleanup_push`'s matching
    /// `fiber_exit`/cancellation unwind — never touched across threads,
    /// same as every other field here.
    pub cleanup: CleanupStack,
    pub context: FiberContext,
}

impl FiberControlBlock {
    pub fn new(id: FiberId, priority: Priority) -> Self {
        Self {
            id,
            state: FiberState::Created,
            priority,
            parent: FiberId::NONE,
            cancel: CancelState::new(),
            cleanup: CleanupStack::new(),
            context: FiberContext::default(),
        }
    }

    /// Byte offset of the `context` field within the control block.
    ///
    /// Used by `arch::x86_64::fiber_finished` to recover a `*mut
    /// FiberContext` from a bare `*mut u8` metadata pointer without a
    /// hardcoded literal.
    #[inline]
    pub const fn context_offset() -> usize {
        std::mem::offset_of!(FiberControlBlock, context)
    }

    /// Write a freshly constructed control block at `addr`.
    ///
    /// # Safety
    /// `addr` must point to at least `size_of::<FiberControlBlock>()`
    /// writable bytes, correctly aligned for `FiberControlBlock`.
    #[inline]
    pub unsafe fn write_at(addr: *mut u8, block: FiberControlBlock) -> *mut FiberControlBlock {
        let ptr = addr as *mut FiberControlBlock;
        ptr.write(block);
        ptr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_offset_is_stable() {
        // Sanity check only: the naked_asm in arch::x86_64 assumes this
        // block sits at the front of FiberControlBlock's layout region,
        // not a specific numeric value.
        assert!(FiberControlBlock::context_offset() > 0);
        assert_eq!(
            FiberControlBlock::context_offset() % 8,
            0,
            "register block must stay 8-byte aligned"
        );
    }

    #[test]
    fn new_control_block_starts_created() {
        let block = FiberControlBlock::new(FiberId::new(1), Priority::default());
        assert_eq!(block.state, FiberState::Created);
        assert!(block.parent.is_none());
    }
}
