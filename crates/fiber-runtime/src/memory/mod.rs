//! Per-worker stack slot region.
//!
//! Each worker owns one `mmap`'d, lazily-committed region subdivided into
//! fixed-size slots. Ownership is exclusive to the worker's OS thread, so
//! unlike a shared allocator this needs no lock or atomic refcount — a
//! worker only ever touches its own region.

mod unix;
pub use unix::*;

use fiber_core::constants::{GUARD_SIZE, METADATA_SIZE};
use std::ptr;

/// A worker's private stack slot region.
pub struct StackRegion {
    base: *mut u8,
    slot_size: usize,
    max_slots: usize,
    initialized: bool,
}

// Safety: a StackRegion is created and used by exactly one worker thread;
// it is never shared, only moved into the worker at spawn time.
unsafe impl Send for StackRegion {}

impl StackRegion {
    pub const fn uninit() -> Self {
        Self {
            base: ptr::null_mut(),
            slot_size: 0,
            max_slots: 0,
            initialized: false,
        }
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    #[inline]
    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    #[inline]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    #[inline]
    fn slot_base(&self, slot_id: u32) -> *mut u8 {
        debug_assert!((slot_id as usize) < self.max_slots);
        unsafe { self.base.add(slot_id as usize * self.slot_size) }
    }

    /// Metadata page address for a slot (start of the slot).
    #[inline]
    pub fn metadata_addr(&self, slot_id: u32) -> *mut u8 {
        self.slot_base(slot_id)
    }

    /// Highest usable stack address for a slot (stack grows down, stops
    /// just before the guard page).
    #[inline]
    pub fn stack_top(&self, slot_id: u32) -> *mut u8 {
        unsafe { self.slot_base(slot_id).add(self.slot_size).sub(GUARD_SIZE) }
    }

    /// Lowest stack address for a slot (right after the metadata page).
    #[inline]
    pub fn stack_bottom(&self, slot_id: u32) -> *mut u8 {
        unsafe { self.slot_base(slot_id).add(METADATA_SIZE) }
    }
}

impl Default for StackRegion {
    fn default() -> Self {
        Self::uninit()
    }
}
