//! mmap/mprotect/madvise-backed slot region, Linux-specific.

use super::StackRegion;
use fiber_core::constants::{GUARD_SIZE, METADATA_SIZE};
use fiber_core::error::{MemoryError, SchedResult};

impl StackRegion {
    /// Reserve virtual address space for `max_slots` slots, `PROT_NONE`
    /// until a slot is activated. Called once, on the worker's own thread,
    /// before it starts scheduling fibers.
    pub fn init(&mut self, max_slots: usize, slot_size: usize) -> SchedResult<()> {
        if self.initialized {
            return Err(MemoryError::AlreadyInitialized.into());
        }

        let total_size = max_slots
            .checked_mul(slot_size)
            .ok_or(MemoryError::TooManySlots)?;

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                total_size,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };

        if base == libc::MAP_FAILED {
            return Err(MemoryError::AllocationFailed.into());
        }

        self.base = base as *mut u8;
        self.slot_size = slot_size;
        self.max_slots = max_slots;
        self.initialized = true;

        Ok(())
    }

    /// Make a slot's metadata page and stack readable/writable. The trailing
    /// guard page is left `PROT_NONE`, turning a stack overflow into a
    /// SIGSEGV instead of silent corruption of the next slot.
    pub fn activate_slot(&self, slot_id: u32) -> SchedResult<()> {
        if !self.initialized {
            return Err(MemoryError::AllocationFailed.into());
        }
        if slot_id as usize >= self.max_slots {
            return Err(MemoryError::InvalidSlot.into());
        }

        let base = self.metadata_addr(slot_id);
        let usable = self.slot_size - GUARD_SIZE;

        let ret = unsafe {
            libc::mprotect(
                base as *mut libc::c_void,
                usable,
                libc::PROT_READ | libc::PROT_WRITE,
            )
        };
        if ret != 0 {
            return Err(MemoryError::ProtectionFailed.into());
        }

        Ok(())
    }

    /// Release physical pages backing a finished fiber's slot. The
    /// mapping stays reserved; only `MADV_DONTNEED` is applied.
    pub fn deactivate_slot(&self, slot_id: u32) -> SchedResult<()> {
        if !self.initialized {
            return Err(MemoryError::AllocationFailed.into());
        }
        if slot_id as usize >= self.max_slots {
            return Err(MemoryError::InvalidSlot.into());
        }

        let base = self.metadata_addr(slot_id);
        let usable = self.slot_size - GUARD_SIZE;

        let ret = unsafe {
            libc::madvise(base as *mut libc::c_void, usable, libc::MADV_DONTNEED)
        };
        if ret != 0 {
            return Err(MemoryError::AdviseFailed.into());
        }

        Ok(())
    }

    /// Unmap the entire region. Called once, when the worker shuts down.
    pub fn release(&mut self) -> SchedResult<()> {
        if !self.initialized {
            return Ok(());
        }

        if !self.base.is_null() {
            let total_size = self.max_slots * self.slot_size;
            let ret = unsafe { libc::munmap(self.base as *mut libc::c_void, total_size) };
            if ret != 0 {
                return Err(MemoryError::AllocationFailed.into());
            }
        }

        self.base = std::ptr::null_mut();
        self.max_slots = 0;
        self.slot_size = 0;
        self.initialized = false;

        Ok(())
    }
}

impl Drop for StackRegion {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_activate_deactivate_release() {
        let mut region = StackRegion::uninit();
        region.init(4, 64 * 1024).expect("init");
        assert!(region.is_initialized());

        region.activate_slot(0).expect("activate");
        // Touch the stack to prove it's writable.
        unsafe {
            let ptr = region.stack_bottom(0);
            *ptr = 0xAB;
            assert_eq!(*ptr, 0xAB);
        }

        region.deactivate_slot(0).expect("deactivate");
        region.release().expect("release");
        assert!(!region.is_initialized());
    }

    #[test]
    fn invalid_slot_rejected() {
        let mut region = StackRegion::uninit();
        region.init(2, 64 * 1024).unwrap();
        assert!(region.activate_slot(5).is_err());
    }

    #[test]
    fn metadata_size_mismatch() {
        // METADATA_SIZE must fit within the chosen slot size.
        assert!(METADATA_SIZE < 64 * 1024);
    }
}
