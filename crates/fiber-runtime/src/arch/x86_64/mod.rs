//! x86_64 context switching.
//!
//! Symmetric stack switching via naked assembly, callee-saved registers
//! only per the System V AMD64 ABI. No preemption: a fiber only ever
//! leaves `switch_context` by calling it itself.

use crate::control::FiberContext;
use std::arch::naked_asm;

/// Set up a freshly allocated stack so the first `switch_context` into
/// it lands in `fiber_entry_trampoline` with `entry_fn`/`entry_arg`
/// staged in the two registers the trampoline reads.
///
/// # Safety
/// `ctx` must point to valid `FiberContext` memory; `stack_top` must be
/// a valid, unused stack pointer for the slot.
#[inline]
pub unsafe fn init_context(
    ctx: *mut FiberContext,
    stack_top: *mut u8,
    entry_fn: usize,
    entry_arg: usize,
) {
    let sp = stack_top as usize;
    // 16-byte align, then back off 8 so the trampoline's implicit
    // "call" lands with the ABI's expected alignment at entry.
    let aligned_sp = (sp & !0xF) - 8;

    let ctx = &mut *ctx;
    ctx.rsp = aligned_sp as u64;
    ctx.rip = fiber_entry_trampoline as usize as u64;
    ctx.rbx = 0;
    ctx.rbp = 0;
    ctx.r12 = entry_fn as u64;
    ctx.r13 = entry_arg as u64;
    ctx.r14 = 0;
    ctx.r15 = 0;
}

/// First code a fiber ever runs: calls its entry closure trampoline
/// with its argument, then hands control to `fiber_finished`.
#[unsafe(naked)]
pub unsafe extern "C" fn fiber_entry_trampoline() {
    naked_asm!(
        "mov rdi, r13",
        "call r12",
        "call {cleanup}",
        "ud2",
        cleanup = sym fiber_finished,
    );
}

/// Switch from the currently running context to another.
///
/// Saves callee-saved registers to `*old`, loads them from `*new`, and
/// jumps to the saved `rip`. Returns (to the instruction after the
/// call) once some other switch later resumes `*old`.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(_old: *mut FiberContext, _new: *const FiberContext) {
    naked_asm!(
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 1f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        "mov rsp, [rsi + 0x00]",
        "mov rax, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        "jmp rax",
        "1:",
        "ret",
    );
}

/// Runs after a fiber's entry closure returns. Unwinds its cleanup
/// stack, marks it finished, and switches back to the owning worker's
/// scheduling loop; never returns.
extern "C" fn fiber_finished() {
    use crate::scheduler::terminate_current;
    use crate::tls;
    use fiber_core::state::FiberState;

    if tls::current_fiber_base().is_null() {
        // No control block reachable: nothing left to report finished
        // state to. Park this OS-level stack forever rather than
        // execute past the end of a closure with undefined state.
        loop {
            std::hint::spin_loop();
        }
    }

    terminate_current(FiberState::Finished);
}
