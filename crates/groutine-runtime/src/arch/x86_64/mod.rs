//! x86_64 context switching
//!
//! Implements the `switch(from, to)` primitive spec.md treats as an
//! external collaborator: save the current callee-saved register set to
//! the outgoing routine's metadata, load the incoming one, jump.

use groutine_core::metadata::VoluntarySavedRegs;
use std::arch::naked_asm;

/// Set up a fresh routine's stack so that switching to it for the first
/// time enters `entry_fn(entry_arg)`.
///
/// # Safety
///
/// `regs` must point to valid `VoluntarySavedRegs` memory; `stack_top`
/// must be a valid, writable stack pointer.
#[inline]
pub unsafe fn init_context(
    regs: *mut VoluntarySavedRegs,
    stack_top: *mut u8,
    entry_fn: usize,
    entry_arg: usize,
) {
    // System V AMD64 ABI requires the stack 16-byte aligned at a `call`
    // instruction boundary; the trampoline enters via `jmp`, so we leave
    // it 8 bytes short, as if a `call` had just pushed a return address.
    let sp = stack_top as usize;
    let aligned_sp = (sp & !0xF) - 8;

    let regs = &mut *regs;
    regs.rsp = aligned_sp as u64;
    regs.rip = routine_entry_trampoline as usize as u64;
    regs.rbx = 0;
    regs.rbp = 0;
    regs.r12 = entry_fn as u64;
    regs.r13 = entry_arg as u64;
    regs.r14 = 0;
    regs.r15 = 0;
}

/// Entered on the routine's own stack the first time it is resumed.
/// Calls the entry function then hands off to the finish hook; never
/// returns.
#[unsafe(naked)]
pub unsafe extern "C" fn routine_entry_trampoline() {
    naked_asm!(
        "mov rdi, r13",
        "call r12",
        "call {finished}",
        "ud2",
        finished = sym routine_finished,
    );
}

/// Voluntary context switch: save callee-saved registers to `old_regs`,
/// load from `new_regs`, jump. Returns (on the original stack) the next
/// time something switches back into `old_regs`.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch_voluntary(
    _old_regs: *mut VoluntarySavedRegs,
    _new_regs: *const VoluntarySavedRegs,
) {
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

/// Called from the trampoline once the routine's function returns.
/// Marks the routine finished and switches back into the scheduler's
/// saved context; does not return.
extern "C" fn routine_finished() {
    crate::scheduler::routine_entry_returned();
}
