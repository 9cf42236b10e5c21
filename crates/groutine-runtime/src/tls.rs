//! Thread-local context: which worker (OS thread index) and which
//! routine is currently executing on it.

use groutine_core::constants::ROUTINE_NONE;
use groutine_core::id::RoutineId;
use groutine_core::metadata::VoluntarySavedRegs;
use std::cell::UnsafeCell;
use std::cell::Cell;

thread_local! {
    static WORKER_ID: Cell<u32> = const { Cell::new(u32::MAX) };
    static CURRENT_ROUTINE: Cell<u32> = const { Cell::new(ROUTINE_NONE) };
    static ROUTINE_BASE: Cell<*mut u8> = const { Cell::new(std::ptr::null_mut()) };
    // The scheduler loop's own register block: `resume()` switches into a
    // routine with this as `old_regs`, and any blocking call deep in that
    // routine's stack switches back into it as `new_regs`. One per thread
    // because `context_switch_voluntary` is fully symmetric — it has no
    // notion of "the scheduler side", only two register-block pointers.
    static SCHEDULER_CTX: UnsafeCell<VoluntarySavedRegs> = UnsafeCell::new(VoluntarySavedRegs::default());
}

/// Raw pointer to this thread's scheduler register block. Valid only
/// while the owning thread is alive; never accessed from another thread.
#[inline]
pub fn scheduler_ctx_ptr() -> *mut VoluntarySavedRegs {
    SCHEDULER_CTX.with(|cell| cell.get())
}

#[inline]
pub fn set_worker_id(id: u32) {
    WORKER_ID.with(|cell| cell.set(id));
}

#[inline]
pub fn worker_id() -> u32 {
    WORKER_ID.with(|cell| cell.get())
}

#[inline]
pub fn try_worker_id() -> Option<u32> {
    let id = WORKER_ID.with(|cell| cell.get());
    if id == u32::MAX { None } else { Some(id) }
}

/// Record the routine now running on this OS thread, and the base
/// address of its metadata (used by the trampoline's finish hook, which
/// has no other way to find it).
#[inline]
pub fn set_current_routine(id: RoutineId, base: *mut u8) {
    CURRENT_ROUTINE.with(|cell| cell.set(id.as_u32()));
    ROUTINE_BASE.with(|cell| cell.set(base));
}

#[inline]
pub fn clear_current_routine() {
    CURRENT_ROUTINE.with(|cell| cell.set(ROUTINE_NONE));
    ROUTINE_BASE.with(|cell| cell.set(std::ptr::null_mut()));
}

#[inline]
pub fn current_routine_id() -> RoutineId {
    RoutineId::new(CURRENT_ROUTINE.with(|cell| cell.get()))
}

#[inline]
pub fn current_routine_base() -> *mut u8 {
    ROUTINE_BASE.with(|cell| cell.get())
}

#[inline]
pub fn is_in_routine() -> bool {
    CURRENT_ROUTINE.with(|cell| cell.get() != ROUTINE_NONE)
}
