//! Routine bootstrap and resume
//!
//! Bridges a freshly-allocated slot's [`RoutineMetadata`] with
//! `arch::{init_context, context_switch_voluntary}`: preparing a fresh
//! routine's stack so its first resume enters the boxed closure, and
//! performing the voluntary switch in and out of a routine on a
//! scheduler's behalf. The scheduler decides *when* to resume a routine
//! (ready queue order, event dispatch); this module only knows *how*.

use crate::current_arch;
use crate::memory;
use crate::tls;
use groutine_core::error::SchedResult;
use groutine_core::id::RoutineId;
use groutine_core::state::RoutineStatus;
use std::sync::atomic::Ordering;

/// A routine's body: a boxed, one-shot closure run to completion on its
/// own stack. `spawn`'s caller-supplied arguments are captured by the
/// closure rather than threaded through the trampoline.
pub type RoutineFn = Box<dyn FnOnce() + Send + 'static>;

/// Activate `id`'s slot and wire it up so that its first `resume()`
/// enters `f` on a fresh stack.
pub fn prepare(id: RoutineId, parent: RoutineId, owner_thread: u32, f: RoutineFn) -> SchedResult<()> {
    memory::memory_region().activate_slot(id.as_u32())?;

    let meta_ptr = memory::get_metadata_ptr(id.as_u32());
    let meta = unsafe { &*meta_ptr };
    meta.init(id, parent, owner_thread);

    let closure_ptr = Box::into_raw(Box::new(f)) as usize;
    meta.entry_fn.store(trampoline_entry as usize as u64, Ordering::Relaxed);
    meta.entry_arg.store(closure_ptr as u64, Ordering::Relaxed);

    let stack_top = memory::get_stack_top(id.as_u32());
    let regs_ptr = unsafe { &meta.voluntary_regs as *const _ as *mut _ };
    unsafe { current_arch::init_context(regs_ptr, stack_top, trampoline_entry as usize, closure_ptr) };

    Ok(())
}

/// Entered on the routine's own stack the first time it runs. Unboxes
/// and calls the closure handed to [`prepare`]; when it returns, the
/// architecture trampoline calls `scheduler::routine_entry_returned`.
extern "C" fn trampoline_entry(closure_ptr: usize) {
    let f: Box<RoutineFn> = unsafe { Box::from_raw(closure_ptr as *mut RoutineFn) };
    (*f)();
}

/// Switch from the calling (scheduler) thread into routine `id`,
/// returning once that routine yields, blocks, times out, or finishes.
/// Caller is responsible for having already set the routine runnable
/// and for inspecting its status afterward.
pub fn resume(id: RoutineId) {
    let meta_ptr = memory::get_metadata_ptr(id.as_u32());
    let meta = unsafe { &*meta_ptr };

    meta.set_status(RoutineStatus::Running);
    tls::set_current_routine(id, meta_ptr as *mut u8);
    groutine_core::kprint::set_routine_id(id.as_u32());

    let sched_ctx = tls::scheduler_ctx_ptr();
    let routine_regs = unsafe { &meta.voluntary_regs as *const _ as *mut _ };
    unsafe { current_arch::context_switch_voluntary(sched_ctx, routine_regs) };

    groutine_core::kprint::clear_routine_id();
    tls::clear_current_routine();
}

/// Release a finished routine's slot: give its physical pages back and
/// return its id to the allocator.
pub fn retire(alloc: &crate::slots::SlotAllocator, id: RoutineId) -> SchedResult<()> {
    memory::memory_region().deactivate_slot(id.as_u32())?;
    alloc.release(id);
    Ok(())
}

/// Switch from routine `id` back to the scheduler loop that resumed it.
/// The mirror image of the second half of [`resume`]; called from deep
/// inside a routine's call stack by anything that parks it.
pub fn switch_out(id: RoutineId) {
    let meta_ptr = memory::get_metadata_ptr(id.as_u32());
    let meta = unsafe { &*meta_ptr };
    let sched_ctx = tls::scheduler_ctx_ptr();
    let routine_regs = unsafe { &meta.voluntary_regs as *const _ as *mut _ };
    unsafe { current_arch::context_switch_voluntary(routine_regs, sched_ctx) };
}
