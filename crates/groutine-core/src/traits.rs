//! Platform and scheduler traits
//!
//! These traits define the interface between platform-agnostic core and
//! the per-thread scheduler that actually owns routine state. Core
//! synchronization primitives (`Semaphore`, `SchedMutex`, `channel`) never
//! touch a concrete scheduler type; they go through [`RoutineParker`],
//! which the runtime installs as a thread-local hook before any routine
//! runs on that OS thread.

use crate::error::SchedResult;
use crate::event::{EventDescriptor, EventOutcome};
use crate::id::RoutineId;

/// Platform-specific memory operations
pub trait PlatformMemory: Send + Sync {
    /// Reserve virtual address space for routine slots
    fn reserve_region(&self, size: usize) -> SchedResult<*mut u8>;

    /// Release virtual address space
    fn release_region(&self, base: *mut u8, size: usize) -> SchedResult<()>;

    /// Make a memory region readable/writable
    fn protect_rw(&self, base: *mut u8, size: usize) -> SchedResult<()>;

    /// Make a memory region inaccessible (guard page)
    fn protect_none(&self, base: *mut u8, size: usize) -> SchedResult<()>;

    /// Advise kernel that memory is not needed (release physical pages)
    fn advise_dontneed(&self, base: *mut u8, size: usize) -> SchedResult<()>;
}

/// Platform-specific threading operations
pub trait PlatformThread: Send + Sync {
    /// Spawn a new OS thread
    fn spawn_thread<F>(&self, name: &str, f: F) -> SchedResult<u64>
    where
        F: FnOnce() + Send + 'static;

    /// Get current thread ID
    fn current_thread_id(&self) -> u64;

    /// Yield the current OS thread
    fn yield_thread(&self);

    /// Sleep for the specified duration in nanoseconds
    fn sleep_ns(&self, ns: u64);
}

/// Platform-specific time operations
pub trait PlatformTime: Send + Sync {
    /// Get current time in nanoseconds (monotonic)
    fn now_ns(&self) -> u64;

    /// Get coarse time in nanoseconds (faster, less precise)
    fn coarse_now_ns(&self) -> u64;
}

/// Architecture-specific context switch operations
pub trait ArchContext: Send + Sync {
    /// Initialize context for a new routine
    ///
    /// Sets up the initial stack and registers so that when the context
    /// is switched to, execution begins at `entry_fn(entry_arg)`.
    fn init_context(
        &self,
        regs: *mut u8,      // Pointer to saved registers area
        stack_top: *mut u8, // Top of stack (highest address)
        entry_fn: usize,    // Entry function pointer
        entry_arg: usize,   // Argument to entry function
    );

    /// Perform voluntary context switch (callee-saved registers only)
    ///
    /// Saves current context to `old_regs` and loads context from
    /// `new_regs`. Returns when this context is switched back to.
    ///
    /// # Safety
    ///
    /// Both register areas must be valid and properly aligned.
    unsafe fn switch_voluntary(
        &self,
        old_regs: *mut u8, // Where to save current context
        new_regs: *mut u8, // Where to load new context from
    );
}

/// Combined platform interface
pub trait Platform: PlatformMemory + PlatformThread + PlatformTime {
    /// Platform name (e.g., "linux", "macos", "windows")
    fn name(&self) -> &'static str;
}

/// The seam between a synchronization primitive (semaphore, mutex,
/// channel) and whichever thread scheduler owns the currently running
/// routine.
///
/// A routine calling `lock()` on a contended [`crate::mutex::SchedMutex`]
/// doesn't know about threads, ready queues, or event rounds; it just
/// needs to stop running until someone else calls `unpark`. The thread
/// scheduler installs itself as the active parker (see
/// [`set_current_parker`]) for the whole time it is running routines, so
/// every primitive in this crate reaches the right scheduler through
/// thread-local state rather than a passed-in reference.
pub trait RoutineParker {
    /// Id of the routine currently running on this thread, if any.
    fn current_routine(&self) -> Option<RoutineId>;

    /// Suspend the current routine until a matching `unpark` call. Must
    /// only be called from routine context (i.e. `current_routine()` is
    /// `Some`). Returns once the routine has been resumed.
    fn park_current(&self);

    /// Suspend the current routine with a deadline; behaves like
    /// `park_current` but also resumes the routine on timeout. Returns
    /// `true` if woken by `unpark`, `false` if the deadline elapsed
    /// first.
    fn park_current_timeout(&self, timeout_ms: i64) -> bool;

    /// Move a parked routine back onto its owning thread's ready queue.
    fn unpark(&self, id: RoutineId);

    /// Register `descriptors` as the current routine's pending event
    /// round and park until exactly one fires. See
    /// [`crate::event::EventRound`]. Taken `&mut` because resolving a
    /// won [`EventDescriptor::ChannelClaim`] calls its boxed claim
    /// closure.
    fn await_events<'a>(&self, descriptors: &mut [EventDescriptor<'a>]) -> EventOutcome;
}

thread_local! {
    static CURRENT_PARKER: core::cell::Cell<*const dyn RoutineParker> =
        const { core::cell::Cell::new(core::ptr::null()) };
}

/// Install `parker` as the active [`RoutineParker`] for the calling OS
/// thread. Called once by the thread scheduler's run loop before it
/// starts resuming routines.
///
/// # Safety
///
/// `parker` must remain valid for as long as it stays installed; callers
/// clear it (via [`clear_current_parker`]) before it would become
/// invalid.
pub unsafe fn set_current_parker(parker: *const dyn RoutineParker) {
    CURRENT_PARKER.with(|cell| cell.set(parker));
}

/// Remove the active parker for the calling OS thread.
pub fn clear_current_parker() {
    CURRENT_PARKER.with(|cell| cell.set(core::ptr::null()));
}

/// Run `f` with the calling thread's active parker, if one is installed.
/// Returns `None` (and does not call `f`) outside of routine context —
/// e.g. from a plain OS thread that never entered a scheduler loop.
pub fn with_current_parker<R>(f: impl FnOnce(&dyn RoutineParker) -> R) -> Option<R> {
    CURRENT_PARKER.with(|cell| {
        let ptr = cell.get();
        if ptr.is_null() {
            None
        } else {
            // Safety: non-null only while `set_current_parker`'s caller
            // upholds its validity contract.
            Some(f(unsafe { &*ptr }))
        }
    })
}
