//! Per-thread scheduler
//!
//! One [`ThreadScheduler`] owns one OS thread: a ready queue of routine
//! ids, a [`Poller`] for readiness-based I/O, a [`TimerHeap`] for
//! deadlines, and an [`Lcrq`] inbox other threads post into when they
//! need to hand this thread a routine it owns. It implements
//! [`RoutineParker`], installed as this thread's active parker for the
//! whole time [`ThreadScheduler::run`] is looping, so every
//! synchronization primitive in `groutine-core` reaches it through
//! thread-local state.
//!
//! The only other thing allowed to touch a routine's metadata or stack
//! is the routine itself, running on its own slot; everything here that
//! isn't `routine::resume`/`routine::switch_out` only reads or writes
//! the atomics in [`RoutineMetadata`].

use crate::config::EngineConfig;
use crate::current_arch;
use crate::memory;
use crate::poller::{LoopReason, PollResult, Poller};
use crate::routine;
use crate::slots::SlotAllocator;
use crate::timer::TimerHeap;
use crate::tls;

use groutine_core::error::SchedResult;
use groutine_core::event::{EventDescriptor, EventId as CoreEventId, EventOutcome};
use groutine_core::id::RoutineId;
use groutine_core::lcrq::{Lcrq, LcrqHandle};
use groutine_core::metadata::RoutineMetadata;
use groutine_core::semaphore::Semaphore;
use groutine_core::state::{PreviousStatus, RoutineStatus};
use groutine_core::traits::{clear_current_parker, set_current_parker, RoutineParker};
use groutine_core::{kdebug, ktrace};

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

pub use crate::poller::EventId as WakeEventId;

/// Sentinel stored in `happened_event` before a round is committed, so
/// the resolution code can tell "an I/O descriptor fired" (a real
/// index) from "nothing fd-shaped fired" (still the sentinel — resolve
/// by scanning semaphore descriptors instead).
const NO_FD_FIRED: u8 = 0xFF;

const CMD_SHUTDOWN: u64 = 1 << 63;

pub(crate) enum Command {
    Schedule(RoutineId),
    Shutdown,
}

pub(crate) fn encode_schedule(id: RoutineId) -> u64 {
    id.as_u32() as u64
}

pub(crate) fn shutdown_command() -> u64 {
    CMD_SHUTDOWN
}

pub(crate) fn decode_command(val: u64) -> Command {
    if val == CMD_SHUTDOWN {
        Command::Shutdown
    } else {
        Command::Schedule(RoutineId::new(val as u32))
    }
}

fn encode_fd_token(id: RoutineId, idx: usize) -> u64 {
    ((id.as_u32() as u64) << 8) | (idx as u64 & 0xFF)
}

fn decode_fd_token(data: u64) -> (RoutineId, u8) {
    (RoutineId::new((data >> 8) as u32), (data & 0xFF) as u8)
}

#[inline]
fn get_meta(id: RoutineId) -> &'static RoutineMetadata {
    unsafe { &*memory::get_metadata_ptr(id.as_u32()) }
}

/// Reconstitute a semaphore reference from the opaque token an
/// [`EventDescriptor::SemaphoreReady`] carries. Sound because a routine
/// holding such a descriptor implies whoever owns the semaphore keeps
/// it alive until the routine's wait resolves (the same lifetime
/// assumption [`Semaphore::token`] documents).
#[inline]
unsafe fn semaphore_from_token<'a>(token: u64) -> &'a Semaphore {
    &*(token as *const Semaphore)
}

/// One OS thread's share of the engine: its own ready queue, poller,
/// timer heap, and inbox, plus shared handles to post a routine id into
/// every other thread's inbox.
pub struct ThreadScheduler {
    worker_id: u32,
    config: EngineConfig,
    poller: RefCell<Poller>,
    timers: RefCell<TimerHeap>,
    ready: RefCell<VecDeque<RoutineId>>,
    inbox: Arc<Lcrq>,
    pop_handle: LcrqHandle,
    inboxes: Arc<Vec<Arc<Lcrq>>>,
    push_handles: Vec<LcrqHandle>,
    wake_events: Arc<Vec<OnceLock<WakeEventId>>>,
    slot_alloc: Arc<SlotAllocator>,
    alive: Arc<AtomicUsize>,
    shutting_down: Cell<bool>,
}

impl ThreadScheduler {
    /// Build the scheduler for worker `worker_id`. `inboxes` and
    /// `wake_events` are shared process-wide (one slot per worker,
    /// indexed by worker id); this worker's own poller registers the
    /// event other threads fire to wake it after posting into its inbox.
    pub fn new(
        worker_id: u32,
        config: EngineConfig,
        inboxes: Arc<Vec<Arc<Lcrq>>>,
        wake_events: Arc<Vec<OnceLock<WakeEventId>>>,
        slot_alloc: Arc<SlotAllocator>,
        alive: Arc<AtomicUsize>,
    ) -> std::io::Result<Self> {
        let n = inboxes.len();
        let mut poller = Poller::new(config.poller_max_events)?;
        let wake_id = poller.register_event(0)?;
        wake_events[worker_id as usize]
            .set(wake_id)
            .unwrap_or_else(|_| panic!("wake event already set for worker {worker_id}"));

        Ok(Self {
            worker_id,
            inbox: inboxes[worker_id as usize].clone(),
            config,
            poller: RefCell::new(poller),
            timers: RefCell::new(TimerHeap::new()),
            ready: RefCell::new(VecDeque::new()),
            pop_handle: LcrqHandle::new(),
            inboxes,
            push_handles: (0..n).map(|_| LcrqHandle::new()).collect(),
            wake_events,
            slot_alloc,
            alive,
            shutting_down: Cell::new(false),
        })
    }

    pub fn worker_id(&self) -> u32 {
        self.worker_id
    }

    /// Hand a new routine's slot to its owning thread's ready queue,
    /// local or remote.
    pub fn spawn(&self, owner_thread: u32, parent: RoutineId, f: routine::RoutineFn) -> SchedResult<RoutineId> {
        let id = self.slot_alloc.allocate()?;
        routine::prepare(id, parent, owner_thread, f)?;
        self.alive.fetch_add(1, Ordering::Relaxed);
        if owner_thread == self.worker_id {
            self.ready.borrow_mut().push_back(id);
        } else {
            self.post_to(owner_thread, id);
        }
        Ok(id)
    }

    fn post_to(&self, target: u32, id: RoutineId) {
        self.inboxes[target as usize].push(&self.push_handles[target as usize], encode_schedule(id));
        if let Some(w) = self.wake_events[target as usize].get() {
            Poller::send_event(*w);
        }
    }

    /// Ask every worker (including this one) to shut down once its
    /// ready queue drains and no routine remains alive.
    pub fn broadcast_shutdown(&self) {
        for (i, inbox) in self.inboxes.iter().enumerate() {
            inbox.push(&self.push_handles[i], shutdown_command());
            if let Some(w) = self.wake_events[i].get() {
                Poller::send_event(*w);
            }
        }
    }

    fn mark_runnable_local(&self, id: RoutineId, prev: PreviousStatus) {
        let meta = get_meta(id);
        let status = meta.get_status();
        if status != RoutineStatus::WaitingEvents && status != RoutineStatus::New {
            return;
        }
        self.timers.borrow_mut().cancel(id);
        meta.set_previous_status(prev);
        meta.set_status(RoutineStatus::Yielding);
        self.ready.borrow_mut().push_back(id);
    }

    /// Run this thread's scheduler loop until shutdown has been
    /// requested and every routine it owns has finished. Installs
    /// itself as the thread-local [`RoutineParker`] for the duration.
    pub fn run(&self) {
        unsafe { set_current_parker(self as *const dyn RoutineParker) };

        loop {
            self.drain_inbox();
            self.drain_expired_timers();
            self.drain_ready();

            if self.shutting_down.get() && self.alive.load(Ordering::Relaxed) == 0 {
                break;
            }

            let timeout = self
                .timers
                .borrow()
                .next_timeout_ms()
                .unwrap_or(self.config.poller_idle_timeout_ms);
            let (reason, results) = self.poller.borrow_mut().run_once(self.config.poller_max_events, timeout);
            if matches!(reason, LoopReason::MaxIterReached) {
                ktrace!("worker {} hit poller_max_events this tick", self.worker_id);
            }
            for result in results {
                self.handle_poll_result(result);
            }
        }

        clear_current_parker();
    }

    fn drain_inbox(&self) {
        while let Some(val) = self.inbox.pop(&self.pop_handle) {
            match decode_command(val) {
                Command::Schedule(id) => self.mark_runnable_local(id, PreviousStatus::EventFired),
                Command::Shutdown => self.shutting_down.set(true),
            }
        }
    }

    fn drain_expired_timers(&self) {
        let expired = self.timers.borrow_mut().pop_expired();
        for id in expired {
            let meta = get_meta(id);
            if meta.get_status() == RoutineStatus::WaitingEvents {
                meta.set_previous_status(PreviousStatus::TimedOut);
                meta.set_status(RoutineStatus::Yielding);
                self.ready.borrow_mut().push_back(id);
            }
        }
    }

    fn drain_ready(&self) {
        while let Some(id) = self.ready.borrow_mut().pop_front() {
            routine::resume(id);
            let meta = get_meta(id);
            match meta.get_status() {
                RoutineStatus::Finished => {
                    if let Err(e) = routine::retire(&self.slot_alloc, id) {
                        kdebug!("failed to retire routine {:?}: {e}", id);
                    }
                    self.alive.fetch_sub(1, Ordering::Relaxed);
                }
                RoutineStatus::Yielding => self.ready.borrow_mut().push_back(id),
                _ => {}
            }
        }
    }

    fn handle_poll_result(&self, result: PollResult) {
        let (data, prev) = match result {
            PollResult::UserEvent { .. } => return,
            PollResult::FdReady { data, .. } => (data, PreviousStatus::EventFired),
            PollResult::FdPanic { data, .. } => (data, PreviousStatus::FdPanic),
        };
        let (id, idx) = decode_fd_token(data);
        let meta = get_meta(id);
        meta.happened_event.store(idx, Ordering::Relaxed);
        meta.set_previous_status(prev);
        self.timers.borrow_mut().cancel(id);
        meta.set_status(RoutineStatus::Yielding);
        self.ready.borrow_mut().push_back(id);
    }
}

impl RoutineParker for ThreadScheduler {
    fn current_routine(&self) -> Option<RoutineId> {
        tls::current_routine_id().to_option()
    }

    fn park_current(&self) {
        let id = self.current_routine().expect("park_current outside routine context");
        get_meta(id).set_status(RoutineStatus::WaitingEvents);
        routine::switch_out(id);
    }

    fn park_current_timeout(&self, timeout_ms: i64) -> bool {
        let id = self.current_routine().expect("park_current_timeout outside routine context");
        let meta = get_meta(id);
        meta.set_previous_status(PreviousStatus::None);
        meta.set_status(RoutineStatus::WaitingEvents);
        self.timers.borrow_mut().arm(id, timeout_ms);
        routine::switch_out(id);
        get_meta(id).get_previous_status() != PreviousStatus::TimedOut
    }

    fn unpark(&self, id: RoutineId) {
        let owner = get_meta(id).owner_thread();
        if owner == self.worker_id {
            self.mark_runnable_local(id, PreviousStatus::EventFired);
        } else {
            self.post_to(owner, id);
        }
    }

    fn await_events(&self, descriptors: &mut [EventDescriptor<'_>]) -> EventOutcome {
        let id = self.current_routine().expect("await_events outside routine context");
        let meta = get_meta(id);
        meta.happened_event.store(NO_FD_FIRED, Ordering::Relaxed);
        meta.set_previous_status(PreviousStatus::None);

        let mut timer_timeout_ms: Option<i64> = None;
        for (idx, d) in descriptors.iter().enumerate() {
            match d {
                EventDescriptor::Timer { timeout_ms } => timer_timeout_ms = Some(*timeout_ms),
                EventDescriptor::ReadReady { fd } => {
                    let _ = self.poller.borrow_mut().request_read(*fd, encode_fd_token(id, idx));
                }
                EventDescriptor::WriteReady { fd } => {
                    let _ = self.poller.borrow_mut().request_write(*fd, encode_fd_token(id, idx));
                }
                EventDescriptor::SemaphoreReady { token } | EventDescriptor::ChannelClaim { token, .. } => {
                    unsafe { semaphore_from_token(*token) }.register_select_waiter(id);
                }
            }
        }

        meta.set_status(RoutineStatus::WaitingEvents);
        if let Some(ms) = timer_timeout_ms {
            self.timers.borrow_mut().arm(id, ms);
        }
        routine::switch_out(id);

        let outcome = self.resolve_round(id, descriptors);
        self.withdraw_unselected(descriptors, &outcome, id);
        self.timers.borrow_mut().cancel(id);
        outcome
    }
}

impl ThreadScheduler {
    /// Determine which descriptor (if any) won the round that just
    /// resumed this routine. A [`EventDescriptor::ChannelClaim`] "wins"
    /// only if its `claim` closure actually succeeds — which performs the
    /// channel's buffered-value handoff as part of the same step that
    /// consumes its semaphore permit, so a won claim never orphans a
    /// value the way a bare `try_wait` on the channel's semaphore would.
    fn resolve_round(&self, id: RoutineId, descriptors: &mut [EventDescriptor<'_>]) -> EventOutcome {
        let meta = get_meta(id);
        match meta.get_previous_status() {
            PreviousStatus::TimedOut => EventOutcome::TimedOut,
            PreviousStatus::FdPanic => {
                EventOutcome::FdPanic(CoreEventId(meta.happened_event.load(Ordering::Relaxed) as u32))
            }
            PreviousStatus::None | PreviousStatus::EventFired => {
                let fired_idx = meta.happened_event.load(Ordering::Relaxed);
                if fired_idx != NO_FD_FIRED {
                    return EventOutcome::Fired(CoreEventId(fired_idx as u32));
                }
                for (idx, d) in descriptors.iter_mut().enumerate() {
                    match d {
                        EventDescriptor::SemaphoreReady { token } => {
                            if unsafe { semaphore_from_token(*token) }.try_wait() {
                                return EventOutcome::Fired(CoreEventId(idx as u32));
                            }
                        }
                        EventDescriptor::ChannelClaim { claim, .. } => {
                            if claim() {
                                return EventOutcome::Fired(CoreEventId(idx as u32));
                            }
                        }
                        _ => {}
                    }
                }
                // Resumed with no cause we can identify (e.g. a spurious
                // cross-thread wake); report a timeout rather than
                // fabricate a winner.
                EventOutcome::TimedOut
            }
        }
    }

    fn withdraw_unselected(&self, descriptors: &[EventDescriptor<'_>], outcome: &EventOutcome, id: RoutineId) {
        let winner = match *outcome {
            EventOutcome::Fired(CoreEventId(w)) | EventOutcome::FdPanic(CoreEventId(w)) => Some(w as usize),
            EventOutcome::TimedOut => None,
        };
        for (idx, d) in descriptors.iter().enumerate() {
            if Some(idx) == winner {
                continue;
            }
            match d {
                EventDescriptor::Timer { .. } => {}
                EventDescriptor::ReadReady { fd } => self.poller.borrow_mut().cancel_read(*fd),
                EventDescriptor::WriteReady { fd } => self.poller.borrow_mut().cancel_write(*fd),
                EventDescriptor::SemaphoreReady { token } | EventDescriptor::ChannelClaim { token, .. } => {
                    unsafe { semaphore_from_token(*token) }.withdraw_select_waiter(id);
                }
            }
        }
    }
}

/// Entered from `arch::{x86_64,aarch64}::routine_finished` once a
/// routine's body returns. Marks it finished and hands control back to
/// this thread's scheduler loop; never returns to its caller.
pub fn routine_entry_returned() {
    let base = tls::current_routine_base();
    debug_assert!(!base.is_null(), "routine_entry_returned called outside routine context");
    let meta = unsafe { &*(base as *const RoutineMetadata) };
    meta.set_status(RoutineStatus::Finished);

    let sched_ctx = tls::scheduler_ctx_ptr();
    let routine_regs = unsafe { &meta.voluntary_regs as *const _ as *mut _ };
    unsafe { current_arch::context_switch_voluntary(routine_regs, sched_ctx) };
}

/// Voluntary yield: give every other routine ready on this thread a
/// turn before resuming. A no-op outside routine context.
pub fn yield_now() {
    let id = tls::current_routine_id();
    if id.is_none() {
        return;
    }
    get_meta(id).set_status(RoutineStatus::Yielding);
    routine::switch_out(id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_roundtrip() {
        let id = RoutineId::new(42);
        match decode_command(encode_schedule(id)) {
            Command::Schedule(got) => assert_eq!(got, id),
            Command::Shutdown => panic!("expected Schedule"),
        }
        match decode_command(shutdown_command()) {
            Command::Shutdown => {}
            Command::Schedule(_) => panic!("expected Shutdown"),
        }
    }

    #[test]
    fn test_fd_token_roundtrip() {
        let id = RoutineId::new(7);
        let token = encode_fd_token(id, 3);
        let (got_id, got_idx) = decode_fd_token(token);
        assert_eq!(got_id, id);
        assert_eq!(got_idx, 3);
    }
}
