//! Event rounds — the data model behind `select_any`
//!
//! A routine that wants to wait on more than one thing at once (a
//! timeout and a socket read, two channels, a semaphore and a timer...)
//! declares every condition it's willing to wait for as an
//! [`EventDescriptor`], in order, then commits the round. Exactly one
//! descriptor fires; the others are withdrawn. Declaration order is the
//! tie-break when more than one condition is already satisfied at
//! commit time.
//!
//! This module only defines the descriptor/outcome vocabulary and the
//! builder that accumulates a round. Actually waiting on it — registering
//! fds with the poller, arming timers, threading through the semaphore
//! waiter queue — is the thread scheduler's job, reached through
//! [`crate::traits::RoutineParker::await_events`].

use crate::channel::{Receiver, Sender};
use crate::traits::with_current_parker;

/// Index of a descriptor within one event round, in declaration order.
/// Used both to identify which descriptor fired and to break ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub u32);

/// One condition a routine is willing to wait for as part of a round.
///
/// Not `Copy`/`Clone`: [`EventDescriptor::ChannelClaim`] owns the closure
/// that performs the channel's value handoff, which only makes sense to
/// run once.
pub enum EventDescriptor<'a> {
    /// Fires after `timeout_ms` elapses (unconditionally).
    Timer { timeout_ms: i64 },
    /// Fires when `fd` becomes readable.
    ReadReady { fd: i32 },
    /// Fires when `fd` becomes writable.
    WriteReady { fd: i32 },
    /// Fires when the semaphore identified by `token` (see
    /// [`crate::semaphore::Semaphore::token`]) has a permit available.
    SemaphoreReady { token: u64 },
    /// Fires when `claim` can atomically take the slot `token` guards: a
    /// buffered value to read out of a channel, or a free slot to write
    /// a value into one. `token` is what a round parks the routine on
    /// (the channel's `readers_slots`/`writer_slots` semaphore); `claim`
    /// is what actually moves the value, so a permit this descriptor
    /// wins is never consumed without its value moving too.
    ChannelClaim { token: u64, claim: Box<dyn FnMut() -> bool + 'a> },
}

impl std::fmt::Debug for EventDescriptor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventDescriptor::Timer { timeout_ms } => f.debug_struct("Timer").field("timeout_ms", timeout_ms).finish(),
            EventDescriptor::ReadReady { fd } => f.debug_struct("ReadReady").field("fd", fd).finish(),
            EventDescriptor::WriteReady { fd } => f.debug_struct("WriteReady").field("fd", fd).finish(),
            EventDescriptor::SemaphoreReady { token } => f.debug_struct("SemaphoreReady").field("token", token).finish(),
            EventDescriptor::ChannelClaim { token, .. } => f.debug_struct("ChannelClaim").field("token", token).finish(),
        }
    }
}

/// Build the descriptor behind reading a value out of a channel as one
/// arm of a select round: fires once `rx.try_recv()` succeeds, which
/// pops the buffered value and writes it into `out` in the same step
/// that claims the permit — there is no window where a permit is won
/// but its value isn't.
pub fn channel_read_descriptor<'a, T: 'a>(rx: &Receiver<T>, out: &'a mut Option<T>) -> EventDescriptor<'a> {
    let token = rx.read_token();
    let rx = rx.clone();
    EventDescriptor::ChannelClaim {
        token,
        claim: Box::new(move || match rx.try_recv() {
            Ok(v) => {
                *out = Some(v);
                true
            }
            Err(_) => false,
        }),
    }
}

/// Build the descriptor behind writing `value` into a channel as one arm
/// of a select round: fires once `tx.try_send()` succeeds.
pub fn channel_write_descriptor<'a, T: 'a>(tx: &Sender<T>, value: T) -> EventDescriptor<'a> {
    let token = tx.write_token();
    let tx = tx.clone();
    let mut slot = Some(value);
    EventDescriptor::ChannelClaim {
        token,
        claim: Box::new(move || {
            let v = slot.take().expect("channel write event claimed twice");
            match tx.try_send(v) {
                Ok(()) => true,
                Err(e) => {
                    slot = Some(e.0);
                    false
                }
            }
        }),
    }
}

/// What committing a round produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Descriptor `EventId` became ready and was claimed.
    Fired(EventId),
    /// No descriptor fired before its timer descriptor (if any) expired,
    /// or the round had no timer and the scheduler gave up per
    /// `max_iter`.
    TimedOut,
    /// The fd behind `EventId` was marked unusable (remote close,
    /// `EPOLLERR`) while this round was pending.
    FdPanic(EventId),
}

/// Accumulates descriptors for one `select_any`-style wait.
///
/// Built with [`start_event_round`], extended with `add_*`, consumed by
/// [`EventRound::commit_event_round`].
pub struct EventRound<'a> {
    descriptors: Vec<EventDescriptor<'a>>,
}

/// Begin a new event round for the calling routine.
pub fn start_event_round<'a>() -> EventRound<'a> {
    EventRound { descriptors: Vec::new() }
}

impl<'a> EventRound<'a> {
    fn push(&mut self, d: EventDescriptor<'a>) -> EventId {
        let id = EventId(self.descriptors.len() as u32);
        self.descriptors.push(d);
        id
    }

    /// Declare an already-built descriptor. Used by callers (e.g. the
    /// public facade's `select_any`) that assemble descriptors — possibly
    /// pairing each with its own handler — before there's a round to add
    /// them to.
    pub fn add_descriptor(&mut self, d: EventDescriptor<'a>) -> EventId {
        self.push(d)
    }

    /// Declare a timeout condition; fires unconditionally after
    /// `timeout_ms`.
    pub fn add_timer(&mut self, timeout_ms: i64) -> EventId {
        self.push(EventDescriptor::Timer { timeout_ms })
    }

    /// Declare "fd becomes readable".
    pub fn add_read(&mut self, fd: i32) -> EventId {
        self.push(EventDescriptor::ReadReady { fd })
    }

    /// Declare "fd becomes writable".
    pub fn add_write(&mut self, fd: i32) -> EventId {
        self.push(EventDescriptor::WriteReady { fd })
    }

    /// Declare "a permit is available on this semaphore".
    pub fn add_semaphore_wait(&mut self, token: u64) -> EventId {
        self.push(EventDescriptor::SemaphoreReady { token })
    }

    /// Declare "a value can be read from this channel"; on success, the
    /// value is popped out of the channel and written into `out` as part
    /// of the same claim that wins the round (see
    /// [`channel_read_descriptor`]).
    pub fn add_channel_read<T: 'a>(&mut self, rx: &Receiver<T>, out: &'a mut Option<T>) -> EventId {
        self.push(channel_read_descriptor(rx, out))
    }

    /// Declare "a slot is free to write `value` into this channel" (see
    /// [`channel_write_descriptor`]).
    pub fn add_channel_write<T: 'a>(&mut self, tx: &Sender<T>, value: T) -> EventId {
        self.push(channel_write_descriptor(tx, value))
    }

    /// How many descriptors have been declared so far.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Park the calling routine until exactly one declared condition
    /// fires, then return which.
    ///
    /// Outside routine context (no scheduler installed) this always
    /// returns [`EventOutcome::TimedOut`] — there is nothing to park.
    pub fn commit_event_round(self) -> EventOutcome {
        let mut descriptors = self.descriptors;
        with_current_parker(|p| p.await_events(&mut descriptors)).unwrap_or(EventOutcome::TimedOut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declaration_order_assigns_ids() {
        let mut round = start_event_round();
        let a = round.add_timer(10);
        let b = round.add_read(3);
        let c = round.add_write(4);
        assert_eq!(a, EventId(0));
        assert_eq!(b, EventId(1));
        assert_eq!(c, EventId(2));
        assert_eq!(round.len(), 3);
    }

    #[test]
    fn test_commit_without_scheduler_times_out() {
        let mut round = start_event_round();
        round.add_timer(5);
        assert_eq!(round.commit_event_round(), EventOutcome::TimedOut);
    }
}
