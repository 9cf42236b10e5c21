//! Event poller
//!
//! Wraps the host's readiness multiplexer (`epoll` on Linux). One poller
//! per thread scheduler. Events are one-shot: the caller re-arms a fd's
//! interest every time it wants to wait on it again, which is exactly
//! the shape a routine's `start_event_round()`/`commit_event_round()`
//! pair needs — no accumulated level-triggered readiness to drain.
//!
//! `run_once` returns a plain `Vec<PollResult>` rather than taking a
//! callback: the scheduler needs to mutate the very same poller while
//! reacting to one of its events (e.g. cancelling a sibling fd's
//! interest when the other half of a two-descriptor round fires), which
//! a callback invoked from inside the poller's own `&mut self` borrow
//! cannot do without re-entrancy.

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod linux;
        pub use linux::Poller;
    } else {
        compile_error!("Unsupported platform: the event poller is implemented for Linux only");
    }
}

/// Opaque identity for a user-wakeable event registered via
/// [`Poller::register_event`]. Cheap to copy across threads: firing it
/// via [`Poller::send_event`] only needs the raw fd number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventId(pub std::os::unix::io::RawFd);

/// Why [`Poller::run_once`] returned control to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopReason {
    /// `timeout_ms` elapsed with nothing ready.
    TimedOut,
    /// Every event `epoll_wait` returned was dispatched, strictly fewer
    /// than the `max_iter` bound — not named in the distilled
    /// vocabulary but the common case, so it gets its own variant rather
    /// than overloading `MaxIterReached`.
    Dispatched(usize),
    /// Exactly `max_iter` events were ready; more may still be pending.
    MaxIterReached,
}

/// One dispatched readiness event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    /// A user event fired (see [`Poller::register_event`] /
    /// [`Poller::send_event`]).
    UserEvent { data: u64 },
    /// `fd` is ready for the direction(s) it was armed for.
    FdReady { fd: std::os::unix::io::RawFd, data: u64, readable: bool, writable: bool },
    /// `fd` was marked unusable (remote close, `EPOLLERR`/`EPOLLHUP`)
    /// while one or both directions were armed.
    FdPanic { fd: std::os::unix::io::RawFd, data: u64 },
}
