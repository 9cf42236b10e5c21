//! # groutine
//!
//! Public facade over `groutine-core` + `groutine-runtime`: a user-space
//! M:N coroutine runtime. Spin up an [`Engine`] with [`run`], `start()`
//! more routines from inside it, and use the blocking-style wrappers
//! (`read`/`write`/`recv`/`send`/`accept`/`connect`, `sleep`, the sync
//! primitives) exactly as if each routine owned its own OS thread — the
//! scheduler parks the routine and frees the underlying thread instead.
//!
//! ## Quick start
//!
//! ```ignore
//! use groutine::{run, start, channel};
//!
//! run(4, || {
//!     let (tx, rx) = channel::<i32>(1);
//!     start(move || { tx.send(42).unwrap(); });
//!     assert_eq!(rx.recv().unwrap(), 42);
//! });
//! ```

#![allow(dead_code)]

pub use groutine_core::{
    channel, env_get, env_get_bool, env_get_opt, env_get_str, kdebug, kerror, kinfo, ktrace, kwarn,
    PreviousStatus, Receiver, RoutineId, RoutineStatus, SchedError, SchedMutex, SchedResult, Sender,
};
pub use groutine_core::event::{
    channel_read_descriptor, channel_write_descriptor, start_event_round, EventDescriptor, EventId, EventOutcome,
    EventRound,
};
pub use groutine_core::kprint::{self, init as init_logging, set_flush_enabled, set_log_level, set_time_enabled, LogLevel};
pub use groutine_core::semaphore::Semaphore;

pub use groutine_runtime::{ConfigError, Engine, EngineConfig};

use groutine_runtime::routine::RoutineFn;
use groutine_runtime::{tls, yield_now as runtime_yield_now};

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

/// fd was marked unusable (remote close, `EPOLLERR`/`EPOLLHUP`) while a
/// routine waited on it.
pub const CODE_FD_PANIC: i32 = -100;
/// A wait's deadline elapsed before anything else fired.
pub const CODE_TIMEOUT: i32 = -101;

static ENGINE: OnceLock<Engine> = OnceLock::new();
static NEXT_WORKER: AtomicUsize = AtomicUsize::new(0);

fn current_engine() -> &'static Engine {
    ENGINE.get().expect("groutine::run() has not been called")
}

/// Construct an engine with `nb_cores` scheduler threads, start
/// `main_routine` as the first routine on it, and block the calling OS
/// thread until every routine spawned (directly or transitively) has
/// finished, then shut the engine down.
///
/// Only one engine may be running per process at a time.
pub fn run<F>(nb_cores: usize, main_routine: F)
where
    F: FnOnce() + Send + 'static,
{
    let config = EngineConfig::new().max_nb_cores(nb_cores);
    let engine = Engine::new(config).expect("failed to start engine");
    ENGINE.set(engine).ok().expect("groutine::run() called more than once");
    let engine = current_engine();

    engine
        .spawn_any(Box::new(main_routine))
        .expect("failed to start main routine");

    while engine.alive_count() > 0 {
        std::thread::sleep(Duration::from_millis(2));
    }
    engine.shutdown_and_join();
}

/// Spawn a new routine on the current engine: pinned to the calling
/// routine's own worker thread if called from inside one, otherwise
/// placed round-robin across workers.
pub fn start<F>(f: F) -> RoutineId
where
    F: FnOnce() + Send + 'static,
{
    let engine = current_engine();
    let owner = match tls::try_worker_id() {
        Some(w) => w,
        None => {
            let n = engine.config().max_nb_cores as u32;
            NEXT_WORKER.fetch_add(1, Ordering::Relaxed) as u32 % n
        }
    };
    let parent = tls::current_routine_id();
    let f: RoutineFn = Box::new(f);
    engine.spawn(owner, parent, f).expect("failed to spawn routine")
}

/// Voluntarily yield the current routine to the back of its thread's
/// ready queue. A no-op when called outside routine context.
#[inline]
pub fn yield_now() {
    runtime_yield_now()
}

/// Id of the routine currently running on this thread, or
/// [`RoutineId::NONE`] outside routine context.
#[inline]
pub fn current_id() -> RoutineId {
    tls::current_routine_id()
}

/// Park the calling routine for `ms` milliseconds. Built on the same
/// timeout machinery every other wait uses: a semaphore nobody ever
/// posts to, waited on with a deadline.
pub fn sleep(ms: i64) {
    let sem = Semaphore::new(0);
    let _ = sem.wait(ms);
}

fn would_block(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock)
}

/// Park the calling routine until `fd` is ready for the given direction
/// or `timeout_ms` elapses (negative = forever). Returns `Ok(())` on
/// readiness, `Err(CODE_TIMEOUT)` or `Err(CODE_FD_PANIC)` otherwise.
fn await_fd(fd: RawFd, write: bool, timeout_ms: i64) -> Result<(), i32> {
    let mut round = start_event_round();
    let io_event = if write { round.add_write(fd) } else { round.add_read(fd) };
    let timer_event = if timeout_ms >= 0 { Some(round.add_timer(timeout_ms)) } else { None };

    match round.commit_event_round() {
        EventOutcome::Fired(id) if id == io_event => Ok(()),
        EventOutcome::Fired(id) if Some(id) == timer_event => Err(CODE_TIMEOUT),
        EventOutcome::Fired(_) => Ok(()),
        EventOutcome::TimedOut => Err(CODE_TIMEOUT),
        EventOutcome::FdPanic(_) => Err(CODE_FD_PANIC),
    }
}

/// Retry `op` under readiness-driven parking until it succeeds or fails
/// with something other than `EAGAIN`/`EWOULDBLOCK`.
fn retrying<T>(fd: RawFd, write: bool, timeout_ms: i64, mut op: impl FnMut() -> io::Result<T>) -> i32
where
    T: TryInto<i32>,
{
    loop {
        match op() {
            Ok(n) => return n.try_into().unwrap_or(i32::MAX),
            Err(err) if would_block(&err) => match await_fd(fd, write, timeout_ms) {
                Ok(()) => continue,
                Err(code) => return code,
            },
            Err(err) => return -err.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

/// `read(2)`, parking the routine instead of the thread while `fd` is
/// not yet readable. Returns the POSIX result on success, [`CODE_TIMEOUT`]
/// or [`CODE_FD_PANIC`] otherwise.
pub fn read(fd: RawFd, buf: &mut [u8], timeout_ms: i64) -> i32 {
    retrying(fd, false, timeout_ms, || {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n >= 0 { Ok(n as usize) } else { Err(io::Error::last_os_error()) }
    })
}

/// `write(2)`, parking the routine instead of the thread while `fd` is
/// not yet writable.
pub fn write(fd: RawFd, buf: &[u8], timeout_ms: i64) -> i32 {
    retrying(fd, true, timeout_ms, || {
        let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        if n >= 0 { Ok(n as usize) } else { Err(io::Error::last_os_error()) }
    })
}

/// `recv(2)`.
pub fn recv(fd: RawFd, buf: &mut [u8], flags: i32, timeout_ms: i64) -> i32 {
    retrying(fd, false, timeout_ms, || {
        let n = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), flags) };
        if n >= 0 { Ok(n as usize) } else { Err(io::Error::last_os_error()) }
    })
}

/// `send(2)`.
pub fn send(fd: RawFd, buf: &[u8], flags: i32, timeout_ms: i64) -> i32 {
    retrying(fd, true, timeout_ms, || {
        let n = unsafe { libc::send(fd, buf.as_ptr() as *const libc::c_void, buf.len(), flags) };
        if n >= 0 { Ok(n as usize) } else { Err(io::Error::last_os_error()) }
    })
}

/// `accept4(2)` with `SOCK_NONBLOCK | SOCK_CLOEXEC`, parking the routine
/// until a connection arrives.
pub fn accept(listener_fd: RawFd, timeout_ms: i64) -> i32 {
    retrying(listener_fd, false, timeout_ms, || {
        let n = unsafe {
            libc::accept4(
                listener_fd,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            )
        };
        if n >= 0 { Ok(n as usize) } else { Err(io::Error::last_os_error()) }
    })
}

/// `connect(2)` on a non-blocking socket: initiates the connection, then
/// parks the routine on write-readiness, the standard way to learn a
/// non-blocking connect finished.
pub fn connect(fd: RawFd, addr: *const libc::sockaddr, addrlen: libc::socklen_t, timeout_ms: i64) -> i32 {
    let ret = unsafe { libc::connect(fd, addr, addrlen) };
    if ret == 0 {
        return 0;
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() != Some(libc::EINPROGRESS) {
        return -err.raw_os_error().unwrap_or(libc::EIO);
    }
    match await_fd(fd, true, timeout_ms) {
        Ok(()) => {
            let mut sockerr: libc::c_int = 0;
            let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
            let ret = unsafe {
                libc::getsockopt(
                    fd,
                    libc::SOL_SOCKET,
                    libc::SO_ERROR,
                    &mut sockerr as *mut _ as *mut libc::c_void,
                    &mut len,
                )
            };
            if ret != 0 {
                return -io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO);
            }
            if sockerr == 0 { 0 } else { -sockerr }
        }
        Err(code) => code,
    }
}

/// Construct a counting semaphore with `initial` permits.
pub fn semaphore(initial: i64) -> Semaphore {
    Semaphore::new(initial)
}

/// Construct a mutex around `value`.
pub fn mutex<T>(value: T) -> SchedMutex<T> {
    SchedMutex::new(value)
}

/// One arm of a [`select_any`] call: a condition to wait for, paired
/// with the handler to run if it's the one that fires. Built by
/// `event_read`/`event_write`/`event_timer`/`event_io_read`/`event_io_write`.
pub struct SelectEvent<'a> {
    descriptor: EventDescriptor<'a>,
    handler: Box<dyn FnOnce(bool) + 'a>,
    is_timer: bool,
}

/// Declare "fires after `timeout_ms` elapses and nothing else did" as a
/// [`select_any`] arm. Its handler runs with `false` — a timer winning
/// the round is the designated "nothing else happened" outcome, not a
/// successful wait.
pub fn event_timer<'a>(timeout_ms: i64, handler: impl FnOnce(bool) + 'a) -> SelectEvent<'a> {
    SelectEvent { descriptor: EventDescriptor::Timer { timeout_ms }, handler: Box::new(handler), is_timer: true }
}

/// Declare "`fd` becomes readable" as a [`select_any`] arm.
pub fn event_io_read<'a>(fd: RawFd, handler: impl FnOnce(bool) + 'a) -> SelectEvent<'a> {
    SelectEvent { descriptor: EventDescriptor::ReadReady { fd }, handler: Box::new(handler), is_timer: false }
}

/// Declare "`fd` becomes writable" as a [`select_any`] arm.
pub fn event_io_write<'a>(fd: RawFd, handler: impl FnOnce(bool) + 'a) -> SelectEvent<'a> {
    SelectEvent { descriptor: EventDescriptor::WriteReady { fd }, handler: Box::new(handler), is_timer: false }
}

/// Declare "a value can be read from `rx`" as a [`select_any`] arm. On
/// success the value is written into `out` before `handler` runs.
pub fn event_read<'a, T: 'a>(
    rx: &Receiver<T>,
    out: &'a mut Option<T>,
    handler: impl FnOnce(bool) + 'a,
) -> SelectEvent<'a> {
    SelectEvent { descriptor: channel_read_descriptor(rx, out), handler: Box::new(handler), is_timer: false }
}

/// Declare "a slot is free to write `value` into `tx`" as a
/// [`select_any`] arm.
pub fn event_write<'a, T: 'a>(tx: &Sender<T>, value: T, handler: impl FnOnce(bool) + 'a) -> SelectEvent<'a> {
    SelectEvent { descriptor: channel_write_descriptor(tx, value), handler: Box::new(handler), is_timer: false }
}

/// Park the calling routine until exactly one of `events` fires, then
/// invoke that arm's handler with `true` (or `false` for a timer arm
/// that fired because nothing else did, or an io arm whose fd panicked)
/// before returning the raw outcome. Declaration order breaks ties
/// between arms that are already satisfied when the round commits.
pub fn select_any(events: Vec<SelectEvent<'_>>) -> EventOutcome {
    let mut round = start_event_round();
    let mut timer_idx = None;
    let mut handlers: Vec<Option<Box<dyn FnOnce(bool) + '_>>> = Vec::with_capacity(events.len());
    for (idx, event) in events.into_iter().enumerate() {
        if event.is_timer {
            timer_idx = Some(idx);
        }
        round.add_descriptor(event.descriptor);
        handlers.push(Some(event.handler));
    }

    let outcome = round.commit_event_round();
    match outcome {
        EventOutcome::Fired(EventId(idx)) => {
            if let Some(h) = handlers.get_mut(idx as usize).and_then(Option::take) {
                h(true);
            }
        }
        EventOutcome::FdPanic(EventId(idx)) => {
            if let Some(h) = handlers.get_mut(idx as usize).and_then(Option::take) {
                h(false);
            }
        }
        EventOutcome::TimedOut => {
            if let Some(h) = timer_idx.and_then(|idx| handlers.get_mut(idx)).and_then(Option::take) {
                h(false);
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;
    use std::sync::Arc;

    #[test]
    fn test_rendezvous_channel() {
        let result = Arc::new(AtomicI32::new(0));
        let r2 = result.clone();
        run(2, move || {
            let (tx, rx) = channel::<i32>(1);
            start(move || {
                tx.send(42).unwrap();
            });
            let v = rx.recv().unwrap();
            r2.store(v, Ordering::SeqCst);
        });
        assert_eq!(result.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn test_mutex_contention() {
        let counter = Arc::new(SchedMutex::new(0u64));
        let done = Arc::new(AtomicI32::new(0));
        let c2 = counter.clone();
        let d2 = done.clone();
        run(4, move || {
            for _ in 0..16 {
                let counter = c2.clone();
                start(move || {
                    for _ in 0..10_000 {
                        let mut guard = counter.lock().unwrap();
                        *guard += 1;
                    }
                });
            }
            loop {
                if *c2.lock().unwrap() == 160_000 {
                    break;
                }
                yield_now();
            }
            d2.store(1, Ordering::SeqCst);
        });
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(*counter.lock().unwrap(), 160_000);
    }

    #[test]
    fn test_select_any_reads_two_channels_declaration_order_breaks_tie() {
        let winner = Arc::new(AtomicI32::new(-1));
        let w2 = winner.clone();
        run(1, move || {
            let (tx_a, rx_a) = channel::<i32>(1);
            let (_tx_b, rx_b) = channel::<i32>(1);
            tx_a.try_send(7).unwrap();

            let mut out_a = None;
            let mut out_b = None;
            let outcome = select_any(vec![
                event_read(&rx_a, &mut out_a, |_| w2.store(0, Ordering::SeqCst)),
                event_read(&rx_b, &mut out_b, |_| w2.store(1, Ordering::SeqCst)),
            ]);
            assert_eq!(outcome, EventOutcome::Fired(EventId(0)));
            assert_eq!(out_a, Some(7));
            assert_eq!(out_b, None);
        });
        assert_eq!(winner.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_select_any_write_then_read_round_trips_value() {
        let result = Arc::new(AtomicI32::new(0));
        let r2 = result.clone();
        run(1, move || {
            let (tx, rx) = channel::<i32>(1);
            let wrote = Arc::new(AtomicI32::new(0));
            let w2 = wrote.clone();
            let outcome = select_any(vec![event_write(&tx, 99, move |ok| {
                w2.store(ok as i32, Ordering::SeqCst);
            })]);
            assert_eq!(outcome, EventOutcome::Fired(EventId(0)));
            assert_eq!(wrote.load(Ordering::SeqCst), 1);
            r2.store(rx.try_recv().unwrap(), Ordering::SeqCst);
        });
        assert_eq!(result.load(Ordering::SeqCst), 99);
    }

    #[test]
    fn test_select_any_times_out_with_no_other_events_ready() {
        let fired = Arc::new(AtomicI32::new(-1));
        let f2 = fired.clone();
        run(1, move || {
            let (_tx, rx) = channel::<i32>(1);
            let mut out = None;
            let outcome = select_any(vec![
                event_read(&rx, &mut out, |_| f2.store(1, Ordering::SeqCst)),
                event_timer(20, move |ok| f2.store(ok as i32, Ordering::SeqCst)),
            ]);
            assert_eq!(outcome, EventOutcome::TimedOut);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
