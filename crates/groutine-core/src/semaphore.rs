//! Counting semaphore
//!
//! The building block behind [`crate::mutex::SchedMutex`] (a semaphore of
//! capacity 1) and [`crate::channel`] (a pair of semaphores guarding the
//! free/filled slot counts of a bounded ring). `wait`/`post` never block
//! the OS thread: a routine that would block instead parks itself through
//! [`crate::traits::RoutineParker`] and is woken by whichever `post` call
//! hands it the permit.
//!
//! `wait`'s default timeout of `-1` means "wait forever" — callers must
//! pass a timeout explicitly to get a bounded wait; there is no separate
//! "tryless" overload, matching the single-signature design carried over
//! from the synchronization primitives this was modeled on.

use std::collections::VecDeque;
use core::sync::atomic::{AtomicI64, Ordering};

use crate::error::{SchedError, SchedResult};
use crate::id::RoutineId;
use crate::spinlock::SpinLock;
use crate::traits::with_current_parker;

/// A counting semaphore usable from routine context.
pub struct Semaphore {
    count: AtomicI64,
    waiters: SpinLock<VecDeque<RoutineId>>,
}

impl Semaphore {
    /// Create a semaphore with `initial` permits available.
    pub const fn new(initial: i64) -> Self {
        Self { count: AtomicI64::new(initial), waiters: SpinLock::new(VecDeque::new()) }
    }

    /// Current permit count. Negative values are not possible; a count
    /// of 0 means the next `wait` will block.
    pub fn count(&self) -> i64 {
        self.count.load(Ordering::Acquire)
    }

    /// Acquire a permit, parking the calling routine if none are
    /// available. `timeout_ms` of `-1` waits forever; `0` is equivalent
    /// to [`Semaphore::try_wait`].
    ///
    /// Returns `Err(SchedError::Timeout)` if `timeout_ms` elapses first.
    pub fn wait(&self, timeout_ms: i64) -> SchedResult<()> {
        if self.try_wait() {
            return Ok(());
        }
        if timeout_ms == 0 {
            return Err(SchedError::Timeout);
        }

        let parker = match with_current_parker(|_| ()) {
            Some(()) => (),
            None => {
                // Not running inside a scheduled routine (e.g. a plain
                // OS thread in a test): degrade to a bounded spin-wait.
                return self.wait_spin(timeout_ms);
            }
        };
        let _ = parker;

        loop {
            let id = with_current_parker(|p| p.current_routine())
                .flatten()
                .expect("wait() called outside routine context after parker check");
            self.waiters.lock().push_back(id);

            // Re-check after enqueueing: a racing `post` may have fired
            // between our failed `try_wait` and joining the queue.
            if self.try_wait() {
                self.remove_waiter(id);
                return Ok(());
            }

            let woken = with_current_parker(|p| {
                if timeout_ms < 0 {
                    p.park_current();
                    true
                } else {
                    p.park_current_timeout(timeout_ms)
                }
            })
            .unwrap_or(false);

            if !woken {
                self.remove_waiter(id);
                return Err(SchedError::Timeout);
            }
            if self.try_wait() {
                return Ok(());
            }
            // Spurious wake (woken for an unrelated reason); loop and
            // rejoin the waiter queue.
        }
    }

    fn wait_spin(&self, timeout_ms: i64) -> SchedResult<()> {
        let deadline = if timeout_ms < 0 {
            None
        } else {
            Some(std::time::Instant::now() + std::time::Duration::from_millis(timeout_ms as u64))
        };
        loop {
            if self.try_wait() {
                return Ok(());
            }
            if let Some(d) = deadline {
                if std::time::Instant::now() >= d {
                    return Err(SchedError::Timeout);
                }
            }
            std::thread::yield_now();
        }
    }

    fn remove_waiter(&self, id: RoutineId) {
        let mut waiters = self.waiters.lock();
        if let Some(pos) = waiters.iter().position(|&w| w == id) {
            waiters.remove(pos);
        }
    }

    /// Try to acquire a permit without parking; `true` on success.
    pub fn try_wait(&self) -> bool {
        let mut cur = self.count.load(Ordering::Acquire);
        loop {
            if cur <= 0 {
                return false;
            }
            match self.count.compare_exchange_weak(cur, cur - 1, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Opaque identity used to name this semaphore in an
    /// [`crate::event::EventDescriptor::SemaphoreReady`]. Stable for the
    /// semaphore's lifetime; two semaphores never share a token.
    pub fn token(&self) -> u64 {
        self as *const Self as u64
    }

    /// Release a permit, waking the longest-waiting routine if any.
    pub fn post(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
        if let Some(id) = self.waiters.lock().pop_front() {
            with_current_parker(|p| p.unpark(id));
        }
    }

    /// Join the waiter queue without parking — used by an event round
    /// (`select_any`) that names this semaphore's token as one of several
    /// descriptors. The scheduler does the actual suspension; a later
    /// `post()` wakes this routine the same way a direct `wait()` would.
    pub fn register_select_waiter(&self, id: RoutineId) {
        self.waiters.lock().push_back(id);
    }

    /// Withdraw a previously-registered select waiter, e.g. because a
    /// different descriptor of the same round fired first. `true` if `id`
    /// was found and removed.
    pub fn withdraw_select_waiter(&self, id: RoutineId) -> bool {
        let mut waiters = self.waiters.lock();
        if let Some(pos) = waiters.iter().position(|&w| w == id) {
            waiters.remove(pos);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_waiter_withdraw_roundtrip() {
        let sem = Semaphore::new(0);
        let id = RoutineId::new(3);
        sem.register_select_waiter(id);
        assert!(sem.withdraw_select_waiter(id));
        assert!(!sem.withdraw_select_waiter(id), "second withdraw finds nothing");
    }

    #[test]
    fn test_try_wait_respects_count() {
        let sem = Semaphore::new(1);
        assert!(sem.try_wait());
        assert!(!sem.try_wait());
        sem.post();
        assert!(sem.try_wait());
    }

    #[test]
    fn test_wait_zero_timeout_fails_fast() {
        let sem = Semaphore::new(0);
        assert!(matches!(sem.wait(0), Err(SchedError::Timeout)));
    }

    #[test]
    fn test_wait_outside_routine_context_spins_until_post() {
        let sem = std::sync::Arc::new(Semaphore::new(0));
        let sem2 = std::sync::Arc::clone(&sem);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            sem2.post();
        });
        assert!(sem.wait(1000).is_ok());
        handle.join().unwrap();
    }

    #[test]
    fn test_count_reflects_posts_and_waits() {
        let sem = Semaphore::new(0);
        sem.post();
        sem.post();
        assert_eq!(sem.count(), 2);
        assert!(sem.try_wait());
        assert_eq!(sem.count(), 1);
    }
}
