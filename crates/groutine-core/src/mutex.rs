//! Routine-aware mutex
//!
//! A mutex is a [`Semaphore`] of capacity 1. Unlike `std::sync::Mutex`,
//! a contended `lock()` parks the calling routine instead of blocking
//! the OS thread, so the scheduler can keep running other routines on
//! the same thread while the holder finishes its critical section.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

use crate::error::SchedResult;
use crate::semaphore::Semaphore;

/// A mutex that parks the calling routine when contended.
pub struct SchedMutex<T> {
    sem: Semaphore,
    data: UnsafeCell<T>,
}

// Safety: SchedMutex provides exclusive access to T via the semaphore.
unsafe impl<T: Send> Send for SchedMutex<T> {}
unsafe impl<T: Send> Sync for SchedMutex<T> {}

impl<T> SchedMutex<T> {
    /// Create a new mutex containing the given value.
    pub const fn new(value: T) -> Self {
        Self { sem: Semaphore::new(1), data: UnsafeCell::new(value) }
    }

    /// Acquire the lock, parking the calling routine if contended.
    pub fn lock(&self) -> SchedResult<SchedMutexGuard<'_, T>> {
        self.sem.wait(-1)?;
        Ok(SchedMutexGuard { mutex: self })
    }

    /// Acquire the lock, parking at most `timeout_ms` before giving up.
    pub fn lock_timeout(&self, timeout_ms: i64) -> SchedResult<SchedMutexGuard<'_, T>> {
        self.sem.wait(timeout_ms)?;
        Ok(SchedMutexGuard { mutex: self })
    }

    /// Try to acquire the lock without parking.
    pub fn try_lock(&self) -> Option<SchedMutexGuard<'_, T>> {
        if self.sem.try_wait() {
            Some(SchedMutexGuard { mutex: self })
        } else {
            None
        }
    }

    /// Check if the mutex is currently locked.
    pub fn is_locked(&self) -> bool {
        self.sem.count() == 0
    }

    /// Get mutable access to the underlying data.
    ///
    /// Requires mutable access to the mutex, guaranteeing no other
    /// references exist.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Consume the mutex and return the inner value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Default> Default for SchedMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for SchedMutex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_struct("SchedMutex").field("data", &*guard).finish(),
            None => f.debug_struct("SchedMutex").field("data", &"<locked>").finish(),
        }
    }
}

/// Guard that releases the mutex when dropped.
pub struct SchedMutexGuard<'a, T> {
    mutex: &'a SchedMutex<T>,
}

impl<'a, T> Deref for SchedMutexGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: we hold the lock (one outstanding permit).
        unsafe { &*self.mutex.data.get() }
    }
}

impl<'a, T> DerefMut for SchedMutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: we hold the lock.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<'a, T> Drop for SchedMutexGuard<'a, T> {
    fn drop(&mut self) {
        self.mutex.sem.post();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_basic_lock() {
        let mutex = SchedMutex::new(0);
        {
            let mut guard = mutex.lock().unwrap();
            *guard = 42;
        }
        {
            let guard = mutex.lock().unwrap();
            assert_eq!(*guard, 42);
        }
    }

    #[test]
    fn test_try_lock() {
        let mutex = SchedMutex::new(0);

        let guard = mutex.try_lock();
        assert!(guard.is_some());

        let guard2 = mutex.try_lock();
        assert!(guard2.is_none());

        drop(guard);

        let guard3 = mutex.try_lock();
        assert!(guard3.is_some());
    }

    #[test]
    fn test_concurrent_contention_preserves_count() {
        let mutex = Arc::new(SchedMutex::new(0));
        let mut handles = vec![];

        for _ in 0..16 {
            let mutex = Arc::clone(&mutex);
            handles.push(thread::spawn(move || {
                for _ in 0..10000 {
                    let mut guard = mutex.lock().unwrap();
                    *guard += 1;
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        let guard = mutex.lock().unwrap();
        assert_eq!(*guard, 160_000);
    }

    #[test]
    fn test_into_inner() {
        let mutex = SchedMutex::new(42);
        let value = mutex.into_inner();
        assert_eq!(value, 42);
    }
}
