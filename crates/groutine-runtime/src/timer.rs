//! Monotonic timer heap
//!
//! One per thread scheduler. Holds the deadline of every routine
//! currently waiting on a `{timer, deadline}` descriptor (including the
//! timeout half of a semaphore/channel/select wait), ordered so the
//! scheduler can cheaply ask "how long until the next one fires" and
//! feed that straight into the poller's `timeout_ms`.

use groutine_core::id::RoutineId;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct TimerEntry {
    deadline: Instant,
    seq: u64,
    routine_id: RoutineId,
}

// `BinaryHeap` is a max-heap; reverse the deadline ordering (and the
// sequence as tie-break) so the earliest-registered, earliest-due entry
// surfaces first.
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.deadline.cmp(&self.deadline).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A deadline-ordered min-heap of pending routine timeouts.
pub struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

impl TimerHeap {
    pub fn new() -> Self {
        Self { heap: BinaryHeap::new(), next_seq: 0 }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Arm a deadline for `routine_id`, `timeout_ms` from now. A negative
    /// `timeout_ms` means "no deadline" and is a no-op.
    pub fn arm(&mut self, routine_id: RoutineId, timeout_ms: i64) {
        if timeout_ms < 0 {
            return;
        }
        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(TimerEntry { deadline, seq, routine_id });
    }

    /// Remove every pending entry for `routine_id`, e.g. because a
    /// different descriptor of the same wait round already fired.
    ///
    /// `O(n)` in the number of pending timers — acceptable since only
    /// routines actually mid-wait occupy this heap, not every routine.
    pub fn cancel(&mut self, routine_id: RoutineId) {
        if self.heap.iter().any(|e| e.routine_id == routine_id) {
            let remaining: BinaryHeap<TimerEntry> =
                self.heap.drain().filter(|e| e.routine_id != routine_id).collect();
            self.heap = remaining;
        }
    }

    /// Pop every entry whose deadline has passed, in deadline order.
    pub fn pop_expired(&mut self) -> Vec<RoutineId> {
        let now = Instant::now();
        let mut expired = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            expired.push(self.heap.pop().unwrap().routine_id);
        }
        expired
    }

    /// Milliseconds until the next deadline, or `None` if the heap is
    /// empty. Saturates at `0` for deadlines already past.
    pub fn next_timeout_ms(&self) -> Option<i64> {
        self.heap.peek().map(|e| {
            let now = Instant::now();
            if e.deadline <= now {
                0
            } else {
                (e.deadline - now).as_millis() as i64
            }
        })
    }
}

impl Default for TimerHeap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_heap_has_no_timeout() {
        let heap = TimerHeap::new();
        assert_eq!(heap.next_timeout_ms(), None);
        assert!(heap.is_empty());
    }

    #[test]
    fn test_negative_timeout_is_noop() {
        let mut heap = TimerHeap::new();
        heap.arm(RoutineId::new(0), -1);
        assert!(heap.is_empty());
    }

    #[test]
    fn test_pop_expired_orders_by_deadline() {
        let mut heap = TimerHeap::new();
        heap.arm(RoutineId::new(2), 0);
        heap.arm(RoutineId::new(1), 0);
        std::thread::sleep(Duration::from_millis(5));
        let expired = heap.pop_expired();
        assert_eq!(expired, vec![RoutineId::new(2), RoutineId::new(1)]);
        assert!(heap.is_empty());
    }

    #[test]
    fn test_cancel_removes_entry() {
        let mut heap = TimerHeap::new();
        heap.arm(RoutineId::new(5), 10_000);
        heap.arm(RoutineId::new(6), 10_000);
        heap.cancel(RoutineId::new(5));
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn test_next_timeout_reflects_soonest() {
        let mut heap = TimerHeap::new();
        heap.arm(RoutineId::new(1), 10_000);
        heap.arm(RoutineId::new(2), 50);
        let next = heap.next_timeout_ms().unwrap();
        assert!(next <= 50);
    }
}
