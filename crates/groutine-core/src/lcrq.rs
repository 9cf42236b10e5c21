//! LCRQ — Linked Concurrent Ring Queue
//!
//! A wait-free MPMC queue built from linked fixed-size ring segments, used
//! both as the engine's inter-thread command transport and as the waiter
//! queues behind semaphores and channels.
//!
//! Grounded on the classic LCRQ algorithm (Morrison & Afek): each ring
//! segment is a power-of-two array of cells `{val, idx}`; a cell is empty
//! iff `val == EMPTY`. `idx` packs a 63-bit index plus one high "unsafe"
//! bit used to poison cells the consumer has given up on. Rings are linked
//! via `next`; each [`LcrqHandle`] publishes a hazard pointer to the ring
//! it's currently dereferencing so a concurrent `pop` that swings `head`
//! past it knows not to free it out from under that handle. A ring
//! unlinked from `head` is pushed onto `retired` rather than freed
//! immediately; this build doesn't rescan `retired` against outstanding
//! hazard pointers to free individual rings early (see [`Lcrq::retire`]) —
//! retired rings accumulate for the queue's lifetime and are all freed
//! together when the [`Lcrq`] itself drops.
//!
//! Only pointer-sized payloads are transported (the contract is "opaque
//! pointers"); callers box their value and hand the queue the raw pointer.

use core::sync::atomic::{AtomicI64, AtomicPtr, AtomicU64, Ordering};
use std::sync::atomic::fence;

/// Ring segments default to 4096 slots (power of two).
pub const RING_SIZE: usize = 1 << 12;
const RING_MASK: u64 = (RING_SIZE as u64) - 1;

const EMPTY: u64 = u64::MAX;
const UNSAFE_BIT: u64 = 1 << 63;

#[inline]
fn node_index(i: u64) -> u64 {
    i & !UNSAFE_BIT
}
#[inline]
fn set_unsafe(i: u64) -> u64 {
    i | UNSAFE_BIT
}
#[inline]
fn node_unsafe(i: u64) -> u64 {
    i & UNSAFE_BIT
}
#[inline]
fn tail_index(t: i64) -> i64 {
    t & !(UNSAFE_BIT as i64)
}
#[inline]
fn is_closed(t: i64) -> bool {
    t & (UNSAFE_BIT as i64) != 0
}

#[repr(align(128))]
struct Cell {
    val: AtomicU64,
    idx: AtomicU64,
}

struct Ring {
    head: AtomicI64,
    tail: AtomicI64,
    next: AtomicPtr<Ring>,
    cells: Box<[Cell]>,
}

impl Ring {
    fn new() -> Box<Ring> {
        let cells: Vec<Cell> = (0..RING_SIZE)
            .map(|i| Cell { val: AtomicU64::new(EMPTY), idx: AtomicU64::new(i as u64) })
            .collect();
        Box::new(Ring {
            head: AtomicI64::new(0),
            tail: AtomicI64::new(0),
            next: AtomicPtr::new(core::ptr::null_mut()),
            cells: cells.into_boxed_slice(),
        })
    }

    /// A solo-enqueue ring used when closing the current one: slot 0 is
    /// pre-filled so the first `pop` on it succeeds immediately.
    fn new_with_solo(val: u64) -> Box<Ring> {
        let r = Ring::new();
        r.cells[0].val.store(val, Ordering::Relaxed);
        r.cells[0].idx.store(0, Ordering::Relaxed);
        r.tail.store(1, Ordering::Relaxed);
        r
    }
}

/// Per-participant hazard pointer and cached spare ring, analogous to the
/// `handle_t` of the reference algorithm. Each thread that pushes/pops must
/// own one; it must not be shared across threads.
pub struct LcrqHandle {
    hazard: AtomicPtr<Ring>,
    spare: AtomicPtr<Ring>,
}

impl LcrqHandle {
    pub fn new() -> Self {
        Self { hazard: AtomicPtr::new(core::ptr::null_mut()), spare: AtomicPtr::new(core::ptr::null_mut()) }
    }
}

impl Default for LcrqHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LcrqHandle {
    fn drop(&mut self) {
        let spare = self.spare.swap(core::ptr::null_mut(), Ordering::AcqRel);
        if !spare.is_null() {
            unsafe { drop(Box::from_raw(spare)) };
        }
    }
}

/// A linearizable, wait-free (amortized lock-free in this safe-Rust
/// rendition) MPMC FIFO queue of `u64`-sized opaque values.
///
/// `nprocs` bounds how many hazard pointers may be outstanding at once; it
/// should equal the maximum number of concurrent `LcrqHandle`s.
pub struct Lcrq {
    head: AtomicPtr<Ring>,
    tail: AtomicPtr<Ring>,
    // Retired ring addresses, stashed as `usize` so the queue stays `Send`
    // without asserting unsafely that `*mut Ring` is.
    retired: crossbeam_queue::SegQueue<usize>,
    nprocs: usize,
}

unsafe impl Send for Lcrq {}
unsafe impl Sync for Lcrq {}

impl Lcrq {
    pub fn new(nprocs: usize) -> Self {
        let initial = Box::into_raw(Ring::new());
        Self {
            head: AtomicPtr::new(initial),
            tail: AtomicPtr::new(initial),
            retired: crossbeam_queue::SegQueue::new(),
            nprocs,
        }
    }

    /// Enqueue an opaque value. `val` must never be [`EMPTY`]'s bit
    /// pattern (`u64::MAX`) — callers transport boxed pointers, which are
    /// never that value on any supported target.
    pub fn push(&self, handle: &LcrqHandle, val: u64) {
        debug_assert_ne!(val, EMPTY, "LCRQ sentinel value must never be pushed");
        let mut try_close = 0u32;

        loop {
            let rq = self.set_hazard_tail(handle);
            let next = unsafe { (*rq).next.load(Ordering::Acquire) };
            if !next.is_null() {
                let _ = self.tail.compare_exchange(rq, next, Ordering::AcqRel, Ordering::Acquire);
                continue;
            }

            let t = unsafe { (*rq).tail.fetch_add(1, Ordering::AcqRel) };

            if is_closed(t) {
                self.push_slow_new_ring(handle, rq, val);
                return;
            }

            let cell = unsafe { &(*rq).cells[(t as u64 & RING_MASK) as usize] };
            let idx = cell.idx.load(Ordering::Acquire);
            let cur_val = cell.val.load(Ordering::Acquire);

            if cur_val == EMPTY && node_index(idx) <= t as u64 {
                let h = unsafe { (*rq).head.load(Ordering::Acquire) };
                if node_unsafe(idx) == 0 || h < t {
                    if cell
                        .idx
                        .compare_exchange(idx, t as u64, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        cell.val.store(val, Ordering::Release);
                        self.clear_hazard(handle);
                        return;
                    }
                }
            }

            let h = unsafe { (*rq).head.load(Ordering::Acquire) };
            if t - h >= RING_SIZE as i64 {
                try_close += 1;
                self.try_close(rq, t, try_close);
            }
        }
    }

    fn push_slow_new_ring(&self, handle: &LcrqHandle, rq: *mut Ring, val: u64) {
        let nrq = {
            let spare = handle.spare.swap(core::ptr::null_mut(), Ordering::AcqRel);
            if !spare.is_null() {
                unsafe { Box::from_raw(spare) }
            } else {
                Ring::new_with_solo(val)
            }
        };
        if nrq.cells[0].val.load(Ordering::Relaxed) != val {
            nrq.cells[0].val.store(val, Ordering::Relaxed);
            nrq.cells[0].idx.store(0, Ordering::Relaxed);
            nrq.tail.store(1, Ordering::Relaxed);
        }
        let nrq_ptr = Box::into_raw(nrq);

        let next = unsafe { (*rq).next.load(Ordering::Acquire) };
        if next.is_null()
            && unsafe { (*rq).next.compare_exchange(core::ptr::null_mut(), nrq_ptr, Ordering::AcqRel, Ordering::Acquire) }.is_ok()
        {
            let _ = self.tail.compare_exchange(rq, nrq_ptr, Ordering::AcqRel, Ordering::Acquire);
            self.clear_hazard(handle);
        } else {
            // Another producer installed a ring first; stash ours for reuse.
            unsafe { (*nrq_ptr).tail.store(0, Ordering::Relaxed) };
            handle.spare.store(nrq_ptr, Ordering::Release);
            self.clear_hazard(handle);
            self.push(handle, val);
        }
    }

    fn try_close(&self, rq: *mut Ring, t: i64, tries: u32) {
        let tt = t + 1;
        let rq = unsafe { &*rq };
        if tries < 10 {
            let _ = rq.tail.compare_exchange(tt, tt | (UNSAFE_BIT as i64), Ordering::AcqRel, Ordering::Acquire);
        } else {
            rq.tail.fetch_or(UNSAFE_BIT as i64, Ordering::AcqRel);
        }
    }

    /// Dequeue the oldest value, or `None` if the queue is empty.
    pub fn pop(&self, handle: &LcrqHandle) -> Option<u64> {
        loop {
            let rq = self.set_hazard_head(handle);
            let h = unsafe { (*rq).head.fetch_add(1, Ordering::AcqRel) };
            let cell = unsafe { &(*rq).cells[(h as u64 & RING_MASK) as usize] };

            let mut spins: u64 = 0;
            let mut cached_tail: i64 = 0;

            loop {
                let cell_idx = cell.idx.load(Ordering::Acquire);
                let unsafe_bit = node_unsafe(cell_idx);
                let idx = node_index(cell_idx);
                let val = cell.val.load(Ordering::Acquire);

                if idx > h as u64 {
                    break;
                }

                if val != EMPTY {
                    if idx == h as u64 {
                        if cell
                            .idx
                            .compare_exchange(cell_idx, (unsafe_bit | h as u64) + RING_SIZE as u64, Ordering::AcqRel, Ordering::Acquire)
                            .is_ok()
                        {
                            let out = cell.val.swap(EMPTY, Ordering::AcqRel);
                            self.clear_hazard(handle);
                            return Some(out);
                        }
                    } else if cell
                        .idx
                        .compare_exchange(cell_idx, set_unsafe(idx), Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        break;
                    }
                } else {
                    if spins & 1023 == 0 {
                        cached_tail = unsafe { (*rq).tail.load(Ordering::Acquire) };
                    }
                    let closed = is_closed(cached_tail);
                    let t = tail_index(cached_tail);

                    if unsafe_bit != 0 {
                        if cell
                            .idx
                            .compare_exchange(cell_idx, (unsafe_bit | h as u64) + RING_SIZE as u64, Ordering::AcqRel, Ordering::Acquire)
                            .is_ok()
                        {
                            break;
                        }
                    } else if t < h + 1 || spins > 200_000 || closed {
                        if cell
                            .idx
                            .compare_exchange(cell_idx, h as u64 + RING_SIZE as u64, Ordering::AcqRel, Ordering::Acquire)
                            .is_ok()
                        {
                            if spins > 200_000 && cached_tail > RING_SIZE as i64 {
                                unsafe { (*rq).tail.fetch_or(UNSAFE_BIT as i64, Ordering::AcqRel) };
                            }
                            break;
                        }
                    } else {
                        spins += 1;
                    }
                }
            }

            let tail_now = unsafe { (*rq).tail.load(Ordering::Acquire) };
            if tail_index(tail_now) <= h + 1 {
                fix_state(unsafe { &*rq });
                let next = unsafe { (*rq).next.load(Ordering::Acquire) };
                if next.is_null() {
                    self.clear_hazard(handle);
                    return None;
                }
                let tail_now = unsafe { (*rq).tail.load(Ordering::Acquire) };
                if tail_index(tail_now) <= h + 1
                    && self.head.compare_exchange(rq, next, Ordering::AcqRel, Ordering::Acquire).is_ok()
                {
                    self.retire(rq);
                }
            }
        }
    }

    fn set_hazard_tail(&self, handle: &LcrqHandle) -> *mut Ring {
        loop {
            let rq = self.tail.load(Ordering::Acquire);
            handle.hazard.store(rq, Ordering::Release);
            fence(Ordering::SeqCst);
            if self.tail.load(Ordering::Acquire) == rq {
                return rq;
            }
        }
    }

    fn set_hazard_head(&self, handle: &LcrqHandle) -> *mut Ring {
        loop {
            let rq = self.head.load(Ordering::Acquire);
            handle.hazard.store(rq, Ordering::Release);
            fence(Ordering::SeqCst);
            if self.head.load(Ordering::Acquire) == rq {
                return rq;
            }
        }
    }

    fn clear_hazard(&self, handle: &LcrqHandle) {
        handle.hazard.store(core::ptr::null_mut(), Ordering::Release);
    }

    /// Hand `rq` (just unlinked from `head`) off for later freeing. Does
    /// not free it here or scan outstanding hazard pointers — `rq` is
    /// simply parked on `retired` and freed, along with every other
    /// retired ring, when this `Lcrq` is dropped. Over-retention only:
    /// safe (a retired ring is never dereferenced again through `head`
    /// or `tail`) but not the bounded, scan-as-you-go reclamation a full
    /// hazard-pointer scheme would do.
    fn retire(&self, rq: *mut Ring) {
        self.retired.push(rq as usize);
    }

    /// Number of registered participants this queue was sized for.
    pub fn nprocs(&self) -> usize {
        self.nprocs
    }
}

fn fix_state(rq: &Ring) {
    loop {
        let t = rq.tail.load(Ordering::Acquire);
        let h = rq.head.load(Ordering::Acquire);
        if rq.tail.load(Ordering::Acquire) != t {
            continue;
        }
        if h > t {
            if rq.tail.compare_exchange(t, h, Ordering::AcqRel, Ordering::Acquire).is_ok() {
                break;
            }
            continue;
        }
        break;
    }
}

impl Drop for Lcrq {
    fn drop(&mut self) {
        // Rings still linked from `head` (the live chain) and rings
        // already unlinked by `retire` (stashed in `retired`, never
        // individually freed — see its doc comment) are disjoint sets;
        // both need freeing here.
        let mut cur = self.head.load(Ordering::Acquire);
        while !cur.is_null() {
            let next = unsafe { (*cur).next.load(Ordering::Acquire) };
            unsafe { drop(Box::from_raw(cur)) };
            cur = next;
        }
        while let Some(addr) = self.retired.pop() {
            unsafe { drop(Box::from_raw(addr as *mut Ring)) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn box_val(x: u64) -> u64 {
        Box::into_raw(Box::new(x)) as u64
    }

    unsafe fn unbox_val(v: u64) -> u64 {
        *Box::from_raw(v as *mut u64)
    }

    #[test]
    fn test_single_thread_fifo() {
        let q = Lcrq::new(1);
        let h = LcrqHandle::new();
        for i in 0..10u64 {
            q.push(&h, box_val(i));
        }
        for i in 0..10u64 {
            let v = q.pop(&h).unwrap();
            assert_eq!(unsafe { unbox_val(v) }, i);
        }
        assert!(q.pop(&h).is_none());
    }

    #[test]
    fn test_spans_multiple_rings() {
        let q = Lcrq::new(1);
        let h = LcrqHandle::new();
        let n = RING_SIZE * 3 + 17;
        for i in 0..n as u64 {
            q.push(&h, box_val(i));
        }
        for i in 0..n as u64 {
            let v = q.pop(&h).expect("value should be present");
            assert_eq!(unsafe { unbox_val(v) }, i);
        }
        assert!(q.pop(&h).is_none());
    }

    #[test]
    fn test_concurrent_mpmc_linearizable_count() {
        let producers = 4;
        let per_producer = 2000;
        let q = Arc::new(Lcrq::new(producers + producers));

        let mut handles = vec![];
        for p in 0..producers {
            let q = Arc::clone(&q);
            handles.push(thread::spawn(move || {
                let h = LcrqHandle::new();
                for i in 0..per_producer {
                    q.push(&h, box_val((p * per_producer + i) as u64));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let mut seen = std::collections::HashSet::new();
        let h = LcrqHandle::new();
        while let Some(v) = q.pop(&h) {
            let x = unsafe { unbox_val(v) };
            assert!(seen.insert(x), "value {x} observed twice");
        }
        assert_eq!(seen.len(), producers * per_producer);
    }
}
