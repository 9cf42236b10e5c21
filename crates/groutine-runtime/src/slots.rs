//! Process-wide routine slot allocator
//!
//! A routine's id is the index of the memory-region slot holding its
//! metadata and stack (see `memory::MemoryRegion`): `write()` / `free()`
//! here decide which slot a new routine gets, backed by a simple
//! spinlock-guarded free list plus a high-water mark for slots that
//! have never been used. Allocation/deallocation only happens at spawn
//! and finish, well off the context-switch hot path, so the spinlock
//! contention this implies is immaterial.

use groutine_core::error::{SchedError, SchedResult};
use groutine_core::id::RoutineId;
use groutine_core::spinlock::SpinLock;

struct Inner {
    free: Vec<u32>,
    next_unused: u32,
}

/// Hands out routine ids backed by slots in the process's single memory
/// region. Ids are reused once a routine's slot is released.
pub struct SlotAllocator {
    inner: SpinLock<Inner>,
    max_slots: usize,
}

impl SlotAllocator {
    pub fn new(max_slots: usize) -> Self {
        Self { inner: SpinLock::new(Inner { free: Vec::new(), next_unused: 0 }), max_slots }
    }

    /// Claim a slot, preferring a previously-freed one (keeps the
    /// active region compact) over bumping the high-water mark.
    pub fn allocate(&self) -> SchedResult<RoutineId> {
        let mut inner = self.inner.lock();
        if let Some(id) = inner.free.pop() {
            return Ok(RoutineId::new(id));
        }
        if (inner.next_unused as usize) >= self.max_slots {
            return Err(SchedError::NoSlotsAvailable);
        }
        let id = inner.next_unused;
        inner.next_unused += 1;
        Ok(RoutineId::new(id))
    }

    /// Return a finished routine's slot to the free list.
    pub fn release(&self, id: RoutineId) {
        self.inner.lock().free.push(id.as_u32());
    }

    pub fn max_slots(&self) -> usize {
        self.max_slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_increases_high_water_mark() {
        let a = SlotAllocator::new(4);
        let id0 = a.allocate().unwrap();
        let id1 = a.allocate().unwrap();
        assert_ne!(id0, id1);
    }

    #[test]
    fn test_release_recycles() {
        let a = SlotAllocator::new(4);
        let id0 = a.allocate().unwrap();
        a.release(id0);
        let id1 = a.allocate().unwrap();
        assert_eq!(id0, id1);
    }

    #[test]
    fn test_exhaustion() {
        let a = SlotAllocator::new(1);
        a.allocate().unwrap();
        assert!(matches!(a.allocate(), Err(SchedError::NoSlotsAvailable)));
    }
}
