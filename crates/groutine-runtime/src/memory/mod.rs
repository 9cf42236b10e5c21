//! Memory region management for routine slots
//!
//! A single large virtual-address reservation holds every routine's
//! metadata + stack slot; individual slots are mapped readable/writable
//! lazily on first use and handed back to the kernel (`MADV_DONTNEED`)
//! once the routine finishes, so an idle runtime with many routines
//! created-and-finished over its lifetime keeps physical memory low
//! without ever calling `munmap` per routine.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::*;
    }
}

use groutine_core::constants::{SLOT_SIZE, METADATA_SIZE, GUARD_SIZE};

use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::ptr;

/// Reserved virtual address space for all routine slots.
pub struct MemoryRegion {
    base: AtomicPtr<u8>,
    total_size: usize,
    max_slots: usize,
    initialized: AtomicBool,
}

impl MemoryRegion {
    pub const fn new() -> Self {
        Self {
            base: AtomicPtr::new(ptr::null_mut()),
            total_size: 0,
            max_slots: 0,
            initialized: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    #[inline]
    pub fn base(&self) -> *mut u8 {
        self.base.load(Ordering::Acquire)
    }

    #[inline]
    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    #[inline]
    pub fn slot_base(&self, slot_id: u32) -> *mut u8 {
        debug_assert!((slot_id as usize) < self.max_slots);
        unsafe { self.base().add(slot_id as usize * SLOT_SIZE) }
    }

    #[inline]
    pub fn metadata_addr(&self, slot_id: u32) -> *mut u8 {
        self.slot_base(slot_id)
    }

    /// Top-of-stack address for a slot (stack grows down from here).
    #[inline]
    pub fn stack_top(&self, slot_id: u32) -> *mut u8 {
        unsafe { self.slot_base(slot_id).add(SLOT_SIZE).sub(GUARD_SIZE) }
    }

    #[inline]
    pub fn stack_bottom(&self, slot_id: u32) -> *mut u8 {
        unsafe { self.slot_base(slot_id).add(METADATA_SIZE) }
    }
}

impl Default for MemoryRegion {
    fn default() -> Self {
        Self::new()
    }
}

// One region per process; sized once at engine construction.
static mut MEMORY_REGION: MemoryRegion = MemoryRegion::new();

/// Access the global memory region.
///
/// # Safety
///
/// Must be initialized via [`init_memory_region`] before use.
#[inline]
pub fn memory_region() -> &'static MemoryRegion {
    unsafe { &*ptr::addr_of!(MEMORY_REGION) }
}

/// Mutable access to the global memory region.
///
/// # Safety
///
/// Only call during engine construction, before any routine runs.
#[inline]
pub unsafe fn memory_region_mut() -> &'static mut MemoryRegion {
    &mut *ptr::addr_of_mut!(MEMORY_REGION)
}
