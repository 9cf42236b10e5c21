//! Routine metadata layout
//!
//! This structure has a fixed layout (repr(C)) because the context-switch
//! assembly in `groutine-runtime::arch` reaches into it directly at a
//! hardcoded byte offset.

use core::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use crate::id::RoutineId;
use crate::state::{PreviousStatus, RoutineStatus};
use crate::constants::ROUTINE_NONE;

/// Size of the callee-saved register block the voluntary switch primitive uses.
#[cfg(target_arch = "x86_64")]
pub const VOLUNTARY_SAVE_SIZE: usize = 64;
#[cfg(target_arch = "aarch64")]
pub const VOLUNTARY_SAVE_SIZE: usize = 112;

/// Routine metadata stored at the start of each slot.
///
/// Layout (offsets are stable for ASM access):
/// ```text
/// 0x00: status           (u8)  - RoutineStatus
/// 0x01: previous_status  (u8)  - PreviousStatus
/// 0x02: happened_event   (u8)  - EventKind discriminant of the descriptor that fired
/// 0x03: reserved
/// 0x04: routine_id       (u32) - Self ID
/// 0x08: parent_id        (u32) - Parent routine ID, or ROUTINE_NONE
/// 0x0C: owner_thread     (u32) - Index of the thread this routine is pinned to
/// 0x10: entry_fn         (u64) - Entry trampoline function pointer
/// 0x18: entry_arg        (u64) - Boxed-closure pointer passed to the trampoline
/// 0x20: reserved         (32 bytes)
/// 0x40: voluntary_regs   (64 bytes) - Callee-saved registers for `switch()`
/// ```
#[repr(C, align(64))]
pub struct RoutineMetadata {
    pub status: AtomicU8,
    pub previous_status: AtomicU8,
    pub happened_event: AtomicU8,
    _reserved0: u8,

    pub routine_id: AtomicU32,
    pub parent_id: AtomicU32,
    pub owner_thread: AtomicU32,

    pub entry_fn: AtomicU64,
    pub entry_arg: AtomicU64,

    _reserved1: [u8; 32],

    /// rsp, rip, rbx, rbp, r12, r13, r14, r15 (see `arch::x86_64`)
    pub voluntary_regs: VoluntarySavedRegs,
}

/// Callee-saved registers per the System V AMD64 ABI, restored by
/// `context_switch_voluntary`.
#[cfg(target_arch = "x86_64")]
#[repr(C)]
pub struct VoluntarySavedRegs {
    pub rsp: u64,
    pub rip: u64,
    pub rbx: u64,
    pub rbp: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
}

#[cfg(target_arch = "x86_64")]
impl Default for VoluntarySavedRegs {
    fn default() -> Self {
        Self { rsp: 0, rip: 0, rbx: 0, rbp: 0, r12: 0, r13: 0, r14: 0, r15: 0 }
    }
}

/// Callee-saved registers per AAPCS64, restored by
/// `context_switch_voluntary`.
#[cfg(target_arch = "aarch64")]
#[repr(C)]
pub struct VoluntarySavedRegs {
    pub sp: u64,
    pub pc: u64,
    pub x19: u64,
    pub x20: u64,
    pub x21: u64,
    pub x22: u64,
    pub x23: u64,
    pub x24: u64,
    pub x25: u64,
    pub x26: u64,
    pub x27: u64,
    pub x28: u64,
    pub fp: u64,
}

#[cfg(target_arch = "aarch64")]
impl Default for VoluntarySavedRegs {
    fn default() -> Self {
        Self {
            sp: 0, pc: 0, x19: 0, x20: 0, x21: 0, x22: 0, x23: 0,
            x24: 0, x25: 0, x26: 0, x27: 0, x28: 0, fp: 0,
        }
    }
}

impl RoutineMetadata {
    pub const fn new() -> Self {
        Self {
            status: AtomicU8::new(RoutineStatus::New as u8),
            previous_status: AtomicU8::new(PreviousStatus::None as u8),
            happened_event: AtomicU8::new(0),
            _reserved0: 0,
            routine_id: AtomicU32::new(ROUTINE_NONE),
            parent_id: AtomicU32::new(ROUTINE_NONE),
            owner_thread: AtomicU32::new(ROUTINE_NONE),
            entry_fn: AtomicU64::new(0),
            entry_arg: AtomicU64::new(0),
            _reserved1: [0; 32],
            #[cfg(target_arch = "x86_64")]
            voluntary_regs: VoluntarySavedRegs {
                rsp: 0, rip: 0, rbx: 0, rbp: 0, r12: 0, r13: 0, r14: 0, r15: 0,
            },
            #[cfg(target_arch = "aarch64")]
            voluntary_regs: VoluntarySavedRegs {
                sp: 0, pc: 0, x19: 0, x20: 0, x21: 0, x22: 0, x23: 0,
                x24: 0, x25: 0, x26: 0, x27: 0, x28: 0, fp: 0,
            },
        }
    }

    pub fn init(&self, id: RoutineId, parent: RoutineId, owner_thread: u32) {
        self.status.store(RoutineStatus::New as u8, Ordering::Relaxed);
        self.previous_status.store(PreviousStatus::None as u8, Ordering::Relaxed);
        self.happened_event.store(0, Ordering::Relaxed);
        self.routine_id.store(id.as_u32(), Ordering::Relaxed);
        self.parent_id.store(parent.as_u32(), Ordering::Relaxed);
        self.owner_thread.store(owner_thread, Ordering::Relaxed);
    }

    #[inline]
    pub fn get_status(&self) -> RoutineStatus {
        RoutineStatus::from(self.status.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_status(&self, status: RoutineStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    #[inline]
    pub fn get_previous_status(&self) -> PreviousStatus {
        PreviousStatus::from(self.previous_status.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_previous_status(&self, status: PreviousStatus) {
        self.previous_status.store(status as u8, Ordering::Release);
    }

    #[inline]
    pub fn get_id(&self) -> RoutineId {
        RoutineId::new(self.routine_id.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn owner_thread(&self) -> u32 {
        self.owner_thread.load(Ordering::Relaxed)
    }
}

// Verify sizes and offsets at compile time: the context-switch assembly
// in arch::x86_64 hardcodes `.add(0x40)` to reach `voluntary_regs`.
const _: () = {
    assert!(core::mem::size_of::<VoluntarySavedRegs>() == VOLUNTARY_SAVE_SIZE);
    assert!(core::mem::align_of::<RoutineMetadata>() == 64);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_offsets() {
        let meta = RoutineMetadata::new();
        let base = &meta as *const _ as usize;

        assert_eq!(&meta.status as *const _ as usize - base, 0x00);
        assert_eq!(&meta.previous_status as *const _ as usize - base, 0x01);
        assert_eq!(&meta.happened_event as *const _ as usize - base, 0x02);
        assert_eq!(&meta.routine_id as *const _ as usize - base, 0x04);
        assert_eq!(&meta.parent_id as *const _ as usize - base, 0x08);
        assert_eq!(&meta.owner_thread as *const _ as usize - base, 0x0C);
        assert_eq!(&meta.entry_fn as *const _ as usize - base, 0x10);
        assert_eq!(&meta.entry_arg as *const _ as usize - base, 0x18);
        assert_eq!(&meta.voluntary_regs as *const _ as usize - base, 0x40);
    }

    #[test]
    fn test_metadata_init() {
        let meta = RoutineMetadata::new();
        meta.init(RoutineId::new(7), RoutineId::new(3), 2);
        assert_eq!(meta.get_id(), RoutineId::new(7));
        assert_eq!(meta.owner_thread(), 2);
        assert_eq!(meta.get_status(), RoutineStatus::New);
    }

    #[test]
    fn test_status_roundtrip() {
        let meta = RoutineMetadata::new();
        meta.set_status(RoutineStatus::WaitingEvents);
        assert_eq!(meta.get_status(), RoutineStatus::WaitingEvents);
        meta.set_previous_status(PreviousStatus::TimedOut);
        assert_eq!(meta.get_previous_status(), PreviousStatus::TimedOut);
    }
}
