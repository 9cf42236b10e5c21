//! # groutine-core
//!
//! Core types and traits for the groutine (user-space M:N stackful
//! coroutine) scheduler.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! All platform-specific implementations are in `groutine-runtime`.
//!
//! ## Modules
//!
//! - `id` - routine identifier type
//! - `state` - routine status enums
//! - `metadata` - routine metadata layout (repr(C), touched by arch asm)
//! - `slot` - sparse slot vector for stable-index storage
//! - `lcrq` - wait-free MPMC queue (linked ring segments)
//! - `semaphore` - counting semaphore, the base sync primitive
//! - `channel` - MPMC channel for routine communication
//! - `mutex` - routine-aware mutex (semaphore of capacity 1)
//! - `event` - event round / `select_any` descriptor vocabulary
//! - `error` - error types
//! - `spinlock` - internal spinlock primitive
//! - `traits` - platform and scheduler-seam traits
//! - `kprint` - kernel-style debug printing macros
//! - `env` - environment variable utilities

#![allow(dead_code)]

pub mod channel;
pub mod env;
pub mod error;
pub mod event;
pub mod id;
pub mod kprint;
pub mod lcrq;
pub mod metadata;
pub mod mutex;
pub mod semaphore;
pub mod slot;
pub mod spinlock;
pub mod state;
pub mod traits;

// Re-exports for convenience
pub use channel::{channel, Receiver, Sender};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};
pub use error::{SchedError, SchedResult};
pub use event::{start_event_round, EventDescriptor, EventId, EventOutcome, EventRound};
pub use id::RoutineId;
pub use lcrq::{Lcrq, LcrqHandle};
pub use metadata::RoutineMetadata;
pub use mutex::SchedMutex;
pub use semaphore::Semaphore;
pub use slot::SparseSlotVector;
pub use spinlock::SpinLock;
pub use state::{PreviousStatus, RoutineStatus};

/// Constants for memory layout and scheduler limits.
pub mod constants {
    /// Slot size - configurable via feature flag.
    /// Default: 16KB (4 pages); `large-stack` switches to 16MB for
    /// routines that recurse deeply or link in stack-hungry C code.
    #[cfg(feature = "large-stack")]
    pub const SLOT_SIZE: usize = 16 * 1024 * 1024; // 16 MB

    #[cfg(not(feature = "large-stack"))]
    pub const SLOT_SIZE: usize = 16 * 1024; // 16 KB (4 pages)

    /// Guard page size (4 KB).
    pub const GUARD_SIZE: usize = 4096;

    /// Metadata size at start of slot (4 KB, one page).
    pub const METADATA_SIZE: usize = 4096;

    /// Stack size within slot (slot - metadata - guard).
    pub const STACK_SIZE: usize = SLOT_SIZE - METADATA_SIZE - GUARD_SIZE;

    /// Maximum worker OS threads.
    pub const MAX_WORKERS: usize = 64;

    /// Default maximum concurrently-alive routines.
    pub const DEFAULT_MAX_ROUTINES: usize = 65536;

    /// Sentinel routine id meaning "none" / "unset".
    pub const ROUTINE_NONE: u32 = u32::MAX;

    /// Cache line size for alignment.
    pub const CACHE_LINE_SIZE: usize = 64;
}
