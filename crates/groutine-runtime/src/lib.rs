//! # groutine-runtime
//!
//! The platform-specific half of the groutine runtime: memory-mapped
//! routine slots, architecture-specific context switching, the
//! per-thread scheduler loop, and the engine that owns a pool of
//! scheduler threads and the cross-thread inboxes connecting them.
//!
//! This crate provides:
//! - Memory management (mmap/mprotect/madvise routine slots)
//! - Context switching (architecture-specific assembly)
//! - epoll-based readiness polling
//! - Per-thread cooperative scheduling and cross-thread handoff
//! - The multi-threaded engine that ties scheduler threads together

#![allow(dead_code)]

pub mod arch;
pub mod config;
pub mod engine;
pub mod memory;
pub mod poller;
pub mod routine;
pub mod scheduler;
pub mod slots;
pub mod timer;
pub mod tls;

// Re-exports
pub use config::{ConfigError, EngineConfig};
pub use engine::Engine;
pub use scheduler::{yield_now, ThreadScheduler};

// Architecture detection
cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub use arch::x86_64 as current_arch;
    } else if #[cfg(target_arch = "aarch64")] {
        pub use arch::aarch64 as current_arch;
    } else {
        compile_error!("Unsupported architecture");
    }
}