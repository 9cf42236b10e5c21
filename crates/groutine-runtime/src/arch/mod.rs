//! Architecture-specific context switching
//!
//! Provides assembly implementations for saving and restoring registers
//! during GVThread context switches.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub mod x86_64;
        pub use x86_64::{context_switch_voluntary, init_context};
    } else if #[cfg(target_arch = "aarch64")] {
        pub mod aarch64;
        pub use aarch64::{context_switch_voluntary, init_context};
    } else {
        compile_error!("Unsupported architecture: groutine-runtime only implements context switching for x86_64 and aarch64");
    }
}
