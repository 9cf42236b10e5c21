//! Error types for the routine scheduler

use core::fmt;

/// Result type for scheduler operations
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors that can occur in scheduler operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    /// Operation timed out
    Timeout,

    /// The fd was marked unusable (remote close, EPOLLERR) while a routine
    /// waited on it.
    FdPanic,

    /// Channel was closed
    ChannelClosed,

    /// Channel is full (for try_send)
    ChannelFull,

    /// Channel is empty (for try_recv)
    ChannelEmpty,

    /// No routine slots available
    NoSlotsAvailable,

    /// routine not found
    RoutineNotFound,

    /// Invalid routine state for operation
    InvalidState,

    /// Engine not initialized
    NotInitialized,

    /// Engine already initialized
    AlreadyInitialized,

    /// Engine configuration failed validation
    InvalidConfig(String),

    /// Memory allocation/mapping failed
    MemoryError(MemoryError),

    /// Engine/thread startup error
    EngineError(EngineError),

    /// Platform-specific error (forwarded errno)
    PlatformError(i32),
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::Timeout => write!(f, "operation timed out"),
            SchedError::FdPanic => write!(f, "fd panic"),
            SchedError::ChannelClosed => write!(f, "channel closed"),
            SchedError::ChannelFull => write!(f, "channel full"),
            SchedError::ChannelEmpty => write!(f, "channel empty"),
            SchedError::NoSlotsAvailable => write!(f, "no routine slots available"),
            SchedError::RoutineNotFound => write!(f, "routine not found"),
            SchedError::InvalidState => write!(f, "invalid routine state"),
            SchedError::NotInitialized => write!(f, "engine not initialized"),
            SchedError::AlreadyInitialized => write!(f, "engine already initialized"),
            SchedError::InvalidConfig(msg) => write!(f, "invalid engine config: {}", msg),
            SchedError::MemoryError(e) => write!(f, "memory error: {}", e),
            SchedError::EngineError(e) => write!(f, "engine error: {}", e),
            SchedError::PlatformError(code) => write!(f, "platform error: {}", code),
        }
    }
}

impl std::error::Error for SchedError {}

/// Memory-related errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// mmap or VirtualAlloc failed
    AllocationFailed,
    
    /// mprotect or VirtualProtect failed
    ProtectionFailed,
    
    /// madvise failed
    AdviseFailed,
    
    /// Region already initialized
    AlreadyInitialized,
    
    /// Too many slots requested
    TooManySlots,
    
    /// Invalid slot ID
    InvalidSlot,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::AllocationFailed => write!(f, "memory allocation failed"),
            MemoryError::ProtectionFailed => write!(f, "memory protection change failed"),
            MemoryError::AdviseFailed => write!(f, "memory advise failed"),
            MemoryError::AlreadyInitialized => write!(f, "memory region already initialized"),
            MemoryError::TooManySlots => write!(f, "too many slots requested"),
            MemoryError::InvalidSlot => write!(f, "invalid slot ID"),
        }
    }
}

impl From<MemoryError> for SchedError {
    fn from(e: MemoryError) -> Self {
        SchedError::MemoryError(e)
    }
}

/// Engine/thread startup related errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Failed to spawn an OS thread
    SpawnFailed,

    /// An OS thread panicked while running its scheduler loop
    Panicked,

    /// Failed to create the readiness poller for a thread
    PollerInitFailed,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::SpawnFailed => write!(f, "failed to spawn scheduler thread"),
            EngineError::Panicked => write!(f, "scheduler thread panicked"),
            EngineError::PollerInitFailed => write!(f, "failed to initialize event poller"),
        }
    }
}

impl From<EngineError> for SchedError {
    fn from(e: EngineError) -> Self {
        SchedError::EngineError(e)
    }
}

/// Error returned when trying to send on a full channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrySendError<T>(pub T);

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel full")
    }
}

/// Error returned when trying to receive from an empty channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryRecvError;

impl fmt::Display for TryRecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel empty")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_error_display() {
        let e = SchedError::Timeout;
        assert_eq!(format!("{}", e), "operation timed out");

        let e = SchedError::MemoryError(MemoryError::AllocationFailed);
        assert_eq!(format!("{}", e), "memory error: memory allocation failed");
    }
    
    #[test]
    fn test_error_conversion() {
        let mem_err = MemoryError::TooManySlots;
        let sched_err: SchedError = mem_err.into();
        assert!(matches!(sched_err, SchedError::MemoryError(MemoryError::TooManySlots)));
    }
}
