//! Engine configuration
//!
//! A plain struct of tunables plus an environment-driven constructor,
//! modeled on the teacher's `GVT_*`-prefixed build-time config merging:
//! here it is simpler (no codegen, no build.rs) because none of the
//! preemption tunables that motivated that machinery survive in this
//! runtime — everything is read once at `EngineConfig::from_env()` time.

use groutine_core::constants::{DEFAULT_MAX_ROUTINES, MAX_WORKERS, STACK_SIZE};
use groutine_core::env::env_get;
use groutine_core::lcrq::RING_SIZE;
use std::fmt;

/// Errors from [`EngineConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    TooManyCores { requested: usize, max: usize },
    ZeroCores,
    StackTooSmall { requested: usize, min: usize },
    RingSizeNotPowerOfTwo { requested: usize },
    ZeroRoutines,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::TooManyCores { requested, max } => {
                write!(f, "max_nb_cores {requested} exceeds the hard cap of {max}")
            }
            ConfigError::ZeroCores => write!(f, "max_nb_cores must be at least 1"),
            ConfigError::StackTooSmall { requested, min } => {
                write!(f, "stack_size {requested} is below the minimum of {min} bytes")
            }
            ConfigError::RingSizeNotPowerOfTwo { requested } => {
                write!(f, "ring_size {requested} is not a power of two")
            }
            ConfigError::ZeroRoutines => write!(f, "max_routines must be at least 1"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Tunables for an [`crate::engine::Engine`].
///
/// `Default` delegates to [`EngineConfig::from_env`], matching the
/// teacher's convention of letting `GROUTINE_*` environment variables
/// drive defaults unless a caller explicitly overrides a value via the
/// builder methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub max_nb_cores: usize,
    pub stack_size: usize,
    pub max_routines: usize,
    pub ring_size: usize,
    pub local_ready_queue_capacity: usize,
    pub poller_max_events: usize,
    pub poller_idle_timeout_ms: i64,
    pub debug_logging: bool,
}

impl EngineConfig {
    /// Hardcoded defaults, ignoring the environment.
    pub fn new() -> Self {
        Self {
            max_nb_cores: 4,
            stack_size: STACK_SIZE,
            max_routines: DEFAULT_MAX_ROUTINES,
            ring_size: RING_SIZE,
            local_ready_queue_capacity: 1024,
            poller_max_events: 256,
            poller_idle_timeout_ms: 1000,
            debug_logging: false,
        }
    }

    /// Defaults overridden by any `GROUTINE_*` environment variable that
    /// is set, via the generic [`env_get`] helper.
    pub fn from_env() -> Self {
        let defaults = Self::new();
        Self {
            max_nb_cores: env_get("GROUTINE_MAX_NB_CORES", defaults.max_nb_cores),
            stack_size: env_get("GROUTINE_STACK_SIZE", defaults.stack_size),
            max_routines: env_get("GROUTINE_MAX_ROUTINES", defaults.max_routines),
            ring_size: env_get("GROUTINE_RING_SIZE", defaults.ring_size),
            local_ready_queue_capacity: env_get(
                "GROUTINE_READY_QUEUE_CAPACITY",
                defaults.local_ready_queue_capacity,
            ),
            poller_max_events: env_get("GROUTINE_POLLER_MAX_EVENTS", defaults.poller_max_events),
            poller_idle_timeout_ms: env_get(
                "GROUTINE_POLLER_IDLE_TIMEOUT_MS",
                defaults.poller_idle_timeout_ms,
            ),
            debug_logging: groutine_core::env::env_get_bool("GROUTINE_DEBUG_LOGGING", defaults.debug_logging),
        }
    }

    pub fn max_nb_cores(mut self, n: usize) -> Self {
        self.max_nb_cores = n;
        self
    }

    pub fn stack_size(mut self, n: usize) -> Self {
        self.stack_size = n;
        self
    }

    pub fn max_routines(mut self, n: usize) -> Self {
        self.max_routines = n;
        self
    }

    pub fn ring_size(mut self, n: usize) -> Self {
        self.ring_size = n;
        self
    }

    pub fn local_ready_queue_capacity(mut self, n: usize) -> Self {
        self.local_ready_queue_capacity = n;
        self
    }

    pub fn poller_max_events(mut self, n: usize) -> Self {
        self.poller_max_events = n;
        self
    }

    pub fn poller_idle_timeout_ms(mut self, n: i64) -> Self {
        self.poller_idle_timeout_ms = n;
        self
    }

    pub fn debug_logging(mut self, on: bool) -> Self {
        self.debug_logging = on;
        self
    }

    /// Bounds-check every tunable before an [`crate::engine::Engine`] is
    /// constructed from it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_nb_cores == 0 {
            return Err(ConfigError::ZeroCores);
        }
        if self.max_nb_cores > MAX_WORKERS {
            return Err(ConfigError::TooManyCores { requested: self.max_nb_cores, max: MAX_WORKERS });
        }
        let min_stack = 4096;
        if self.stack_size < min_stack {
            return Err(ConfigError::StackTooSmall { requested: self.stack_size, min: min_stack });
        }
        if !self.ring_size.is_power_of_two() {
            return Err(ConfigError::RingSizeNotPowerOfTwo { requested: self.ring_size });
        }
        if self.max_routines == 0 {
            return Err(ConfigError::ZeroRoutines);
        }
        Ok(())
    }

    /// Debug dump via the `kinfo!` logging macro.
    pub fn print(&self) {
        groutine_core::kinfo!("engine config: {:?}", self);
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(EngineConfig::new().validate().is_ok());
    }

    #[test]
    fn test_zero_cores_rejected() {
        let cfg = EngineConfig::new().max_nb_cores(0);
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroCores));
    }

    #[test]
    fn test_too_many_cores_rejected() {
        let cfg = EngineConfig::new().max_nb_cores(MAX_WORKERS + 1);
        assert!(matches!(cfg.validate(), Err(ConfigError::TooManyCores { .. })));
    }

    #[test]
    fn test_tiny_stack_rejected() {
        let cfg = EngineConfig::new().stack_size(4096);
        assert!(matches!(cfg.validate(), Err(ConfigError::StackTooSmall { .. })));
    }

    #[test]
    fn test_non_power_of_two_ring_rejected() {
        let cfg = EngineConfig::new().ring_size(100);
        assert!(matches!(cfg.validate(), Err(ConfigError::RingSizeNotPowerOfTwo { .. })));
    }

    #[test]
    fn test_builder_overrides_chain() {
        let cfg = EngineConfig::new().max_nb_cores(2).poller_max_events(64);
        assert_eq!(cfg.max_nb_cores, 2);
        assert_eq!(cfg.poller_max_events, 64);
    }
}
