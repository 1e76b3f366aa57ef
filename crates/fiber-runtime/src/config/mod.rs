//! Runtime configuration.
//!
//! Provides compile-time defaults with runtime environment overrides.
//!
//! # Configuration priority (highest wins)
//!
//! 1. Environment variables (runtime)
//! 2. User's `fibrt_config.rs` (compile-time, via `FIBRT_CONFIG_RS`)
//! 3. Library defaults
//!
//! ```rust,ignore
//! use fiber_runtime::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env()
//!     .num_workers(8)
//!     .park_timeout(Duration::from_millis(50));
//! ```

pub mod defaults;

use fiber_core::env::env_get;
use std::time::Duration;

/// Runtime configuration with builder-pattern overrides.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of worker OS threads, one scheduler + dispatcher per worker.
    pub num_workers: usize,
    /// Maximum live fibers per worker before `fiber_spawn` returns
    /// `NoStackSlots`.
    pub max_fibers_per_worker: usize,
    /// Size of one stack slot in the worker's mmap'd region, including the
    /// metadata page and trailing guard page.
    pub stack_slot_size: usize,
    /// How often the timer worker re-checks the deadline heap.
    pub timer_resolution: Duration,
    /// Enable verbose scheduler/dispatcher logging regardless of
    /// `FIBRT_LOG_LEVEL`.
    pub debug_logging: bool,
    /// Capacity of the bounded cross-worker work-item queue.
    pub work_queue_capacity: usize,
    /// Run-queue pop attempts before a worker parks.
    pub idle_spins: u32,
    /// Maximum blocking duration for a worker's `poll`/futex wait; bounds
    /// how late a due timer can fire when the worker is otherwise idle.
    pub park_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl RuntimeConfig {
    /// Build from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `FIBRT_NUM_WORKERS`
    /// - `FIBRT_MAX_FIBERS_PER_WORKER`
    /// - `FIBRT_STACK_SLOT_SIZE`
    /// - `FIBRT_TIMER_RESOLUTION_MS`
    /// - `FIBRT_DEBUG`
    /// - `FIBRT_WORK_QUEUE_CAPACITY`
    /// - `FIBRT_IDLE_SPINS`
    /// - `FIBRT_PARK_TIMEOUT_MS`
    pub fn from_env() -> Self {
        Self {
            num_workers: env_get("FIBRT_NUM_WORKERS", defaults::NUM_WORKERS),
            max_fibers_per_worker: env_get(
                "FIBRT_MAX_FIBERS_PER_WORKER",
                defaults::MAX_FIBERS_PER_WORKER,
            ),
            stack_slot_size: env_get("FIBRT_STACK_SLOT_SIZE", defaults::STACK_SLOT_SIZE),
            timer_resolution: Duration::from_millis(env_get(
                "FIBRT_TIMER_RESOLUTION_MS",
                defaults::TIMER_RESOLUTION_MS,
            )),
            debug_logging: env_get(
                "FIBRT_DEBUG",
                if defaults::DEBUG_LOGGING { 1usize } else { 0 },
            ) != 0,
            work_queue_capacity: env_get(
                "FIBRT_WORK_QUEUE_CAPACITY",
                defaults::WORK_QUEUE_CAPACITY,
            ),
            idle_spins: env_get("FIBRT_IDLE_SPINS", defaults::IDLE_SPINS as usize) as u32,
            park_timeout: Duration::from_millis(env_get(
                "FIBRT_PARK_TIMEOUT_MS",
                defaults::PARK_TIMEOUT_MS,
            )),
        }
    }

    /// Build from compile-time defaults only, ignoring the environment.
    /// Useful for deterministic tests.
    pub fn new() -> Self {
        Self {
            num_workers: defaults::NUM_WORKERS,
            max_fibers_per_worker: defaults::MAX_FIBERS_PER_WORKER,
            stack_slot_size: defaults::STACK_SLOT_SIZE,
            timer_resolution: Duration::from_millis(defaults::TIMER_RESOLUTION_MS),
            debug_logging: defaults::DEBUG_LOGGING,
            work_queue_capacity: defaults::WORK_QUEUE_CAPACITY,
            idle_spins: defaults::IDLE_SPINS,
            park_timeout: Duration::from_millis(defaults::PARK_TIMEOUT_MS),
        }
    }

    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    pub fn max_fibers_per_worker(mut self, n: usize) -> Self {
        self.max_fibers_per_worker = n;
        self
    }

    pub fn stack_slot_size(mut self, size: usize) -> Self {
        self.stack_slot_size = size;
        self
    }

    pub fn timer_resolution(mut self, d: Duration) -> Self {
        self.timer_resolution = d;
        self
    }

    pub fn debug_logging(mut self, enable: bool) -> Self {
        self.debug_logging = enable;
        self
    }

    pub fn work_queue_capacity(mut self, cap: usize) -> Self {
        self.work_queue_capacity = cap;
        self
    }

    pub fn idle_spins(mut self, spins: u32) -> Self {
        self.idle_spins = spins;
        self
    }

    pub fn park_timeout(mut self, d: Duration) -> Self {
        self.park_timeout = d;
        self
    }

    /// Validate configuration, returning the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::InvalidValue("num_workers must be > 0"));
        }
        if self.num_workers > 256 {
            return Err(ConfigError::InvalidValue("num_workers must be <= 256"));
        }
        if self.max_fibers_per_worker == 0 {
            return Err(ConfigError::InvalidValue("max_fibers_per_worker must be > 0"));
        }
        if self.stack_slot_size < 16 * 1024 {
            return Err(ConfigError::InvalidValue("stack_slot_size must be >= 16KB"));
        }
        if self.work_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue("work_queue_capacity must be > 0"));
        }
        Ok(())
    }

    pub fn print(&self) {
        eprintln!("Runtime configuration:");
        eprintln!("  num_workers:            {}", self.num_workers);
        eprintln!("  max_fibers_per_worker:  {}", self.max_fibers_per_worker);
        eprintln!("  stack_slot_size:        {}", self.stack_slot_size);
        eprintln!("  timer_resolution:       {:?}", self.timer_resolution);
        eprintln!("  debug_logging:          {}", self.debug_logging);
        eprintln!("  work_queue_capacity:    {}", self.work_queue_capacity);
        eprintln!("  idle_spins:             {}", self.idle_spins);
        eprintln!("  park_timeout:           {:?}", self.park_timeout);
    }
}

#[derive(Debug, Clone)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_is_valid() {
        let config = RuntimeConfig::from_env();
        assert!(config.num_workers >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_overrides() {
        let config = RuntimeConfig::new()
            .num_workers(8)
            .park_timeout(Duration::from_millis(5));

        assert_eq!(config.num_workers, 8);
        assert_eq!(config.park_timeout, Duration::from_millis(5));
    }

    #[test]
    fn validation_catches_bad_values() {
        let config = RuntimeConfig::new().num_workers(0);
        assert!(config.validate().is_err());

        let config = RuntimeConfig::new().num_workers(1000);
        assert!(config.validate().is_err());
    }
}
