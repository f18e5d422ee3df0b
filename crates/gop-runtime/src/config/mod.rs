//! Worker pool configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder setters
//! 2. Environment variables (`from_env` only)
//! 3. Library defaults (`defaults`)
//!
//! # Example
//!
//! ```rust,ignore
//! use gop_runtime::config::PoolConfig;
//!
//! let config = PoolConfig::from_env()
//!     .num_workers(8)
//!     .park_timeout(Duration::from_millis(5));
//! ```

pub mod defaults;

use std::time::Duration;
use gop_core::env::{env_get, env_get_str};

/// Pool configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads (0 = size from CPU count)
    pub num_workers: usize,
    /// How long an idle worker parks before re-checking the queue
    pub park_timeout: Duration,
    /// Idle control blocks kept for reuse
    pub control_pool_capacity: usize,
    /// Retry budget for command-layer retry helpers
    pub max_retries: u32,
    /// First retry backoff
    pub retry_base_delay: Duration,
    /// Worker thread name prefix
    pub name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl PoolConfig {
    /// Library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `GOP_NUM_WORKERS` - Number of worker threads
    /// - `GOP_PARK_TIMEOUT_MS` - Idle park timeout in milliseconds
    /// - `GOP_CONTROL_POOL_CAPACITY` - Idle control blocks retained
    /// - `GOP_MAX_RETRIES` - Retry budget
    /// - `GOP_RETRY_BASE_DELAY_MS` - First retry backoff in milliseconds
    /// - `GOP_POOL_NAME` - Worker thread name prefix
    pub fn from_env() -> Self {
        Self {
            num_workers: env_get("GOP_NUM_WORKERS", defaults::NUM_WORKERS),
            park_timeout: Duration::from_millis(env_get(
                "GOP_PARK_TIMEOUT_MS",
                defaults::PARK_TIMEOUT_MS,
            )),
            control_pool_capacity: env_get(
                "GOP_CONTROL_POOL_CAPACITY",
                defaults::CONTROL_POOL_CAPACITY,
            ),
            max_retries: env_get("GOP_MAX_RETRIES", defaults::MAX_RETRIES),
            retry_base_delay: Duration::from_millis(env_get(
                "GOP_RETRY_BASE_DELAY_MS",
                defaults::RETRY_BASE_DELAY_MS,
            )),
            name: env_get_str("GOP_POOL_NAME", defaults::POOL_NAME),
        }
    }

    /// Library defaults, environment ignored.
    pub fn new() -> Self {
        Self {
            num_workers: defaults::NUM_WORKERS,
            park_timeout: Duration::from_millis(defaults::PARK_TIMEOUT_MS),
            control_pool_capacity: defaults::CONTROL_POOL_CAPACITY,
            max_retries: defaults::MAX_RETRIES,
            retry_base_delay: Duration::from_millis(defaults::RETRY_BASE_DELAY_MS),
            name: defaults::POOL_NAME.to_string(),
        }
    }

    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    pub fn park_timeout(mut self, timeout: Duration) -> Self {
        self.park_timeout = timeout;
        self
    }

    pub fn control_pool_capacity(mut self, n: usize) -> Self {
        self.control_pool_capacity = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Worker count actually spawned
    ///
    /// An explicit count is clamped to `1..=MAX_WORKERS`. Zero picks
    /// `nproc / 2`, kept within `2..=8`.
    pub fn resolved_workers(&self) -> usize {
        if self.num_workers > 0 {
            return self.num_workers.min(defaults::MAX_WORKERS);
        }
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        (cpus / 2).clamp(2, 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_library_defaults() {
        let config = PoolConfig::new();
        assert_eq!(config.num_workers, defaults::NUM_WORKERS);
        assert_eq!(config.park_timeout, Duration::from_millis(defaults::PARK_TIMEOUT_MS));
        assert_eq!(config.name, defaults::POOL_NAME);
    }

    #[test]
    fn test_builder_overrides() {
        let config = PoolConfig::new()
            .num_workers(3)
            .control_pool_capacity(16)
            .max_retries(5)
            .name("io");
        assert_eq!(config.resolved_workers(), 3);
        assert_eq!(config.control_pool_capacity, 16);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.name, "io");
    }

    #[test]
    fn test_resolved_workers_bounds() {
        let auto = PoolConfig::new().resolved_workers();
        assert!((2..=8).contains(&auto));

        let huge = PoolConfig::new().num_workers(10_000).resolved_workers();
        assert_eq!(huge, defaults::MAX_WORKERS);
    }
}
