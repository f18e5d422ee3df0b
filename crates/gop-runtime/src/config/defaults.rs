//! Library defaults for [`PoolConfig`](super::PoolConfig)

/// Worker threads; 0 sizes the pool from the CPU count
pub const NUM_WORKERS: usize = 0;

/// Upper bound applied to any worker count
pub const MAX_WORKERS: usize = 64;

/// Idle worker park timeout
pub const PARK_TIMEOUT_MS: u64 = 10;

/// Idle control blocks retained for reuse
pub const CONTROL_POOL_CAPACITY: usize = 1024;

/// Retry budget handed to command-layer retry helpers
pub const MAX_RETRIES: u32 = 2;

/// First retry backoff
pub const RETRY_BASE_DELAY_MS: u64 = 50;

/// Worker thread name prefix
pub const POOL_NAME: &str = "gop-worker";
