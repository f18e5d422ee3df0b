//! # gop-runtime
//!
//! Execution backend for the gop engine.
//!
//! This crate provides:
//! - Pool configuration (compile-time defaults + `GOP_*` env overrides)
//! - Worker parking for idle threads
//! - The fixed-size worker pool that runs `Queued` work
//! - The recycled control-block pool backing blocking waits

pub mod config;
pub mod control;
pub mod parking;
pub mod worker;

// Re-exports
pub use config::PoolConfig;
pub use control::{ControlBlock, ControlLease, ControlPool, ControlPoolStats};
pub use parking::{new_parking, WorkerParking};
pub use worker::{current_worker_id, Executor, Job, PoolStats, ThreadPool, WorkerId, INLINE_WORKER};
