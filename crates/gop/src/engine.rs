//! Engine lifecycle
//!
//! An [`Engine`] owns the worker pool that runs Queued ops and hands out
//! ops bound to it. Shutting it down runs whatever is still queued and
//! joins the workers; ops started afterwards complete with `Error`.

use std::sync::Arc;

use gop_core::{GopResult, OpStatus};
use gop_runtime::{Executor, PoolConfig, PoolStats, ThreadPool, WorkerId};

use crate::op::Gop;
use crate::opque::OpQue;
use crate::retry::RetryPolicy;

pub struct Engine {
    pool: Arc<ThreadPool>,
    config: PoolConfig,
}

impl Engine {
    /// Start an engine with its own worker pool
    pub fn new(config: PoolConfig) -> GopResult<Self> {
        let pool = Arc::new(ThreadPool::new(&config)?);
        tracing::info!(
            pool = %config.name,
            workers = pool.total_workers(),
            "gop engine started"
        );
        Ok(Self { pool, config })
    }

    /// Engine configured from `GOP_*` environment variables
    pub fn from_env() -> GopResult<Self> {
        Self::new(PoolConfig::from_env())
    }

    /// Leaf op run on this engine's pool
    pub fn op<F>(&self, work: F) -> Gop
    where
        F: Fn(WorkerId) -> OpStatus + Send + Sync + 'static,
    {
        Gop::leaf(self.executor(), work)
    }

    /// Empty queue
    pub fn queue(&self) -> OpQue {
        OpQue::new()
    }

    pub fn executor(&self) -> Arc<dyn Executor> {
        self.pool.clone()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Retry policy matching this engine's configuration
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.config)
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Run queued work and join the workers; idempotent
    pub fn shutdown(&self) {
        if self.pool.is_shutdown() {
            return;
        }
        self.pool.shutdown();
        let stats = self.pool.stats();
        tracing::info!(
            executed = stats.executed,
            panicked = stats.panicked,
            "gop engine stopped"
        );
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
