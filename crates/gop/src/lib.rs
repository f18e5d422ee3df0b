//! # gop - generic asynchronous operations
//!
//! Every unit of asynchronous work is a [`Gop`]. Gops can be run on their
//! own or collected into an [`OpQue`], which is itself a gop, so queues
//! nest. Work runs either on a fixed worker pool (`Queued`) or inline on
//! the starting thread (`Direct`); callers block on single ops or fan in
//! over a queue.
//!
//! ## Quick Start
//!
//! ```ignore
//! use gop::{Engine, PoolConfig, OP_SUCCESS, OP_FAILURE};
//!
//! let engine = Engine::new(PoolConfig::from_env())?;
//! let q = engine.queue();
//! for path in paths {
//!     let gop = engine.op(move |_| if remove(&path) { OP_SUCCESS } else { OP_FAILURE });
//!     q.add(&gop)?;
//! }
//! q.finished_submission();
//!
//! if !q.wait_all().is_success() {
//!     while let Some(failed) = q.next_failed() {
//!         eprintln!("failed: {}", failed.my_id());
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//!   caller ── add / start / wait ──► OpQue ──► Gop (leaf) ──► ThreadPool
//!                                     ▲                          │
//!                                     └── child_completed ◄──────┘
//!                                          (status, callbacks, wake-up)
//! ```

pub mod callback;
pub mod engine;
pub mod op;
pub mod opque;
mod pending;
pub mod retry;
pub mod sort;

pub use callback::{Callback, FailureCallback};
pub use engine::Engine;
pub use op::{Gop, WaitOutcome, WorkFn};
pub use opque::OpQue;
pub use retry::{sync_exec_with_retry, RetryPolicy};
pub use sort::{default_sort_ops, identity_sort, SortFn};

// Re-export core types
pub use gop_core::{
    ExecMode, FreeMode, GopError, GopResult, OpId, OpKind, OpState, OpStatus, Outcome,
    OP_CANT_CONNECT, OP_DEAD, OP_ERROR, OP_FAILURE, OP_INVALID_HOST, OP_RETRY, OP_SUCCESS,
    OP_TIMEOUT,
};

// Re-export runtime types
pub use gop_runtime::{
    current_worker_id, ControlPool, ControlPoolStats, Executor, Job, PoolConfig, PoolStats,
    ThreadPool, WorkerId, INLINE_WORKER,
};
