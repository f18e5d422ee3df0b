//! # gop-core
//!
//! Core types for the gop (generic operation) engine.
//!
//! This crate is platform-agnostic and has no knowledge of threads or
//! queues. The execution backend lives in `gop-runtime`, and the operation
//! and queue handles live in `gop`.
//!
//! ## Modules
//!
//! - `status` - Operation outcome and status constants
//! - `id` - Operation identifier and the process-wide id allocator
//! - `state` - Operation state, execution mode, kind and free mode enums
//! - `error` - Error types for engine misuse
//! - `env` - Environment variable utilities

pub mod id;
pub mod status;
pub mod state;
pub mod error;
pub mod env;

// Re-exports for convenience
pub use id::OpId;
pub use status::{
    OpStatus, Outcome, OP_CANT_CONNECT, OP_DEAD, OP_ERROR, OP_FAILURE, OP_INVALID_HOST,
    OP_RETRY, OP_SUCCESS, OP_TIMEOUT,
};
pub use state::{ExecMode, FreeMode, OpKind, OpState};
pub use error::{GopError, GopResult};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str};
