//! Error types for the gop engine
//!
//! These cover misuse of the engine only. How an operation *ended* is an
//! [`OpStatus`](crate::OpStatus), never a `GopError`.

use thiserror::Error;

use crate::id::OpId;

/// Result type for engine operations
pub type GopResult<T> = Result<T, GopError>;

/// Errors raised when the engine is driven outside its contract
#[derive(Debug, Error)]
pub enum GopError {
    /// Status was already latched (double completion or resubmission without reset)
    #[error("operation {0} already completed")]
    AlreadyCompleted(OpId),

    /// Operation left `Created` and has not completed yet
    #[error("operation {0} is still executing")]
    StillRunning(OpId),

    /// Execution mode changes are only allowed before submission
    #[error("operation {0} already started execution")]
    AlreadyStarted(OpId),

    /// `finished_submission` was called on the queue
    #[error("queue {0} no longer accepts operations")]
    SubmissionClosed(OpId),

    /// Operation is already a child of some queue
    #[error("operation {op} already belongs to queue {queue}")]
    AlreadyQueued { op: OpId, queue: OpId },

    /// A queue cannot contain itself
    #[error("queue {0} cannot be added to itself")]
    SelfAdd(OpId),

    /// Queue-only call made on a leaf operation (or the reverse)
    #[error("operation {0} is not a queue")]
    NotAQueue(OpId),

    /// Queue handle used where a leaf is required
    #[error("operation {0} is a queue")]
    IsAQueue(OpId),

    /// Resources were released by `free` or auto-destroy
    #[error("operation {0} was released")]
    Released(OpId),

    /// Submission after the worker pool stopped
    #[error("worker pool '{0}' is shut down")]
    PoolShutdown(String),

    /// Worker thread could not be spawned
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
