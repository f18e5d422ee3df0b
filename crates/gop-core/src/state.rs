//! Operation state, kind and mode types

use core::fmt;

/// Execution state of an operation
///
/// ```text
/// Created -> Submitted -> Running -> Completed     (Queued)
/// Created -> Running -> Completed                  (Direct)
/// ```
///
/// `Completed` is terminal until an explicit reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpState {
    /// Built, not yet started
    Created = 0,

    /// Handed to the worker pool, waiting for a worker
    Submitted = 1,

    /// Work function executing (or queue children outstanding)
    Running = 2,

    /// Status latched
    Completed = 3,
}

impl OpState {
    /// Check if the operation has a latched status
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, OpState::Completed)
    }

    /// Check if the operation left `Created` but has not completed
    #[inline]
    pub const fn is_in_flight(&self) -> bool {
        matches!(self, OpState::Submitted | OpState::Running)
    }
}

impl fmt::Display for OpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpState::Created => write!(f, "CREATED"),
            OpState::Submitted => write!(f, "SUBMITTED"),
            OpState::Running => write!(f, "RUNNING"),
            OpState::Completed => write!(f, "COMPLETED"),
        }
    }
}

/// Where an operation's work function runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ExecMode {
    /// Handed to the worker pool
    #[default]
    Queued = 100,

    /// Run inline on the thread that starts the operation
    Direct = 101,
}

/// Leaf operation or operation queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpKind {
    Operation = 50,
    Queue = 51,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Operation => write!(f, "op"),
            OpKind::Queue => write!(f, "que"),
        }
    }
}

/// How much of an operation to tear down on free
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeMode {
    /// Release bookkeeping and already-completed children only
    Finalize,

    /// Also detach children that have not completed (abort path)
    Destroy,
}
