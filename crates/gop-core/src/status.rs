//! Operation status types
//!
//! Every completed operation produces an [`OpStatus`]: an outcome class plus a
//! low-level detail code supplied by whoever executed the work. Aggregate
//! checks (queue success, `completed_successfully`) compare the outcome only.

use core::fmt;

/// Outcome class of a completed operation
///
/// The discriminants are stable and are what collaborators branch on, so
/// they must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Outcome {
    /// Work finished as requested
    Success = 10,

    /// Generic failure, details in the error code
    Failure = 20,

    /// Transient failure, caller policy decides on resubmission
    Retry = 30,

    /// Connection died while the command was in flight
    Dead = 40,

    /// Command did not finish in time
    Timeout = 50,

    /// Target host could not be resolved
    InvalidHost = 60,

    /// Target host refused or dropped the connection attempt
    CantConnect = 70,

    /// Engine-internal violation (double completion, panicking work, ...)
    Error = 80,
}

impl Outcome {
    /// Stable numeric code
    #[inline]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Map a numeric code back to an outcome
    pub const fn from_code(code: i32) -> Option<Outcome> {
        match code {
            10 => Some(Outcome::Success),
            20 => Some(Outcome::Failure),
            30 => Some(Outcome::Retry),
            40 => Some(Outcome::Dead),
            50 => Some(Outcome::Timeout),
            60 => Some(Outcome::InvalidHost),
            70 => Some(Outcome::CantConnect),
            80 => Some(Outcome::Error),
            _ => None,
        }
    }

    /// Outcomes a command layer may retry with a fresh operation
    #[inline]
    pub const fn is_transient(self) -> bool {
        matches!(self, Outcome::Retry | Outcome::Dead | Outcome::Timeout)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Outcome::Success => "SUCCESS",
            Outcome::Failure => "FAILURE",
            Outcome::Retry => "RETRY",
            Outcome::Dead => "DEAD",
            Outcome::Timeout => "TIMEOUT",
            Outcome::InvalidHost => "INVALID_HOST",
            Outcome::CantConnect => "CANT_CONNECT",
            Outcome::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Terminal status of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpStatus {
    /// Simplified outcome used for branching
    pub outcome: Outcome,

    /// Low-level error code from the underlying op (0 when not applicable)
    pub error_code: i32,
}

impl OpStatus {
    #[inline]
    pub const fn new(outcome: Outcome, error_code: i32) -> Self {
        OpStatus { outcome, error_code }
    }

    /// Same outcome, different detail code
    #[inline]
    pub const fn with_code(self, error_code: i32) -> Self {
        OpStatus { outcome: self.outcome, error_code }
    }

    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success)
    }
}

impl Default for OpStatus {
    fn default() -> Self {
        OP_SUCCESS
    }
}

impl From<Outcome> for OpStatus {
    fn from(outcome: Outcome) -> Self {
        OpStatus::new(outcome, 0)
    }
}

impl fmt::Display for OpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.error_code == 0 {
            write!(f, "{}", self.outcome)
        } else {
            write!(f, "{} (code {})", self.outcome, self.error_code)
        }
    }
}

pub const OP_SUCCESS: OpStatus = OpStatus::new(Outcome::Success, 0);
pub const OP_FAILURE: OpStatus = OpStatus::new(Outcome::Failure, 0);
pub const OP_RETRY: OpStatus = OpStatus::new(Outcome::Retry, 0);
pub const OP_DEAD: OpStatus = OpStatus::new(Outcome::Dead, 0);
pub const OP_TIMEOUT: OpStatus = OpStatus::new(Outcome::Timeout, 0);
pub const OP_INVALID_HOST: OpStatus = OpStatus::new(Outcome::InvalidHost, 0);
pub const OP_CANT_CONNECT: OpStatus = OpStatus::new(Outcome::CantConnect, 0);
pub const OP_ERROR: OpStatus = OpStatus::new(Outcome::Error, 0);
