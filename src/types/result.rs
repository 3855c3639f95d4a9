//! The result code shared by every asynchronous operation.
//!
//! [`OpResult`] is the small closed enumeration at the bottom of the crate's
//! dependency graph: every request record, blob record, and task record
//! carries one. A record starts at [`Pending`](OpResult::Pending) and
//! transitions exactly once to a terminal value.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of one asynchronous operation.
///
/// `Pending` is the only non-terminal value. The plain terminal values are
/// `Success` and `Failure`; `MaxRetries` and `ResourceExhaustion` are the
/// terminal sub-kinds a task's retry accounting can assign when it gives up.
///
/// # Examples
///
/// ```
/// use batchswarm::OpResult;
///
/// assert!(OpResult::Pending.is_pending());
/// assert!(OpResult::Success.is_terminal());
/// assert!(OpResult::MaxRetries.is_terminal());
/// assert!(!OpResult::Failure.is_success());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpResult {
    /// The operation has been issued and no response has arrived yet.
    Pending,
    /// The operation completed successfully.
    Success,
    /// The operation failed (transport fault or worker-reported error).
    Failure,
    /// Terminal: the task's dispatch attempts reached its retry limit.
    MaxRetries,
    /// Terminal: the task hit the configured resource-exhaustion cap.
    ResourceExhaustion,
}

impl OpResult {
    /// Returns `true` if no response has resolved this operation yet.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Returns `true` once the operation has reached any terminal value.
    pub fn is_terminal(self) -> bool {
        !self.is_pending()
    }

    /// Returns `true` only for a successful completion.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for OpResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::MaxRetries => write!(f, "max_retries"),
            Self::ResourceExhaustion => write!(f, "resource_exhaustion"),
        }
    }
}
