//! Error types for manager-side swarm operations.
//!
//! Provides [`Error`], the crate-wide error enum, and the [`Result`] alias
//! used throughout. Variants carry enough context (worker, blob, task,
//! request identifiers) to diagnose a failure without a debugger attached.
//!
//! Transient faults (a lost connection, a single resource-exhaustion event
//! below the cap) are absorbed by the retry machinery and never surface
//! through this type; what does surface is either a terminal classification
//! or a caller mistake (the `ProgrammingError` family: issuing an operation
//! on a target that already has a request in flight, or from a state that
//! does not permit it).

use thiserror::Error;

use crate::manager::blob::BlobState;
use crate::manager::task::TaskState;
use crate::types::RequestId;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the manager core.
///
/// # Examples
///
/// ```
/// use batchswarm::{Error, RequestId};
///
/// let err = Error::DuplicateRequest { id: RequestId(7) };
/// assert!(err.to_string().contains('7'));
/// assert!(err.is_programming_error());
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// Connection or transport-layer fault. Every request pending on the
    /// affected worker is resolved to `Failure` when this occurs.
    #[error("transport failure on worker '{worker}': {message}")]
    Transport {
        /// The worker whose connection failed.
        worker: String,
        /// Description from the transport layer.
        message: String,
    },

    /// The worker executed the operation and reported a domain error
    /// (blob not found, disk full, ...).
    #[error("worker reported failure for {target}: {message}")]
    WorkerReported {
        /// The blob or task the operation concerned.
        target: String,
        /// The worker's error message.
        message: String,
    },

    /// Terminal: the task's dispatch attempts reached its retry limit.
    #[error("task '{task_id}' failed after {attempts} dispatch attempts")]
    RetriesExhausted {
        /// The task that ran out of attempts.
        task_id: String,
        /// The number of attempts made.
        attempts: u32,
    },

    /// Terminal: the task hit the configured resource-exhaustion cap.
    #[error("task '{task_id}' exceeded its resource allocation {attempts} times")]
    ExhaustionCapReached {
        /// The task that kept outgrowing its allocation.
        task_id: String,
        /// The number of exhausted attempts.
        attempts: u32,
    },

    /// The target already has a request in flight. At most one outstanding
    /// request per blob or task is the invariant that keeps barrier
    /// bookkeeping correct; violations are reported synchronously, never
    /// queued.
    #[error("{target} already has request {id} pending")]
    RequestPending {
        /// The blob or task with the in-flight request.
        target: String,
        /// The identifier of the request already pending.
        id: RequestId,
    },

    /// A request identifier was registered twice. Identifiers are unique
    /// within a worker's registry at any instant.
    #[error("request id {id} is already registered")]
    DuplicateRequest {
        /// The duplicated identifier.
        id: RequestId,
    },

    /// The blob's current lifecycle state does not permit the operation.
    #[error("blob '{blob_id}' is {state}, cannot {operation}")]
    InvalidBlobState {
        /// The blob the operation was issued against.
        blob_id: String,
        /// Its current lifecycle state.
        state: BlobState,
        /// The operation that was rejected.
        operation: &'static str,
    },

    /// The task's current lifecycle state does not permit the operation.
    #[error("task '{task_id}' is {state}, cannot {operation}")]
    InvalidTaskState {
        /// The task the operation was issued against.
        task_id: String,
        /// Its current lifecycle state.
        state: TaskState,
        /// The operation that was rejected.
        operation: &'static str,
    },

    /// The blob is not declared on this worker.
    #[error("blob '{blob_id}' is not declared on this worker")]
    UnknownBlob {
        /// The missing blob identifier.
        blob_id: String,
    },

    /// The blob is already declared on this worker.
    #[error("blob '{blob_id}' is already declared on this worker")]
    BlobAlreadyDeclared {
        /// The duplicated blob identifier.
        blob_id: String,
    },

    /// The task is not known to the manager.
    #[error("task '{task_id}' is not known to the manager")]
    UnknownTask {
        /// The missing task identifier.
        task_id: String,
    },

    /// The task identifier supplied at submission is already taken.
    #[error("task '{task_id}' already exists")]
    TaskAlreadyExists {
        /// The duplicated task identifier.
        task_id: String,
    },

    /// The task is already declared on a worker. A task is declared to at
    /// most one worker at a time.
    #[error("task '{task_id}' is already declared on worker '{worker}'")]
    TaskAlreadyDeclared {
        /// The task identifier.
        task_id: String,
        /// The worker it is currently declared on.
        worker: String,
    },

    /// Local filesystem error while staging a put or landing a get.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A payload could not be serialized or deserialized.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Returns `true` if this error is a caller mistake (an invariant
    /// violation reported synchronously) rather than a runtime fault.
    ///
    /// # Examples
    ///
    /// ```
    /// use batchswarm::Error;
    ///
    /// let err = Error::UnknownBlob { blob_id: "b1".to_string() };
    /// assert!(err.is_programming_error());
    ///
    /// let err = Error::Transport {
    ///     worker: "w1".to_string(),
    ///     message: "connection reset".to_string(),
    /// };
    /// assert!(!err.is_programming_error());
    /// ```
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Self::RequestPending { .. }
                | Self::DuplicateRequest { .. }
                | Self::InvalidBlobState { .. }
                | Self::InvalidTaskState { .. }
                | Self::UnknownBlob { .. }
                | Self::BlobAlreadyDeclared { .. }
                | Self::UnknownTask { .. }
                | Self::TaskAlreadyExists { .. }
                | Self::TaskAlreadyDeclared { .. }
        )
    }

    /// Returns `true` if this error represents a terminal task
    /// classification (retries exhausted or exhaustion cap reached).
    pub fn is_terminal_classification(&self) -> bool {
        matches!(
            self,
            Self::RetriesExhausted { .. } | Self::ExhaustionCapReached { .. }
        )
    }
}
