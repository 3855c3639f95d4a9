//! Blob lifecycle: the per-blob state machine driven by dispatcher
//! completions.
//!
//! A [`BlobRecord`] exists from the moment the manager declares the blob
//! to a worker until the worker confirms deletion (or the manager discards
//! the worker representation). Transitions happen in two steps: issuing an
//! operation moves the blob into the matching transitional state
//! (`begin_*`), and the eventual resolution moves it onward
//! ([`apply_result`](BlobRecord::apply_result)). A failed resolution lands
//! the blob in [`Failed`](BlobState::Failed) from any transitional state;
//! the record is retained there for diagnostics.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::types::OpResult;

/// Lifecycle states of a blob on one worker.
///
/// ```text
/// Declared -> Creating -> Created -> (Putting ->) Created
///          -> Committing -> Committed -> Deleting -> Deleted
/// ```
///
/// `Failed` is reachable from every transitional state when the bound
/// request resolves to a failure. `get` is permitted only in `Committed`
/// and does not change the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobState {
    /// Known to the manager, nothing issued to the worker yet.
    Declared,
    /// A create request is outstanding.
    Creating,
    /// Storage reserved on the worker; content may be staged.
    Created,
    /// A put request is outstanding.
    Putting,
    /// A commit request is outstanding.
    Committing,
    /// Content is durable; gets are permitted.
    Committed,
    /// A delete request is outstanding.
    Deleting,
    /// The worker confirmed deletion; the record may be discarded.
    Deleted,
    /// A request on this blob failed; retained for diagnostics.
    Failed,
}

impl BlobState {
    /// Returns `true` while a request that will move the state is
    /// outstanding.
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            Self::Creating | Self::Putting | Self::Committing | Self::Deleting
        )
    }

    /// Returns `true` once no further operations are meaningful.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Deleted | Self::Failed)
    }
}

impl fmt::Display for BlobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Declared => "declared",
            Self::Creating => "creating",
            Self::Created => "created",
            Self::Putting => "putting",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// The operation an outstanding blob request is performing. Stored as the
/// request record's context so the dispatcher can finish the job when the
/// reply arrives (a get needs its local destination back).
#[derive(Debug, Clone)]
pub enum BlobOp {
    /// Reserve storage.
    Create,
    /// Stage content.
    Put,
    /// Retrieve content into the given local file.
    Get {
        /// Where the fetched bytes land.
        destination: std::path::PathBuf,
    },
    /// Make staged content durable.
    Commit,
    /// Remove the blob.
    Delete,
}

impl BlobOp {
    /// Short operation name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Put => "put",
            Self::Get { .. } => "get",
            Self::Commit => "commit",
            Self::Delete => "delete",
        }
    }
}

/// Manager-side representation of one blob on one worker.
#[derive(Debug, Clone)]
pub struct BlobRecord {
    /// Opaque identifier, unique per worker.
    pub blob_id: String,
    /// Declared size in bytes (0 until created).
    pub size: u64,
    /// Opaque metadata passed through to the worker at creation.
    pub metadata: Option<Value>,
    /// Current lifecycle state.
    pub state: BlobState,
    /// Result of the most recent request on this blob.
    pub result: OpResult,
    /// Diagnostic from the most recent failure, as the worker (or the
    /// transport layer) reported it.
    pub last_error: Option<String>,
    /// When the manager declared the blob.
    pub declared_at: DateTime<Utc>,
}

impl BlobRecord {
    /// A freshly declared blob: no storage reserved, nothing outstanding.
    pub fn new(blob_id: impl Into<String>) -> Self {
        Self {
            blob_id: blob_id.into(),
            size: 0,
            metadata: None,
            state: BlobState::Declared,
            result: OpResult::Pending,
            last_error: None,
            declared_at: Utc::now(),
        }
    }

    /// The retained failure diagnostic as a typed error, for callers
    /// surfacing why a phase went wrong.
    pub fn worker_error(&self) -> Option<Error> {
        self.last_error.as_ref().map(|message| Error::WorkerReported {
            target: format!("blob '{}'", self.blob_id),
            message: message.clone(),
        })
    }

    fn reject(&self, operation: &'static str) -> Error {
        Error::InvalidBlobState {
            blob_id: self.blob_id.clone(),
            state: self.state,
            operation,
        }
    }

    /// Enters `Creating`; records the declared size and metadata.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidBlobState`] unless the blob is `Declared`.
    pub fn begin_create(&mut self, size: u64, metadata: Option<Value>) -> Result<()> {
        if self.state != BlobState::Declared {
            return Err(self.reject("create"));
        }
        self.size = size;
        self.metadata = metadata;
        self.state = BlobState::Creating;
        self.result = OpResult::Pending;
        Ok(())
    }

    /// Enters `Putting`. Staged content replaces any prior staging.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidBlobState`] unless the blob is `Created`.
    pub fn begin_put(&mut self) -> Result<()> {
        if self.state != BlobState::Created {
            return Err(self.reject("put"));
        }
        self.state = BlobState::Putting;
        self.result = OpResult::Pending;
        Ok(())
    }

    /// Enters `Committing`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidBlobState`] unless the blob is `Created`.
    pub fn begin_commit(&mut self) -> Result<()> {
        if self.state != BlobState::Created {
            return Err(self.reject("commit"));
        }
        self.state = BlobState::Committing;
        self.result = OpResult::Pending;
        Ok(())
    }

    /// Checks that a get is permitted (committed content only). The state
    /// does not change; a get copies content without moving the lifecycle.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidBlobState`] unless the blob is `Committed`.
    pub fn begin_get(&mut self) -> Result<()> {
        if self.state != BlobState::Committed {
            return Err(self.reject("get"));
        }
        self.result = OpResult::Pending;
        Ok(())
    }

    /// Enters `Deleting`. Permitted from any non-transitional state except
    /// `Deleted`; deleting a blob whose content never existed is the
    /// worker's call to answer (success-as-no-op or not-found), not a
    /// caller error.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidBlobState`] if a request is already moving the
    /// state, or the worker has already confirmed deletion.
    pub fn begin_delete(&mut self) -> Result<()> {
        if self.state.is_transitional() || self.state == BlobState::Deleted {
            return Err(self.reject("delete"));
        }
        self.state = BlobState::Deleting;
        self.result = OpResult::Pending;
        Ok(())
    }

    /// Applies the resolution of the outstanding request: moves the
    /// transitional state onward on success, to `Failed` otherwise.
    pub fn apply_result(&mut self, op: &BlobOp, result: OpResult) {
        self.result = result;
        if !result.is_success() {
            self.state = BlobState::Failed;
            return;
        }
        self.state = match op {
            BlobOp::Create => BlobState::Created,
            // Staged, not yet durable.
            BlobOp::Put => BlobState::Created,
            BlobOp::Commit => BlobState::Committed,
            // A get leaves the lifecycle where it was.
            BlobOp::Get { .. } => self.state,
            BlobOp::Delete => BlobState::Deleted,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_put_commit_walks_the_happy_path() {
        let mut blob = BlobRecord::new("abc123");
        assert_eq!(blob.state, BlobState::Declared);

        blob.begin_create(100_000, None).unwrap();
        assert_eq!(blob.state, BlobState::Creating);
        blob.apply_result(&BlobOp::Create, OpResult::Success);
        assert_eq!(blob.state, BlobState::Created);
        assert_eq!(blob.size, 100_000);

        blob.begin_put().unwrap();
        assert_eq!(blob.state, BlobState::Putting);
        blob.apply_result(&BlobOp::Put, OpResult::Success);
        // Staged content is not durable yet.
        assert_eq!(blob.state, BlobState::Created);

        blob.begin_commit().unwrap();
        blob.apply_result(&BlobOp::Commit, OpResult::Success);
        assert_eq!(blob.state, BlobState::Committed);
    }

    #[test]
    fn get_requires_committed_and_keeps_state() {
        let mut blob = BlobRecord::new("b");
        let err = blob.begin_get().unwrap_err();
        assert!(matches!(err, Error::InvalidBlobState { .. }));

        blob.begin_create(10, None).unwrap();
        blob.apply_result(&BlobOp::Create, OpResult::Success);
        assert!(blob.begin_get().is_err());

        blob.begin_commit().unwrap();
        blob.apply_result(&BlobOp::Commit, OpResult::Success);

        blob.begin_get().unwrap();
        assert_eq!(blob.state, BlobState::Committed);
        blob.apply_result(
            &BlobOp::Get {
                destination: "out".into(),
            },
            OpResult::Success,
        );
        assert_eq!(blob.state, BlobState::Committed);
    }

    #[test]
    fn delete_allowed_from_any_settled_state() {
        for setup in [
            BlobState::Declared,
            BlobState::Created,
            BlobState::Committed,
            BlobState::Failed,
        ] {
            let mut blob = BlobRecord::new("b");
            blob.state = setup;
            blob.begin_delete()
                .unwrap_or_else(|e| panic!("delete from {setup} should be allowed: {e}"));
            assert_eq!(blob.state, BlobState::Deleting);
            blob.apply_result(&BlobOp::Delete, OpResult::Success);
            assert_eq!(blob.state, BlobState::Deleted);
        }
    }

    #[test]
    fn delete_rejected_mid_transition_and_after_deletion() {
        for setup in [
            BlobState::Creating,
            BlobState::Putting,
            BlobState::Committing,
            BlobState::Deleting,
            BlobState::Deleted,
        ] {
            let mut blob = BlobRecord::new("b");
            blob.state = setup;
            assert!(
                blob.begin_delete().is_err(),
                "delete from {setup} should be rejected"
            );
        }
    }

    #[test]
    fn failure_lands_in_failed_from_any_transition() {
        let mut blob = BlobRecord::new("b");
        blob.begin_create(1, None).unwrap();
        blob.apply_result(&BlobOp::Create, OpResult::Failure);
        assert_eq!(blob.state, BlobState::Failed);
        assert_eq!(blob.result, OpResult::Failure);

        // Failed blobs can still be deleted for cleanup.
        blob.begin_delete().unwrap();
        blob.apply_result(&BlobOp::Delete, OpResult::Failure);
        assert_eq!(blob.state, BlobState::Failed);
    }

    #[test]
    fn worker_error_wraps_the_retained_diagnostic() {
        let mut blob = BlobRecord::new("bad-blob");
        assert!(blob.worker_error().is_none());

        blob.last_error = Some("disk full".to_string());
        let err = blob.worker_error().unwrap();
        assert!(err.to_string().contains("disk full"));
        assert!(err.to_string().contains("bad-blob"));
    }

    #[test]
    fn create_twice_is_rejected() {
        let mut blob = BlobRecord::new("b");
        blob.begin_create(1, None).unwrap();
        blob.apply_result(&BlobOp::Create, OpResult::Success);
        let err = blob.begin_create(1, None).unwrap_err();
        assert!(matches!(err, Error::InvalidBlobState { .. }));
    }
}
