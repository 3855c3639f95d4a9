//! Wire model for manager/worker traffic.
//!
//! These are the structured request and message types exchanged with a
//! worker. The transport collaborator owns the byte-level encoding and the
//! connection; everything here is plain serde data. Requests flow manager
//! to worker as [`WireRequest`]; everything flowing back is a
//! [`WorkerMessage`] -- either a [`Reply`](WorkerMessage::Reply) that
//! resolves an outstanding request, or an unsolicited
//! [`TaskReport`](WorkerMessage::TaskReport) describing the progress of a
//! task the worker is executing.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of one outstanding asynchronous operation.
///
/// Unique within the owning worker's registry at any instant; allocated
/// from a per-session counter. An identifier may be reused once the prior
/// request carrying it has resolved and been removed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One request from the manager to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRequest {
    /// Identifier the worker echoes back in its reply.
    pub id: RequestId,
    /// The operation to perform.
    pub body: RequestBody,
}

/// The operation class and payload of a [`WireRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestBody {
    /// An operation on a named blob.
    Blob {
        /// The blob the operation concerns.
        blob_id: String,
        /// What to do with it.
        action: BlobAction,
    },
    /// An operation on a task.
    Task {
        /// The task the operation concerns.
        task_id: String,
        /// What to do with it.
        action: TaskAction,
    },
}

impl RequestBody {
    /// Human-readable name of the target, used in log lines and errors.
    pub fn target(&self) -> String {
        match self {
            Self::Blob { blob_id, .. } => format!("blob '{blob_id}'"),
            Self::Task { task_id, .. } => format!("task '{task_id}'"),
        }
    }
}

/// Blob operations a worker understands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BlobAction {
    /// Reserve space for a new blob.
    Create {
        /// Declared size in bytes.
        size: u64,
        /// Optional opaque metadata stored alongside the blob.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
    /// Stage content into a created blob. The manager reads the local
    /// source file and ships the bytes; staged content is not durable
    /// until committed.
    Put {
        /// The content to stage.
        data: Vec<u8>,
    },
    /// Retrieve the committed content of a blob.
    Get,
    /// Make staged content durable.
    Commit,
    /// Remove the blob from the worker.
    Delete,
}

impl BlobAction {
    /// Short operation name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Put { .. } => "put",
            Self::Get => "get",
            Self::Commit => "commit",
            Self::Delete => "delete",
        }
    }
}

/// Task operations a worker understands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TaskAction {
    /// Place a task on the worker for execution.
    Submit {
        /// The full task description.
        spec: TaskSpec,
    },
    /// Remove a finished task and its sandbox from the worker.
    Remove,
}

/// Everything a worker sends back to the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// The terminal outcome of one outstanding request.
    Reply {
        /// The identifier of the request being resolved.
        id: RequestId,
        /// How it went.
        outcome: Outcome,
    },
    /// Unsolicited progress report for a task the worker is executing.
    /// Task execution outlives the submit request that placed it, so
    /// these arrive outside the request/reply pairing.
    TaskReport {
        /// The task the report concerns.
        task_id: String,
        /// What happened.
        report: TaskReport,
    },
}

/// Outcome of one request, as reported by the worker.
///
/// Transport-level failures never appear here; the dispatcher synthesizes
/// those locally when the connection dies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The operation completed on the worker.
    Success {
        /// Payload for operations that return content (blob get).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Vec<u8>>,
    },
    /// The worker executed the operation and reports a domain error
    /// (blob not found, disk full, task rejected).
    Error {
        /// The worker's description of the failure.
        message: String,
    },
}

impl Outcome {
    /// A bare success with no payload.
    pub fn ok() -> Self {
        Self::Success { data: None }
    }

    /// A success carrying content.
    pub fn with_data(data: Vec<u8>) -> Self {
        Self::Success { data: Some(data) }
    }

    /// Returns `true` if the worker reports success.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Progress of a task executing on a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskReport {
    /// The task entered execution.
    Running,
    /// The task ran to completion. A non-zero exit code is still a
    /// completed execution; the code is recorded, not retried.
    Done {
        /// Exit code of the command line.
        exit_code: i32,
        /// Resources the attempt actually consumed.
        usage: ResourceSummary,
        /// Wall-clock execution time of this attempt, microseconds.
        execute_time_us: u64,
    },
    /// The attempt exceeded its granted resource allocation.
    Exhausted {
        /// Measured usage at the point the worker stopped the task.
        usage: ResourceSummary,
        /// Wall-clock execution time of this attempt, microseconds.
        execute_time_us: u64,
    },
    /// The attempt overran its expected running-time bound and was
    /// terminated (fast-abort).
    Overrun {
        /// Wall-clock execution time of this attempt, microseconds.
        execute_time_us: u64,
    },
}

/// A task description: the command line plus the namespace binding blob
/// identifiers to mount descriptors, with the environment and scheduling
/// hints the caller supplied.
///
/// # Examples
///
/// ```
/// use batchswarm::{AccessMode, Mount, TaskSpec};
///
/// let spec = TaskSpec::new("wc -l myinput")
///     .with_mount("abc123", Mount::path("myinput", AccessMode::Read))
///     .with_mount("xyz456", Mount::Stdout);
///
/// assert_eq!(spec.command, "wc -l myinput");
/// assert_eq!(spec.namespace.len(), 2);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// The shell command line to execute.
    pub command: String,

    /// Mapping from blob identifier to the mount descriptor placing that
    /// blob in the task's namespace. Declaration order is preserved.
    #[serde(default)]
    pub namespace: IndexMap<String, Mount>,

    /// Environment variables applied to the command.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,

    /// Optional user-defined label for the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    /// Relative priority; higher runs earlier. Which worker receives the
    /// task remains the embedding's decision.
    #[serde(default)]
    pub priority: f64,
}

impl TaskSpec {
    /// Creates a spec for the given command with an empty namespace.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            namespace: IndexMap::new(),
            env: IndexMap::new(),
            tag: None,
            priority: 0.0,
        }
    }

    /// Binds a blob into the task's namespace.
    #[must_use]
    pub fn with_mount(mut self, blob_id: impl Into<String>, mount: Mount) -> Self {
        self.namespace.insert(blob_id.into(), mount);
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the user-defined label.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Sets the scheduling priority.
    #[must_use]
    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    /// Blob identifiers the task reads.
    pub fn reads(&self) -> impl Iterator<Item = &str> {
        self.namespace.iter().filter_map(|(blob_id, mount)| {
            mount.is_read().then_some(blob_id.as_str())
        })
    }

    /// Blob identifiers the task writes.
    pub fn writes(&self) -> impl Iterator<Item = &str> {
        self.namespace.iter().filter_map(|(blob_id, mount)| {
            mount.is_write().then_some(blob_id.as_str())
        })
    }
}

/// How a blob appears inside a task's namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mount {
    /// Mounted at a path in the task sandbox, read or write.
    Path {
        /// The mount point relative to the sandbox.
        path: String,
        /// Whether the task reads or writes the blob.
        mode: AccessMode,
    },
    /// The task's standard output stream is captured into the blob.
    Stdout,
    /// The blob's content is fed to the task's standard input.
    Stdin,
}

impl Mount {
    /// Convenience constructor for a path mount.
    pub fn path(path: impl Into<String>, mode: AccessMode) -> Self {
        Self::Path {
            path: path.into(),
            mode,
        }
    }

    /// Returns `true` if the task reads this blob.
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            Self::Stdin
                | Self::Path {
                    mode: AccessMode::Read,
                    ..
                }
        )
    }

    /// Returns `true` if the task writes this blob.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::Stdout
                | Self::Path {
                    mode: AccessMode::Write,
                    ..
                }
        )
    }
}

/// Access mode of a path mount. Serializes as `"R"` / `"W"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    /// The task reads the blob.
    #[serde(rename = "R")]
    Read,
    /// The task writes the blob.
    #[serde(rename = "W")]
    Write,
}

/// A summarized resource quantity: requested, granted, or measured.
///
/// Zero in any dimension means "unspecified" for a request and "not
/// measured" for a measurement; [`grown`](ResourceSummary::grown) leaves
/// unspecified dimensions alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ResourceSummary {
    /// CPU cores.
    #[serde(default)]
    pub cores: i64,
    /// Memory, megabytes.
    #[serde(default)]
    pub memory_mb: i64,
    /// Disk, megabytes.
    #[serde(default)]
    pub disk_mb: i64,
    /// Wall time, seconds.
    #[serde(default)]
    pub wall_time_s: i64,
}

impl ResourceSummary {
    /// A request for the given cores, memory, and disk.
    pub fn new(cores: i64, memory_mb: i64, disk_mb: i64) -> Self {
        Self {
            cores,
            memory_mb,
            disk_mb,
            wall_time_s: 0,
        }
    }

    /// The next larger allocation to request after an exhausted attempt:
    /// every specified dimension doubles.
    #[must_use]
    pub fn grown(&self) -> Self {
        let double = |v: i64| if v > 0 { v.saturating_mul(2) } else { v };
        Self {
            cores: double(self.cores),
            memory_mb: double(self.memory_mb),
            disk_mb: double(self.disk_mb),
            wall_time_s: double(self.wall_time_s),
        }
    }
}
