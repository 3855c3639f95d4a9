//! The manager core: cross-worker task table, per-worker sessions, and the
//! lifecycle machinery underneath them.
//!
//! A [`Manager`] owns what outlives any single worker: the task table, the
//! task-to-worker declaration map, and the fault-tolerance policy. Each
//! connected worker gets a [`WorkerSession`] from
//! [`Manager::session`]; the session exclusively owns all per-worker state
//! (registries, blob records, the transport) while sharing the manager's
//! concurrent tables.

pub mod barrier;
pub mod blob;
pub mod registry;
pub mod task;
pub mod worker;

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::shared::transport::Transport;
use crate::types::TaskSpec;

pub use blob::{BlobRecord, BlobState};
pub use task::{FailureClass, RetryDecision, RetryPolicy, TaskRecord, TaskState};
pub use worker::WorkerSession;

/// Cross-worker task table. Sessions mutate records one writer at a time;
/// the map's sharded locking covers the cross-worker sharing.
pub(crate) type TaskTable = Arc<DashMap<String, TaskRecord>>;

/// Which worker currently holds each declared task.
pub(crate) type Declarations = Arc<DashMap<String, String>>;

/// The manager: accepts tasks, hands out per-worker sessions, and keeps
/// the global task state those sessions drive.
///
/// # Examples
///
/// ```
/// use batchswarm::shared::ChannelTransport;
/// use batchswarm::{Manager, RetryPolicy, TaskSpec};
///
/// let manager = Manager::new().with_policy(RetryPolicy::default().with_max_retries(3));
/// let task_id = manager.submit_task(TaskSpec::new("wc -l myinput"));
///
/// let (transport, _endpoint) = ChannelTransport::pair("worker-1");
/// let mut session = manager.session("worker-1", transport);
/// session.declare_task(&task_id).unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct Manager {
    tasks: TaskTable,
    declarations: Declarations,
    policy: RetryPolicy,
}

impl Manager {
    /// A manager with the default retry policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the fault-tolerance policy applied to newly submitted
    /// tasks.
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The current fault-tolerance policy.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Accepts a task and assigns it an identifier, unique across this
    /// manager's lifetime.
    pub fn submit_task(&self, spec: TaskSpec) -> String {
        let task_id = Uuid::new_v4().to_string();
        debug!(task = %task_id, command = %spec.command, "task submitted");
        self.tasks
            .insert(task_id.clone(), TaskRecord::new(&task_id, spec, self.policy));
        task_id
    }

    /// Accepts a task under a caller-supplied identifier.
    ///
    /// # Errors
    ///
    /// [`Error::TaskAlreadyExists`] if the identifier is taken.
    pub fn submit_task_with_id(&self, task_id: &str, spec: TaskSpec) -> Result<()> {
        match self.tasks.entry(task_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::TaskAlreadyExists {
                task_id: task_id.to_string(),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                debug!(task = %task_id, command = %spec.command, "task submitted");
                slot.insert(TaskRecord::new(task_id, spec, self.policy));
                Ok(())
            },
        }
    }

    /// Snapshot of a task record.
    pub fn task(&self, task_id: &str) -> Option<TaskRecord> {
        self.tasks.get(task_id).map(|t| t.clone())
    }

    /// Runs a closure against a task record under the table's lock. Used
    /// to adjust resources or expectations before the first dispatch.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownTask`] if the manager does not know the task.
    pub fn update_task<R>(
        &self,
        task_id: &str,
        f: impl FnOnce(&mut TaskRecord) -> R,
    ) -> Result<R> {
        let mut task = self.tasks.get_mut(task_id).ok_or_else(|| Error::UnknownTask {
            task_id: task_id.to_string(),
        })?;
        Ok(f(&mut task))
    }

    /// Forgets a task entirely. The task must not be declared on any
    /// worker; remove it there first.
    ///
    /// # Errors
    ///
    /// [`Error::TaskAlreadyDeclared`] while a worker still holds it.
    pub fn remove_task(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        if let Some(holder) = self.declarations.get(task_id) {
            return Err(Error::TaskAlreadyDeclared {
                task_id: task_id.to_string(),
                worker: holder.value().clone(),
            });
        }
        Ok(self.tasks.remove(task_id).map(|(_, record)| record))
    }

    /// Identifiers of every task the manager knows.
    pub fn task_ids(&self) -> Vec<String> {
        self.tasks.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Opens a session for one worker over the given transport. The
    /// session shares this manager's task table; everything else about the
    /// worker is owned by the session and torn down with it.
    pub fn session<T: Transport>(&self, worker_id: impl Into<String>, transport: T) -> WorkerSession<T> {
        WorkerSession::new(
            worker_id.into(),
            transport,
            Arc::clone(&self.tasks),
            Arc::clone(&self.declarations),
            self.policy,
        )
    }
}
