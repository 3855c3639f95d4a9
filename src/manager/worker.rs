//! The per-worker session: RPC dispatcher, response router, and the
//! lifecycle side effects of every resolution.
//!
//! A [`WorkerSession`] exclusively owns everything the manager knows about
//! one worker: the transport handle, the two typed pending-request
//! registries, the declared blob records, and the set of task ids declared
//! here. Issue methods hand a request to the transport and return
//! immediately; [`poll_responses`](WorkerSession::poll_responses) drains
//! whatever replies have arrived, resolving records in whatever order the
//! worker produced them.
//!
//! When the transport reports a fault, every pending request on this
//! worker resolves to `Failure` and tasks running here lose their attempt.
//! Nothing is ever left `Pending` on a dead link; that is what guarantees
//! the completion barrier terminates.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::manager::blob::{BlobOp, BlobRecord};
use crate::manager::registry::{PendingRequests, RequestRecord};
use crate::manager::task::{FailureClass, RetryDecision, RetryPolicy, TaskOp, TaskRecord};
use crate::manager::{Declarations, TaskTable};
use crate::shared::transport::Transport;
use crate::types::{
    BlobAction, OpResult, Outcome, RequestBody, RequestId, TaskAction, TaskReport, WireRequest,
    WorkerMessage,
};

/// Manager-side session for one worker.
///
/// Constructed through [`Manager::session`](crate::manager::Manager::session);
/// the session shares the manager's task table and declaration map but owns
/// all per-worker state itself.
#[derive(Debug)]
pub struct WorkerSession<T: Transport> {
    worker_id: String,
    transport: T,
    policy: RetryPolicy,
    next_request_id: u64,
    blob_requests: PendingRequests<BlobOp>,
    task_requests: PendingRequests<TaskOp>,
    blobs: HashMap<String, BlobRecord>,
    declared_tasks: HashSet<String>,
    tasks: TaskTable,
    declarations: Declarations,
    bytes_sent: u64,
    bytes_received: u64,
    connected: bool,
}

impl<T: Transport> WorkerSession<T> {
    pub(crate) fn new(
        worker_id: String,
        transport: T,
        tasks: TaskTable,
        declarations: Declarations,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            worker_id,
            transport,
            policy,
            next_request_id: 0,
            blob_requests: PendingRequests::new(),
            task_requests: PendingRequests::new(),
            blobs: HashMap::new(),
            declared_tasks: HashSet::new(),
            tasks,
            declarations,
            bytes_sent: 0,
            bytes_received: 0,
            connected: true,
        }
    }

    /// The worker this session talks to.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Returns `false` once the transport has faulted; no further requests
    /// can be issued and nothing more will arrive.
    pub fn is_connected(&self) -> bool {
        self.connected && self.transport.is_connected()
    }

    /// The declared blob record, if any.
    pub fn blob(&self, blob_id: &str) -> Option<&BlobRecord> {
        self.blobs.get(blob_id)
    }

    /// Snapshot of a task visible through this session.
    pub fn task(&self, task_id: &str) -> Option<TaskRecord> {
        self.tasks.get(task_id).map(|t| t.clone())
    }

    /// Total bytes shipped to the worker through blob puts.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Total bytes retrieved from the worker through blob gets.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Returns `true` while any request on this worker is unresolved.
    pub fn has_pending_requests(&self) -> bool {
        self.blob_requests.has_pending() || self.task_requests.has_pending()
    }

    /// Number of unresolved requests on this worker.
    pub fn pending_request_count(&self) -> usize {
        self.blob_requests.pending().count() + self.task_requests.pending().count()
    }

    /// The result of a request, pending or terminal, if its record is
    /// still registered. Terminal records are discarded by
    /// [`wait_all`](WorkerSession::wait_all) once inspected.
    pub fn request_result(&self, id: RequestId) -> Option<OpResult> {
        self.blob_requests
            .get(id)
            .map(|r| r.result)
            .or_else(|| self.task_requests.get(id).map(|r| r.result))
    }

    // ---- declarations ----

    /// Declares a blob on this worker without issuing anything. Issue
    /// methods declare on first use; this exists for workflows that start
    /// with cleanup (delete a blob that may linger from an earlier run).
    ///
    /// # Errors
    ///
    /// [`Error::BlobAlreadyDeclared`] if the blob is already declared.
    pub fn declare_blob(&mut self, blob_id: &str) -> Result<()> {
        if self.blobs.contains_key(blob_id) {
            return Err(Error::BlobAlreadyDeclared {
                blob_id: blob_id.to_string(),
            });
        }
        self.blobs
            .insert(blob_id.to_string(), BlobRecord::new(blob_id));
        Ok(())
    }

    /// Drops the local record of a settled blob. The worker is not
    /// contacted; use [`blob_delete`](WorkerSession::blob_delete) first if
    /// the blob still exists remotely.
    ///
    /// # Errors
    ///
    /// [`Error::RequestPending`] while a request on the blob is in flight.
    pub fn discard_blob(&mut self, blob_id: &str) -> Result<Option<BlobRecord>> {
        self.ensure_no_pending_blob(blob_id)?;
        Ok(self.blobs.remove(blob_id))
    }

    /// Declares a task on this worker. A task is declared to at most one
    /// worker at a time.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownTask`] if the manager has no such task;
    /// [`Error::TaskAlreadyDeclared`] if another worker holds it.
    pub fn declare_task(&mut self, task_id: &str) -> Result<()> {
        if !self.tasks.contains_key(task_id) {
            return Err(Error::UnknownTask {
                task_id: task_id.to_string(),
            });
        }
        if let Some(holder) = self.declarations.get(task_id) {
            if holder.value() != &self.worker_id {
                return Err(Error::TaskAlreadyDeclared {
                    task_id: task_id.to_string(),
                    worker: holder.value().clone(),
                });
            }
            return Ok(());
        }
        self.declarations
            .insert(task_id.to_string(), self.worker_id.clone());
        self.declared_tasks.insert(task_id.to_string());
        Ok(())
    }

    /// Withdraws a task declaration so the task can be declared on another
    /// worker (the redispatch path after a recoverable failure).
    ///
    /// # Errors
    ///
    /// [`Error::RequestPending`] while a request on the task is in flight.
    pub fn undeclare_task(&mut self, task_id: &str) -> Result<()> {
        self.ensure_no_pending_task(task_id)?;
        if self.declared_tasks.remove(task_id) {
            self.declarations.remove(task_id);
        }
        Ok(())
    }

    // ---- blob operations ----

    /// Issues a blob create: reserve `size` bytes for `blob_id` on the
    /// worker. Declares the blob locally on first use.
    ///
    /// # Errors
    ///
    /// [`Error::RequestPending`] if the blob already has a request in
    /// flight; [`Error::InvalidBlobState`] unless the blob is freshly
    /// declared; [`Error::Transport`] if the link is down.
    pub async fn blob_create(
        &mut self,
        blob_id: &str,
        size: u64,
        metadata: Option<Value>,
    ) -> Result<RequestId> {
        self.ensure_no_pending_blob(blob_id)?;
        let blob = self
            .blobs
            .entry(blob_id.to_string())
            .or_insert_with(|| BlobRecord::new(blob_id));
        blob.begin_create(size, metadata.clone())?;
        self.issue_blob(blob_id, BlobOp::Create, BlobAction::Create { size, metadata })
            .await
    }

    /// Issues a blob put: stage the contents of a local file into the
    /// blob. Staged content is not durable until committed.
    pub async fn blob_put(&mut self, blob_id: &str, source: impl AsRef<Path>) -> Result<RequestId> {
        self.ensure_no_pending_blob(blob_id)?;
        // Stage the local read before touching lifecycle state so an I/O
        // error leaves the blob settled.
        self.blob_mut(blob_id)?;
        let data = tokio::fs::read(source.as_ref()).await?;
        self.blob_mut(blob_id)?.begin_put()?;
        self.bytes_sent += data.len() as u64;
        self.issue_blob(blob_id, BlobOp::Put, BlobAction::Put { data })
            .await
    }

    /// Issues a blob get: copy the blob's committed content into a local
    /// file. Permitted only once the blob is committed; the lifecycle
    /// state does not change.
    pub async fn blob_get(
        &mut self,
        blob_id: &str,
        destination: impl AsRef<Path>,
    ) -> Result<RequestId> {
        self.ensure_no_pending_blob(blob_id)?;
        self.blob_mut(blob_id)?.begin_get()?;
        let destination = destination.as_ref().to_path_buf();
        self.issue_blob(blob_id, BlobOp::Get { destination }, BlobAction::Get)
            .await
    }

    /// Issues a blob commit: make staged content durable.
    pub async fn blob_commit(&mut self, blob_id: &str) -> Result<RequestId> {
        self.ensure_no_pending_blob(blob_id)?;
        self.blob_mut(blob_id)?.begin_commit()?;
        self.issue_blob(blob_id, BlobOp::Commit, BlobAction::Commit)
            .await
    }

    /// Issues a blob delete. Permitted from any settled state; deleting a
    /// blob the worker never materialized is answered by worker policy
    /// (success as no-op or a reported not-found), not a caller error.
    pub async fn blob_delete(&mut self, blob_id: &str) -> Result<RequestId> {
        self.ensure_no_pending_blob(blob_id)?;
        self.blob_mut(blob_id)?.begin_delete()?;
        self.issue_blob(blob_id, BlobOp::Delete, BlobAction::Delete)
            .await
    }

    // ---- task operations ----

    /// Issues a task submit: dispatch the task to this worker. Increments
    /// the task's `try_count` and snapshots its resource request as the
    /// attempt's allocation. The reply acknowledges placement; execution
    /// completion arrives later as a task report.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownTask`] unless the task is declared here;
    /// [`Error::RequestPending`] if the task already has a request in
    /// flight; [`Error::InvalidTaskState`] if the task cannot be
    /// dispatched; [`Error::Transport`] if the link is down.
    pub async fn task_submit(&mut self, task_id: &str) -> Result<RequestId> {
        self.ensure_task_declared(task_id)?;
        self.ensure_no_pending_task(task_id)?;
        let spec = {
            let mut task = self.tasks.get_mut(task_id).ok_or_else(|| Error::UnknownTask {
                task_id: task_id.to_string(),
            })?;
            task.begin_dispatch(&self.worker_id)?;
            task.spec.clone()
        };
        self.issue_task(task_id, TaskOp::Submit, TaskAction::Submit { spec })
            .await
    }

    /// Issues a task remove: delete a finished task and its sandbox from
    /// the worker. Permitted only once the task is terminal (done or
    /// abandoned).
    pub async fn task_remove(&mut self, task_id: &str) -> Result<RequestId> {
        self.ensure_task_declared(task_id)?;
        self.ensure_no_pending_task(task_id)?;
        {
            let task = self.tasks.get(task_id).ok_or_else(|| Error::UnknownTask {
                task_id: task_id.to_string(),
            })?;
            task.check_removable()?;
        }
        self.issue_task(task_id, TaskOp::Remove, TaskAction::Remove)
            .await
    }

    // ---- response handling ----

    /// One non-blocking pass over the transport: route every message that
    /// has already arrived. Returns how many were handled. A transport
    /// fault fails every pending request instead of surfacing an error;
    /// local filesystem errors (landing a blob get) do surface.
    pub async fn poll_responses(&mut self) -> Result<usize> {
        if !self.connected {
            return Ok(0);
        }
        let mut handled = 0;
        loop {
            match self.transport.try_receive() {
                Ok(Some(message)) => {
                    self.handle_message(message).await?;
                    handled += 1;
                },
                Ok(None) => break,
                Err(err) => {
                    warn!(worker = %self.worker_id, error = %err, "transport fault while polling");
                    self.fail_worker();
                    break;
                },
            }
        }
        Ok(handled)
    }

    pub(crate) async fn handle_message(&mut self, message: WorkerMessage) -> Result<()> {
        match message {
            WorkerMessage::Reply { id, outcome } => {
                if self.blob_requests.contains(id) {
                    self.resolve_blob_reply(id, outcome).await
                } else if self.task_requests.contains(id) {
                    self.resolve_task_reply(id, &outcome);
                    Ok(())
                } else {
                    warn!(
                        worker = %self.worker_id,
                        id = %id,
                        "reply for unknown request id, dropping"
                    );
                    Ok(())
                }
            },
            WorkerMessage::TaskReport { task_id, report } => {
                self.handle_task_report(&task_id, report);
                Ok(())
            },
        }
    }

    async fn resolve_blob_reply(&mut self, id: RequestId, outcome: Outcome) -> Result<()> {
        let (blob_id, op) = match self.blob_requests.get(id) {
            Some(record) if record.result.is_pending() => {
                (record.target.clone(), record.context.clone())
            },
            Some(_) => {
                warn!(worker = %self.worker_id, id = %id, "duplicate reply, dropping");
                return Ok(());
            },
            None => return Ok(()),
        };
        let (result, data, message) = match outcome {
            Outcome::Success { data } => (OpResult::Success, data, None),
            Outcome::Error { message } => {
                debug!(
                    worker = %self.worker_id,
                    blob = %blob_id,
                    op = op.name(),
                    %message,
                    "worker reported blob failure"
                );
                (OpResult::Failure, None, Some(message))
            },
        };
        self.blob_requests.resolve(id, result);
        if let Some(blob) = self.blobs.get_mut(&blob_id) {
            blob.last_error = message;
            blob.apply_result(&op, result);
        }
        if let BlobOp::Get { destination } = &op {
            if result.is_success() {
                let bytes = data.unwrap_or_default();
                self.bytes_received += bytes.len() as u64;
                tokio::fs::write(destination, &bytes).await?;
            }
        }
        debug!(
            worker = %self.worker_id,
            blob = %blob_id,
            op = op.name(),
            %result,
            "blob request resolved"
        );
        Ok(())
    }

    fn resolve_task_reply(&mut self, id: RequestId, outcome: &Outcome) {
        let (task_id, op) = match self.task_requests.get(id) {
            Some(record) if record.result.is_pending() => {
                (record.target.clone(), record.context.clone())
            },
            Some(_) => {
                warn!(worker = %self.worker_id, id = %id, "duplicate reply, dropping");
                return;
            },
            None => return,
        };
        if let Outcome::Error { message } = outcome {
            debug!(
                worker = %self.worker_id,
                task = %task_id,
                %message,
                "worker reported task failure"
            );
        }
        let result = if outcome.is_success() {
            OpResult::Success
        } else {
            OpResult::Failure
        };
        self.task_requests.resolve(id, result);
        debug!(
            worker = %self.worker_id,
            task = %task_id,
            op = op.name(),
            %result,
            "task request resolved"
        );
        match op {
            TaskOp::Submit => {
                let Some(mut task) = self.tasks.get_mut(&task_id) else {
                    return;
                };
                if result.is_success() {
                    task.mark_running();
                } else {
                    // Placement failed before execution started.
                    let decision = task.record_failure(FailureClass::WorkerLost, 0, self.policy);
                    self.log_decision(&task_id, decision);
                }
            },
            TaskOp::Remove => {
                if result.is_success() {
                    self.declared_tasks.remove(&task_id);
                    self.declarations.remove(&task_id);
                }
            },
        }
    }

    fn handle_task_report(&mut self, task_id: &str, report: TaskReport) {
        if !self.declared_tasks.contains(task_id) {
            warn!(
                worker = %self.worker_id,
                task = %task_id,
                "report for a task not declared here, dropping"
            );
            return;
        }
        let Some(mut task) = self.tasks.get_mut(task_id) else {
            warn!(worker = %self.worker_id, task = %task_id, "report for unknown task, dropping");
            return;
        };
        match report {
            TaskReport::Running => task.mark_running(),
            TaskReport::Done {
                exit_code,
                usage,
                execute_time_us,
            } => {
                task.record_done(exit_code, usage, execute_time_us);
                info!(
                    worker = %self.worker_id,
                    task = %task_id,
                    exit_code,
                    "task completed"
                );
            },
            TaskReport::Exhausted {
                usage,
                execute_time_us,
            } => {
                task.resources_measured = usage;
                let decision = task.record_failure(FailureClass::Exhaustion, execute_time_us, self.policy);
                drop(task);
                self.log_decision(task_id, decision);
            },
            TaskReport::Overrun { execute_time_us } => {
                let decision = task.record_failure(FailureClass::Overrun, execute_time_us, self.policy);
                drop(task);
                self.log_decision(task_id, decision);
            },
        }
    }

    fn log_decision(&self, task_id: &str, decision: RetryDecision) {
        match decision {
            RetryDecision::Retry => debug!(
                worker = %self.worker_id,
                task = %task_id,
                "attempt failed, task eligible for redispatch"
            ),
            RetryDecision::Terminal(result) => info!(
                worker = %self.worker_id,
                task = %task_id,
                %result,
                "task reached a terminal failure"
            ),
        }
    }

    /// Fails every pending request and every running attempt on this
    /// worker. Called on any transport fault; afterwards the session
    /// refuses new work.
    pub(crate) fn fail_worker(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        warn!(worker = %self.worker_id, "connection lost, failing all pending requests");

        for id in self.blob_requests.resolve_all_pending(OpResult::Failure) {
            let Some(record) = self.blob_requests.get(id) else {
                continue;
            };
            let (blob_id, op) = (record.target.clone(), record.context.clone());
            if let Some(blob) = self.blobs.get_mut(&blob_id) {
                blob.last_error = Some("worker connection lost".to_string());
                blob.apply_result(&op, OpResult::Failure);
            }
        }

        let mut lost_submits = Vec::new();
        for id in self.task_requests.resolve_all_pending(OpResult::Failure) {
            if let Some(record) = self.task_requests.get(id) {
                if matches!(record.context, TaskOp::Submit) {
                    lost_submits.push(record.target.clone());
                }
            }
        }
        for task_id in lost_submits {
            if let Some(mut task) = self.tasks.get_mut(&task_id) {
                let decision = task.record_failure(FailureClass::WorkerLost, 0, self.policy);
                drop(task);
                self.log_decision(&task_id, decision);
            }
        }

        // Tasks already running here had no request in flight; their
        // attempt dies with the worker.
        let running_here: Vec<String> = self
            .declared_tasks
            .iter()
            .filter(|task_id| {
                self.tasks
                    .get(task_id.as_str())
                    .is_some_and(|t| t.state == crate::manager::task::TaskState::Running)
            })
            .cloned()
            .collect();
        for task_id in running_here {
            if let Some(mut task) = self.tasks.get_mut(&task_id) {
                let decision = task.record_failure(FailureClass::WorkerLost, 0, self.policy);
                drop(task);
                self.log_decision(&task_id, decision);
            }
        }
    }

    // ---- barrier support ----

    /// Awaits the next worker message, converting a transport fault into
    /// a blanket failure of everything pending (and `None`).
    pub(crate) async fn receive_one(&mut self) -> Option<WorkerMessage> {
        if !self.connected {
            return None;
        }
        match self.transport.receive().await {
            Ok(message) => Some(message),
            Err(err) => {
                warn!(worker = %self.worker_id, error = %err, "transport fault while waiting");
                self.fail_worker();
                None
            },
        }
    }

    pub(crate) fn drain_blob_requests(&mut self) -> Vec<RequestRecord<BlobOp>> {
        self.blob_requests.drain_terminal()
    }

    pub(crate) fn drain_task_requests(&mut self) -> Vec<RequestRecord<TaskOp>> {
        self.task_requests.drain_terminal()
    }

    pub(crate) fn has_pending_request_for_task(&self, task_id: &str) -> bool {
        self.task_requests.pending_for(task_id).is_some()
    }

    // ---- internals ----

    fn blob_mut(&mut self, blob_id: &str) -> Result<&mut BlobRecord> {
        self.blobs.get_mut(blob_id).ok_or_else(|| Error::UnknownBlob {
            blob_id: blob_id.to_string(),
        })
    }

    fn ensure_no_pending_blob(&self, blob_id: &str) -> Result<()> {
        if let Some(record) = self.blob_requests.pending_for(blob_id) {
            return Err(Error::RequestPending {
                target: format!("blob '{blob_id}'"),
                id: record.id,
            });
        }
        Ok(())
    }

    fn ensure_no_pending_task(&self, task_id: &str) -> Result<()> {
        if let Some(record) = self.task_requests.pending_for(task_id) {
            return Err(Error::RequestPending {
                target: format!("task '{task_id}'"),
                id: record.id,
            });
        }
        Ok(())
    }

    fn ensure_task_declared(&self, task_id: &str) -> Result<()> {
        if self.declared_tasks.contains(task_id) {
            Ok(())
        } else {
            Err(Error::UnknownTask {
                task_id: task_id.to_string(),
            })
        }
    }

    /// Allocates an identifier unused by either registry. Identifiers free
    /// up for reuse once their record is removed.
    fn alloc_request_id(&mut self) -> RequestId {
        loop {
            self.next_request_id = self.next_request_id.wrapping_add(1);
            let id = RequestId(self.next_request_id);
            if !self.blob_requests.contains(id) && !self.task_requests.contains(id) {
                return id;
            }
        }
    }

    async fn issue_blob(
        &mut self,
        blob_id: &str,
        op: BlobOp,
        action: BlobAction,
    ) -> Result<RequestId> {
        let id = self.alloc_request_id();
        debug!(
            worker = %self.worker_id,
            blob = %blob_id,
            op = op.name(),
            id = %id,
            "issuing blob request"
        );
        self.blob_requests
            .register(RequestRecord::new(id, blob_id, op))?;
        let request = WireRequest {
            id,
            body: RequestBody::Blob {
                blob_id: blob_id.to_string(),
                action,
            },
        };
        self.send_or_fail(request).await?;
        Ok(id)
    }

    async fn issue_task(
        &mut self,
        task_id: &str,
        op: TaskOp,
        action: TaskAction,
    ) -> Result<RequestId> {
        let id = self.alloc_request_id();
        debug!(
            worker = %self.worker_id,
            task = %task_id,
            op = op.name(),
            id = %id,
            "issuing task request"
        );
        self.task_requests
            .register(RequestRecord::new(id, task_id, op))?;
        let request = WireRequest {
            id,
            body: RequestBody::Task {
                task_id: task_id.to_string(),
                action,
            },
        };
        self.send_or_fail(request).await?;
        Ok(id)
    }

    async fn send_or_fail(&mut self, request: WireRequest) -> Result<()> {
        if !self.connected {
            let err = Error::Transport {
                worker: self.worker_id.clone(),
                message: "session disconnected".to_string(),
            };
            self.fail_worker();
            return Err(err);
        }
        match self.transport.send(request).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(worker = %self.worker_id, error = %err, "send failed");
                self.fail_worker();
                Err(err)
            },
        }
    }
}
