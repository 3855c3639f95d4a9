//! Completion barrier: suspend until every outstanding request on a worker
//! has resolved.
//!
//! [`wait_all`](WorkerSession::wait_all) is the synchronization point
//! between workflow phases: issue a batch of operations, wait for the
//! batch, check the verdict, move on. The wait suspends on the transport's
//! awaitable receive rather than re-scanning records in a loop, so a
//! session waiting on a slow worker costs nothing and other sessions'
//! control flows keep running. The aggregate is all-or-nothing: one failed
//! request flips the verdict, but the barrier still drains every record to
//! a terminal result before returning -- nothing is left pending for a
//! later, unrelated barrier to misattribute.

use tracing::debug;

use crate::error::Result;
use crate::manager::task::{TaskRecord, TaskState};
use crate::manager::worker::WorkerSession;
use crate::shared::transport::Transport;

impl<T: Transport> WorkerSession<T> {
    /// Waits until no request on this worker remains pending, then returns
    /// `true` iff every watched request resolved to success.
    ///
    /// The watched set is every record registered at the time of the call
    /// plus any issued before it that has not yet been inspected. All of
    /// them are drained to a terminal result and discarded on return; a
    /// transport fault counts as failure for everything it strands, so the
    /// barrier always terminates provided the transport's timeout policy
    /// eventually reports dead requests.
    ///
    /// # Errors
    ///
    /// Only local faults surface here (writing a fetched blob to disk);
    /// remote and transport failures are folded into the `false` verdict.
    pub async fn wait_all(&mut self) -> Result<bool> {
        loop {
            self.poll_responses().await?;
            if !self.has_pending_requests() {
                break;
            }
            match self.receive_one().await {
                Some(message) => self.handle_message(message).await?,
                // Transport fault: fail_worker has already resolved
                // everything, so the drain below sees no pending records.
                None => break,
            }
            // Let sibling sessions poll their own workers between passes.
            tokio::task::yield_now().await;
        }

        let mut all_ok = true;
        for record in self.drain_blob_requests() {
            if !record.result.is_success() {
                debug!(
                    worker = %self.worker_id(),
                    blob = %record.target,
                    result = %record.result,
                    "request failed"
                );
                all_ok = false;
            }
        }
        for record in self.drain_task_requests() {
            if !record.result.is_success() {
                debug!(
                    worker = %self.worker_id(),
                    task = %record.target,
                    result = %record.result,
                    "request failed"
                );
                all_ok = false;
            }
        }
        Ok(all_ok)
    }

    /// Waits until the task stops making progress through this session:
    /// it reached a terminal result, fell back to `Dispatched` awaiting
    /// redispatch, or the worker's link died. Returns a snapshot of the
    /// record at that point.
    ///
    /// # Errors
    ///
    /// [`crate::Error::UnknownTask`] if the manager does not know the
    /// task; local I/O faults as for [`wait_all`](WorkerSession::wait_all).
    pub async fn wait_task(&mut self, task_id: &str) -> Result<TaskRecord> {
        loop {
            self.poll_responses().await?;
            let snapshot = self
                .task(task_id)
                .ok_or_else(|| crate::Error::UnknownTask {
                    task_id: task_id.to_string(),
                })?;
            let submit_in_flight = self.has_pending_request_for_task(task_id);
            let settled = match snapshot.state {
                TaskState::Done => true,
                // Awaiting redispatch; nothing more will arrive for it.
                TaskState::Dispatched if !submit_in_flight => true,
                // Never dispatched through this session.
                TaskState::Submitted => true,
                _ => false,
            };
            if settled || !self.is_connected() {
                return Ok(snapshot);
            }
            match self.receive_one().await {
                Some(message) => self.handle_message(message).await?,
                None => continue,
            }
            tokio::task::yield_now().await;
        }
    }
}
