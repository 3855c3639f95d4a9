//! Task lifecycle: the per-task state machine, retry accounting, and the
//! fault-tolerance policy that decides whether a failed attempt is retried,
//! re-negotiated, or terminal.
//!
//! A task moves `Submitted -> Dispatched -> Running -> Done`, looping back
//! `Running -> Dispatched` when an attempt fails recoverably. `Done` covers
//! every terminal outcome; the task's [`OpResult`] distinguishes a
//! completed execution from retries-exhausted or the exhaustion cap. A task
//! never re-enters `Submitted` once dispatched.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{OpResult, ResourceSummary, TaskSpec};

/// Lifecycle states of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Accepted by the manager, never dispatched.
    Submitted,
    /// A dispatch attempt is in flight or the task awaits redispatch after
    /// a recoverable failure.
    Dispatched,
    /// The worker acknowledged placement and is executing the task.
    Running,
    /// Terminal; consult the task's result for the classification.
    Done,
}

impl TaskState {
    /// Returns `true` once the task has finished, successfully or not.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Submitted => "submitted",
            Self::Dispatched => "dispatched",
            Self::Running => "running",
            Self::Done => "done",
        };
        write!(f, "{name}")
    }
}

/// The operation an outstanding task request is performing.
#[derive(Debug, Clone)]
pub enum TaskOp {
    /// Place the task on the worker.
    Submit,
    /// Remove a finished task from the worker.
    Remove,
}

impl TaskOp {
    /// Short operation name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Remove => "remove",
        }
    }
}

/// How a failed attempt is classified before retry accounting runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The worker or its connection went away mid-attempt.
    WorkerLost,
    /// The attempt exceeded its granted resource allocation.
    Exhaustion,
    /// The attempt overran its expected running time (fast-abort).
    Overrun,
}

/// What the retry accounting decided about a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Redispatch, possibly to a different worker. For an exhausted
    /// attempt the resource request has already been grown.
    Retry,
    /// The task is finished with the given terminal classification.
    Terminal(OpResult),
}

/// Fault-tolerance configuration shared by every task the manager accepts.
///
/// # Examples
///
/// ```
/// use batchswarm::RetryPolicy;
///
/// let policy = RetryPolicy::default()
///     .with_max_retries(3)
///     .with_max_exhaustion(2);
/// assert_eq!(policy.max_retries, 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Dispatch attempts before the task fails with `MaxRetries`. Zero or
    /// negative means retry indefinitely; other terminal classes still
    /// apply.
    pub max_retries: i32,
    /// Exhausted attempts before the task fails with
    /// `ResourceExhaustion`. Zero means no cap.
    pub max_exhaustion: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            max_exhaustion: 3,
        }
    }
}

impl RetryPolicy {
    /// Sets the dispatch-attempt limit (`<= 0` retries indefinitely).
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the exhausted-attempt cap (`0` for no cap).
    #[must_use]
    pub fn with_max_exhaustion(mut self, max_exhaustion: u32) -> Self {
        self.max_exhaustion = max_exhaustion;
        self
    }
}

/// Manager-side record of one task, from submission to terminal result.
///
/// Timestamps are instants (`time_when_*`); the `time_workers_execute_*`
/// fields accumulate wall-clock execution time in microseconds across
/// attempts, bucketed by how each attempt ended.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    /// Unique across the manager's lifetime.
    pub task_id: String,
    /// The command and namespace the caller submitted.
    pub spec: TaskSpec,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Terminal classification once the task finishes.
    pub result: OpResult,
    /// Exit code of the last completed execution.
    pub exit_code: Option<i32>,
    /// The worker the most recent attempt was dispatched to.
    pub worker: Option<String>,

    /// Resources the caller asked for (grows after exhausted attempts).
    pub resources_requested: ResourceSummary,
    /// Resources granted to the latest attempt.
    pub resources_allocated: ResourceSummary,
    /// Resources the latest attempt measurably used.
    pub resources_measured: ResourceSummary,
    /// Minimum runtime the task is expected to need, seconds. Feeds the
    /// worker's fast-abort bound.
    pub min_running_time_s: i64,

    /// Dispatch attempts so far; incremented exactly once per dispatch.
    pub try_count: u32,
    /// Per-task copy of the policy's retry limit.
    pub max_retries: i32,
    /// Attempts that ended in resource exhaustion.
    pub exhausted_attempts: u32,
    /// Attempts terminated for running too long.
    pub fast_abort_count: u32,

    /// When the manager accepted the task.
    pub time_when_submitted: DateTime<Utc>,
    /// When the latest dispatch began transferring to a worker.
    pub time_when_commit_start: Option<DateTime<Utc>>,
    /// When the worker acknowledged placement of the latest dispatch.
    pub time_when_commit_end: Option<DateTime<Utc>>,
    /// When the completion report arrived and outputs became retrievable.
    pub time_when_retrieval: Option<DateTime<Utc>>,
    /// When the task reached its terminal result.
    pub time_when_done: Option<DateTime<Utc>>,

    /// Execution time of the last completed attempt, microseconds.
    pub time_workers_execute_last_us: u64,
    /// Execution time across all attempts, microseconds.
    pub time_workers_execute_all_us: u64,
    /// Execution time spent in attempts that exhausted resources.
    pub time_workers_execute_exhaustion_us: u64,
    /// Execution time spent in attempts lost to worker failure.
    pub time_workers_execute_failure_us: u64,
}

impl TaskRecord {
    /// A freshly submitted task.
    pub fn new(task_id: impl Into<String>, spec: TaskSpec, policy: RetryPolicy) -> Self {
        Self {
            task_id: task_id.into(),
            spec,
            state: TaskState::Submitted,
            result: OpResult::Pending,
            exit_code: None,
            worker: None,
            resources_requested: ResourceSummary::default(),
            resources_allocated: ResourceSummary::default(),
            resources_measured: ResourceSummary::default(),
            min_running_time_s: 0,
            try_count: 0,
            max_retries: policy.max_retries,
            exhausted_attempts: 0,
            fast_abort_count: 0,
            time_when_submitted: Utc::now(),
            time_when_commit_start: None,
            time_when_commit_end: None,
            time_when_retrieval: None,
            time_when_done: None,
            time_workers_execute_last_us: 0,
            time_workers_execute_all_us: 0,
            time_workers_execute_exhaustion_us: 0,
            time_workers_execute_failure_us: 0,
        }
    }

    /// Sets the resource request for the first attempt.
    #[must_use]
    pub fn with_resources(mut self, request: ResourceSummary) -> Self {
        self.resources_requested = request;
        self
    }

    /// Sets the minimum expected runtime feeding the fast-abort bound.
    #[must_use]
    pub fn with_min_running_time(mut self, seconds: i64) -> Self {
        self.min_running_time_s = seconds;
        self
    }

    fn reject(&self, operation: &'static str) -> Error {
        Error::InvalidTaskState {
            task_id: self.task_id.clone(),
            state: self.state,
            operation,
        }
    }

    /// Begins a dispatch attempt to the given worker: increments
    /// `try_count`, stamps the commit start, and enters `Dispatched`.
    /// The current resource request becomes the attempt's allocation.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTaskState`] unless the task is `Submitted` (first
    /// attempt) or `Dispatched` (redispatch after a recoverable failure).
    /// A task that already failed terminally reports its classification
    /// instead: [`Error::RetriesExhausted`] or
    /// [`Error::ExhaustionCapReached`].
    pub fn begin_dispatch(&mut self, worker: impl Into<String>) -> Result<()> {
        match self.state {
            TaskState::Submitted | TaskState::Dispatched => {},
            TaskState::Done => {
                return Err(match self.result {
                    OpResult::MaxRetries => Error::RetriesExhausted {
                        task_id: self.task_id.clone(),
                        attempts: self.try_count,
                    },
                    OpResult::ResourceExhaustion => Error::ExhaustionCapReached {
                        task_id: self.task_id.clone(),
                        attempts: self.exhausted_attempts,
                    },
                    _ => self.reject("dispatch"),
                })
            },
            TaskState::Running => return Err(self.reject("dispatch")),
        }
        self.try_count += 1;
        self.worker = Some(worker.into());
        self.resources_allocated = self.resources_requested;
        self.state = TaskState::Dispatched;
        self.time_when_commit_start = Some(Utc::now());
        self.time_when_commit_end = None;
        Ok(())
    }

    /// Marks the worker's acknowledgement of placement: `Dispatched ->
    /// Running`, stamping the commit end. Ignored in any other state (a
    /// duplicate acknowledgement is harmless).
    pub fn mark_running(&mut self) {
        if self.state == TaskState::Dispatched {
            self.state = TaskState::Running;
            self.time_when_commit_end = Some(Utc::now());
        }
    }

    /// Records a completed execution: `-> Done`, result `Success`, exit
    /// code and measured usage retained, execution time accumulated.
    ///
    /// A non-zero exit code is still a completed execution -- the command
    /// ran; what it returned is the caller's business.
    pub fn record_done(
        &mut self,
        exit_code: i32,
        usage: ResourceSummary,
        execute_time_us: u64,
    ) {
        self.exit_code = Some(exit_code);
        self.resources_measured = usage;
        self.time_workers_execute_last_us = execute_time_us;
        self.time_workers_execute_all_us += execute_time_us;
        self.time_when_retrieval = Some(Utc::now());
        self.finish(OpResult::Success);
    }

    /// Applies retry accounting to a failed attempt and returns the
    /// decision. On `Retry` the task is back in `Dispatched`, eligible for
    /// redispatch to a (possibly different) worker; on `Terminal` the task
    /// is `Done` with the returned classification.
    pub fn record_failure(
        &mut self,
        class: FailureClass,
        execute_time_us: u64,
        policy: RetryPolicy,
    ) -> RetryDecision {
        self.time_workers_execute_all_us += execute_time_us;
        match class {
            FailureClass::Exhaustion => {
                self.exhausted_attempts += 1;
                self.time_workers_execute_exhaustion_us += execute_time_us;
                if policy.max_exhaustion > 0 && self.exhausted_attempts >= policy.max_exhaustion {
                    self.finish(OpResult::ResourceExhaustion);
                    return RetryDecision::Terminal(OpResult::ResourceExhaustion);
                }
                // Ask for more next time; the cap above bounds the growth.
                self.resources_requested = self.resources_requested.grown();
            },
            FailureClass::Overrun => {
                self.fast_abort_count += 1;
                self.time_workers_execute_failure_us += execute_time_us;
            },
            FailureClass::WorkerLost => {
                self.time_workers_execute_failure_us += execute_time_us;
            },
        }
        if self.max_retries > 0 && self.try_count >= self.max_retries as u32 {
            self.finish(OpResult::MaxRetries);
            return RetryDecision::Terminal(OpResult::MaxRetries);
        }
        self.state = TaskState::Dispatched;
        self.result = OpResult::Pending;
        RetryDecision::Retry
    }

    /// Caller-driven terminal transition for a task that will never be
    /// redispatched. Permits `task_remove` on a task the caller gave up on.
    pub fn abandon(&mut self) {
        if !self.state.is_terminal() {
            self.finish(OpResult::Failure);
        }
    }

    /// Checks that the task may be removed from its worker: terminal
    /// states only.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTaskState`] while the task could still run.
    pub fn check_removable(&self) -> Result<()> {
        if self.state.is_terminal() {
            Ok(())
        } else {
            Err(self.reject("remove"))
        }
    }

    fn finish(&mut self, result: OpResult) {
        self.state = TaskState::Done;
        self.result = result;
        self.time_when_done = Some(Utc::now());
    }
}
