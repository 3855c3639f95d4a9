//! Manager-side engine for a distributed batch-execution swarm.
//!
//! A central manager coordinates a pool of remote workers. Each worker
//! holds named data objects ("blobs") and executes short-lived tasks that
//! read and write those blobs. The manager issues asynchronous operations
//! (create / put / get / commit / delete a blob; submit / remove a task)
//! and tracks every outstanding request to a terminal result, independent
//! of the order responses arrive in.
//!
//! # Overview
//!
//! - Every asynchronous record carries an [`OpResult`]: `Pending` until
//!   resolved, then exactly one terminal value.
//! - A [`WorkerSession`] owns one worker's typed pending-request
//!   registries and blob records, issues operations over a
//!   [`Transport`](shared::Transport), and routes replies back onto the
//!   blob and task lifecycle state machines.
//! - [`WorkerSession::wait_all`] is the completion barrier: it suspends
//!   until every outstanding request on the worker has resolved and
//!   returns the all-or-nothing verdict.
//! - [`Manager`] holds what outlives any single worker: the task table,
//!   the declaration map, and the [`RetryPolicy`] deciding whether a
//!   failed attempt is retried, re-negotiated with more resources, or
//!   terminal.
//!
//! # Example
//!
//! ```
//! use batchswarm::shared::ChannelTransport;
//! use batchswarm::{Manager, Mount, AccessMode, TaskSpec};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> batchswarm::Result<()> {
//! let manager = Manager::new();
//! let (transport, _endpoint) = ChannelTransport::pair("worker-1");
//! let mut session = manager.session("worker-1", transport);
//!
//! // Issue a phase of operations, then wait for the whole batch.
//! session.blob_create("abc123", 100_000, None).await?;
//! session.blob_create("xyz456", 100_000, None).await?;
//! // (a live worker would answer; the barrier would drain both replies)
//!
//! let task_id = manager.submit_task(
//!     TaskSpec::new("wc -l myinput")
//!         .with_mount("abc123", Mount::path("myinput", AccessMode::Read))
//!         .with_mount("xyz456", Mount::Stdout),
//! );
//! session.declare_task(&task_id)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - [`types`] - result codes and the wire model (requests, replies,
//!   task specs, mounts, resource summaries)
//! - [`error`] - the crate error taxonomy
//! - [`manager`] - registries, lifecycles, dispatcher, barrier
//! - [`shared`] - the transport abstraction and the in-process channel
//!   transport

#![warn(missing_docs)]

pub mod error;
pub mod manager;
pub mod shared;
pub mod types;

// Re-exports for ergonomic access
pub use error::{Error, Result};
pub use manager::{
    BlobRecord, BlobState, FailureClass, Manager, RetryDecision, RetryPolicy, TaskRecord,
    TaskState, WorkerSession,
};
pub use types::{
    AccessMode, BlobAction, Mount, OpResult, Outcome, RequestBody, RequestId, ResourceSummary,
    TaskAction, TaskReport, TaskSpec, WireRequest, WorkerMessage,
};
