//! In-process worker for the integration suites.
//!
//! Services a [`WorkerEndpoint`] the way a real worker would: blobs live in
//! a map of slots with separate staged and committed content, task submits
//! are acknowledged and then "executed" by a pluggable runner that can read
//! and write the blob store. Delete of an absent blob answers success as a
//! no-op, which is this worker's policy for idempotent cleanup.

use std::collections::HashMap;

use batchswarm::shared::WorkerEndpoint;
use batchswarm::{
    AccessMode, BlobAction, Mount, Outcome, RequestBody, ResourceSummary, TaskAction, TaskReport,
    TaskSpec,
};
use tokio::task::JoinHandle;

/// One blob on the worker: declared capacity, staged bytes, durable bytes.
pub struct BlobSlot {
    pub size: u64,
    pub staged: Vec<u8>,
    pub committed: Option<Vec<u8>>,
}

/// The worker's blob storage.
pub type BlobStore = HashMap<String, BlobSlot>;

/// Executes one submitted task against the blob store and produces its
/// completion report.
pub type TaskRunner = Box<dyn FnMut(&TaskSpec, &mut BlobStore) -> TaskReport + Send>;

/// A worker running as a background tokio task.
pub struct InProcessWorker {
    handle: JoinHandle<()>,
}

impl InProcessWorker {
    /// Spawns a worker whose tasks all succeed immediately with exit 0.
    #[allow(dead_code)]
    pub fn spawn(endpoint: WorkerEndpoint) -> Self {
        Self::spawn_with(endpoint, Box::new(exit_zero_runner))
    }

    /// Spawns a worker with a custom task runner.
    pub fn spawn_with(mut endpoint: WorkerEndpoint, mut runner: TaskRunner) -> Self {
        let handle = tokio::spawn(async move {
            let mut blobs: BlobStore = HashMap::new();
            while let Some(request) = endpoint.next_request().await {
                match request.body {
                    RequestBody::Blob { blob_id, action } => {
                        let outcome = handle_blob(&mut blobs, &blob_id, action);
                        if !endpoint.reply(request.id, outcome) {
                            break;
                        }
                    },
                    RequestBody::Task { task_id, action } => match action {
                        TaskAction::Submit { spec } => {
                            if !endpoint.reply(request.id, Outcome::ok()) {
                                break;
                            }
                            endpoint.report(task_id.clone(), TaskReport::Running);
                            let report = runner(&spec, &mut blobs);
                            endpoint.report(task_id, report);
                        },
                        TaskAction::Remove => {
                            if !endpoint.reply(request.id, Outcome::ok()) {
                                break;
                            }
                        },
                    },
                }
            }
        });
        Self { handle }
    }

    /// Kills the worker, simulating a crash, and waits until its side of
    /// the link is gone.
    #[allow(dead_code)]
    pub async fn abort(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

fn handle_blob(blobs: &mut BlobStore, blob_id: &str, action: BlobAction) -> Outcome {
    match action {
        BlobAction::Create { size, .. } => {
            blobs.insert(
                blob_id.to_string(),
                BlobSlot {
                    size,
                    staged: Vec::new(),
                    committed: None,
                },
            );
            Outcome::ok()
        },
        BlobAction::Put { data } => match blobs.get_mut(blob_id) {
            Some(slot) if data.len() as u64 <= slot.size => {
                slot.staged = data;
                Outcome::ok()
            },
            Some(_) => Outcome::Error {
                message: "declared capacity exceeded".to_string(),
            },
            None => Outcome::Error {
                message: "blob not found".to_string(),
            },
        },
        BlobAction::Commit => match blobs.get_mut(blob_id) {
            Some(slot) => {
                slot.committed = Some(slot.staged.clone());
                Outcome::ok()
            },
            None => Outcome::Error {
                message: "blob not found".to_string(),
            },
        },
        BlobAction::Get => match blobs.get(blob_id).and_then(|slot| slot.committed.clone()) {
            Some(data) => Outcome::with_data(data),
            None => Outcome::Error {
                message: "blob not committed".to_string(),
            },
        },
        // Deleting an absent blob succeeds as a no-op.
        BlobAction::Delete => {
            blobs.remove(blob_id);
            Outcome::ok()
        },
    }
}

/// Runner for tasks whose execution is irrelevant to the test.
pub fn exit_zero_runner(_spec: &TaskSpec, _blobs: &mut BlobStore) -> TaskReport {
    TaskReport::Done {
        exit_code: 0,
        usage: ResourceSummary::default(),
        execute_time_us: 1_000,
    }
}

/// Emulates `wc -l <input>`: counts the newlines in the blob mounted as a
/// readable path and writes the count into the blob capturing stdout.
/// Task output lands committed, the way a worker finalizes output blobs
/// when the task completes.
#[allow(dead_code)]
pub fn wc_runner(spec: &TaskSpec, blobs: &mut BlobStore) -> TaskReport {
    let input = spec.namespace.iter().find_map(|(blob_id, mount)| match mount {
        Mount::Path {
            mode: AccessMode::Read,
            ..
        } => Some(blob_id.clone()),
        _ => None,
    });
    let stdout = spec.namespace.iter().find_map(|(blob_id, mount)| match mount {
        Mount::Stdout => Some(blob_id.clone()),
        _ => None,
    });

    let (Some(input), Some(stdout)) = (input, stdout) else {
        return TaskReport::Done {
            exit_code: 1,
            usage: ResourceSummary::default(),
            execute_time_us: 100,
        };
    };
    let Some(content) = blobs.get(&input).and_then(|slot| slot.committed.clone()) else {
        return TaskReport::Done {
            exit_code: 1,
            usage: ResourceSummary::default(),
            execute_time_us: 100,
        };
    };

    let lines = content.iter().filter(|byte| **byte == b'\n').count();
    if let Some(slot) = blobs.get_mut(&stdout) {
        slot.committed = Some(format!("{lines}\n").into_bytes());
    }
    TaskReport::Done {
        exit_code: 0,
        usage: ResourceSummary::new(1, 64, 1),
        execute_time_us: 25_000,
    }
}
