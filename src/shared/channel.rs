//! In-process channel transport.
//!
//! [`ChannelTransport`] links a manager session to a worker running in the
//! same process over a pair of tokio mpsc channels. It is the transport the
//! test harness drives, and it suits embeddings that co-locate workers with
//! the manager. [`WorkerEndpoint`] is the worker-facing half: a stream of
//! requests in, replies and task reports out.
//!
//! Dropping either half tears the link down; the surviving half observes a
//! transport error on its next operation, which is exactly the signal the
//! dispatcher uses to fail outstanding requests so barriers terminate.

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::shared::transport::Transport;
use crate::types::{Outcome, RequestId, TaskReport, WireRequest, WorkerMessage};

/// Manager-side half of an in-process worker link.
///
/// # Examples
///
/// ```
/// use batchswarm::shared::{ChannelTransport, Transport};
///
/// let (transport, endpoint) = ChannelTransport::pair("worker-1");
/// assert!(transport.is_connected());
/// drop(endpoint);
/// ```
#[derive(Debug)]
pub struct ChannelTransport {
    worker: String,
    requests: mpsc::UnboundedSender<WireRequest>,
    messages: mpsc::UnboundedReceiver<WorkerMessage>,
    closed: bool,
}

impl ChannelTransport {
    /// Creates a connected transport/endpoint pair for the named worker.
    pub fn pair(worker: impl Into<String>) -> (Self, WorkerEndpoint) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let transport = Self {
            worker: worker.into(),
            requests: request_tx,
            messages: message_rx,
            closed: false,
        };
        let endpoint = WorkerEndpoint {
            requests: request_rx,
            messages: message_tx,
        };
        (transport, endpoint)
    }

    fn disconnected(&mut self) -> Error {
        self.closed = true;
        Error::Transport {
            worker: self.worker.clone(),
            message: "channel disconnected".to_string(),
        }
    }
}

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, request: WireRequest) -> Result<()> {
        if self.closed {
            return Err(Error::Transport {
                worker: self.worker.clone(),
                message: "transport closed".to_string(),
            });
        }
        self.requests
            .send(request)
            .map_err(|_| self.disconnected())
    }

    fn try_receive(&mut self) -> Result<Option<WorkerMessage>> {
        if self.closed {
            return Err(Error::Transport {
                worker: self.worker.clone(),
                message: "transport closed".to_string(),
            });
        }
        match self.messages.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(self.disconnected()),
        }
    }

    async fn receive(&mut self) -> Result<WorkerMessage> {
        if self.closed {
            return Err(Error::Transport {
                worker: self.worker.clone(),
                message: "transport closed".to_string(),
            });
        }
        match self.messages.recv().await {
            Some(message) => Ok(message),
            None => Err(self.disconnected()),
        }
    }

    fn is_connected(&self) -> bool {
        !self.closed && !self.requests.is_closed()
    }

    fn transport_type(&self) -> &'static str {
        "channel"
    }
}

/// Worker-side half of an in-process link.
///
/// A worker (or a test standing in for one) pulls [`WireRequest`]s off the
/// endpoint and pushes back replies keyed by request id, plus unsolicited
/// task reports. Dropping the endpoint simulates losing the worker.
#[derive(Debug)]
pub struct WorkerEndpoint {
    requests: mpsc::UnboundedReceiver<WireRequest>,
    messages: mpsc::UnboundedSender<WorkerMessage>,
}

impl WorkerEndpoint {
    /// Waits for the next request from the manager. Returns `None` once
    /// the manager side is gone.
    pub async fn next_request(&mut self) -> Option<WireRequest> {
        self.requests.recv().await
    }

    /// Returns the next request that has already arrived, if any.
    pub fn try_next_request(&mut self) -> Option<WireRequest> {
        self.requests.try_recv().ok()
    }

    /// Resolves the request with the given id. Returns `false` if the
    /// manager side is gone.
    pub fn reply(&self, id: RequestId, outcome: Outcome) -> bool {
        self.messages
            .send(WorkerMessage::Reply { id, outcome })
            .is_ok()
    }

    /// Sends an unsolicited task progress report. Returns `false` if the
    /// manager side is gone.
    pub fn report(&self, task_id: impl Into<String>, report: TaskReport) -> bool {
        self.messages
            .send(WorkerMessage::TaskReport {
                task_id: task_id.into(),
                report,
            })
            .is_ok()
    }
}
