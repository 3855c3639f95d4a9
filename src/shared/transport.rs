//! The transport abstraction between the manager and one worker.
//!
//! A [`Transport`] carries [`WireRequest`]s to a single worker and hands
//! back [`WorkerMessage`]s as they arrive. Connection management, byte
//! encoding, and timeout policy all live behind this trait; the dispatcher
//! only requires that a request handed to [`send`](Transport::send) is
//! either delivered or answered with an error, and that a connection which
//! dies stops yielding messages with an error rather than hanging forever.
//! That last property is what lets the completion barrier guarantee
//! termination: on a transport error the dispatcher resolves every pending
//! request to `Failure`.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{WireRequest, WorkerMessage};

/// A bidirectional link to one worker.
///
/// Implementations must deliver replies for distinct requests in whatever
/// order the worker produces them; the registry attributes each reply by
/// its embedded request identifier, so no ordering discipline is required
/// here.
#[async_trait]
pub trait Transport: Send {
    /// Hands one request to the connection layer. Returns once the request
    /// is accepted for delivery; completion arrives later as a
    /// [`WorkerMessage::Reply`].
    async fn send(&mut self, request: WireRequest) -> Result<()>;

    /// Non-blocking: returns the next message that has already arrived,
    /// or `None` when nothing is waiting.
    ///
    /// # Errors
    ///
    /// Returns an error once the connection is gone; the dispatcher then
    /// fails every outstanding request on this worker.
    fn try_receive(&mut self) -> Result<Option<WorkerMessage>>;

    /// Suspends until the next message arrives.
    ///
    /// # Errors
    ///
    /// Returns an error once the connection is gone, which the caller must
    /// treat the same way as a [`try_receive`](Transport::try_receive)
    /// failure. An implementation with a timeout policy reports an expired
    /// request the same way: as an error, never as silence.
    async fn receive(&mut self) -> Result<WorkerMessage>;

    /// Returns `true` while the link is usable.
    fn is_connected(&self) -> bool;

    /// Short name of the transport flavor, for log lines.
    fn transport_type(&self) -> &'static str;
}
