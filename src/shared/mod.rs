//! Shared infrastructure: the transport abstraction and its in-process
//! implementation, plus logging setup.

pub mod channel;
#[cfg(feature = "logging")]
pub mod logging;
pub mod transport;

pub use channel::{ChannelTransport, WorkerEndpoint};
#[cfg(feature = "logging")]
pub use logging::init_tracing;
pub use transport::Transport;
