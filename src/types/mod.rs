//! Wire types and shared leaf types.
//!
//! [`result`] holds the result code every asynchronous record carries;
//! [`protocol`] holds the structured request/message model exchanged with
//! workers. Lifecycle records built on top of these live in the
//! [`manager`](crate::manager) module.

pub mod protocol;
pub mod result;

pub use protocol::*;
pub use result::*;
