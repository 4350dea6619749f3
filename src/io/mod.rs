//! Stream plumbing shared by the listeners, the matchmaker and the relay
//!
//! - `IOStream` erases the concrete transport (TCP socket, WebSocket bridge)
//! - `ChatStream` adds an idempotent close that unblocks pending I/O
//! - `copy_stream` moves one direction of a session

mod copy;
mod stream;

pub use copy::copy_stream;
pub use stream::{ChatStream, IOStream, StreamCloser, StreamState};
