//! Contract between the event loop and per-connection framing logic.
//!
//! The loop never looks inside a payload. It only reacts to what the handler
//! reports from `read`: nothing yet, a message to echo, or a closed peer.

use bytes::Bytes;
use std::io::{self, Read, Write};

/// Outcome of one `ConnectionHandler::read` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadResult {
    /// No complete message yet; wait for the next readiness event.
    NeedData,
    /// One complete, non-empty message.
    Message(Bytes),
    /// The peer closed the connection (or asked to).
    Closed,
}

/// Per-connection framing and buffering state.
///
/// Implementations must never block: a read or write that would block is
/// reported as `NeedData` or kept as pending output respectively.
pub trait ConnectionHandler {
    /// Pull bytes from `stream` until one message is complete, the socket
    /// would block, or the peer closes.
    fn read<S: Read>(&mut self, stream: &mut S) -> io::Result<ReadResult>;

    /// Send `payload` back, framed as the handler sees fit. Bytes the socket
    /// does not accept right away are kept for `flush`.
    fn write<S: Write>(&mut self, stream: &mut S, payload: &[u8]) -> io::Result<()>;

    /// Retry pending output after the socket became writable.
    fn flush<S: Write>(&mut self, stream: &mut S) -> io::Result<()>;

    /// Whether output is still waiting for the socket.
    fn wants_write(&self) -> bool;
}
