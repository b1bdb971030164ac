//! Readiness multiplexer.
//!
//! Thin wrapper over `mio::Poll` (epoll on Linux, kqueue on macOS). Each
//! `wait` copies the ready set into a caller-owned batch so the loop can
//! register and deregister sources while walking it.

use mio::event::Source;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::time::Duration;

/// Upper bound on events returned by a single wait.
pub const MAX_BATCH: usize = 1024;

/// One entry of a ready-event batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyEvent {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
    /// Error or hang-up reported by the OS. Treated as readable so the
    /// handler observes the failure on its next read.
    pub closed: bool,
}

impl ReadyEvent {
    fn from_mio(event: &mio::event::Event) -> Self {
        Self {
            token: event.token(),
            readable: event.is_readable(),
            writable: event.is_writable(),
            closed: event.is_error() || event.is_read_closed(),
        }
    }
}

pub struct Poller {
    poll: Poll,
    events: Events,
}

impl Poller {
    /// Create the OS facility. A batch holds at most `batch_size` events,
    /// clamped to `1..=MAX_BATCH`.
    pub fn new(batch_size: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(batch_size.clamp(1, MAX_BATCH)),
        })
    }

    pub fn register<S: Source + ?Sized>(
        &self,
        source: &mut S,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        self.poll.registry().register(source, token, interest)
    }

    pub fn reregister<S: Source + ?Sized>(
        &self,
        source: &mut S,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        self.poll.registry().reregister(source, token, interest)
    }

    pub fn deregister<S: Source + ?Sized>(&self, source: &mut S) -> io::Result<()> {
        self.poll.registry().deregister(source)
    }

    /// Block until at least one source is ready or `timeout` expires, then
    /// replace the contents of `batch` with the ready set.
    ///
    /// `None` waits indefinitely. An interrupted wait yields an empty batch.
    pub fn wait(
        &mut self,
        batch: &mut Vec<ReadyEvent>,
        timeout: Option<Duration>,
    ) -> io::Result<()> {
        batch.clear();
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }
        batch.extend(self.events.iter().map(ReadyEvent::from_mio));
        Ok(())
    }

    /// Maximum number of events a single wait can return.
    pub fn batch_capacity(&self) -> usize {
        self.events.capacity()
    }
}
