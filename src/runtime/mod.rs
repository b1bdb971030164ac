//! Readiness-based runtime.
//!
//! One thread drives one `EventLoop`:
//! - `ScopedFd`: owned socket descriptors released exactly once
//! - `Poller`: mio wrapper (epoll on Linux, kqueue on macOS)
//! - `ConnectionTable`: live connections keyed by poll token
//! - `ConnectionHandler`: per-connection framing, supplied by `protocols`

mod connection;
mod error;
mod event_loop;
mod fd;
mod handler;
mod poller;

pub use error::ServerError;
pub use event_loop::{EventLoop, LoopSettings};
pub use handler::{ConnectionHandler, ReadResult};
pub use poller::MAX_BATCH;

use crate::config::{Config, Framing};
use crate::protocols::length::LengthEcho;
use crate::protocols::line::LineEcho;
use crate::protocols::raw::RawEcho;
use crate::protocols::HandlerSettings;
use std::convert::Infallible;
use std::time::Duration;

/// Bind the listener and serve until a fatal error.
pub fn run(config: Config) -> Result<Infallible, ServerError> {
    let settings = LoopSettings {
        listen: config.listen,
        backlog: config.backlog,
        batch_size: config.batch_size,
        max_connections: config.max_connections,
        read_budget: config.read_budget,
        idle_timeout: match config.idle_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        },
    };
    let handlers = HandlerSettings {
        buffer_size: config.buffer_size,
        max_frame_size: config.max_frame_size,
    };

    match config.framing {
        Framing::Raw => EventLoop::bind(&settings, move || RawEcho::new(&handlers))?.run(),
        Framing::Line => EventLoop::bind(&settings, move || LineEcho::new(&handlers))?.run(),
        Framing::Length => EventLoop::bind(&settings, move || LengthEcho::new(&handlers))?.run(),
    }
}
