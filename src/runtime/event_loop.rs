//! Single-threaded readiness event loop.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then the connection handler performs non-blocking reads and writes.
//!
//! ## Connection lifecycle
//!
//! ```text
//! accepted -> registered(READABLE) -> [message] -> echoed
//!                 |        ^              |
//!                 |        |     output pending
//!                 |        |              v
//!                 |        +---- registered(WRITABLE)
//!                 v
//!              closed   (peer close, I/O error, idle timeout)
//! ```
//!
//! A connection is in the table exactly while its socket is registered.
//! Failures that concern a single connection are logged and only that
//! connection is dropped; only bootstrap and wait failures end the loop.
//!
//! ## Fairness
//!
//! Each readiness event lets a connection handle at most `read_budget`
//! messages. A connection that still has input afterwards is put on the
//! deferred queue, which is drained before the next wait (and makes that
//! wait non-blocking), so no connection is starved by a busy neighbour.
//!
//! The listener is edge-triggered. After an accept failure such as EMFILE
//! the backlog is retried on every turn, with the wait bounded by
//! `ACCEPT_RETRY_INTERVAL`, until accept reports `WouldBlock` again.

use crate::runtime::connection::{Connection, ConnectionTable};
use crate::runtime::fd::ScopedFd;
use crate::runtime::poller::{Poller, ReadyEvent};
use crate::runtime::{ConnectionHandler, ReadResult, ServerError};
use mio::{Interest, Token};
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Longest wait while queued connections could not be accepted.
const ACCEPT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Tuning for one event loop instance.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub listen: SocketAddr,
    pub backlog: i32,
    pub batch_size: usize,
    pub max_connections: usize,
    pub read_budget: usize,
    pub idle_timeout: Option<Duration>,
}

pub struct EventLoop<H> {
    // Dropped first: client sockets close before the listener and poller.
    connections: ConnectionTable<H>,
    listener: ScopedFd,
    local_addr: SocketAddr,
    poller: Poller,
    batch: Vec<ReadyEvent>,
    deferred: VecDeque<usize>,
    /// Set after an accept failure left the backlog undrained.
    accept_retry: bool,
    factory: Box<dyn Fn() -> H>,
    read_budget: usize,
    idle_timeout: Option<Duration>,
    last_reap: Instant,
}

impl<H: ConnectionHandler> EventLoop<H> {
    /// Create the listening socket and the multiplexer and register the
    /// listener. `factory` builds the handler for each accepted connection.
    pub fn bind<F>(settings: &LoopSettings, factory: F) -> Result<Self, ServerError>
    where
        F: Fn() -> H + 'static,
    {
        let mut listener = create_listener(settings.listen, settings.backlog)?;
        let local_addr = local_addr(&listener).map_err(ServerError::Configure)?;

        let poller = Poller::new(settings.batch_size).map_err(ServerError::Multiplexer)?;
        poller
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)
            .map_err(ServerError::RegisterListener)?;

        info!(
            addr = %local_addr,
            backlog = settings.backlog,
            batch_size = poller.batch_capacity(),
            max_connections = settings.max_connections,
            "Listening"
        );

        Ok(Self {
            connections: ConnectionTable::new(settings.max_connections),
            listener,
            local_addr,
            batch: Vec::with_capacity(poller.batch_capacity()),
            poller,
            deferred: VecDeque::new(),
            accept_retry: false,
            factory: Box::new(factory),
            read_budget: settings.read_budget.max(1),
            idle_timeout: settings.idle_timeout.filter(|t| !t.is_zero()),
            last_reap: Instant::now(),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of live client connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Serve until a fatal error occurs.
    pub fn run(mut self) -> Result<Infallible, ServerError> {
        loop {
            self.turn(None)?;
        }
    }

    /// One loop iteration: retry a stalled accept, service deferred
    /// connections, wait for readiness (at most `timeout`, `None` blocks),
    /// dispatch the whole batch, then close idle connections.
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<(), ServerError> {
        if self.accept_retry {
            self.accept_connections();
        }
        self.run_deferred();

        let timeout = if self.deferred.is_empty() {
            self.wait_timeout(timeout)
        } else {
            Some(Duration::ZERO)
        };
        self.poller
            .wait(&mut self.batch, timeout)
            .map_err(ServerError::Wait)?;

        for i in 0..self.batch.len() {
            let event = self.batch[i];
            self.dispatch(event);
        }

        self.reap_idle();
        Ok(())
    }

    fn wait_timeout(&self, timeout: Option<Duration>) -> Option<Duration> {
        let reap = self.idle_timeout.map(reap_interval);
        let retry = self.accept_retry.then_some(ACCEPT_RETRY_INTERVAL);
        [timeout, reap, retry].into_iter().flatten().min()
    }

    fn dispatch(&mut self, event: ReadyEvent) {
        match event.token {
            LISTENER_TOKEN => self.accept_connections(),
            Token(conn_id) => {
                let writing = match self.connections.get(conn_id) {
                    Some(conn) => conn.writing,
                    None => {
                        error!(conn_id, "Readiness event for unknown connection");
                        return;
                    }
                };
                if writing {
                    if event.writable || event.closed {
                        self.handle_writable(conn_id);
                    }
                } else if event.readable || event.closed {
                    self.handle_readable(conn_id);
                }
            }
        }
    }

    fn accept_connections(&mut self) {
        loop {
            let accepted = SockRef::from(&self.listener).accept();
            match accepted {
                Ok((socket, peer)) => self.admit(socket, peer.as_socket()),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.accept_retry = false;
                    break;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // No new edge arrives for connections already queued.
                    if self.accept_retry {
                        debug!(error = %e, "Accept still failing");
                    } else {
                        error!(error = %e, "Could not accept connection");
                    }
                    self.accept_retry = true;
                    break;
                }
            }
        }
    }

    /// Set up an accepted socket. The connection only enters the table if
    /// registration succeeds.
    fn admit(&mut self, socket: Socket, peer: Option<SocketAddr>) {
        let mut socket = ScopedFd::from(socket);
        let handler = (self.factory)();

        if let Err(e) = SockRef::from(&socket).set_nonblocking(true) {
            error!(peer = ?peer, error = %e, "Could not make client socket non-blocking");
            release(socket);
            return;
        }

        let entry = match self.connections.vacant_entry() {
            Some(entry) => entry,
            None => {
                warn!(peer = ?peer, "Connection limit reached, rejecting");
                release(socket);
                return;
            }
        };
        let conn_id = entry.key();

        if let Err(e) = self
            .poller
            .register(&mut socket, Token(conn_id), Interest::READABLE)
        {
            error!(peer = ?peer, error = %e, "Could not register client");
            release(socket);
            return;
        }

        entry.insert(Connection::new(socket, handler, peer));
        info!(conn_id, peer = ?peer, "Connected");
    }

    fn handle_readable(&mut self, conn_id: usize) {
        for _ in 0..self.read_budget {
            let conn = match self.connections.get_mut(conn_id) {
                Some(conn) => conn,
                None => return,
            };

            let result = conn.handler.read(&mut conn.socket);
            conn.touch();

            match result {
                Ok(ReadResult::NeedData) => return,
                Ok(ReadResult::Closed) => {
                    info!(conn_id, peer = ?conn.peer, "Disconnected");
                    self.close_connection(conn_id);
                    return;
                }
                Ok(ReadResult::Message(payload)) => {
                    info!(
                        conn_id,
                        len = payload.len(),
                        payload = %String::from_utf8_lossy(&payload),
                        "Received"
                    );
                    if let Err(e) = conn.handler.write(&mut conn.socket, &payload) {
                        warn!(conn_id, error = %e, "Write failed");
                        self.close_connection(conn_id);
                        return;
                    }
                    if conn.handler.wants_write() {
                        // Stop reading until the peer drains its echo.
                        self.set_writing(conn_id, true);
                        return;
                    }
                }
                Err(e) => {
                    warn!(conn_id, error = %e, "Read failed");
                    self.close_connection(conn_id);
                    return;
                }
            }
        }
        self.defer(conn_id);
    }

    fn handle_writable(&mut self, conn_id: usize) {
        let conn = match self.connections.get_mut(conn_id) {
            Some(conn) => conn,
            None => return,
        };

        let result = conn.handler.flush(&mut conn.socket);
        conn.touch();

        match result {
            Ok(()) if conn.handler.wants_write() => {}
            Ok(()) => {
                self.set_writing(conn_id, false);
                // Frames may already be buffered in the handler.
                self.defer(conn_id);
            }
            Err(e) => {
                warn!(conn_id, error = %e, "Write failed");
                self.close_connection(conn_id);
            }
        }
    }

    /// Switch a connection between read and write interest.
    fn set_writing(&mut self, conn_id: usize, writing: bool) {
        let conn = match self.connections.get_mut(conn_id) {
            Some(conn) => conn,
            None => return,
        };
        let interest = if writing {
            Interest::WRITABLE
        } else {
            Interest::READABLE
        };

        if let Err(e) = self
            .poller
            .reregister(&mut conn.socket, Token(conn_id), interest)
        {
            warn!(conn_id, error = %e, "Could not change interest");
            self.close_connection(conn_id);
            return;
        }
        conn.writing = writing;
    }

    fn defer(&mut self, conn_id: usize) {
        if let Some(conn) = self.connections.get_mut(conn_id) {
            if !conn.deferred {
                conn.deferred = true;
                self.deferred.push_back(conn_id);
            }
        }
    }

    fn run_deferred(&mut self) {
        for _ in 0..self.deferred.len() {
            let conn_id = match self.deferred.pop_front() {
                Some(id) => id,
                None => break,
            };
            // The slot may have been closed and reused since it was queued.
            let ready = match self.connections.get_mut(conn_id) {
                Some(conn) if conn.deferred => {
                    conn.deferred = false;
                    !conn.writing
                }
                _ => false,
            };
            if ready {
                self.handle_readable(conn_id);
            }
        }
    }

    fn reap_idle(&mut self) {
        let idle_timeout = match self.idle_timeout {
            Some(timeout) if !self.connections.is_empty() => timeout,
            _ => return,
        };
        let now = Instant::now();
        if now.duration_since(self.last_reap) < reap_interval(idle_timeout) {
            return;
        }
        self.last_reap = now;

        let cutoff = match now.checked_sub(idle_timeout) {
            Some(cutoff) => cutoff,
            None => return,
        };
        for conn_id in self.connections.idle_since(cutoff) {
            info!(conn_id, "Closing idle connection");
            self.close_connection(conn_id);
        }
    }

    /// Deregister, forget and close a client connection.
    fn close_connection(&mut self, conn_id: usize) {
        if let Some(mut conn) = self.connections.remove(conn_id) {
            if let Err(e) = self.poller.deregister(&mut conn.socket) {
                warn!(conn_id, error = %e, "Could not deregister client");
            }
            release(conn.socket);
            debug!(conn_id, "Connection closed");
        }
    }
}

fn reap_interval(idle_timeout: Duration) -> Duration {
    (idle_timeout / 2).max(Duration::from_millis(10))
}

/// Close a client socket, logging a failed close.
fn release(socket: ScopedFd) {
    if let Err(e) = socket.close() {
        error!(error = %e, "Close failed");
    }
}

/// Create a non-blocking listening socket.
fn create_listener(addr: SocketAddr, backlog: i32) -> Result<ScopedFd, ServerError> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(ServerError::Socket)?;
    let listener = ScopedFd::from(socket);

    {
        let socket = SockRef::from(&listener);
        socket
            .set_reuse_address(true)
            .map_err(ServerError::Configure)?;
        socket
            .set_nonblocking(true)
            .map_err(ServerError::Configure)?;
        socket
            .bind(&addr.into())
            .map_err(|source| ServerError::Bind { addr, source })?;
        socket.listen(backlog).map_err(ServerError::Listen)?;
    }

    Ok(listener)
}

fn local_addr(listener: &ScopedFd) -> io::Result<SocketAddr> {
    SockRef::from(listener)
        .local_addr()?
        .as_socket()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "listener is not an IP socket"))
}
