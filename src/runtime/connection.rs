//! Connection table.
//!
//! Each live client connection owns its socket and its handler. The slab key
//! doubles as the poll token, so an entry exists exactly while its socket is
//! registered with the poller.

use crate::runtime::fd::ScopedFd;
use slab::Slab;
use std::net::SocketAddr;
use std::time::Instant;

/// A single client connection.
#[derive(Debug)]
pub struct Connection<H> {
    /// Non-blocking client socket.
    pub socket: ScopedFd,
    /// Framing state for this connection.
    pub handler: H,
    /// Remote address, when the OS reported one.
    pub peer: Option<SocketAddr>,
    /// Last time the connection was read from or written to.
    pub last_active: Instant,
    /// Registered for write readiness (echo output pending) instead of reads.
    pub writing: bool,
    /// Queued for another read pass before the next wait.
    pub deferred: bool,
}

impl<H> Connection<H> {
    /// Create a new connection, registered for reads only.
    pub fn new(socket: ScopedFd, handler: H, peer: Option<SocketAddr>) -> Self {
        Self {
            socket,
            handler,
            peer,
            last_active: Instant::now(),
            writing: false,
            deferred: false,
        }
    }

    /// Record I/O activity.
    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }
}

/// Table of live connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove. Keys are reused after removal.
pub struct ConnectionTable<H> {
    connections: Slab<Connection<H>>,
    max_connections: usize,
}

impl<H> ConnectionTable<H> {
    /// Create a new table with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections.min(1024)),
            max_connections,
        }
    }

    /// Reserve the slot the next connection will occupy.
    ///
    /// Returns `None` if the table is at capacity. The key is only claimed
    /// once the entry is filled with `VacantEntry::insert`.
    pub fn vacant_entry(&mut self) -> Option<slab::VacantEntry<'_, Connection<H>>> {
        if self.is_full() {
            return None;
        }
        Some(self.connections.vacant_entry())
    }

    pub fn get(&self, id: usize) -> Option<&Connection<H>> {
        self.connections.get(id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection<H>> {
        self.connections.get_mut(id)
    }

    /// Remove a connection from the table.
    pub fn remove(&mut self, id: usize) -> Option<Connection<H>> {
        self.connections.try_remove(id)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_connections
    }

    /// Keys of connections idle since before `cutoff`.
    pub fn idle_since(&self, cutoff: Instant) -> Vec<usize> {
        self.connections
            .iter()
            .filter(|(_, conn)| conn.last_active < cutoff)
            .map(|(id, _)| id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::IntoRawFd;
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    fn socket() -> ScopedFd {
        let (a, _b) = UnixStream::pair().unwrap();
        ScopedFd::new(a.into_raw_fd())
    }

    fn insert(table: &mut ConnectionTable<u32>, tag: u32) -> Option<usize> {
        let entry = table.vacant_entry()?;
        let id = entry.key();
        entry.insert(Connection::new(socket(), tag, None));
        Some(id)
    }

    #[test]
    fn test_connection_table() {
        let mut table = ConnectionTable::new(2);

        let id1 = insert(&mut table, 10).unwrap();
        let id2 = insert(&mut table, 11).unwrap();

        // At capacity
        assert!(table.is_full());
        assert!(insert(&mut table, 12).is_none());

        assert_eq!(table.len(), 2);
        assert_eq!(table.get(id1).unwrap().handler, 10);
        assert_eq!(table.get(id2).unwrap().handler, 11);

        table.remove(id1);
        assert!(table.get(id1).is_none());
        assert!(table.remove(id1).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_key_reused_after_remove() {
        let mut table = ConnectionTable::new(4);

        let id1 = insert(&mut table, 1).unwrap();
        let _id2 = insert(&mut table, 2).unwrap();
        table.remove(id1);

        let id3 = insert(&mut table, 3).unwrap();
        assert_eq!(id3, id1);
        assert_eq!(table.get(id3).unwrap().handler, 3);
    }

    #[test]
    fn test_unfilled_entry_is_not_claimed() {
        let mut table: ConnectionTable<u32> = ConnectionTable::new(4);

        let key = table.vacant_entry().unwrap().key();
        assert!(table.is_empty());
        assert!(table.get(key).is_none());
    }

    #[test]
    fn test_idle_since() {
        let mut table = ConnectionTable::new(4);
        let stale = insert(&mut table, 1).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        let cutoff = Instant::now();
        std::thread::sleep(Duration::from_millis(10));
        let fresh = insert(&mut table, 2).unwrap();

        let idle = table.idle_since(cutoff);
        assert_eq!(idle, vec![stale]);
        assert!(!idle.contains(&fresh));
    }
}
