//! Owned socket descriptors.
//!
//! `ScopedFd` owns exactly one descriptor and releases it exactly once,
//! either through an explicit `close` (which reports the failure to the
//! caller) or on drop (which logs the failure). It is used for the listening
//! socket and for every client socket.

use mio::event::Source;
use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};
use std::io::{self, Read, Write};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, IntoRawFd, RawFd};
use tracing::error;

const RELEASED: RawFd = -1;

/// Sole owner of an OS socket descriptor.
#[derive(Debug)]
pub struct ScopedFd {
    fd: RawFd,
}

impl ScopedFd {
    /// Take ownership of a raw descriptor.
    ///
    /// The descriptor must be open and not owned by anything else.
    pub fn new(fd: RawFd) -> Self {
        Self { fd }
    }

    /// Release the descriptor now, returning the OS error if `close` fails.
    ///
    /// The descriptor is considered released even when the call fails; it is
    /// never closed a second time.
    pub fn close(mut self) -> io::Result<()> {
        let fd = std::mem::replace(&mut self.fd, RELEASED);
        release(fd)
    }
}

fn release(fd: RawFd) -> io::Result<()> {
    if fd == RELEASED {
        return Ok(());
    }
    // SAFETY: `fd` is owned by the handle and is closed at most once.
    if unsafe { libc::close(fd) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl Drop for ScopedFd {
    fn drop(&mut self) {
        let fd = std::mem::replace(&mut self.fd, RELEASED);
        if let Err(e) = release(fd) {
            error!(fd, error = %e, "Close failed");
        }
    }
}

impl From<socket2::Socket> for ScopedFd {
    fn from(socket: socket2::Socket) -> Self {
        Self::new(socket.into_raw_fd())
    }
}

impl AsRawFd for ScopedFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl AsFd for ScopedFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        // SAFETY: the descriptor stays open for as long as `self` is borrowed.
        unsafe { BorrowedFd::borrow_raw(self.fd) }
    }
}

impl Read for ScopedFd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
        let n = unsafe { libc::read(self.fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }
}

impl Write for ScopedFd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // SAFETY: `buf` is valid for reads of `buf.len()` bytes.
        let n = unsafe { libc::write(self.fd, buf.as_ptr().cast(), buf.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Source for ScopedFd {
    fn register(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        SourceFd(&self.fd).register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        SourceFd(&self.fd).reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        SourceFd(&self.fd).deregister(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    fn peer_sees_eof(peer: &mut UnixStream) -> bool {
        let mut buf = [0u8; 1];
        matches!(peer.read(&mut buf), Ok(0))
    }

    #[test]
    fn test_close_releases() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let fd = ScopedFd::new(a.into_raw_fd());

        fd.close().unwrap();
        assert!(peer_sees_eof(&mut b));
    }

    #[test]
    fn test_drop_releases() {
        let (a, mut b) = UnixStream::pair().unwrap();
        {
            let _fd = ScopedFd::new(a.into_raw_fd());
        }
        assert!(peer_sees_eof(&mut b));
    }

    #[test]
    fn test_close_failure_is_reported() {
        // Descriptor that was never opened by this process.
        let fd = ScopedFd::new(i32::MAX - 1);
        let err = fd.close().unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    }

    #[test]
    fn test_drop_failure_does_not_panic() {
        let _fd = ScopedFd::new(i32::MAX - 1);
    }

    #[test]
    fn test_read_write() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut left = ScopedFd::new(a.into_raw_fd());
        let mut right = ScopedFd::new(b.into_raw_fd());

        left.write_all(b"hello").unwrap();
        let mut buf = [0u8; 8];
        let n = right.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }
}
