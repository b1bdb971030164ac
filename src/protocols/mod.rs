//! Echo framings.
//!
//! Each framing is a `ConnectionHandler` deciding what one message is:
//! - `raw`: whatever a single read returns
//! - `line`: newline-terminated lines
//! - `length`: `<length>\r\n<data>` frames
//!
//! All of them echo the message bytes back unchanged.

pub mod length;
pub mod line;
pub mod raw;

use bytes::{Buf, BytesMut};
use std::io::{self, Read, Write};

/// Sizing shared by all framings.
#[derive(Debug, Clone, Copy)]
pub struct HandlerSettings {
    /// Bytes requested from the socket per read.
    pub buffer_size: usize,
    /// Largest frame a framed handler accepts before failing the connection.
    pub max_frame_size: usize,
}

/// Result of a single non-blocking read into a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fill {
    Read(usize),
    Eof,
    WouldBlock,
}

/// Append up to `chunk` bytes from `stream` to `buf`.
pub(crate) fn fill<S: Read>(
    stream: &mut S,
    buf: &mut BytesMut,
    chunk: usize,
) -> io::Result<Fill> {
    let start = buf.len();
    buf.resize(start + chunk.max(1), 0);
    loop {
        match stream.read(&mut buf[start..]) {
            Ok(0) => {
                buf.truncate(start);
                return Ok(Fill::Eof);
            }
            Ok(n) => {
                buf.truncate(start + n);
                return Ok(Fill::Read(n));
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                buf.truncate(start);
                return Ok(Fill::WouldBlock);
            }
            Err(e) => {
                buf.truncate(start);
                return Err(e);
            }
        }
    }
}

/// Outbound bytes the socket has not accepted yet.
#[derive(Debug, Default)]
pub(crate) struct WriteQueue {
    pending: BytesMut,
}

impl WriteQueue {
    /// Queue `data` and push as much as the socket takes.
    pub fn send<S: Write>(&mut self, stream: &mut S, data: &[u8]) -> io::Result<()> {
        self.pending.extend_from_slice(data);
        self.flush(stream)
    }

    /// Write pending bytes until done or the socket would block.
    pub fn flush<S: Write>(&mut self, stream: &mut S) -> io::Result<()> {
        while !self.pending.is_empty() {
            match stream.write(&self.pending) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => self.pending.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// In-memory sockets for handler tests.
#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};

    /// Scripted read side: each entry is one read result, then `WouldBlock`
    /// (or EOF once `eof` is set).
    #[derive(Default)]
    pub struct MockStream {
        pub reads: VecDeque<Vec<u8>>,
        pub eof: bool,
        pub written: Vec<u8>,
        /// Bytes the write side accepts before returning `WouldBlock`.
        pub write_room: Option<usize>,
    }

    impl MockStream {
        pub fn with_reads(chunks: &[&[u8]]) -> Self {
            Self {
                reads: chunks.iter().map(|c| c.to_vec()).collect(),
                ..Default::default()
            }
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(mut chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.reads.push_front(chunk.split_off(n));
                    }
                    Ok(n)
                }
                None if self.eof => Ok(0),
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = match self.write_room {
                Some(0) => return Err(io::ErrorKind::WouldBlock.into()),
                Some(room) => {
                    let n = room.min(buf.len());
                    self.write_room = Some(room - n);
                    n
                }
                None => buf.len(),
            };
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockStream;
    use super::*;

    #[test]
    fn test_fill_outcomes() {
        let mut stream = MockStream::with_reads(&[b"abc"]);
        let mut buf = BytesMut::new();

        assert_eq!(fill(&mut stream, &mut buf, 16).unwrap(), Fill::Read(3));
        assert_eq!(&buf[..], b"abc");
        assert_eq!(fill(&mut stream, &mut buf, 16).unwrap(), Fill::WouldBlock);
        assert_eq!(&buf[..], b"abc");

        stream.eof = true;
        assert_eq!(fill(&mut stream, &mut buf, 16).unwrap(), Fill::Eof);
        assert_eq!(&buf[..], b"abc");
    }

    #[test]
    fn test_write_queue_partial() {
        let mut stream = MockStream {
            write_room: Some(3),
            ..Default::default()
        };
        let mut queue = WriteQueue::default();

        queue.send(&mut stream, b"hello").unwrap();
        assert_eq!(stream.written, b"hel");
        assert!(!queue.is_empty());

        stream.write_room = None;
        queue.flush(&mut stream).unwrap();
        assert_eq!(stream.written, b"hello");
        assert!(queue.is_empty());
    }
}
