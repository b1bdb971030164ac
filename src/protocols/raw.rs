//! Raw echo: every successful read is one message.

use super::{fill, Fill, HandlerSettings, WriteQueue};
use crate::runtime::{ConnectionHandler, ReadResult};
use bytes::BytesMut;
use std::io::{self, Read, Write};

#[derive(Debug)]
pub struct RawEcho {
    buf: BytesMut,
    chunk: usize,
    out: WriteQueue,
}

impl RawEcho {
    pub fn new(settings: &HandlerSettings) -> Self {
        Self {
            buf: BytesMut::with_capacity(settings.buffer_size),
            chunk: settings.buffer_size,
            out: WriteQueue::default(),
        }
    }
}

impl ConnectionHandler for RawEcho {
    fn read<S: Read>(&mut self, stream: &mut S) -> io::Result<ReadResult> {
        Ok(match fill(stream, &mut self.buf, self.chunk)? {
            Fill::Read(_) => ReadResult::Message(self.buf.split().freeze()),
            Fill::Eof => ReadResult::Closed,
            Fill::WouldBlock => ReadResult::NeedData,
        })
    }

    fn write<S: Write>(&mut self, stream: &mut S, payload: &[u8]) -> io::Result<()> {
        self.out.send(stream, payload)
    }

    fn flush<S: Write>(&mut self, stream: &mut S) -> io::Result<()> {
        self.out.flush(stream)
    }

    fn wants_write(&self) -> bool {
        !self.out.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::mock::MockStream;

    fn handler(buffer_size: usize) -> RawEcho {
        RawEcho::new(&HandlerSettings {
            buffer_size,
            max_frame_size: 1024,
        })
    }

    #[test]
    fn test_each_read_is_a_message() {
        let mut echo = handler(64);
        let mut stream = MockStream::with_reads(&[b"hello", b"world"]);

        assert_eq!(echo.read(&mut stream).unwrap(), ReadResult::Message("hello".into()));
        assert_eq!(echo.read(&mut stream).unwrap(), ReadResult::Message("world".into()));
        assert_eq!(echo.read(&mut stream).unwrap(), ReadResult::NeedData);

        stream.eof = true;
        assert_eq!(echo.read(&mut stream).unwrap(), ReadResult::Closed);
    }

    #[test]
    fn test_read_bounded_by_buffer_size() {
        let mut echo = handler(4);
        let mut stream = MockStream::with_reads(&[b"abcdefgh"]);

        assert_eq!(echo.read(&mut stream).unwrap(), ReadResult::Message("abcd".into()));
        assert_eq!(echo.read(&mut stream).unwrap(), ReadResult::Message("efgh".into()));
    }

    #[test]
    fn test_write_backpressure() {
        let mut echo = handler(64);
        let mut stream = MockStream {
            write_room: Some(0),
            ..Default::default()
        };

        echo.write(&mut stream, b"pending").unwrap();
        assert!(echo.wants_write());

        stream.write_room = None;
        echo.flush(&mut stream).unwrap();
        assert!(!echo.wants_write());
        assert_eq!(stream.written, b"pending");
    }
}
