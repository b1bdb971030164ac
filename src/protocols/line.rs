//! Line echo: a message is everything up to and including `\n`.
//!
//! Partial lines are buffered across reads. If the peer closes with an
//! unterminated line buffered, that remainder is delivered as a final
//! message before the close is reported.

use super::{fill, Fill, HandlerSettings, WriteQueue};
use crate::runtime::{ConnectionHandler, ReadResult};
use bytes::BytesMut;
use std::io::{self, Read, Write};

#[derive(Debug)]
pub struct LineEcho {
    buf: BytesMut,
    /// Prefix of `buf` already known to contain no newline.
    scanned: usize,
    chunk: usize,
    max_line: usize,
    out: WriteQueue,
}

impl LineEcho {
    pub fn new(settings: &HandlerSettings) -> Self {
        Self {
            buf: BytesMut::with_capacity(settings.buffer_size),
            scanned: 0,
            chunk: settings.buffer_size,
            max_line: settings.max_frame_size,
            out: WriteQueue::default(),
        }
    }

    /// Split the next complete line off the buffer. Only the first
    /// `max_line` bytes are searched for its newline.
    fn take_line(&mut self) -> io::Result<Option<BytesMut>> {
        let window = self.buf.len().min(self.max_line);
        let pos = self.buf[self.scanned..window]
            .iter()
            .position(|&b| b == b'\n');
        match pos {
            Some(pos) => {
                let end = self.scanned + pos + 1;
                self.scanned = 0;
                Ok(Some(self.buf.split_to(end)))
            }
            None if self.buf.len() > self.max_line => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line exceeds {} bytes", self.max_line),
            )),
            None => {
                self.scanned = window;
                Ok(None)
            }
        }
    }
}

impl ConnectionHandler for LineEcho {
    fn read<S: Read>(&mut self, stream: &mut S) -> io::Result<ReadResult> {
        loop {
            if let Some(line) = self.take_line()? {
                return Ok(ReadResult::Message(line.freeze()));
            }
            match fill(stream, &mut self.buf, self.chunk)? {
                Fill::Read(_) => continue,
                Fill::WouldBlock => return Ok(ReadResult::NeedData),
                Fill::Eof if self.buf.is_empty() => return Ok(ReadResult::Closed),
                Fill::Eof => {
                    self.scanned = 0;
                    return Ok(ReadResult::Message(self.buf.split().freeze()));
                }
            }
        }
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
