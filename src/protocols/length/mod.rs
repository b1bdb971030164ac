//! Length-prefixed echo.
//!
//! Predictable framing for throughput tests and payloads containing
//! newlines:
//!
//! ```text
//! Request:  <length>\r\n<data of exactly length bytes>
//! Response: <length>\r\n<data of exactly length bytes>
//!
//! Example:
//! Request:  5\r\nhello
//! Response: 5\r\nhello
//! ```
//!
//! `QUIT\r\n` closes the connection. A malformed or oversized length fails
//! the connection.

pub mod parser;

use super::{fill, Fill, HandlerSettings, WriteQueue};
use crate::runtime::{ConnectionHandler, ReadResult};
use bytes::BytesMut;
use parser::{Command, ParseResult};
use std::io::{self, Read, Write};

/// Longest accepted header, `\r\n` included.
const MAX_HEADER_LEN: usize = 24;

#[derive(Debug)]
pub struct LengthEcho {
    buf: BytesMut,
    chunk: usize,
    max_frame: usize,
    out: WriteQueue,
}

impl LengthEcho {
    pub fn new(settings: &HandlerSettings) -> Self {
        Self {
            buf: BytesMut::with_capacity(settings.buffer_size),
            chunk: settings.buffer_size,
            max_frame: settings.max_frame_size,
            out: WriteQueue::default(),
        }
    }

    /// Split one complete frame off the buffer, header included.
    fn take_frame(&mut self) -> io::Result<Option<Frame>> {
        match parser::parse(&self.buf) {
            ParseResult::Complete(Command::Quit) => Ok(Some(Frame::Quit)),
            ParseResult::Complete(Command::Echo { header_len, .. })
                if header_len > MAX_HEADER_LEN =>
            {
                Err(invalid("length header too long".to_string()))
            }
            ParseResult::Complete(Command::Echo { length, header_len }) => {
                if length > self.max_frame {
                    return Err(invalid(format!(
                        "frame of {} bytes exceeds {}",
                        length, self.max_frame
                    )));
                }
                let total = header_len + length;
                if self.buf.len() < total {
                    self.buf.reserve(total - self.buf.len());
                    return Ok(None);
                }
                Ok(Some(Frame::Data(self.buf.split_to(total))))
            }
            // No `\r\n` within the limit: the header can only end past it.
            ParseResult::Incomplete if self.buf.len() >= MAX_HEADER_LEN => {
                Err(invalid("length header too long".to_string()))
            }
            ParseResult::Incomplete => Ok(None),
            ParseResult::InvalidLength => Err(invalid("invalid length".to_string())),
        }
    }
}

enum Frame {
    Data(BytesMut),
    Quit,
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

impl ConnectionHandler for LengthEcho {
    fn read<S: Read>(&mut self, stream: &mut S) -> io::Result<ReadResult> {
        loop {
            match self.take_frame()? {
                Some(Frame::Data(frame)) => return Ok(ReadResult::Message(frame.freeze())),
                Some(Frame::Quit) => return Ok(ReadResult::Closed),
                None => {}
            }
            match fill(stream, &mut self.buf, self.chunk)? {
                Fill::Read(_) => continue,
                Fill::WouldBlock => return Ok(ReadResult::NeedData),
                // A truncated frame is dropped with the connection.
                Fill::Eof => return Ok(ReadResult::Closed),
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
