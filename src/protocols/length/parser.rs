//! Length-prefixed frame header parser.

/// Parsed frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Data frame; `length` bytes of data follow the header.
    Echo {
        /// Length of the data.
        length: usize,
        /// Bytes consumed by the header (length + \r\n).
        header_len: usize,
    },
    /// Quit command.
    Quit,
}

/// Parse result.
#[derive(Debug)]
pub enum ParseResult {
    /// Successfully parsed header.
    Complete(Command),
    /// Need more data for header.
    Incomplete,
    /// Invalid length format.
    InvalidLength,
}

/// Parse a frame header from the start of `input`.
///
/// For `Echo`, the caller checks that the data is fully buffered.
pub fn parse(input: &[u8]) -> ParseResult {
    let line_end = match find_crlf(input) {
        Some(pos) => pos,
        None => return ParseResult::Incomplete,
    };

    let line = &input[..line_end];

    if line.eq_ignore_ascii_case(b"QUIT") {
        return ParseResult::Complete(Command::Quit);
    }

    // Digits only: `str::parse` would also accept a leading `+`.
    if line.is_empty() || !line.iter().all(u8::is_ascii_digit) {
        return ParseResult::InvalidLength;
    }

    let length: usize = match std::str::from_utf8(line).ok().and_then(|s| s.parse().ok()) {
        Some(len) => len,
        None => return ParseResult::InvalidLength,
    };

    ParseResult::Complete(Command::Echo {
        length,
        header_len: line_end + 2,
    })
}

/// Find \r\n in buffer, returning the position of \r.
fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\r\n")
}
