//! Incremental RESP Protocol Parser
//!
//! Two layers live here:
//!
//! 1. [`RespParser`] decodes exactly one frame from the front of a byte slice.
//! 2. [`StreamParser`] owns an accumulation buffer, is fed raw socket reads and
//!    hands out every complete frame in arrival order.
//!
//! ## How the Parser Works
//!
//! The frame decoder reads from a buffer and returns either:
//! - `Ok(Some((value, consumed)))` - Successfully parsed a value, `consumed` bytes were used
//! - `Ok(None)` - Need more data, the message is incomplete
//! - `Err(ParseError)` - The bytes can never become a valid frame
//!
//! Incomplete is never an error: a frame split across reads is the normal case
//! on a TCP stream. Malformed input is reported distinctly so the connection can
//! be dropped instead of waiting forever for bytes that will not fix it.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur during RESP parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Unknown type prefix byte
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// Invalid integer format
    #[error("invalid integer: {0:?}")]
    InvalidInteger(String),

    /// Invalid UTF-8 in a simple string or error message
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Bulk string length is negative (but not -1 for null)
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array length is negative (but not -1 for null)
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Protocol violation (missing CRLF, etc.)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The message exceeds maximum allowed size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum length of a simple string, error, integer or length line
pub const MAX_INLINE_SIZE: usize = 64 * 1024;

/// Maximum array nesting depth (prevent stack overflow)
pub const MAX_NESTING_DEPTH: usize = 32;

/// Default number of consumed bytes a [`StreamParser`] keeps before compacting.
pub const DEFAULT_BUFFER_LIMIT: usize = 8192;

/// A single-frame RESP decoder.
///
/// # Example
///
/// ```
/// use tidekv::protocol::parser::RespParser;
///
/// let mut parser = RespParser::new();
/// let (value, consumed) = parser
///     .parse(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
///     .unwrap()
///     .unwrap();
/// assert_eq!(consumed, 23);
/// assert_eq!(value.as_array().map(|a| a.len()), Some(2));
/// ```
#[derive(Debug, Default)]
pub struct RespParser {
    /// Current nesting depth (for array parsing)
    depth: usize,
}

impl RespParser {
    /// Creates a new parser instance.
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Attempts to parse one RESP value from the front of `buf`.
    ///
    /// `Ok(None)` means the frame is not complete yet. On success the second
    /// element is the number of bytes the frame occupied.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.depth = 0;
        self.value(buf)
    }

    fn value(&mut self, buf: &[u8]) -> Decoded {
        let Some(&tag) = buf.first() else {
            return Ok(None);
        };
        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::ProtocolError(format!(
                "arrays nested deeper than {}",
                MAX_NESTING_DEPTH
            )));
        }

        match tag {
            prefix::SIMPLE_STRING | prefix::ERROR | prefix::INTEGER => line_value(tag, buf),
            prefix::BULK_STRING => bulk_string(buf),
            prefix::ARRAY => self.array(buf),
            other => Err(ParseError::UnknownPrefix(other)),
        }
    }

    /// `*<count>\r\n` followed by `count` complete values.
    fn array(&mut self, buf: &[u8]) -> Decoded {
        let (count, mut consumed) = match length_header(buf)? {
            Some((None, header_len)) => return Ok(Some((RespValue::Array(None), header_len))),
            Some((Some(count), header_len)) => (count, header_len),
            None => return Ok(None),
        };

        // Every element takes at least three bytes, so a claimed count can't
        // reserve more than the buffer could ever describe.
        let mut elements = Vec::with_capacity(count.min(buf.len() / 3 + 1));

        self.depth += 1;
        while elements.len() < count {
            let Some((element, used)) = self.value(&buf[consumed..])? else {
                break;
            };
            elements.push(element);
            consumed += used;
        }
        self.depth -= 1;

        if elements.len() < count {
            return Ok(None);
        }
        Ok(Some((RespValue::Array(Some(elements)), consumed)))
    }
}

/// Result of decoding one frame.
type Decoded = ParseResult<Option<(RespValue, usize)>>;

/// Simple strings, errors and integers: one line after the type byte.
///
/// An error line splits into its category and message at the first space;
/// without a space the whole line is the category.
fn line_value(tag: u8, buf: &[u8]) -> Decoded {
    let Some((line, consumed)) = read_line(buf)? else {
        return Ok(None);
    };
    if tag != prefix::INTEGER && line.iter().any(|&b| b == b'\r' || b == b'\n') {
        return Err(ParseError::ProtocolError(
            "bare CR or LF inside a simple line".to_string(),
        ));
    }

    let value = match tag {
        prefix::INTEGER => RespValue::Integer(parse_decimal(line)?),
        prefix::ERROR => {
            let text = utf8(line)?;
            let (category, message) = text.split_once(' ').unwrap_or((text, ""));
            RespValue::error(category, message)
        }
        _ => RespValue::SimpleString(utf8(line)?.to_owned()),
    };
    Ok(Some((value, consumed)))
}

/// `$<len>\r\n<payload>\r\n`, or `$-1\r\n` for null.
fn bulk_string(buf: &[u8]) -> Decoded {
    let (len, start) = match length_header(buf)? {
        Some((None, header_len)) => return Ok(Some((RespValue::BulkString(None), header_len))),
        Some((Some(len), header_len)) => (len, header_len),
        None => return Ok(None),
    };
    if len > MAX_BULK_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: len,
            max: MAX_BULK_SIZE,
        });
    }

    let end = start + len;
    if buf.len() < end + CRLF.len() {
        return Ok(None);
    }
    if &buf[end..end + CRLF.len()] != CRLF {
        return Err(ParseError::ProtocolError(
            "bulk payload not followed by CRLF".to_string(),
        ));
    }

    let data = Bytes::copy_from_slice(&buf[start..end]);
    Ok(Some((RespValue::BulkString(Some(data)), end + CRLF.len())))
}

/// Reads the length line of a bulk string or array.
///
/// `-1` is the null marker and comes back as `None`; any other negative
/// length is an error.
fn length_header(buf: &[u8]) -> ParseResult<Option<(Option<usize>, usize)>> {
    let Some((line, header_len)) = read_line(buf)? else {
        return Ok(None);
    };

    match parse_decimal(line)? {
        -1 => Ok(Some((None, header_len))),
        n if n < 0 => Err(match buf[0] {
            prefix::ARRAY => ParseError::InvalidArrayLength(n),
            _ => ParseError::InvalidBulkLength(n),
        }),
        n => Ok(Some((Some(n as usize), header_len))),
    }
}

/// Splits the first CRLF-terminated line (after the prefix byte) off `buf`.
///
/// Returns the line content and the number of bytes up to and including CRLF.
/// Only the first [`MAX_INLINE_SIZE`] bytes are searched; a longer line is an
/// error rather than something to keep buffering.
fn read_line(buf: &[u8]) -> ParseResult<Option<(&[u8], usize)>> {
    let window = &buf[1..buf.len().min(1 + MAX_INLINE_SIZE + CRLF.len())];
    match find_crlf(window) {
        Some(pos) => Ok(Some((&buf[1..1 + pos], 1 + pos + CRLF.len()))),
        None if window.len() >= MAX_INLINE_SIZE + CRLF.len() => Err(ParseError::MessageTooLarge {
            size: window.len(),
            max: MAX_INLINE_SIZE,
        }),
        None => Ok(None),
    }
}

/// Offset of the first CRLF.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

fn utf8(bytes: &[u8]) -> ParseResult<&str> {
    std::str::from_utf8(bytes).map_err(|e| ParseError::InvalidUtf8(e.to_string()))
}

/// Parses a whole line as a signed base-10 integer. A leading `+` is allowed.
fn parse_decimal(bytes: &[u8]) -> ParseResult<i64> {
    let s = utf8(bytes)?;
    s.parse::<i64>()
        .map_err(|_| ParseError::InvalidInteger(s.to_string()))
}

/// Parses one frame from the front of `buf` with a fresh decoder.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}

/// Buffers a byte stream and yields every complete frame in it.
///
/// Bytes before `parsed` belong to frames already handed out. Once that prefix
/// grows past `limit` it is dropped from the buffer, so a long-lived connection
/// sending many small commands keeps a bounded buffer. Bytes after `parsed` are
/// never dropped.
///
/// # Example
///
/// ```
/// use tidekv::protocol::{RespValue, StreamParser};
///
/// let mut parser = StreamParser::new();
/// parser.feed(b"*1\r\n$4\r\nPI").unwrap();
/// assert!(parser.take_values().is_empty());
///
/// parser.feed(b"NG\r\n").unwrap();
/// let values = parser.take_values();
/// assert_eq!(values.len(), 1);
/// assert_eq!(values[0], RespValue::array(vec![RespValue::bulk_string("PING")]));
/// ```
#[derive(Debug)]
pub struct StreamParser {
    decoder: RespParser,
    buffer: Vec<u8>,
    /// End of the last successfully decoded frame
    parsed: usize,
    limit: usize,
    values: Vec<RespValue>,
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamParser {
    /// Creates a parser that compacts after [`DEFAULT_BUFFER_LIMIT`] consumed bytes.
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_BUFFER_LIMIT)
    }

    /// Creates a parser with a custom compaction threshold.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            decoder: RespParser::new(),
            buffer: Vec::new(),
            parsed: 0,
            limit,
            values: Vec::new(),
        }
    }

    /// Appends `data` and decodes every frame that is now complete.
    ///
    /// Frames decoded before a malformed one are still available through
    /// [`take_values`](Self::take_values).
    pub fn feed(&mut self, data: &[u8]) -> ParseResult<()> {
        self.buffer.extend_from_slice(data);

        loop {
            match self.decoder.parse(&self.buffer[self.parsed..])? {
                Some((value, consumed)) => {
                    self.values.push(value);
                    self.parsed += consumed;

                    if self.parsed > self.limit {
                        self.buffer.drain(..self.parsed);
                        self.parsed = 0;
                    }
                }
                None => return Ok(()),
            }
        }
    }

    /// Drains the values decoded so far, oldest first.
    pub fn take_values(&mut self) -> Vec<RespValue> {
        std::mem::take(&mut self.values)
    }

    /// Bytes of an incomplete frame still waiting for more input.
    pub fn pending(&self) -> usize {
        self.buffer.len() - self.parsed
    }

    /// Total bytes held, including already consumed ones not yet compacted.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> RespValue {
        RespValue::bulk_string(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn test_parse_simple_string() {
        let (value, consumed) = parse_message(b"+OK\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::SimpleString("OK".to_string()));
        assert_eq!(consumed, 5);
    }

    #[test]
    fn test_parse_simple_string_incomplete() {
        assert!(parse_message(b"+OK").unwrap().is_none());
        assert!(parse_message(b"+OK\r").unwrap().is_none());
    }

    #[test]
    fn test_parse_error_with_message() {
        let (value, consumed) = parse_message(b"-ERR unknown command\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::error("ERR", "unknown command"));
        assert_eq!(consumed, 22);
    }

    #[test]
    fn test_parse_error_without_space() {
        let (value, _) = parse_message(b"-WRONGTYPE\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::error("WRONGTYPE", ""));
    }

    #[test]
    fn test_parse_integer() {
        let (value, consumed) = parse_message(b":1000\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::Integer(1000));
        assert_eq!(consumed, 7);
    }

    #[test]
    fn test_parse_signed_integers() {
        let (value, _) = parse_message(b":-42\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::Integer(-42));

        let (value, _) = parse_message(b":+7\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::Integer(7));
    }

    #[test]
    fn test_parse_bare_sign_is_malformed() {
        assert!(matches!(
            parse_message(b":-\r\n"),
            Err(ParseError::InvalidInteger(_))
        ));
        assert!(matches!(
            parse_message(b":+\r\n"),
            Err(ParseError::InvalidInteger(_))
        ));
        assert!(matches!(
            parse_message(b":\r\n"),
            Err(ParseError::InvalidInteger(_))
        ));
    }

    #[test]
    fn test_parse_invalid_integer() {
        assert!(matches!(
            parse_message(b":not_a_number\r\n"),
            Err(ParseError::InvalidInteger(_))
        ));
    }

    #[test]
    fn test_parse_bulk_string() {
        let (value, consumed) = parse_message(b"$5\r\nhello\r\n").unwrap().unwrap();
        assert_eq!(value, bulk("hello"));
        assert_eq!(consumed, 11);
    }

    #[test]
    fn test_parse_null_bulk_string() {
        let (value, consumed) = parse_message(b"$-1\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::BulkString(None));
        assert_eq!(consumed, 5);
    }

    #[test]
    fn test_parse_empty_bulk_string() {
        let (value, consumed) = parse_message(b"$0\r\n\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::BulkString(Some(Bytes::new())));
        assert_eq!(consumed, 6);
    }

    #[test]
    fn test_parse_bulk_string_incomplete() {
        assert!(parse_message(b"$5\r\nhel").unwrap().is_none());
        assert!(parse_message(b"$5\r\nhello").unwrap().is_none());
        assert!(parse_message(b"$5").unwrap().is_none());
    }

    #[test]
    fn test_parse_bulk_string_bad_lengths() {
        assert_eq!(
            parse_message(b"$-2\r\n"),
            Err(ParseError::InvalidBulkLength(-2))
        );
        assert!(matches!(
            parse_message(b"$abc\r\n"),
            Err(ParseError::InvalidInteger(_))
        ));
    }

    #[test]
    fn test_parse_bulk_string_missing_terminator() {
        assert!(matches!(
            parse_message(b"$3\r\nabcde"),
            Err(ParseError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_binary_safe_bulk_string() {
        let (value, _) = parse_message(b"$7\r\nhe\r\nl\x00o\r\n").unwrap().unwrap();
        assert_eq!(
            value,
            RespValue::bulk_string(Bytes::from_static(b"he\r\nl\x00o"))
        );
    }

    #[test]
    fn test_parse_array() {
        let (value, consumed) = parse_message(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(value, RespValue::array(vec![bulk("GET"), bulk("name")]));
        assert_eq!(consumed, 23);
    }

    #[test]
    fn test_parse_null_and_empty_array() {
        let (value, _) = parse_message(b"*-1\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::Array(None));

        let (value, _) = parse_message(b"*0\r\n").unwrap().unwrap();
        assert_eq!(value, RespValue::Array(Some(vec![])));
    }

    #[test]
    fn test_parse_invalid_array_length() {
        assert_eq!(
            parse_message(b"*-5\r\n"),
            Err(ParseError::InvalidArrayLength(-5))
        );
    }

    #[test]
    fn test_parse_nested_array() {
        let (value, _) = parse_message(b"*2\r\n:1\r\n*2\r\n:2\r\n$-1\r\n").unwrap().unwrap();
        assert_eq!(
            value,
            RespValue::array(vec![
                RespValue::Integer(1),
                RespValue::array(vec![RespValue::Integer(2), RespValue::null()]),
            ])
        );
    }

    #[test]
    fn test_parse_array_incomplete_child() {
        assert!(parse_message(b"*2\r\n$3\r\nGET\r\n$4\r\nna").unwrap().is_none());
        assert!(parse_message(b"*2\r\n$3\r\nGET\r\n").unwrap().is_none());
    }

    #[test]
    fn test_parse_array_malformed_child() {
        assert!(matches!(
            parse_message(b"*2\r\n:1\r\n:x\r\n"),
            Err(ParseError::InvalidInteger(_))
        ));
    }

    #[test]
    fn test_parse_unknown_prefix() {
        assert_eq!(
            parse_message(b"@invalid\r\n"),
            Err(ParseError::UnknownPrefix(b'@'))
        );
    }

    #[test]
    fn test_nesting_limit() {
        let mut input = Vec::new();
        for _ in 0..=MAX_NESTING_DEPTH + 1 {
            input.extend_from_slice(b"*1\r\n");
        }
        input.extend_from_slice(b":1\r\n");
        assert!(matches!(
            parse_message(&input),
            Err(ParseError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_bare_cr_or_lf_in_simple_line_is_malformed() {
        for input in [&b"+a\rb\r\n"[..], b"+a\nb\r\n", b"-ERR bad\rthing\r\n"] {
            assert!(
                matches!(parse_message(input), Err(ParseError::ProtocolError(_))),
                "accepted {:?}",
                String::from_utf8_lossy(input)
            );
        }
    }

    #[test]
    fn test_unterminated_line_is_capped() {
        let mut input = vec![b'+'];
        input.extend(std::iter::repeat(b'a').take(MAX_INLINE_SIZE));
        // Still below the cap: wait for more bytes
        assert_eq!(parse_message(&input), Ok(None));

        input.extend_from_slice(b"aaaa");
        assert!(matches!(
            parse_message(&input),
            Err(ParseError::MessageTooLarge { max: MAX_INLINE_SIZE, .. })
        ));

        let mut stream = StreamParser::new();
        assert!(stream.feed(&input).is_err());
    }

    #[test]
    fn test_line_at_cap_is_accepted() {
        let mut input = vec![b'+'];
        input.extend(std::iter::repeat(b'a').take(MAX_INLINE_SIZE));
        input.extend_from_slice(b"\r\n");
        let (value, consumed) = parse_message(&input).unwrap().unwrap();
        assert_eq!(consumed, input.len());
        assert_eq!(value.as_str().map(str::len), Some(MAX_INLINE_SIZE));
    }

    #[test]
    fn test_roundtrip_every_variant() {
        let original = RespValue::array(vec![
            RespValue::simple_string("OK"),
            RespValue::error("ERR", "something broke"),
            RespValue::error("NOSPACE", ""),
            RespValue::integer(i64::MAX),
            RespValue::integer(i64::MIN),
            RespValue::null(),
            RespValue::bulk_string(Bytes::new()),
            RespValue::bulk_string(Bytes::from_static(b"bin\r\n\x00ary")),
            RespValue::null_array(),
            RespValue::array(vec![]),
            RespValue::array(vec![RespValue::array(vec![bulk("deep")])]),
        ]);

        let serialized = original.serialize();
        let (parsed, consumed) = parse_message(&serialized).unwrap().unwrap();
        assert_eq!(parsed, original);
        assert_eq!(consumed, serialized.len());
    }

    #[test]
    fn test_stream_parser_split_feeds_match_whole_feed() {
        let commands = [
            RespValue::array(vec![bulk("SET"), bulk("key"), bulk("va\r\nlue")]),
            RespValue::array(vec![bulk("GET"), bulk("key")]),
            RespValue::integer(-17),
            RespValue::null_array(),
            RespValue::error("ERR", "boom"),
        ];
        let mut wire = Vec::new();
        for command in &commands {
            command.serialize_into(&mut wire);
        }

        let mut whole = StreamParser::new();
        whole.feed(&wire).unwrap();
        let expected = whole.take_values();
        assert_eq!(expected, commands.to_vec());

        for chunk_size in [1, 2, 3, 5, 7, 16] {
            let mut parser = StreamParser::new();
            let mut got = Vec::new();
            for chunk in wire.chunks(chunk_size) {
                parser.feed(chunk).unwrap();
                got.extend(parser.take_values());
            }
            assert_eq!(got, expected, "chunk size {}", chunk_size);
            assert_eq!(parser.pending(), 0);
        }
    }

    #[test]
    fn test_stream_parser_keeps_partial_frame() {
        let mut parser = StreamParser::new();
        parser.feed(b"$5\r\nhel").unwrap();
        assert!(parser.take_values().is_empty());
        assert_eq!(parser.pending(), 7);

        parser.feed(b"lo\r\n+OK\r").unwrap();
        assert_eq!(parser.take_values(), vec![bulk("hello")]);
        assert_eq!(parser.pending(), 4);

        parser.feed(b"\n").unwrap();
        assert_eq!(parser.take_values(), vec![RespValue::simple_string("OK")]);
    }

    #[test]
    fn test_stream_parser_compacts_past_limit() {
        let mut parser = StreamParser::with_limit(16);
        let frame = b"+0123456789\r\n"; // 13 bytes

        parser.feed(frame).unwrap();
        assert_eq!(parser.buffered(), 13);

        // Second frame pushes the consumed prefix to 26 > 16
        parser.feed(frame).unwrap();
        assert_eq!(parser.buffered(), 0);
        assert_eq!(parser.take_values().len(), 2);
    }

    #[test]
    fn test_stream_parser_compaction_keeps_unconsumed_bytes() {
        let mut parser = StreamParser::with_limit(4);
        parser.feed(b"+hello\r\n+wor").unwrap();
        assert_eq!(parser.take_values(), vec![RespValue::simple_string("hello")]);
        assert_eq!(parser.buffered(), 4);
        assert_eq!(parser.pending(), 4);

        parser.feed(b"ld\r\n").unwrap();
        assert_eq!(parser.take_values(), vec![RespValue::simple_string("world")]);
    }

    #[test]
    fn test_stream_parser_malformed_after_good_frame() {
        let mut parser = StreamParser::new();
        let result = parser.feed(b"+OK\r\n$-9\r\n");
        assert_eq!(result, Err(ParseError::InvalidBulkLength(-9)));
        assert_eq!(parser.take_values(), vec![RespValue::simple_string("OK")]);
    }
}
