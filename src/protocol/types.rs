//! RESP (Redis Serialization Protocol) Data Types
//!
//! This module defines the value type shared by the wire codec, the snapshot
//! codec and the storage engine.
//!
//! ## Protocol Format
//!
//! Each RESP type starts with a type prefix byte:
//! - `+` Simple String
//! - `-` Error
//! - `:` Integer
//! - `$` Bulk String
//! - `*` Array
//!
//! All types are terminated with CRLF (`\r\n`).
//!
//! ## Examples
//!
//! Simple String: `+OK\r\n`
//! Error: `-ERR unknown command\r\n`
//! Integer: `:1000\r\n`
//! Bulk String: `$5\r\nhello\r\n`
//! Array: `*2\r\n$3\r\nGET\r\n$4\r\nname\r\n`
//! Null Bulk String: `$-1\r\n`
//! Null Array: `*-1\r\n`

use bytes::Bytes;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// Represents a value in the RESP protocol.
///
/// The same type is used for requests, responses and stored values. Null
/// bulk strings and null arrays are distinct from their empty counterparts
/// and the distinction survives every encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Non-binary-safe status text. Never contains CR or LF.
    /// Format: `+<string>\r\n`
    SimpleString(String),

    /// An error category and a message.
    /// Format: `-<prefix> <message>\r\n`
    SimpleError { prefix: String, message: String },

    /// 64-bit signed integers.
    /// Format: `:<integer>\r\n`
    Integer(i64),

    /// Binary-safe strings. `None` is the null bulk string.
    /// Format: `$<length>\r\n<data>\r\n`, null: `$-1\r\n`
    BulkString(Option<Bytes>),

    /// Arrays of any RESP type, including nested arrays. `None` is the null array.
    /// Format: `*<count>\r\n<element1><element2>...`, null: `*-1\r\n`
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// Creates a new simple string response.
    ///
    /// # Example
    /// ```
    /// use tidekv::protocol::types::RespValue;
    /// let ok = RespValue::simple_string("OK");
    /// ```
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    /// Creates an error with an explicit category.
    pub fn error(prefix: impl Into<String>, message: impl Into<String>) -> Self {
        RespValue::SimpleError {
            prefix: prefix.into(),
            message: message.into(),
        }
    }

    /// Creates an error in the generic `ERR` category.
    ///
    /// # Example
    /// ```
    /// use tidekv::protocol::types::RespValue;
    /// let err = RespValue::err("syntax error");
    /// assert_eq!(err.serialize(), b"-ERR syntax error\r\n");
    /// ```
    pub fn err(message: impl Into<String>) -> Self {
        Self::error("ERR", message)
    }

    /// Creates a new integer response.
    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    /// Creates a new bulk string response.
    ///
    /// # Example
    /// ```
    /// use tidekv::protocol::types::RespValue;
    /// use bytes::Bytes;
    /// let bulk = RespValue::bulk_string(Bytes::from("hello"));
    /// ```
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(Some(data.into()))
    }

    /// The null bulk string.
    pub fn null() -> Self {
        RespValue::BulkString(None)
    }

    /// The null array.
    pub fn null_array() -> Self {
        RespValue::Array(None)
    }

    /// Creates an array response.
    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(Some(values))
    }

    /// Common response for successful operations
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    /// Common response for PONG
    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// The generic syntax error reply.
    pub fn syntax_error() -> Self {
        Self::err("syntax error")
    }

    /// Encodes the value into a fresh wire buffer.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_hint());
        self.serialize_into(&mut buf);
        buf
    }

    /// Appends the wire encoding to `buf`.
    ///
    /// Connections use this to queue replies without an intermediate allocation.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => line(buf, prefix::SIMPLE_STRING, s.as_bytes()),
            RespValue::SimpleError { prefix: category, message } if message.is_empty() => {
                line(buf, prefix::ERROR, category.as_bytes())
            }
            RespValue::SimpleError { prefix: category, message } => {
                let text = format!("{} {}", category, message);
                line(buf, prefix::ERROR, text.as_bytes())
            }
            RespValue::Integer(n) => header(buf, prefix::INTEGER, *n),
            RespValue::BulkString(None) => header(buf, prefix::BULK_STRING, -1),
            RespValue::BulkString(Some(data)) => {
                header(buf, prefix::BULK_STRING, data.len() as i64);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Array(None) => header(buf, prefix::ARRAY, -1),
            RespValue::Array(Some(values)) => {
                header(buf, prefix::ARRAY, values.len() as i64);
                values.iter().for_each(|v| v.serialize_into(buf));
            }
        }
    }

    /// Rough encoded size, used to presize buffers.
    fn wire_hint(&self) -> usize {
        match self {
            RespValue::BulkString(Some(data)) => data.len() + 16,
            RespValue::Array(Some(values)) => 16 + values.iter().map(Self::wire_hint).sum::<usize>(),
            _ => 32,
        }
    }

    /// Returns true for the null bulk string and the null array.
    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::BulkString(None) | RespValue::Array(None))
    }

    /// Returns true if this value is an error.
    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::SimpleError { .. })
    }

    /// Attempts to extract the inner bytes from a non-null BulkString.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            RespValue::BulkString(Some(b)) => Some(b),
            _ => None,
        }
    }

    /// Attempts to extract text from a SimpleString or a UTF-8 BulkString.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(Some(b)) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Attempts to extract the elements of a non-null array.
    pub fn as_array(&self) -> Option<&[RespValue]> {
        match self {
            RespValue::Array(Some(arr)) => Some(arr),
            _ => None,
        }
    }

    /// Short type name, used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            RespValue::SimpleString(_) => "simple-string",
            RespValue::SimpleError { .. } => "error",
            RespValue::Integer(_) => "integer",
            RespValue::BulkString(_) => "bulk-string",
            RespValue::Array(_) => "array",
        }
    }
}

/// `<type byte><payload>\r\n`
fn line(buf: &mut Vec<u8>, tag: u8, payload: &[u8]) {
    buf.push(tag);
    buf.extend_from_slice(payload);
    buf.extend_from_slice(CRLF);
}

/// `<type byte><decimal>\r\n`, the shape shared by integers and length headers.
fn header(buf: &mut Vec<u8>, tag: u8, n: i64) {
    line(buf, tag, n.to_string().as_bytes());
}
