//! RESP Protocol Implementation
//!
//! This module provides the Redis Serialization Protocol (RESP) value type and
//! its two encodings.
//!
//! ## Modules
//!
//! - `types`: Defines the `RespValue` enum and wire serialization
//! - `parser`: Single-frame decoder and the buffering `StreamParser`
//! - `snapshot`: Length-prefixed binary form used by store snapshots
//!
//! ## Example
//!
//! ```
//! use tidekv::protocol::{parse_message, RespValue};
//! use bytes::Bytes;
//!
//! // Parsing incoming data
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (value, consumed) = parse_message(data).unwrap().unwrap();
//! assert_eq!(consumed, data.len());
//!
//! // Creating responses
//! let response = RespValue::bulk_string(Bytes::from("Ariz"));
//! assert_eq!(response.serialize(), b"$4\r\nAriz\r\n");
//! ```

pub mod parser;
pub mod snapshot;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{parse_message, ParseError, ParseResult, RespParser, StreamParser};
pub use snapshot::{decode_value, encode_value, SnapshotError};
pub use types::RespValue;
