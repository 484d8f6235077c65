//! Binary Snapshot Encoding for RESP Values
//!
//! Unlike the wire format this encoding is length-prefixed throughout, so a
//! value can be decoded without scanning for terminators.
//!
//! ## Layout
//!
//! ```text
//! ┌────────────┬──────────────────────────────────────────────┐
//! │ tag (u64)  │ payload                                      │
//! ├────────────┼──────────────────────────────────────────────┤
//! │ 0 simple   │ len (i64) + UTF-8 bytes                      │
//! │ 1 error    │ len (i64) + prefix, len (i64) + message      │
//! │ 2 integer  │ i64                                          │
//! │ 3 bulk     │ len (i64) + bytes, len == -1 means null      │
//! │ 4 array    │ count (i64) + children, count == -1 is null  │
//! └────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian.

use crate::protocol::types::RespValue;
use bytes::{Buf, BufMut, Bytes};
use thiserror::Error;

const TAG_SIMPLE_STRING: u64 = 0;
const TAG_SIMPLE_ERROR: u64 = 1;
const TAG_INTEGER: u64 = 2;
const TAG_BULK_STRING: u64 = 3;
const TAG_ARRAY: u64 = 4;

/// Length marker for a null bulk string or null array.
const NULL_LENGTH: i64 = -1;

/// Errors produced while reading or writing a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The input ended in the middle of a value.
    #[error("snapshot truncated: needed {needed} more bytes")]
    Truncated { needed: usize },

    /// A value starts with a tag that names no variant.
    #[error("unknown value tag: {0}")]
    UnknownTag(u64),

    /// A length field is negative and not the null marker.
    #[error("invalid length: {0}")]
    InvalidLength(i64),

    /// Key, simple string or error text is not UTF-8.
    #[error("invalid UTF-8 in snapshot: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// The expiry flag byte was neither 0 nor 1.
    #[error("invalid expiry flag: {0}")]
    InvalidExpiryFlag(u8),

    /// Bytes were left over after the last entry.
    #[error("{0} trailing bytes after last entry")]
    TrailingBytes(usize),

    /// The snapshot file does not exist.
    #[error("snapshot file not found")]
    NotFound,

    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Appends the snapshot form of `value` to `buf`.
pub fn encode_value(value: &RespValue, buf: &mut impl BufMut) {
    match value {
        RespValue::SimpleString(s) => {
            buf.put_u64_le(TAG_SIMPLE_STRING);
            put_bytes(buf, s.as_bytes());
        }
        RespValue::SimpleError { prefix, message } => {
            buf.put_u64_le(TAG_SIMPLE_ERROR);
            put_bytes(buf, prefix.as_bytes());
            put_bytes(buf, message.as_bytes());
        }
        RespValue::Integer(n) => {
            buf.put_u64_le(TAG_INTEGER);
            buf.put_i64_le(*n);
        }
        RespValue::BulkString(data) => {
            buf.put_u64_le(TAG_BULK_STRING);
            match data {
                Some(data) => put_bytes(buf, data),
                None => buf.put_i64_le(NULL_LENGTH),
            }
        }
        RespValue::Array(values) => {
            buf.put_u64_le(TAG_ARRAY);
            match values {
                Some(values) => {
                    buf.put_i64_le(values.len() as i64);
                    for value in values {
                        encode_value(value, buf);
                    }
                }
                None => buf.put_i64_le(NULL_LENGTH),
            }
        }
    }
}

/// Reads one value from the front of `buf`, advancing it past the value.
pub fn decode_value(buf: &mut impl Buf) -> Result<RespValue, SnapshotError> {
    let tag = get_u64(buf)?;
    match tag {
        TAG_SIMPLE_STRING => Ok(RespValue::SimpleString(get_string(buf)?)),
        TAG_SIMPLE_ERROR => {
            let prefix = get_string(buf)?;
            let message = get_string(buf)?;
            Ok(RespValue::SimpleError { prefix, message })
        }
        TAG_INTEGER => Ok(RespValue::Integer(get_i64(buf)?)),
        TAG_BULK_STRING => Ok(RespValue::BulkString(get_nullable_bytes(buf)?)),
        TAG_ARRAY => {
            let count = get_i64(buf)?;
            if count == NULL_LENGTH {
                return Ok(RespValue::Array(None));
            }
            if count < 0 {
                return Err(SnapshotError::InvalidLength(count));
            }
            // Cap the reservation: each child needs at least its 8-byte tag.
            let mut values = Vec::with_capacity((count as usize).min(buf.remaining() / 8));
            for _ in 0..count {
                values.push(decode_value(buf)?);
            }
            Ok(RespValue::Array(Some(values)))
        }
        other => Err(SnapshotError::UnknownTag(other)),
    }
}

/// Writes an `i64` length followed by the raw bytes.
pub(crate) fn put_bytes(buf: &mut impl BufMut, data: &[u8]) {
    buf.put_i64_le(data.len() as i64);
    buf.put_slice(data);
}

fn ensure(buf: &impl Buf, needed: usize) -> Result<(), SnapshotError> {
    if buf.remaining() < needed {
        return Err(SnapshotError::Truncated {
            needed: needed - buf.remaining(),
        });
    }
    Ok(())
}

pub(crate) fn get_u8(buf: &mut impl Buf) -> Result<u8, SnapshotError> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

pub(crate) fn get_u64(buf: &mut impl Buf) -> Result<u64, SnapshotError> {
    ensure(buf, 8)?;
    Ok(buf.get_u64_le())
}

pub(crate) fn get_i64(buf: &mut impl Buf) -> Result<i64, SnapshotError> {
    ensure(buf, 8)?;
    Ok(buf.get_i64_le())
}

fn get_nullable_bytes(buf: &mut impl Buf) -> Result<Option<Bytes>, SnapshotError> {
    let len = get_i64(buf)?;
    if len == NULL_LENGTH {
        return Ok(None);
    }
    if len < 0 {
        return Err(SnapshotError::InvalidLength(len));
    }
    let len = len as usize;
    ensure(buf, len)?;
    Ok(Some(buf.copy_to_bytes(len)))
}

/// Reads a length-prefixed UTF-8 string. The null marker is rejected.
pub(crate) fn get_string(buf: &mut impl Buf) -> Result<String, SnapshotError> {
    match get_nullable_bytes(buf)? {
        Some(bytes) => Ok(String::from_utf8(bytes.to_vec())?),
        None => Err(SnapshotError::InvalidLength(NULL_LENGTH)),
    }
}
