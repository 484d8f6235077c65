//! In-Memory Storage Engine with Lazy Expiry
//!
//! This module implements the key space for tidekv. Every value is a
//! [`RespValue`], so strings, counters and lists share one map and operations
//! check the stored variant before touching it.
//!
//! ## Design Decisions
//!
//! 1. **Single Owner**: The engine lives inside the command processor and is
//!    only ever reached through `&mut self` from the reactor thread. No locks.
//! 2. **Lazy Expiry**: An entry whose deadline has been reached is invisible
//!    and is removed by the first operation that observes it. There is no
//!    background sweeper.
//! 3. **Wall Clock Deadlines**: Expiry times are [`SystemTime`] values so they
//!    survive a snapshot and a restart.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                StorageEngine                 │
//! │  HashMap<String, Entry>                      │
//! │    "name"    -> Bulk("Ariz"),   no expiry    │
//! │    "session" -> Bulk("tok"),    t + 3600s    │
//! │    "queue"   -> Array([a, b]),  no expiry    │
//! └──────────────────────────────────────────────┘
//! ```

use crate::protocol::RespValue;
use bytes::Bytes;
use std::collections::hash_map;
use std::collections::HashMap;
use std::time::SystemTime;
use thiserror::Error;

/// A stored value with optional expiry time.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// The actual value stored
    pub value: RespValue,
    /// When this entry expires (None = never expires)
    pub expires_at: Option<SystemTime>,
}

impl Entry {
    /// Creates a new entry.
    pub fn new(value: RespValue, expires_at: Option<SystemTime>) -> Self {
        Self { value, expires_at }
    }

    /// Checks if this entry has expired as of `now`.
    ///
    /// The deadline itself already counts as expired.
    #[inline]
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }

    /// Checks if this entry has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }
}

/// Why an increment could not be applied.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IncrError {
    #[error("cannot increment or decrement a non-string value")]
    NonBulkStringValue,

    #[error("value is nil")]
    NullBulkStringValue,

    #[error("value is not an integer or out of range")]
    NonNumericValue,

    #[error("increment or decrement would overflow")]
    Overflow,
}

/// A list operation found a value that is not a non-null array.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("operation against a key holding the wrong kind of value")]
pub struct WrongType;

/// The key space.
#[derive(Debug, Default)]
pub struct StorageEngine {
    data: HashMap<String, Entry>,
}

impl StorageEngine {
    /// Creates an empty storage engine.
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
        }
    }

    /// Looks up a live entry, removing it first if it has expired.
    fn live_entry(&mut self, key: &str) -> Option<&mut Entry> {
        let expired = self.data.get(key)?.is_expired();
        if expired {
            self.data.remove(key);
            return None;
        }
        self.data.get_mut(key)
    }

    /// Gets the value for a key.
    ///
    /// Returns `None` if the key is absent or expired.
    pub fn get(&mut self, key: &str) -> Option<&RespValue> {
        self.live_entry(key).map(|entry| &entry.value)
    }

    /// Sets a key, replacing any previous value and expiry.
    pub fn set(&mut self, key: String, value: RespValue, expires_at: Option<SystemTime>) {
        self.data.insert(key, Entry::new(value, expires_at));
    }

    /// Sets a key and returns the previous live value, if any.
    pub fn set_and_get(
        &mut self,
        key: String,
        value: RespValue,
        expires_at: Option<SystemTime>,
    ) -> Option<RespValue> {
        let previous = self.data.insert(key, Entry::new(value, expires_at))?;
        if previous.is_expired() {
            None
        } else {
            Some(previous.value)
        }
    }

    /// Checks if a key exists and has not expired.
    pub fn exists(&mut self, key: &str) -> bool {
        self.live_entry(key).is_some()
    }

    /// Deletes a key.
    ///
    /// Returns true only if a live entry was removed.
    pub fn del(&mut self, key: &str) -> bool {
        match self.data.remove(key) {
            Some(entry) => !entry.is_expired(),
            None => false,
        }
    }

    /// Removes every key.
    pub fn flush(&mut self) {
        self.data.clear();
    }

    /// Adds `amount` to the integer stored at `key`.
    ///
    /// A missing key counts as 0. The stored value must be a bulk string
    /// holding a base-10 `i64`. The result is stored back as decimal text and
    /// the entry keeps its expiry.
    pub fn incr(&mut self, key: &str, amount: i64) -> Result<i64, IncrError> {
        let Some(entry) = self.live_entry(key) else {
            self.data.insert(
                key.to_string(),
                Entry::new(decimal(amount), None),
            );
            return Ok(amount);
        };

        let current = match &entry.value {
            RespValue::BulkString(Some(data)) => {
                parse_integer(data).ok_or(IncrError::NonNumericValue)?
            }
            RespValue::BulkString(None) => return Err(IncrError::NullBulkStringValue),
            _ => return Err(IncrError::NonBulkStringValue),
        };

        let new_value = current.checked_add(amount).ok_or(IncrError::Overflow)?;
        entry.value = decimal(new_value);
        Ok(new_value)
    }

    /// Decrements the integer stored at `key` by one.
    pub fn decr(&mut self, key: &str) -> Result<i64, IncrError> {
        self.incr(key, -1)
    }

    /// Pushes values onto the list stored at `key`.
    ///
    /// With `reverse` each value is prepended in turn, so the last argument
    /// ends up first. Otherwise values are appended in order. A missing key
    /// starts a new list.
    ///
    /// # Returns
    ///
    /// The length of the list after the push.
    pub fn push(
        &mut self,
        key: &str,
        values: Vec<RespValue>,
        reverse: bool,
    ) -> Result<usize, WrongType> {
        let Some(entry) = self.live_entry(key) else {
            let mut list = values;
            if reverse {
                list.reverse();
            }
            let len = list.len();
            self.data
                .insert(key.to_string(), Entry::new(RespValue::array(list), None));
            return Ok(len);
        };

        let RespValue::Array(Some(list)) = &mut entry.value else {
            return Err(WrongType);
        };

        if reverse {
            let mut front = values;
            front.reverse();
            front.append(list);
            *list = front;
        } else {
            list.extend(values);
        }
        Ok(list.len())
    }

    /// Returns an inclusive slice of the list stored at `key`.
    ///
    /// Negative indices count from the end. If the list is empty or
    /// `stop < start` after that translation the result is empty, otherwise
    /// both bounds are clamped into the list.
    pub fn range(&mut self, key: &str, start: i64, stop: i64) -> Result<Vec<RespValue>, WrongType> {
        let Some(entry) = self.live_entry(key) else {
            return Ok(Vec::new());
        };
        let RespValue::Array(Some(list)) = &entry.value else {
            return Err(WrongType);
        };

        let len = list.len() as i64;
        let start = if start < 0 { len + start } else { start };
        let stop = if stop < 0 { len + stop } else { stop };

        if len == 0 || stop < start {
            return Ok(Vec::new());
        }

        let start = start.clamp(0, len - 1) as usize;
        let stop = stop.clamp(0, len - 1) as usize;
        Ok(list[start..=stop].to_vec())
    }

    /// Returns the raw number of entries.
    ///
    /// Expired entries that nothing has observed yet are still counted.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if there are no entries at all.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterates over entries that have not expired as of `now`.
    pub fn iter_live(&self, now: SystemTime) -> impl Iterator<Item = (&String, &Entry)> {
        self.data
            .iter()
            .filter(move |(_, entry)| !entry.is_expired_at(now))
    }

    /// Iterates over entries that have not expired.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Entry)> {
        self.iter_live(SystemTime::now())
    }

    /// Inserts a fully formed entry, as read back from a snapshot.
    pub fn insert_entry(&mut self, key: String, entry: Entry) {
        self.data.insert(key, entry);
    }
}

impl IntoIterator for StorageEngine {
    type Item = (String, Entry);
    type IntoIter = hash_map::IntoIter<String, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.into_iter()
    }
}

/// Parses the whole of `bytes` as a base-10 `i64`.
///
/// Only an optional `-` sign is allowed; a leading `+`, whitespace or any
/// trailing characters make the text non-numeric.
pub fn parse_integer(bytes: &[u8]) -> Option<i64> {
    if bytes.first() == Some(&b'+') {
        return None;
    }
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

fn decimal(n: i64) -> RespValue {
    RespValue::BulkString(Some(Bytes::from(n.to_string())))
}
