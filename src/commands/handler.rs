//! Command Handler Module
//!
//! This module implements the commands understood by tidekv. It receives
//! decoded RESP arrays, validates them and dispatches to one handler per
//! command.
//!
//! ## Supported Commands
//!
//! ### String Commands
//! - `SET key value [NX|XX] [GET] [EX s|PX ms|EXAT unix-s|PXAT unix-ms]` - Set a key
//! - `GET key` - Get a key's value
//! - `DEL key [key ...]` - Delete keys
//! - `EXISTS key [key ...]` - Count existing keys
//! - `INCR key` - Increment integer
//! - `INCRBY key increment` - Increment by amount
//! - `DECR key` - Decrement integer
//! - `DECRBY key decrement` - Decrement by amount
//!
//! ### List Commands
//! - `LPUSH key value [value ...]` - Push values to the head of a list
//! - `RPUSH key value [value ...]` - Push values to the tail of a list
//! - `LRANGE key start stop` - Get a range of elements
//!
//! ### Server Commands
//! - `PING [message]` - Test connection
//! - `ECHO message` - Echo message
//! - `DBSIZE` - Number of keys
//! - `FLUSHDB` - Clear database
//! - `SAVE` - Write a snapshot to the configured dump file
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │  validate   │───>│  dispatch() │───>│  cmd_xxx()  │      │
//! │  └─────────────┘    └─────────────┘    └─────────────┘      │
//! │                                               │             │
//! │                                               ▼             │
//! │                                      StorageEngine          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::connection::Processor;
use crate::protocol::RespValue;
use crate::storage::{parse_integer, unix_nanos, IncrError, StorageEngine};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

/// Executes commands against the storage engine it owns.
#[derive(Debug)]
pub struct CommandHandler {
    /// The storage engine
    storage: StorageEngine,
    /// Where SAVE writes the snapshot
    dump_path: PathBuf,
    /// Requests answered so far
    commands_processed: u64,
}

impl CommandHandler {
    /// Creates a new command handler with the given storage engine.
    pub fn new(storage: StorageEngine, dump_path: impl Into<PathBuf>) -> Self {
        Self {
            storage,
            dump_path: dump_path.into(),
            commands_processed: 0,
        }
    }

    pub fn storage(&self) -> &StorageEngine {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut StorageEngine {
        &mut self.storage
    }

    /// Gives the storage engine back, e.g. to snapshot it at shutdown.
    pub fn into_storage(self) -> StorageEngine {
        self.storage
    }

    pub fn commands_processed(&self) -> u64 {
        self.commands_processed
    }

    /// Executes a command and returns the response.
    ///
    /// # Arguments
    ///
    /// * `command` - The parsed RESP value (should be an array of bulk strings)
    ///
    /// # Returns
    ///
    /// The RESP response to send back to the client. Every request gets exactly
    /// one response, errors included.
    pub fn execute(&mut self, command: RespValue) -> RespValue {
        self.commands_processed += 1;

        let args = match command {
            RespValue::Array(Some(args)) if !args.is_empty() => args,
            RespValue::Array(_) => {
                return RespValue::err("Protocol error: invalid multibulk length");
            }
            other => {
                debug!(kind = other.kind(), "Rejected non-array request");
                return RespValue::err("Protocol error: expected array of bulk strings");
            }
        };

        if args.iter().any(|arg| arg.as_bytes().is_none()) {
            return RespValue::err("Protocol error: expected non-null bulk string arguments");
        }

        let cmd_name = match args[0].as_bytes() {
            Some(name) => String::from_utf8_lossy(name).to_ascii_uppercase(),
            None => return RespValue::err("Protocol error: missing command name"),
        };

        trace!(command = %cmd_name, args = args.len() - 1, "Dispatching");
        self.dispatch(&cmd_name, &args[1..])
    }

    /// Dispatches a command to its handler.
    fn dispatch(&mut self, cmd: &str, args: &[RespValue]) -> RespValue {
        match cmd {
            // String commands
            "SET" => self.cmd_set(args),
            "GET" => self.cmd_get(args),
            "DEL" => self.cmd_del(args),
            "EXISTS" => self.cmd_exists(args),
            "INCR" => self.cmd_incr(args),
            "INCRBY" => self.cmd_incrby(args),
            "DECR" => self.cmd_decr(args),
            "DECRBY" => self.cmd_decrby(args),

            // List commands
            "LPUSH" => self.cmd_push(args, "LPUSH", true),
            "RPUSH" => self.cmd_push(args, "RPUSH", false),
            "LRANGE" => self.cmd_lrange(args),

            // Server commands
            "PING" => self.cmd_ping(args),
            "ECHO" => self.cmd_echo(args),
            "DBSIZE" => self.cmd_dbsize(args),
            "FLUSHDB" => self.cmd_flushdb(args),
            "SAVE" => self.cmd_save(args),

            // Unknown command
            _ => RespValue::err(format!("unknown command '{}'", cmd)),
        }
    }

    // ========================================================================
    // Helper functions
    // ========================================================================

    fn wrong_args(cmd: &str) -> RespValue {
        RespValue::err(format!("wrong number of arguments for '{}' command", cmd))
    }

    /// Extracts a key. Keys are UTF-8 text.
    fn get_key(value: &RespValue) -> Option<String> {
        value
            .as_bytes()
            .and_then(|b| std::str::from_utf8(b).ok())
            .map(str::to_string)
    }

    /// Extracts a base-10 integer argument.
    fn get_integer(value: &RespValue) -> Option<i64> {
        value.as_bytes().and_then(|b| parse_integer(b))
    }

    fn invalid_key() -> RespValue {
        RespValue::err("key must be valid UTF-8")
    }

    fn not_an_integer() -> RespValue {
        RespValue::err("value is not an integer or out of range")
    }

    fn incr_error(e: IncrError) -> RespValue {
        RespValue::err(e.to_string())
    }

    // ========================================================================
    // String Commands
    // ========================================================================

    /// SET key value [NX|XX] [GET] [EX seconds|PX milliseconds|EXAT unix-seconds|PXAT unix-milliseconds]
    fn cmd_set(&mut self, args: &[RespValue]) -> RespValue {
        if args.len() < 2 {
            return Self::wrong_args("SET");
        }

        let key = match Self::get_key(&args[0]) {
            Some(k) => k,
            None => return Self::invalid_key(),
        };

        // Parse optional arguments
        let mut nx = false; // Only set if not exists
        let mut xx = false; // Only set if exists
        let mut get = false; // Return old value
        let mut expires_at: Option<SystemTime> = None;

        let mut i = 2;
        while i < args.len() {
            let opt = match args[i].as_bytes() {
                Some(b) => String::from_utf8_lossy(b).to_ascii_uppercase(),
                None => return RespValue::syntax_error(),
            };

            match opt.as_str() {
                "NX" if !xx => nx = true,
                "XX" if !nx => xx = true,
                "GET" => get = true,
                "EX" | "PX" | "EXAT" | "PXAT" => {
                    if expires_at.is_some() || i + 1 >= args.len() {
                        return RespValue::syntax_error();
                    }
                    i += 1;
                    let amount = match Self::get_integer(&args[i]) {
                        Some(n) if n > 0 => n as u64,
                        _ => return RespValue::syntax_error(),
                    };
                    expires_at = match deadline(&opt, amount) {
                        Some(at) => Some(at),
                        None => return RespValue::syntax_error(),
                    };
                }
                _ => return RespValue::syntax_error(),
            }
            i += 1;
        }

        // Handle NX/XX conditions
        let exists = self.storage.exists(&key);
        if (nx && exists) || (xx && !exists) {
            return RespValue::null();
        }

        let value = args[1].clone();
        if get {
            return match self.storage.set_and_get(key, value, expires_at) {
                Some(old) if matches!(old, RespValue::BulkString(_)) => old,
                _ => RespValue::null(),
            };
        }

        self.storage.set(key, value, expires_at);
        RespValue::ok()
    }

    /// GET key
    fn cmd_get(&mut self, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return Self::wrong_args("GET");
        }

        let key = match Self::get_key(&args[0]) {
            Some(k) => k,
            None => return Self::invalid_key(),
        };

        match self.storage.get(&key) {
            Some(value) if matches!(value, RespValue::BulkString(_)) => value.clone(),
            Some(_) => RespValue::err("cannot get non-string type"),
            None => RespValue::null(),
        }
    }

    /// DEL key [key ...]
    fn cmd_del(&mut self, args: &[RespValue]) -> RespValue {
        if args.is_empty() {
            return Self::wrong_args("DEL");
        }

        let deleted = args
            .iter()
            .filter_map(Self::get_key)
            .filter(|key| self.storage.del(key))
            .count();
        RespValue::integer(deleted as i64)
    }

    /// EXISTS key [key ...]
    fn cmd_exists(&mut self, args: &[RespValue]) -> RespValue {
        if args.is_empty() {
            return Self::wrong_args("EXISTS");
        }

        let count = args
            .iter()
            .filter_map(Self::get_key)
            .filter(|key| self.storage.exists(key))
            .count();
        RespValue::integer(count as i64)
    }

    fn incr_by(&mut self, args: &[RespValue], amount: i64) -> RespValue {
        let key = match Self::get_key(&args[0]) {
            Some(k) => k,
            None => return Self::invalid_key(),
        };

        match self.storage.incr(&key, amount) {
            Ok(n) => RespValue::integer(n),
            Err(e) => Self::incr_error(e),
        }
    }

    /// INCR key
    fn cmd_incr(&mut self, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return Self::wrong_args("INCR");
        }
        self.incr_by(args, 1)
    }

    /// INCRBY key increment
    fn cmd_incrby(&mut self, args: &[RespValue]) -> RespValue {
        if args.len() != 2 {
            return Self::wrong_args("INCRBY");
        }

        match Self::get_integer(&args[1]) {
            Some(delta) => self.incr_by(args, delta),
            None => Self::not_an_integer(),
        }
    }

    /// DECR key
    fn cmd_decr(&mut self, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return Self::wrong_args("DECR");
        }
        self.incr_by(args, -1)
    }

    /// DECRBY key decrement
    fn cmd_decrby(&mut self, args: &[RespValue]) -> RespValue {
        if args.len() != 2 {
            return Self::wrong_args("DECRBY");
        }

        let delta = match Self::get_integer(&args[1]) {
            Some(d) => d,
            None => return Self::not_an_integer(),
        };

        match delta.checked_neg() {
            Some(amount) => self.incr_by(args, amount),
            None => Self::incr_error(IncrError::Overflow),
        }
    }

    // ========================================================================
    // List Commands
    // ========================================================================

    /// LPUSH key value [value ...] / RPUSH key value [value ...]
    fn cmd_push(&mut self, args: &[RespValue], cmd: &str, reverse: bool) -> RespValue {
        if args.len() < 2 {
            return Self::wrong_args(cmd);
        }

        let key = match Self::get_key(&args[0]) {
            Some(k) => k,
            None => return Self::invalid_key(),
        };

        match self.storage.push(&key, args[1..].to_vec(), reverse) {
            Ok(len) => RespValue::integer(len as i64),
            Err(_) => RespValue::err("cannot push to non-array value"),
        }
    }

    /// LRANGE key start stop
    fn cmd_lrange(&mut self, args: &[RespValue]) -> RespValue {
        if args.len() != 3 {
            return Self::wrong_args("LRANGE");
        }

        let key = match Self::get_key(&args[0]) {
            Some(k) => k,
            None => return Self::invalid_key(),
        };

        let (start, stop) = match (Self::get_integer(&args[1]), Self::get_integer(&args[2])) {
            (Some(start), Some(stop)) => (start, stop),
            _ => return Self::not_an_integer(),
        };

        match self.storage.range(&key, start, stop) {
            Ok(values) => RespValue::array(values),
            Err(_) => RespValue::err("cannot get range of non-array type"),
        }
    }

    // ========================================================================
    // Server Commands
    // ========================================================================

    /// PING [message]
    fn cmd_ping(&mut self, args: &[RespValue]) -> RespValue {
        match args {
            [] => RespValue::pong(),
            [message] => message.clone(),
            _ => Self::wrong_args("PING"),
        }
    }

    /// ECHO message
    fn cmd_echo(&mut self, args: &[RespValue]) -> RespValue {
        match args {
            [message] => message.clone(),
            _ => Self::wrong_args("ECHO"),
        }
    }

    /// DBSIZE
    fn cmd_dbsize(&mut self, args: &[RespValue]) -> RespValue {
        if !args.is_empty() {
            return Self::wrong_args("DBSIZE");
        }
        RespValue::integer(self.storage.iter().count() as i64)
    }

    /// FLUSHDB [ASYNC|SYNC]
    fn cmd_flushdb(&mut self, args: &[RespValue]) -> RespValue {
        if args.len() > 1 {
            return Self::wrong_args("FLUSHDB");
        }
        self.storage.flush();
        RespValue::ok()
    }

    /// SAVE
    fn cmd_save(&mut self, args: &[RespValue]) -> RespValue {
        if !args.is_empty() {
            return Self::wrong_args("SAVE");
        }

        match self.storage.save(&self.dump_path) {
            Ok(()) => RespValue::ok(),
            Err(e) => {
                debug!(path = %self.dump_path.display(), error = %e, "SAVE failed");
                RespValue::err(e.to_string())
            }
        }
    }
}

impl Processor for CommandHandler {
    fn process(&mut self, request: RespValue) -> RespValue {
        self.execute(request)
    }
}

/// Turns a SET expiry option and its positive argument into a deadline.
///
/// Deadlines a snapshot could not store are rejected.
fn deadline(option: &str, amount: u64) -> Option<SystemTime> {
    let at = match option {
        "EX" => SystemTime::now().checked_add(Duration::from_secs(amount)),
        "PX" => SystemTime::now().checked_add(Duration::from_millis(amount)),
        "EXAT" => UNIX_EPOCH.checked_add(Duration::from_secs(amount)),
        "PXAT" => UNIX_EPOCH.checked_add(Duration::from_millis(amount)),
        _ => None,
    }?;
    unix_nanos(at).map(|_| at)
}
