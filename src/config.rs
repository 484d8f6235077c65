//! Server configuration.
//!
//! Everything the server needs to start lives here, with defaults that match
//! a stock local Redis setup. The binary fills it from command-line flags.

use crate::protocol::parser::DEFAULT_BUFFER_LIMIT;
use crate::reactor::DEFAULT_EVENT_CAPACITY;
use std::path::PathBuf;

/// Default snapshot file name.
pub const DEFAULT_DUMP_FILE: &str = "dump.tkv";

/// Main configuration for a tidekv instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// Host to bind to
    pub host: String,

    /// Port to listen on (0 picks a free port)
    pub port: u16,

    /// Events fetched per reactor poll
    pub event_capacity: usize,

    /// Consumed bytes a connection parser keeps before compacting
    pub parser_buffer_limit: usize,

    // -------------------------------------------------------------------------
    // Persistence Configuration
    // -------------------------------------------------------------------------
    /// Snapshot file read at startup and written by SAVE and at shutdown
    pub dump_path: PathBuf,

    /// Whether to read the snapshot at startup
    pub load_snapshot: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            parser_buffer_limit: DEFAULT_BUFFER_LIMIT,
            dump_path: PathBuf::from(DEFAULT_DUMP_FILE),
            load_snapshot: true,
        }
    }
}

impl Config {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
