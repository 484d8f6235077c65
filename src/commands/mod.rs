//! Command Handler Module
//!
//! This module implements the command processing layer for tidekv.
//! It receives decoded RESP requests, executes them against the storage engine,
//! and returns one response per request.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  StreamParser   │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module, a connection::Processor)
//! │                 │
//! │  - Validate     │
//! │  - Dispatch     │
//! │  - Execute      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ StorageEngine   │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! ### String Commands
//! - `SET`, `GET`, `DEL`, `EXISTS`
//! - `INCR`, `INCRBY`, `DECR`, `DECRBY`
//!
//! ### List Commands
//! - `LPUSH`, `RPUSH`, `LRANGE`
//!
//! ### Server Commands
//! - `PING`, `ECHO`, `DBSIZE`, `FLUSHDB`, `SAVE`

pub mod handler;

// Re-export the main command handler
pub use handler::CommandHandler;
