//! # TideKV
//!
//! A small in-memory key-value server that speaks the RESP protocol, driven
//! by a single-threaded readiness reactor.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          TideKV Server                              │
//! │                                                                     │
//! │ ┌──────────┐  accept  ┌───────────────────┐  RespValue  ┌─────────┐ │
//! │ │ Acceptor │─────────>│ ConnectionHandler │────────────>│ Command │ │
//! │ └──────────┘          │  StreamParser     │<────────────│ Handler │ │
//! │      ▲                │  write buffer     │    reply    └────┬────┘ │
//! │      │                └───────────────────┘                  │      │
//! │      │ readiness              ▲                              ▼      │
//! │ ┌────┴───────────────────────┴────┐                  ┌───────────┐  │
//! │ │          Reactor (mio)          │                  │  Storage  │  │
//! │ │   Token -> Box<dyn Handler>     │                  │  Engine   │  │
//! │ └─────────────────────────────────┘                  └─────┬─────┘  │
//! │                                                            │        │
//! │                                               SAVE / exit  ▼        │
//! │                                                      ┌───────────┐  │
//! │                                                      │ dump.tkv  │  │
//! │                                                      └───────────┘  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything except the Ctrl+C listener runs on one thread. Handlers get
//! the command processor by `&mut` for each callback, so the store needs no
//! locking.
//!
//! ## Supported Commands
//!
//! - `SET key value [NX | XX] [GET] [EX s | PX ms | EXAT ts | PXAT ts-ms]`
//! - `GET key`
//! - `DEL key [key ...]` / `EXISTS key [key ...]`
//! - `INCR` / `INCRBY` / `DECR` / `DECRBY`
//! - `LPUSH` / `RPUSH key value [value ...]`
//! - `LRANGE key start stop`
//! - `PING [message]` / `ECHO message`
//! - `DBSIZE` / `FLUSHDB` / `SAVE`
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP values, the streaming parser and the snapshot codec
//! - [`storage`]: The key space with lazy expiry, plus save and load
//! - [`commands`]: Command dispatch on top of the store
//! - [`connection`]: Per-client buffering and the [`connection::Processor`] seam
//! - [`reactor`]: The mio event loop and its handler table
//! - [`server`]: Listener setup and the accept loop

pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod reactor;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use config::Config;
pub use error::ServerError;
pub use protocol::{ParseError, RespValue, StreamParser};
pub use server::Server;
pub use storage::StorageEngine;

/// Version of TideKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
