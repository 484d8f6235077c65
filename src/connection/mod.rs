//! Connection Handler Module
//!
//! This module manages individual client connections. Every connection lives
//! in the reactor's handler table and is driven by readiness events on the
//! single event-loop thread.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Acceptor                                │
//! │                 (server::acceptor)                          │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ register + Context::add
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ Read bytes  │───>│ StreamParser│───>│  Processor  │      │
//! │  └─────────────┘    └─────────────┘    └─────────────┘      │
//! │                                               │             │
//! │                                               ▼             │
//! │                                      ┌─────────────┐        │
//! │                                      │ Write buffer│        │
//! │                                      └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Non-blocking I/O**: Reads and writes stop at `WouldBlock`
//! - **Pipelining**: Supports multiple commands in a single TCP packet
//! - **Backpressure**: Unsent replies stay buffered until the socket is writable

pub mod handler;

// Re-export commonly used types
pub use handler::{Connection, ConnectionError, ConnectionHandler, Processor, READ_BUFFER_SIZE};
