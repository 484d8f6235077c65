//! Storage Engine Module
//!
//! This module provides the key space for tidekv and its snapshot file.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              StorageEngine               │
//! │   HashMap<String, Entry>                 │
//! │   Entry = RespValue + Option<SystemTime> │
//! └────────────────────┬─────────────────────┘
//!                      │ save / load
//!                      ▼
//!              ┌───────────────┐
//!              │  dump.tkv     │
//!              └───────────────┘
//! ```
//!
//! ## Features
//!
//! - **Typed Values**: Any RESP value can be stored; operations check the kind
//! - **TTL Support**: Keys can carry a wall clock deadline
//! - **Lazy Expiry**: Expired keys are removed when an operation observes them
//! - **Snapshots**: The whole store can be written to and read from one file
//!
//! ## Example
//!
//! ```
//! use tidekv::protocol::RespValue;
//! use tidekv::storage::StorageEngine;
//! use bytes::Bytes;
//! use std::time::{Duration, SystemTime};
//!
//! let mut engine = StorageEngine::new();
//!
//! // Basic operations
//! engine.set("name".into(), RespValue::bulk_string(Bytes::from("Ariz")), None);
//! assert_eq!(
//!     engine.get("name"),
//!     Some(&RespValue::bulk_string(Bytes::from("Ariz")))
//! );
//!
//! // Set with a deadline
//! engine.set(
//!     "session".into(),
//!     RespValue::bulk_string(Bytes::from("token123")),
//!     Some(SystemTime::now() + Duration::from_secs(3600)),
//! );
//! assert!(engine.exists("session"));
//! ```

pub mod engine;
pub mod snapshot;

// Re-export commonly used types
pub use engine::{parse_integer, Entry, IncrError, StorageEngine, WrongType};
pub use snapshot::unix_nanos;
