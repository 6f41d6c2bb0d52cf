//! Stats Storage Module
//!
//! This module owns the durable side of the daemon: a single SQLite table of
//! recorded command invocations and the hash that keys it.
//!
//! ## Schema
//!
//! ```text
//! numeraria_stats_cmd
//! ┌──────────────────────┬──────┬──────┬──────┬───────┐
//! │ hash (primary key)   │ cmd  │ arg0 │ arg1 │ count │
//! └──────────────────────┴──────┴──────┴──────┴───────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use numeraria::protocol::Record;
//! use numeraria::storage::{command_hash, StatsStore};
//!
//! let store = StatsStore::open_in_memory().unwrap();
//! let record = Record::new(["help"]).unwrap();
//! let hash = command_hash(record.raw());
//!
//! store.upsert_increment(hash, Some("help"), None, None).unwrap();
//! let count = store.upsert_increment(hash, Some("help"), None, None).unwrap();
//! assert_eq!(count, 2);
//! ```

pub mod hash;
pub mod store;

// Re-export commonly used types
pub use hash::{command_hash, CommandHasher};
pub use store::{DbLocation, StatsStore, StoreError, STATS_QUERY};
