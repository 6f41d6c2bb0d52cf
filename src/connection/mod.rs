//! Connection Module
//!
//! This module holds the per-client state and the table the reactor keeps all
//! its endpoints in.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  ConnectionTable (fixed size)               │
//! │                                                             │
//! │  [ listener | input ] [ signal ] [ client ] [ client ] ...  │
//! └──────────────────────────────────┬──────────────────────────┘
//!                                    │ ready
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ClientConnection                         │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ Read bytes  │───>│ Parse frame │───>│ Execute cmd │      │
//! │  └─────────────┘    └─────────────┘    └─────────────┘      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Bounded**: the table refuses new entries once full, so the reactor
//!   stops accepting until a client leaves
//! - **Buffer Management**: Efficient BytesMut buffer for incoming data
//! - **Pipelining**: Supports multiple frames in a single read
//! - **Statistics**: Tracks connection and command counts

pub mod handler;
pub mod table;

// Re-export commonly used types
pub use handler::{ClientConnection, ConnectionError, ConnectionStats, Origin};
pub use table::{ConnectionTable, ReadyCursor, Slot, TableFull, DEFAULT_CAPACITY};
