//! Command Handler Module
//!
//! This module executes decoded commands against the stats store and writes
//! their responses.
//!
//! ## Architecture
//!
//! ```text
//! Client bytes
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  FrameParser    │  (protocol module)
//! └────────┬────────┘
//!          │ Command
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  StatsStore     │  (storage module)
//! └─────────────────┘
//! ```

pub mod handler;

// Re-export the main command handler
pub use handler::{CommandError, CommandHandler, Outcome};
