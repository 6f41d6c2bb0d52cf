//! # Numeraria - A Command Usage Telemetry Daemon
//!
//! Numeraria counts how often commands are used. Clients send small binary
//! frames over TCP, a Unix socket or standard input; every `RECORD` bumps a
//! counter in an embedded SQLite table keyed by a hash of the command and its
//! arguments, and `STATS` or raw `SQL` frames read the counts back as framed
//! row streams.
//!
//! ## Architecture
//!
//! ```text
//!  ┌─────────────┐      ┌────────────────────────────────────────────┐
//!  │  Listener   │─────>│            Reactor (one future)            │
//!  │ TCP / Unix  │      │                                            │
//!  └─────────────┘      │  ConnectionTable ───> ClientConnection     │
//!  ┌─────────────┐      │                            │ Command       │
//!  │   Signal    │─────>│                            ▼               │
//!  │   Bridge    │      │                      CommandHandler        │
//!  └─────────────┘      └────────────────────────────┬───────────────┘
//!                                                    │
//!                                                    ▼
//!                                          StatsStore (SQLite)
//! ```
//!
//! Everything runs on a single-threaded tokio runtime. The reactor waits on
//! all endpoints at once and handles the ready ones in table order, so the
//! store is never shared and no locking is needed.
//!
//! ## Quick Start
//!
//! ```ignore
//! use numeraria::config::Config;
//! use numeraria::server::{self, BindTarget};
//!
//! let config = Config {
//!     bind: Some(BindTarget::Unix("/run/numeraria.sock".into())),
//!     ..Config::default()
//! };
//! let shutdown = server::run(config).await?;
//! std::process::exit(shutdown.exit_code().into());
//! ```
//!
//! ## Commands
//!
//! - `EXIT` - stop the daemon, no response
//! - `SQL text` - run arbitrary SQL, respond with its rows
//! - `RECORD args...` - count one invocation, respond with a status byte
//! - `STATS` - respond with `count, cmd, arg0` for every recorded command
//!
//! ## Module Overview
//!
//! - [`protocol`]: Frame format, encoder and incremental decoders
//! - [`storage`]: Command hash and the SQLite stats store
//! - [`commands`]: Command execution
//! - [`connection`]: Client endpoints and the connection table
//! - [`server`]: Listener, signal bridge, event loop and startup wiring
//! - [`client`]: Async client for the protocol
//! - [`config`]: Command-line configuration

pub mod client;
pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use client::{Client, ClientError};
pub use commands::CommandHandler;
pub use config::Config;
pub use protocol::{Command, FrameError, FrameParser, Record, Row};
pub use server::{Reactor, Shutdown};
pub use storage::{command_hash, StatsStore};

/// Version of Numeraria
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
