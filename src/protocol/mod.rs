//! Numeraria Frame Protocol
//!
//! This module implements the small binary protocol spoken between the daemon
//! and its clients: fixed 5-byte command headers, command-specific payloads, and
//! length-prefixed row streams for query results.
//!
//! ## Modules
//!
//! - `types`: Command, header, record and row definitions plus encoding
//! - `parser`: Incremental decoders for command frames and row streams
//!
//! ## Example
//!
//! ```
//! use numeraria::protocol::{parse_frame, Command, Record};
//!
//! let record = Record::new(["help"]).unwrap();
//! let bytes = Command::Record(record.clone()).serialize();
//!
//! let (parsed, consumed) = parse_frame(&bytes).unwrap().unwrap();
//! assert_eq!(parsed, Command::Record(record));
//! assert_eq!(consumed, bytes.len());
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{parse_frame, FrameError, FrameParser, ParseResult, RowFrame, RowParser};
pub use types::{Command, CommandKind, FrameHeader, Record, Row, MAX_PAYLOAD, MAX_RECORD_ARGS};
