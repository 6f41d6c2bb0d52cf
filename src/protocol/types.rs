//! Numeraria Wire Types
//!
//! This module defines the frames exchanged between clients and the daemon.
//! Every multi-byte integer on the wire is little-endian with a fixed width,
//! so the format does not depend on the host's word size.
//!
//! ## Protocol Format
//!
//! ```text
//! Header:  { len: u32, kind: u8 }
//! kind ∈ { EXIT=1, SQL=2, RECORD=3, STATS=4 }
//!
//! EXIT    payload: (none)                          response: (none)
//! SQL     payload: <len> bytes of query text       response: row-stream
//! STATS   payload: (none)                          response: row-stream
//! RECORD  payload: argCount:u64,
//!                  (argLen:u64, argLen bytes){argCount}
//!                                                  response: 1 status byte
//!
//! row-stream := (row)* zero-row
//! row        := nCols:u64, (colLen:u64, colLen bytes){nCols}
//! zero-row   := nCols:u64 == 0
//! ```

use crate::protocol::parser::FrameError;
use bytes::{BufMut, Bytes};
use std::fmt;

/// Maximum size of a frame payload.
pub const MAX_PAYLOAD: usize = 1024;

/// Size of the fixed frame header (`len` + `kind`).
pub const HEADER_SIZE: usize = 5;

/// Maximum number of arguments in a RECORD payload.
pub const MAX_RECORD_ARGS: usize = 2;

/// Width of the count and length prefixes inside payloads and row streams.
pub const PREFIX_SIZE: usize = 8;

/// Status bytes sent in response to RECORD.
pub mod status {
    pub const OK: u8 = 0;
    pub const FAILED: u8 = 1;
}

/// The kind byte of a frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandKind {
    Exit = 1,
    Sql = 2,
    Record = 3,
    Stats = 4,
}

impl CommandKind {
    /// Returns the byte used for this kind on the wire.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for CommandKind {
    type Error = FrameError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            1 => Ok(CommandKind::Exit),
            2 => Ok(CommandKind::Sql),
            3 => Ok(CommandKind::Record),
            4 => Ok(CommandKind::Stats),
            other => Err(FrameError::UnknownKind(other)),
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandKind::Exit => "EXIT",
            CommandKind::Sql => "SQL",
            CommandKind::Record => "RECORD",
            CommandKind::Stats => "STATS",
        };
        f.write_str(name)
    }
}

/// The fixed header preceding every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Length of the payload that follows.
    pub len: u32,
    /// Raw kind byte, validated separately from the length.
    pub kind: u8,
}

impl FrameHeader {
    /// Decodes a header from exactly [`HEADER_SIZE`] bytes.
    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Self {
        let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        Self {
            len,
            kind: bytes[4],
        }
    }

    /// Appends the header in wire order.
    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.len);
        buf.put_u8(self.kind);
    }
}

/// The arguments of a RECORD command together with their exact wire encoding.
///
/// The encoding is kept because the stats row key is a hash of those bytes:
/// two byte-identical payloads must always land on the same row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    args: Vec<Bytes>,
    raw: Bytes,
}

impl Record {
    /// Builds a record from its arguments, refusing anything the daemon would reject.
    pub fn new<I, A>(args: I) -> Result<Self, FrameError>
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
    {
        let args: Vec<Bytes> = args.into_iter().map(Into::into).collect();
        if args.len() > MAX_RECORD_ARGS {
            return Err(FrameError::TooManyArgs {
                count: args.len() as u64,
                max: MAX_RECORD_ARGS,
            });
        }

        let size = PREFIX_SIZE + args.iter().map(|a| PREFIX_SIZE + a.len()).sum::<usize>();
        if size > MAX_PAYLOAD {
            return Err(FrameError::FrameTooLarge {
                size,
                max: MAX_PAYLOAD,
            });
        }

        let mut raw = Vec::with_capacity(size);
        raw.put_u64_le(args.len() as u64);
        for arg in &args {
            raw.put_u64_le(arg.len() as u64);
            raw.put_slice(arg);
        }

        Ok(Self {
            args,
            raw: Bytes::from(raw),
        })
    }

    /// Used by the parser once the payload has been validated.
    pub(crate) fn from_parts(args: Vec<Bytes>, raw: Bytes) -> Self {
        Self { args, raw }
    }

    /// The decoded arguments, in order.
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// The payload exactly as it travels on the wire.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Argument `index` as text, if present.
    pub fn arg_str(&self, index: usize) -> Option<std::borrow::Cow<'_, str>> {
        self.args.get(index).map(|a| String::from_utf8_lossy(a))
    }
}

/// A decoded client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask the daemon to stop after the current wakeup.
    Exit,
    /// Run arbitrary SQL text and stream the rows back.
    Sql(Bytes),
    /// Count one invocation of a command.
    Record(Record),
    /// Run the canned stats query.
    Stats,
}

impl Command {
    /// Creates a SQL command.
    ///
    /// # Example
    /// ```
    /// use numeraria::protocol::types::Command;
    /// let cmd = Command::sql("select 1;");
    /// assert_eq!(cmd.serialize()[4], 2);
    /// ```
    pub fn sql(text: impl Into<Bytes>) -> Self {
        Command::Sql(text.into())
    }

    /// The wire kind of this command.
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Exit => CommandKind::Exit,
            Command::Sql(_) => CommandKind::Sql,
            Command::Record(_) => CommandKind::Record,
            Command::Stats => CommandKind::Stats,
        }
    }

    fn payload(&self) -> &[u8] {
        match self {
            Command::Exit | Command::Stats => &[],
            Command::Sql(text) => text,
            Command::Record(record) => record.raw(),
        }
    }

    /// Serializes the command to bytes for sending over the wire.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload().len());
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the command into an existing buffer.
    ///
    /// SQL text longer than [`MAX_PAYLOAD`] is encoded as-is; the daemon will
    /// refuse it, which is what the oversized-frame tests rely on.
    pub fn serialize_into<B: BufMut>(&self, buf: &mut B) {
        let payload = self.payload();
        FrameHeader {
            len: payload.len() as u32,
            kind: self.kind().as_byte(),
        }
        .encode_into(buf);
        buf.put_slice(payload);
    }
}

/// One row of a query response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    columns: Vec<Bytes>,
}

impl Row {
    /// Creates a row from its column values.
    pub fn new(columns: Vec<Bytes>) -> Self {
        Self { columns }
    }

    /// Raw column values.
    pub fn columns(&self) -> &[Bytes] {
        &self.columns
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column `index` as text, if present and valid UTF-8.
    pub fn column_str(&self, index: usize) -> Option<&str> {
        self.columns
            .get(index)
            .and_then(|c| std::str::from_utf8(c).ok())
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            f.write_str(&String::from_utf8_lossy(column))?;
        }
        Ok(())
    }
}

/// Appends the column-count prefix of a row.
pub fn encode_row_start<B: BufMut>(columns: usize, buf: &mut B) {
    buf.put_u64_le(columns as u64);
}

/// Appends one length-prefixed column.
pub fn encode_column<B: BufMut>(column: &[u8], buf: &mut B) {
    buf.put_u64_le(column.len() as u64);
    buf.put_slice(column);
}

/// Appends a complete row.
pub fn encode_row<B: BufMut, C: AsRef<[u8]>>(columns: &[C], buf: &mut B) {
    encode_row_start(columns.len(), buf);
    for column in columns {
        encode_column(column.as_ref(), buf);
    }
}

/// Appends the zero-column frame that ends a row stream.
pub fn encode_row_end<B: BufMut>(buf: &mut B) {
    buf.put_u64_le(0);
}
