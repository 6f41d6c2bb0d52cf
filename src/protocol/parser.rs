//! Incremental Frame Parsers
//!
//! The daemon side decodes command frames with [`FrameParser`]; the client side
//! decodes row streams with [`RowParser`]. Both follow the same contract so that
//! callers can append network data to a buffer and retry:
//!
//! - `Ok(Some((value, consumed)))` - a complete value, `consumed` bytes were used
//! - `Ok(None)` - the value is incomplete, read more data
//! - `Err(FrameError)` - protocol violation, the stream cannot be resynchronized
//!
//! A frame header declaring more than the maximum payload is rejected as soon as
//! the header itself is available, never after buffering the payload.

use crate::protocol::types::{
    Command, CommandKind, FrameHeader, Record, Row, HEADER_SIZE, MAX_PAYLOAD, MAX_RECORD_ARGS,
    PREFIX_SIZE,
};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur while decoding frames.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    /// The declared payload length exceeds the maximum
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Unknown command kind byte
    #[error("unknown command kind: {0:#04x}")]
    UnknownKind(u8),

    /// EXIT and STATS carry no payload
    #[error("unexpected {size}-byte payload for {kind}")]
    UnexpectedPayload { kind: CommandKind, size: usize },

    /// RECORD declares more arguments than allowed
    #[error("too many record arguments: {count} (max: {max})")]
    TooManyArgs { count: u64, max: usize },

    /// RECORD payload does not match its own length prefixes
    #[error("malformed record payload: {0}")]
    MalformedRecord(String),

    /// Row stream violates its own length prefixes or limits
    #[error("malformed row stream: {0}")]
    MalformedRow(String),
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, FrameError>;

/// Upper bound on columns accepted in one response row (SQLite's default limit).
pub const MAX_ROW_COLUMNS: u64 = 2000;

/// Upper bound on a single column accepted by the client (64 MB).
pub const MAX_COLUMN_LEN: u64 = 64 * 1024 * 1024;

/// Decoder for client command frames.
#[derive(Debug)]
pub struct FrameParser {
    max_payload: usize,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    /// Creates a parser that enforces [`MAX_PAYLOAD`].
    pub fn new() -> Self {
        Self {
            max_payload: MAX_PAYLOAD,
        }
    }

    /// Attempts to parse one command frame from the start of `buf`.
    pub fn parse(&self, buf: &[u8]) -> ParseResult<Option<(Command, usize)>> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let mut head = [0u8; HEADER_SIZE];
        head.copy_from_slice(&buf[..HEADER_SIZE]);
        let header = FrameHeader::decode(&head);

        let len = header.len as usize;
        if len > self.max_payload {
            return Err(FrameError::FrameTooLarge {
                size: len,
                max: self.max_payload,
            });
        }
        let kind = CommandKind::try_from(header.kind)?;

        let total = HEADER_SIZE + len;
        if buf.len() < total {
            return Ok(None);
        }
        let payload = &buf[HEADER_SIZE..total];

        let command = match kind {
            CommandKind::Exit | CommandKind::Stats if !payload.is_empty() => {
                return Err(FrameError::UnexpectedPayload { kind, size: len });
            }
            CommandKind::Exit => Command::Exit,
            CommandKind::Stats => Command::Stats,
            CommandKind::Sql => Command::Sql(Bytes::copy_from_slice(payload)),
            CommandKind::Record => Command::Record(parse_record(payload)?),
        };

        Ok(Some((command, total)))
    }
}

/// Validates a RECORD payload and splits it into its arguments.
fn parse_record(payload: &[u8]) -> ParseResult<Record> {
    let mut cursor = payload;
    let count = take_u64(&mut cursor)
        .ok_or_else(|| FrameError::MalformedRecord("missing argument count".to_string()))?;
    if count > MAX_RECORD_ARGS as u64 {
        return Err(FrameError::TooManyArgs {
            count,
            max: MAX_RECORD_ARGS,
        });
    }

    let mut args = Vec::with_capacity(count as usize);
    for i in 0..count {
        let len = take_u64(&mut cursor).ok_or_else(|| {
            FrameError::MalformedRecord(format!("missing length of argument {}", i))
        })?;
        if len > cursor.len() as u64 {
            return Err(FrameError::MalformedRecord(format!(
                "argument {} declares {} bytes, {} remain",
                i,
                len,
                cursor.len()
            )));
        }
        let (arg, rest) = cursor.split_at(len as usize);
        args.push(Bytes::copy_from_slice(arg));
        cursor = rest;
    }

    if !cursor.is_empty() {
        return Err(FrameError::MalformedRecord(format!(
            "{} trailing bytes",
            cursor.len()
        )));
    }

    Ok(Record::from_parts(args, Bytes::copy_from_slice(payload)))
}

/// Reads a little-endian u64 prefix and advances the cursor.
fn take_u64(cursor: &mut &[u8]) -> Option<u64> {
    let value = read_u64_at(cursor, 0)?;
    *cursor = &cursor[PREFIX_SIZE..];
    Some(value)
}

#[inline]
fn read_u64_at(buf: &[u8], offset: usize) -> Option<u64> {
    let end = offset.checked_add(PREFIX_SIZE)?;
    let bytes = buf.get(offset..end)?;
    let mut word = [0u8; PREFIX_SIZE];
    word.copy_from_slice(bytes);
    Some(u64::from_le_bytes(word))
}

/// One element of a row stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowFrame {
    Row(Row),
    /// The zero-column terminator.
    End,
}

/// Decoder for row streams sent back by SQL and STATS.
#[derive(Debug, Default)]
pub struct RowParser;

impl RowParser {
    /// Creates a row stream parser.
    pub fn new() -> Self {
        Self
    }

    /// Attempts to parse one row (or the terminator) from the start of `buf`.
    pub fn parse(&self, buf: &[u8]) -> ParseResult<Option<(RowFrame, usize)>> {
        let Some(columns) = read_u64_at(buf, 0) else {
            return Ok(None);
        };
        if columns == 0 {
            return Ok(Some((RowFrame::End, PREFIX_SIZE)));
        }
        if columns > MAX_ROW_COLUMNS {
            return Err(FrameError::MalformedRow(format!(
                "{} columns (max: {})",
                columns, MAX_ROW_COLUMNS
            )));
        }

        let mut offset = PREFIX_SIZE;
        let mut values = Vec::with_capacity(columns as usize);
        for _ in 0..columns {
            let Some(len) = read_u64_at(buf, offset) else {
                return Ok(None);
            };
            if len > MAX_COLUMN_LEN {
                return Err(FrameError::MalformedRow(format!(
                    "{}-byte column (max: {})",
                    len, MAX_COLUMN_LEN
                )));
            }
            offset += PREFIX_SIZE;
            let end = offset + len as usize;
            if buf.len() < end {
                return Ok(None);
            }
            values.push(Bytes::copy_from_slice(&buf[offset..end]));
            offset = end;
        }

        Ok(Some((RowFrame::Row(Row::new(values)), offset)))
    }

    /// Buffer length needed before the next frame in `buf` can be complete.
    ///
    /// Only length prefixes are read, so a caller that waits for this many
    /// bytes before calling [`parse`](Self::parse) again decodes each row once.
    pub fn required_len(&self, buf: &[u8]) -> usize {
        let Some(columns) = read_u64_at(buf, 0) else {
            return PREFIX_SIZE;
        };
        let mut offset = PREFIX_SIZE;
        for _ in 0..columns.min(MAX_ROW_COLUMNS) {
            let Some(len) = read_u64_at(buf, offset) else {
                return offset + PREFIX_SIZE;
            };
            offset = offset
                .saturating_add(PREFIX_SIZE)
                .saturating_add(len.min(MAX_COLUMN_LEN) as usize);
            if buf.len() < offset {
                return offset;
            }
        }
        offset
    }
}

/// Helper function to parse a single command frame from bytes.
pub fn parse_frame(buf: &[u8]) -> ParseResult<Option<(Command, usize)>> {
    FrameParser::new().parse(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::{encode_row, encode_row_end};

    fn header(len: u32, kind: u8) -> Vec<u8> {
        let mut buf = len.to_le_bytes().to_vec();
        buf.push(kind);
        buf
    }

    #[test]
    fn test_roundtrip_all_kinds() {
        let commands = [
            Command::Exit,
            Command::Stats,
            Command::sql("select 1;"),
            Command::sql(""),
            Command::Record(Record::new(["help"]).unwrap()),
            Command::Record(Record::new(["define", "word"]).unwrap()),
            Command::Record(Record::new(Vec::<Bytes>::new()).unwrap()),
        ];
        for original in commands {
            let serialized = original.serialize();
            let (parsed, consumed) = parse_frame(&serialized).unwrap().unwrap();
            assert_eq!(parsed, original);
            assert_eq!(consumed, serialized.len());
        }
    }

    #[test]
    fn test_incomplete_header() {
        assert!(parse_frame(b"").unwrap().is_none());
        assert!(parse_frame(b"\x09\x00\x00").unwrap().is_none());
    }

    #[test]
    fn test_incomplete_payload() {
        let serialized = Command::sql("select 1;").serialize();
        let partial = &serialized[..serialized.len() - 1];
        assert!(parse_frame(partial).unwrap().is_none());
    }

    #[test]
    fn test_oversized_frame_rejected_from_header_alone() {
        let buf = header(MAX_PAYLOAD as u32 + 1, CommandKind::Sql.as_byte());
        assert_eq!(
            parse_frame(&buf),
            Err(FrameError::FrameTooLarge {
                size: MAX_PAYLOAD + 1,
                max: MAX_PAYLOAD
            })
        );
    }

    #[test]
    fn test_max_payload_accepted() {
        let text = "x".repeat(MAX_PAYLOAD);
        let serialized = Command::sql(text.clone()).serialize();
        let (parsed, _) = parse_frame(&serialized).unwrap().unwrap();
        assert_eq!(parsed, Command::sql(text));
    }

    #[test]
    fn test_unknown_kind() {
        assert_eq!(parse_frame(&header(0, 0)), Err(FrameError::UnknownKind(0)));
        assert_eq!(parse_frame(&header(0, 9)), Err(FrameError::UnknownKind(9)));
    }

    #[test]
    fn test_exit_with_payload_rejected() {
        let mut buf = header(1, CommandKind::Exit.as_byte());
        buf.push(b'x');
        assert!(matches!(
            parse_frame(&buf),
            Err(FrameError::UnexpectedPayload { kind: CommandKind::Exit, size: 1 })
        ));
    }

    #[test]
    fn test_record_too_many_args() {
        let mut payload = 3u64.to_le_bytes().to_vec();
        for _ in 0..3 {
            payload.extend_from_slice(&0u64.to_le_bytes());
        }
        let mut buf = header(payload.len() as u32, CommandKind::Record.as_byte());
        buf.extend_from_slice(&payload);
        assert_eq!(
            parse_frame(&buf),
            Err(FrameError::TooManyArgs {
                count: 3,
                max: MAX_RECORD_ARGS
            })
        );
    }

    #[test]
    fn test_record_truncated_argument() {
        let mut payload = 1u64.to_le_bytes().to_vec();
        payload.extend_from_slice(&10u64.to_le_bytes());
        payload.extend_from_slice(b"help");
        let mut buf = header(payload.len() as u32, CommandKind::Record.as_byte());
        buf.extend_from_slice(&payload);
        assert!(matches!(
            parse_frame(&buf),
            Err(FrameError::MalformedRecord(_))
        ));
    }

    #[test]
    fn test_record_trailing_bytes() {
        let mut payload = 0u64.to_le_bytes().to_vec();
        payload.push(b'!');
        let mut buf = header(payload.len() as u32, CommandKind::Record.as_byte());
        buf.extend_from_slice(&payload);
        assert!(matches!(
            parse_frame(&buf),
            Err(FrameError::MalformedRecord(_))
        ));
    }

    #[test]
    fn test_record_missing_count() {
        let mut buf = header(3, CommandKind::Record.as_byte());
        buf.extend_from_slice(b"abc");
        assert!(matches!(
            parse_frame(&buf),
            Err(FrameError::MalformedRecord(_))
        ));
    }

    #[test]
    fn test_pipelined_frames() {
        let mut buf = Command::sql("select 1;").serialize();
        buf.extend_from_slice(&Command::Stats.serialize());

        let parser = FrameParser::new();
        let (first, consumed) = parser.parse(&buf).unwrap().unwrap();
        assert_eq!(first, Command::sql("select 1;"));
        let (second, rest) = parser.parse(&buf[consumed..]).unwrap().unwrap();
        assert_eq!(second, Command::Stats);
        assert_eq!(consumed + rest, buf.len());
    }

    #[test]
    fn test_record_keeps_raw_payload() {
        let original = Record::new(["define", "word"]).unwrap();
        let serialized = Command::Record(original.clone()).serialize();
        let (parsed, _) = parse_frame(&serialized).unwrap().unwrap();
        match parsed {
            Command::Record(record) => {
                assert_eq!(record.raw(), original.raw());
                assert_eq!(record.arg_str(0).as_deref(), Some("define"));
                assert_eq!(record.arg_str(1).as_deref(), Some("word"));
                assert_eq!(record.arg_str(2), None);
            }
            other => panic!("expected RECORD, got {:?}", other),
        }
    }

    #[test]
    fn test_row_stream() {
        let mut buf = Vec::new();
        encode_row(&["3", "help", ""], &mut buf);
        encode_row_end(&mut buf);

        let parser = RowParser::new();
        let (frame, consumed) = parser.parse(&buf).unwrap().unwrap();
        assert_eq!(
            frame,
            RowFrame::Row(Row::new(vec![
                Bytes::from("3"),
                Bytes::from("help"),
                Bytes::new()
            ]))
        );
        let (end, rest) = parser.parse(&buf[consumed..]).unwrap().unwrap();
        assert_eq!(end, RowFrame::End);
        assert_eq!(consumed + rest, buf.len());
    }

    #[test]
    fn test_row_incomplete() {
        let mut buf = Vec::new();
        encode_row(&["hello"], &mut buf);
        let parser = RowParser::new();
        for cut in 0..buf.len() {
            assert!(parser.parse(&buf[..cut]).unwrap().is_none());
        }
    }

    #[test]
    fn test_row_required_len() {
        let mut buf = Vec::new();
        encode_row(&["ab", "xyz"], &mut buf);
        assert_eq!(buf.len(), 29);

        let parser = RowParser::new();
        assert_eq!(parser.required_len(&[]), 8);
        assert_eq!(parser.required_len(&buf[..4]), 8);
        assert_eq!(parser.required_len(&buf[..8]), 16);
        assert_eq!(parser.required_len(&buf[..16]), 18);
        assert_eq!(parser.required_len(&buf[..18]), 26);
        assert_eq!(parser.required_len(&buf[..26]), 29);
        assert_eq!(parser.required_len(&buf), 29);
        for cut in 0..buf.len() {
            assert!(parser.required_len(&buf[..cut]) > cut);
        }

        let mut end = Vec::new();
        encode_row_end(&mut end);
        assert_eq!(parser.required_len(&end), 8);
    }

    #[test]
    fn test_row_too_many_columns() {
        let buf = (MAX_ROW_COLUMNS + 1).to_le_bytes();
        assert!(matches!(
            RowParser::new().parse(&buf),
            Err(FrameError::MalformedRow(_))
        ));
    }
}
