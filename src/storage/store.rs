//! Stats Store
//!
//! A thin wrapper over an embedded SQLite database holding a single table of
//! recorded command invocations. Rows are keyed by the command hash and carry
//! an occurrence count that is bumped with one `ON CONFLICT` upsert, so every
//! record is a single atomic statement.
//!
//! Query results are framed and written to the caller's writer as they are
//! stepped, flushing whenever the pending output grows past a threshold, so a
//! large result set is never held in memory as a whole.

use crate::protocol::types::{encode_column, encode_row_end, encode_row_start};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

const CREATE_TABLE_SQL: &str = "create table if not exists numeraria_stats_cmd (\
     hash integer primary key, \
     cmd text, \
     arg0 text, \
     arg1 text, \
     count integer)";

const UPSERT_SQL: &str = "insert into numeraria_stats_cmd (hash, cmd, arg0, arg1, count) \
     values (?1, ?2, ?3, ?4, 1) \
     on conflict(hash) do update set count = count + 1 \
     returning count";

const COUNT_SQL: &str = "select count from numeraria_stats_cmd where hash = ?1";

/// The canned query run by the STATS command.
pub const STATS_QUERY: &str =
    "select count, cmd, arg0 from numeraria_stats_cmd order by count desc;";

/// Pending response bytes are written out once they reach this size.
const FLUSH_THRESHOLD: usize = 8 * 1024;

/// Where the stats database lives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DbLocation {
    /// A private in-memory database, gone when the process exits.
    #[default]
    Memory,
    /// A database file, durable across runs.
    File(PathBuf),
}

impl DbLocation {
    /// The path value selecting an in-memory database.
    pub const MEMORY_MARKER: &'static str = ":memory:";

    /// Interprets a `--db-path` value.
    pub fn parse(value: &str) -> Self {
        if value == Self::MEMORY_MARKER {
            DbLocation::Memory
        } else {
            DbLocation::File(PathBuf::from(value))
        }
    }
}

impl fmt::Display for DbLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbLocation::Memory => f.write_str(Self::MEMORY_MARKER),
            DbLocation::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Errors raised by the stats store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open database {location}: {source}")]
    Open {
        location: DbLocation,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to create stats table: {0}")]
    Schema(#[source] rusqlite::Error),

    #[error("sqlite: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("query text is not valid UTF-8: {0}")]
    InvalidQueryText(#[from] std::str::Utf8Error),

    #[error("failed to send query results: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// True for failures confined to one request (bad SQL, engine errors),
    /// false for failures of the transport the results were going to.
    pub fn is_request_scoped(&self) -> bool {
        matches!(self, StoreError::Query(_) | StoreError::InvalidQueryText(_))
    }
}

/// Handle to the stats database.
pub struct StatsStore {
    conn: Connection,
    location: DbLocation,
}

impl StatsStore {
    /// Opens the database and creates the stats table if it does not exist.
    pub fn open(location: &DbLocation) -> Result<Self, StoreError> {
        let conn = match location {
            DbLocation::Memory => Connection::open_in_memory(),
            DbLocation::File(path) => Connection::open(path),
        }
        .map_err(|source| StoreError::Open {
            location: location.clone(),
            source,
        })?;

        conn.execute(CREATE_TABLE_SQL, [])
            .map_err(StoreError::Schema)?;
        debug!(db = %location, "Stats store ready");

        Ok(Self {
            conn,
            location: location.clone(),
        })
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::open(&DbLocation::Memory)
    }

    /// Where the database lives.
    pub fn location(&self) -> &DbLocation {
        &self.location
    }

    /// Inserts a row with count 1, or bumps the count of the row with this hash.
    ///
    /// Returns the count after the update.
    pub fn upsert_increment(
        &self,
        hash: u64,
        cmd: Option<&str>,
        arg0: Option<&str>,
        arg1: Option<&str>,
    ) -> Result<i64, StoreError> {
        // SQLite integers are signed; the key keeps the hash's bit pattern.
        let key = hash as i64;
        let mut stmt = self.conn.prepare_cached(UPSERT_SQL)?;
        let count: i64 = stmt.query_row(params![key, cmd, arg0, arg1], |row| row.get(0))?;
        trace!(hash, count, "Recorded command");
        Ok(count)
    }

    /// Returns the count stored for `hash`, if any.
    pub fn count_for(&self, hash: u64) -> Result<Option<i64>, StoreError> {
        let count: Option<i64> = self
            .conn
            .query_row(COUNT_SQL, params![hash as i64], |row| row.get(0))
            .optional()?;
        Ok(count)
    }

    /// Runs `sql` and writes its result to `out` as a row stream.
    ///
    /// The zero-column terminator is written even when the statement fails
    /// partway, so the peer's stream always ends; the failure is still
    /// returned. Returns the number of rows sent.
    pub async fn stream_query<W>(&self, sql: &[u8], out: &mut W) -> Result<usize, StoreError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut buf = Vec::with_capacity(FLUSH_THRESHOLD);
        let outcome = self.write_rows(sql, &mut buf, out).await;
        if let Err(e) = &outcome {
            if !e.is_request_scoped() {
                return outcome;
            }
        }

        encode_row_end(&mut buf);
        out.write_all(&buf).await?;
        out.flush().await?;
        outcome
    }

    /// Runs the canned stats query. See [`StatsStore::stream_query`].
    pub async fn stream_stats<W>(&self, out: &mut W) -> Result<usize, StoreError>
    where
        W: AsyncWrite + Unpin,
    {
        self.stream_query(STATS_QUERY.as_bytes(), out).await
    }

    async fn write_rows<W>(
        &self,
        sql: &[u8],
        buf: &mut Vec<u8>,
        out: &mut W,
    ) -> Result<usize, StoreError>
    where
        W: AsyncWrite + Unpin,
    {
        let sql = std::str::from_utf8(sql)?;
        debug!(sql, "Running query");

        let mut stmt = self.conn.prepare(sql)?;
        let columns = stmt.column_count();
        let mut rows = stmt.query([])?;
        let mut sent = 0;

        loop {
            {
                let Some(row) = rows.next()? else {
                    break;
                };
                // Only whole rows may precede the terminator.
                let mark = buf.len();
                encode_row_start(columns, buf);
                for i in 0..columns {
                    match row.get_ref(i) {
                        Ok(value) => encode_value(value, buf),
                        Err(e) => {
                            buf.truncate(mark);
                            return Err(e.into());
                        }
                    }
                }
            }
            sent += 1;
            trace!(row = sent, columns, "Encoded row");

            if buf.len() >= FLUSH_THRESHOLD {
                out.write_all(buf).await?;
                buf.clear();
            }
        }

        debug!(rows = sent, "Query done");
        Ok(sent)
    }
}

/// Renders a value as text the way SQLite's text conversion does.
fn encode_value(value: ValueRef<'_>, buf: &mut Vec<u8>) {
    match value {
        ValueRef::Null => encode_column(b"", buf),
        ValueRef::Integer(i) => encode_column(i.to_string().as_bytes(), buf),
        ValueRef::Real(f) => encode_column(format_real(f).as_bytes(), buf),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => encode_column(bytes, buf),
    }
}

fn format_real(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{:.1}", f)
    } else {
        f.to_string()
    }
}
