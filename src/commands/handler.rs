//! Command Execution
//!
//! Executes one decoded command against the stats store and writes its
//! response to the issuing client.
//!
//! ## Responses
//!
//! - `EXIT`   nothing is sent; the reactor stops after the current wakeup
//! - `SQL`    a row stream, always closed by the zero-column terminator
//! - `STATS`  the row stream of the canned stats query
//! - `RECORD` one status byte, `0` when the count was bumped, `1` otherwise
//!
//! A statement that fails inside the database only affects its own response.
//! Only a failure to deliver a response is returned to the caller.

use crate::protocol::types::status;
use crate::protocol::{Command, Record};
use crate::storage::{command_hash, StatsStore, StoreError};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// What the reactor should do after a command ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    /// The client asked the daemon to shut down.
    Exit,
}

/// Failures that end the client's session.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to send response: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for CommandError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Io(e) => CommandError::Io(e),
            other => CommandError::Store(other),
        }
    }
}

/// Dispatches commands to the stats store.
pub struct CommandHandler {
    store: StatsStore,
}

impl CommandHandler {
    /// Creates a handler that owns `store`.
    pub fn new(store: StatsStore) -> Self {
        Self { store }
    }

    /// Executes a command, writing its response to `out`.
    pub async fn execute<W>(&self, command: Command, out: &mut W) -> Result<Outcome, CommandError>
    where
        W: AsyncWrite + Unpin,
    {
        match command {
            Command::Exit => {
                debug!("Exit requested");
                Ok(Outcome::Exit)
            }
            Command::Sql(text) => {
                let result = self.store.stream_query(&text, out).await;
                self.finish_query(result)
            }
            Command::Stats => {
                let result = self.store.stream_stats(out).await;
                self.finish_query(result)
            }
            Command::Record(record) => {
                let status = self.record(&record);
                out.write_u8(status).await?;
                out.flush().await?;
                Ok(Outcome::Continue)
            }
        }
    }

    fn finish_query(&self, result: Result<usize, StoreError>) -> Result<Outcome, CommandError> {
        match result {
            Ok(rows) => {
                debug!(rows, "Query answered");
                Ok(Outcome::Continue)
            }
            Err(e) if e.is_request_scoped() => {
                warn!(error = %e, "Query failed");
                Ok(Outcome::Continue)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Counts one invocation and returns the status byte to send.
    fn record(&self, record: &Record) -> u8 {
        let hash = command_hash(record.raw());
        let cmd = record.arg_str(0);
        let arg0 = record.arg_str(1);
        let arg1 = record.arg_str(2);

        match self
            .store
            .upsert_increment(hash, cmd.as_deref(), arg0.as_deref(), arg1.as_deref())
        {
            Ok(count) => {
                debug!(cmd = cmd.as_deref().unwrap_or(""), count, "Recorded");
                status::OK
            }
            Err(e) => {
                warn!(error = %e, "Failed to record command");
                status::FAILED
            }
        }
    }
}
