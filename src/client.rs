//! Protocol Client
//!
//! A small async client for the daemon, used by tools that report command
//! usage and read the aggregated stats back.
//!
//! ## Example
//!
//! ```ignore
//! use numeraria::client::Client;
//!
//! let mut client = Client::connect_unix("/run/numeraria.sock").await?;
//! client.record(["define", "word"]).await?;
//! for row in client.stats().await? {
//!     println!("{}", row);
//! }
//! ```

use crate::protocol::types::status;
use crate::protocol::{Command, FrameError, Record, Row, RowFrame, RowParser, MAX_PAYLOAD};
use bytes::{Buf, Bytes, BytesMut};
use std::io;
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs, UnixStream};

/// Initial read buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Errors returned by [`Client`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The request would be refused, or the response was malformed
    #[error("Protocol error: {0}")]
    Protocol(#[from] FrameError),

    #[error("Connection closed by the daemon")]
    ConnectionClosed,

    #[error("Daemon failed to record the command (status {0})")]
    RecordFailed(u8),
}

/// A connection to the daemon over any byte stream.
#[derive(Debug)]
pub struct Client<S> {
    stream: S,
    buffer: BytesMut,
    rows: RowParser,
}

impl Client<TcpStream> {
    /// Connects to a daemon listening on TCP.
    pub async fn connect_tcp<A: ToSocketAddrs>(addr: A) -> Result<Self, ClientError> {
        Ok(Self::new(TcpStream::connect(addr).await?))
    }
}

impl Client<UnixStream> {
    /// Connects to a daemon listening on a Unix domain socket.
    pub async fn connect_unix<P: AsRef<Path>>(path: P) -> Result<Self, ClientError> {
        Ok(Self::new(UnixStream::connect(path).await?))
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an already connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            rows: RowParser::new(),
        }
    }

    /// Records one invocation of a command.
    pub async fn record<I, A>(&mut self, args: I) -> Result<(), ClientError>
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
    {
        let record = Record::new(args)?;
        self.send(&Command::Record(record)).await?;
        match self.read_status().await? {
            status::OK => Ok(()),
            other => Err(ClientError::RecordFailed(other)),
        }
    }

    /// Runs arbitrary SQL and collects the result rows.
    pub async fn sql(&mut self, text: impl Into<Bytes>) -> Result<Vec<Row>, ClientError> {
        let text = text.into();
        if text.len() > MAX_PAYLOAD {
            return Err(FrameError::FrameTooLarge {
                size: text.len(),
                max: MAX_PAYLOAD,
            }
            .into());
        }
        self.send(&Command::Sql(text)).await?;
        self.read_rows().await
    }

    /// Fetches `count, cmd, arg0` for every recorded command, most used first.
    pub async fn stats(&mut self) -> Result<Vec<Row>, ClientError> {
        self.send(&Command::Stats).await?;
        self.read_rows().await
    }

    /// Asks the daemon to shut down. There is no reply.
    pub async fn exit(mut self) -> Result<(), ClientError> {
        self.send(&Command::Exit).await
    }

    /// Writes a command frame without waiting for its response.
    pub async fn send(&mut self, command: &Command) -> Result<(), ClientError> {
        self.stream.write_all(&command.serialize()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads a RECORD status byte.
    pub async fn read_status(&mut self) -> Result<u8, ClientError> {
        while self.buffer.is_empty() {
            self.fill().await?;
        }
        Ok(self.buffer.get_u8())
    }

    /// Reads a row stream up to and including its terminator.
    pub async fn read_rows(&mut self) -> Result<Vec<Row>, ClientError> {
        let mut rows = Vec::new();
        loop {
            match self.rows.parse(&self.buffer)? {
                Some((frame, consumed)) => {
                    self.buffer.advance(consumed);
                    match frame {
                        RowFrame::Row(row) => rows.push(row),
                        RowFrame::End => return Ok(rows),
                    }
                }
                None => {
                    // Wait for the whole row instead of re-decoding each read.
                    let needed = self
                        .rows
                        .required_len(&self.buffer)
                        .max(self.buffer.len() + 1);
                    self.buffer.reserve(needed - self.buffer.len());
                    while self.buffer.len() < needed {
                        self.fill().await?;
                    }
                }
            }
        }
    }

    async fn fill(&mut self) -> Result<(), ClientError> {
        if self.stream.read_buf(&mut self.buffer).await? == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(())
    }
}
