//! Client Connection Module
//!
//! This module holds the state of one client endpoint known to the reactor.
//! A client is a reader plus a writer: both halves of an accepted TCP or Unix
//! socket, or stdin/stdout in input mode.
//!
//! ## Buffer Management
//!
//! The reactor only reads from a client after it was reported ready, and then
//! only once. Whatever arrived is appended to a `BytesMut` buffer and complete
//! frames are cut from its front:
//!
//! ```text
//!   read ──> [ frame 1 | frame 2 | partial fra ]
//!             └── parsed ──┘       └── kept until more data arrives
//! ```
//!
//! Several pipelined frames in one read are all handed out in order. A stream
//! that ends while bytes are still buffered ended mid-frame, which is a
//! protocol violation rather than an orderly close.

use crate::commands::CommandError;
use crate::protocol::{Command, FrameError, FrameParser};
use bytes::BytesMut;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, BufWriter, ReadBuf};
use tokio::net::{TcpStream, UnixStream};
use tracing::trace;

/// Bytes requested from the reader per readiness event
const READ_CHUNK: usize = 4096;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

pub type BoxedReader = Box<dyn AsyncRead + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Unpin>;

/// Where a client came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Tcp(SocketAddr),
    Unix,
    /// The process's own standard input and output.
    Input,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Tcp(addr) => write!(f, "tcp:{}", addr),
            Origin::Unix => f.write_str("unix"),
            Origin::Input => f.write_str("stdin"),
        }
    }
}

/// Counters kept by the reactor over its lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: u64,
    /// Currently registered clients
    pub active_connections: u64,
    /// Total commands processed
    pub commands_processed: u64,
    /// Total bytes read from clients
    pub bytes_read: u64,
    /// Connections dropped for protocol violations
    pub protocol_errors: u64,
}

impl ConnectionStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts an accepted client.
    pub fn connection_opened(&mut self) {
        self.connections_accepted += 1;
        self.active_connections += 1;
    }

    /// Counts a client removed from the table.
    pub fn connection_closed(&mut self) {
        self.active_connections = self.active_connections.saturating_sub(1);
    }

    /// Counts a command handed to the command handler.
    pub fn command_processed(&mut self) {
        self.commands_processed += 1;
    }

    /// Adds to the total bytes received from clients.
    pub fn bytes_read(&mut self, count: usize) {
        self.bytes_read += count as u64;
    }

    /// Counts a client that broke framing.
    pub fn protocol_error(&mut self) {
        self.protocol_errors += 1;
    }
}

/// One registered client.
pub struct ClientConnection {
    origin: Origin,
    reader: BoxedReader,
    writer: BufWriter<BoxedWriter>,
    buffer: BytesMut,
    parser: FrameParser,
}

impl ClientConnection {
    /// Wraps a reader and writer pair; responses are buffered until flushed.
    pub fn new<R, W>(origin: Origin, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + 'static,
        W: AsyncWrite + Unpin + 'static,
    {
        Self {
            origin,
            reader: Box::new(reader),
            writer: BufWriter::new(Box::new(writer)),
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser: FrameParser::new(),
        }
    }

    /// Splits an accepted TCP stream into its read and write halves.
    pub fn from_tcp(stream: TcpStream, addr: SocketAddr) -> Self {
        let (reader, writer) = stream.into_split();
        Self::new(Origin::Tcp(addr), reader, writer)
    }

    /// Splits an accepted Unix stream into its read and write halves.
    pub fn from_unix(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self::new(Origin::Unix, reader, writer)
    }

    /// Commands from stdin, responses to stdout.
    pub fn stdio() -> Self {
        Self::new(Origin::Input, tokio::io::stdin(), tokio::io::stdout())
    }

    /// Where this client's commands come from.
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Whether this is the stdin/stdout endpoint of input mode.
    pub fn is_input(&self) -> bool {
        self.origin == Origin::Input
    }

    /// Bytes received but not yet parsed into a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Polls the reader once, appending whatever is available to the buffer.
    ///
    /// `Ready(Ok(0))` means the peer closed its side.
    pub fn poll_fill(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<usize>> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut read_buf = ReadBuf::new(&mut chunk);
        match Pin::new(&mut self.reader).poll_read(cx, &mut read_buf) {
            Poll::Ready(Ok(())) => {
                let filled = read_buf.filled();
                self.buffer.extend_from_slice(filled);
                trace!(client = %self.origin, bytes = filled.len(), "Read data");
                Poll::Ready(Ok(filled.len()))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }

    /// Cuts the next complete command off the front of the buffer.
    pub fn next_command(&mut self) -> Result<Option<Command>, ConnectionError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match self.parser.parse(&self.buffer)? {
            Some((command, consumed)) => {
                let _ = self.buffer.split_to(consumed);
                trace!(
                    client = %self.origin,
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Parsed command"
                );
                Ok(Some(command))
            }
            None => {
                trace!(
                    client = %self.origin,
                    buffered = self.buffer.len(),
                    "Incomplete frame, need more data"
                );
                Ok(None)
            }
        }
    }

    /// Classifies the end of the stream: orderly when nothing is buffered.
    pub fn check_eof(&self) -> Result<(), ConnectionError> {
        if self.buffer.is_empty() {
            Ok(())
        } else {
            Err(ConnectionError::UnexpectedEof {
                buffered: self.buffer.len(),
            })
        }
    }

    /// The response channel for this client.
    pub fn writer(&mut self) -> &mut BufWriter<BoxedWriter> {
        &mut self.writer
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("origin", &self.origin)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

/// Errors that can occur while handling a client.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// The client sent something that is not a valid frame
    #[error("Protocol error: {0}")]
    ProtocolError(#[from] FrameError),

    /// The stream ended in the middle of a frame
    #[error("Truncated frame: stream ended with {buffered} unparsed bytes")]
    UnexpectedEof { buffered: usize },

    /// A response could not be delivered
    #[error("Command failed: {0}")]
    CommandFailed(#[from] CommandError),
}

impl ConnectionError {
    /// True when the peer violated the protocol rather than the transport failing.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ConnectionError::ProtocolError(_) | ConnectionError::UnexpectedEof { .. }
        )
    }
}
