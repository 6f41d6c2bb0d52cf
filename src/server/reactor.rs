//! Event Loop
//!
//! The reactor is a single future that owns the connection table and the
//! command handler. Each iteration does one multiplexed wait over every
//! registered endpoint and then handles the endpoints that became ready:
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────┐
//!   │ loop                                                         │
//!   │   stop? ── exit requested / interrupted / input exhausted    │
//!   │     │                                                        │
//!   │     ▼                                                        │
//!   │   wait ── poll every slot, record an event for each ready one│
//!   │     │                                                        │
//!   │     ▼                                                        │
//!   │   dispatch ── ready slots in table order:                    │
//!   │       listener → accept until nothing pending or table full  │
//!   │       signal   → stop                                        │
//!   │       client   → run every complete frame, or drop on EOF    │
//!   └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing is spawned: responses are written inline, and the stats store is
//! never shared. The listener is not polled while the table is full, so new
//! connections wait in the kernel backlog until a client leaves.
//!
//! Errors on a client (socket failures, protocol violations) stop the whole
//! loop unless error isolation is enabled, in which case only that client is
//! closed.

use crate::commands::{CommandHandler, Outcome};
use crate::connection::{
    ClientConnection, ConnectionError, ConnectionStats, ConnectionTable, Origin, TableFull,
};
use crate::server::listener::Listener;
use crate::server::signal::SignalBridge;
use std::fmt;
use std::future::poll_fn;
use std::io;
use std::net::SocketAddr;
use std::task::{Context, Poll};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// Anything the reactor waits on.
#[derive(Debug)]
pub enum Endpoint {
    Listener(Listener),
    Signal(SignalBridge),
    Client(ClientConnection),
}

impl Endpoint {
    fn role(&self) -> &'static str {
        match self {
            Endpoint::Listener(_) => "listener",
            Endpoint::Signal(_) => "signal",
            Endpoint::Client(_) => "client",
        }
    }
}

/// What the last wait found on a slot.
#[derive(Debug)]
pub enum Readiness {
    /// The listener had a pending connection, already accepted.
    Accepted(ClientConnection),
    /// The listener failed to accept.
    AcceptFailed(io::Error),
    /// Bytes were appended to the client's buffer.
    Data(usize),
    /// The peer closed its side.
    Hangup,
    /// Reading from the client failed.
    Failed(io::Error),
    /// The shutdown signal arrived.
    Signal(i32),
    /// The signal driver is gone.
    SignalLost,
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// A client sent EXIT.
    ExitRequested,
    /// The given signal was delivered.
    Interrupted(i32),
    /// Standard input reached end of file.
    InputClosed,
}

impl Shutdown {
    /// Process exit status for this kind of shutdown.
    pub fn exit_code(&self) -> u8 {
        match self {
            Shutdown::ExitRequested | Shutdown::InputClosed => 0,
            Shutdown::Interrupted(signo) => 128u8.wrapping_add(*signo as u8),
        }
    }
}

impl fmt::Display for Shutdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shutdown::ExitRequested => f.write_str("exit requested"),
            Shutdown::Interrupted(signo) => write!(f, "interrupted by signal {}", signo),
            Shutdown::InputClosed => f.write_str("input exhausted"),
        }
    }
}

/// Failures that stop the loop.
#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("client {client}: {source}")]
    Client {
        client: Origin,
        #[source]
        source: ConnectionError,
    },

    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    #[error("signal handling stopped")]
    SignalLost,

    #[error(transparent)]
    Table(#[from] TableFull),
}

#[derive(Debug, Default)]
struct LoopState {
    exit_requested: bool,
    interrupted: Option<i32>,
    input_closed: bool,
}

impl LoopState {
    fn shutdown(&self) -> Option<Shutdown> {
        if let Some(signo) = self.interrupted {
            Some(Shutdown::Interrupted(signo))
        } else if self.exit_requested {
            Some(Shutdown::ExitRequested)
        } else if self.input_closed {
            Some(Shutdown::InputClosed)
        } else {
            None
        }
    }
}

/// The single-threaded event loop.
pub struct Reactor {
    table: ConnectionTable<Endpoint, Readiness>,
    handler: CommandHandler,
    isolate_errors: bool,
    state: LoopState,
    stats: ConnectionStats,
}

impl Reactor {
    /// Creates a reactor with room for `capacity` endpoints.
    pub fn new(handler: CommandHandler, capacity: usize, isolate_errors: bool) -> Self {
        Self {
            table: ConnectionTable::with_capacity(capacity),
            handler,
            isolate_errors,
            state: LoopState::default(),
            stats: ConnectionStats::new(),
        }
    }

    /// Adds an endpoint to the table.
    pub fn register(&mut self, endpoint: Endpoint) -> Result<usize, TableFull> {
        let role = endpoint.role();
        let slot = self.table.register(endpoint)?;
        debug!(slot, role, "Registered endpoint");
        Ok(slot)
    }

    /// Connection and command counters since the loop started.
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Address of the TCP listener, if one is registered.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.table.iter().find_map(|endpoint| match endpoint {
            Endpoint::Listener(listener) => listener.local_addr(),
            _ => None,
        })
    }

    /// Runs until shutdown is requested or a fatal error occurs.
    pub async fn run(&mut self) -> Result<Shutdown, ReactorError> {
        loop {
            if let Some(shutdown) = self.state.shutdown() {
                info!(reason = %shutdown, "Stopping event loop");
                return Ok(shutdown);
            }

            let ready = poll_fn(|cx| self.poll_wait(cx)).await;
            trace!(ready, endpoints = self.table.len(), "Woke up");
            self.dispatch(ready).await?;
        }
    }

    /// Closes every endpoint, removing the Unix socket file if there is one.
    pub fn close(mut self) -> io::Result<()> {
        info!(
            accepted = self.stats.connections_accepted,
            commands = self.stats.commands_processed,
            bytes_read = self.stats.bytes_read,
            protocol_errors = self.stats.protocol_errors,
            "Connection statistics"
        );

        let mut result = Ok(());
        while let Some(last) = self.table.len().checked_sub(1) {
            if let Some(Endpoint::Listener(listener)) = self.table.unregister(last) {
                if let Err(e) = listener.close() {
                    error!(error = %e, "Failed to close listener");
                    result = Err(e);
                }
            }
        }
        result
    }

    /// One multiplexed wait: polls every slot and records an event for each
    /// one that is ready. Pending until at least one is.
    fn poll_wait(&mut self, cx: &mut Context<'_>) -> Poll<usize> {
        let room = !self.table.is_full();
        let mut ready = 0;

        for slot in self.table.slots_mut() {
            let event = match &mut slot.entry {
                Endpoint::Listener(listener) if room => match listener.poll_accept(cx) {
                    Poll::Ready(Ok(conn)) => Some(Readiness::Accepted(conn)),
                    Poll::Ready(Err(e)) => Some(Readiness::AcceptFailed(e)),
                    Poll::Pending => None,
                },
                Endpoint::Listener(_) => None,
                Endpoint::Signal(bridge) => match bridge.poll_delivered(cx) {
                    Poll::Ready(true) => Some(Readiness::Signal(bridge.signal_number())),
                    Poll::Ready(false) => Some(Readiness::SignalLost),
                    Poll::Pending => None,
                },
                Endpoint::Client(conn) => match conn.poll_fill(cx) {
                    Poll::Ready(Ok(0)) => Some(Readiness::Hangup),
                    Poll::Ready(Ok(n)) => Some(Readiness::Data(n)),
                    Poll::Ready(Err(e)) => Some(Readiness::Failed(e)),
                    Poll::Pending => None,
                },
            };

            if let Some(event) = event {
                slot.mark_ready(event);
                ready += 1;
            }
        }

        if ready == 0 {
            Poll::Pending
        } else {
            Poll::Ready(ready)
        }
    }

    async fn dispatch(&mut self, ready: usize) -> Result<(), ReactorError> {
        let mut cursor = self.table.ready_cursor(ready);
        while let Some((index, event)) = self.table.next_ready(&mut cursor) {
            trace!(slot = index, event = ?event, "Handling event");
            match event {
                Readiness::Signal(signo) => {
                    info!(signal = signo, "Shutdown signal received");
                    self.state.interrupted = Some(signo);
                    return Ok(());
                }
                Readiness::SignalLost => {
                    error!("Signal stream closed");
                    return Err(ReactorError::SignalLost);
                }
                Readiness::Accepted(conn) => self.accept(index, conn)?,
                Readiness::AcceptFailed(e) => {
                    error!(error = %e, "Accept failed");
                    return Err(ReactorError::Accept(e));
                }
                Readiness::Hangup => self.hangup(index)?,
                Readiness::Data(n) => {
                    self.stats.bytes_read(n);
                    self.serve(index).await?;
                }
                Readiness::Failed(e) => self.client_failed(index, e.into())?,
            }
        }
        Ok(())
    }

    /// Registers an accepted client, then drains the listener at `index`
    /// until nothing is pending or the table is full.
    fn accept(&mut self, index: usize, conn: ClientConnection) -> Result<(), ReactorError> {
        self.admit(conn)?;

        while !self.table.is_full() {
            let Some(Endpoint::Listener(listener)) = self.table.get(index) else {
                break;
            };
            match listener.try_accept() {
                Some(Ok(conn)) => self.admit(conn)?,
                Some(Err(e)) => {
                    error!(error = %e, "Accept failed");
                    return Err(ReactorError::Accept(e));
                }
                None => break,
            }
        }

        if self.table.is_full() {
            debug!(capacity = self.table.capacity(), "Connection table full, pausing accepts");
        }
        Ok(())
    }

    fn admit(&mut self, conn: ClientConnection) -> Result<(), ReactorError> {
        let client = conn.origin().clone();
        let slot = self.table.register(Endpoint::Client(conn))?;
        self.stats.connection_opened();
        info!(client = %client, slot, free = self.table.available(), "Client connected");
        Ok(())
    }

    fn hangup(&mut self, index: usize) -> Result<(), ReactorError> {
        let eof = match self.table.get(index) {
            Some(Endpoint::Client(conn)) => conn.check_eof(),
            _ => return Ok(()),
        };
        match eof {
            Ok(()) => {
                self.remove(index);
                Ok(())
            }
            Err(e) => self.client_failed(index, e),
        }
    }

    /// Runs every complete command buffered for the client at `index`.
    async fn serve(&mut self, index: usize) -> Result<(), ReactorError> {
        loop {
            let Some(Endpoint::Client(conn)) = self.table.get_mut(index) else {
                return Ok(());
            };
            let command = match conn.next_command() {
                Ok(Some(command)) => command,
                Ok(None) => {
                    trace!(client = %conn.origin(), buffered = conn.buffered(), "Waiting for frame");
                    return Ok(());
                }
                Err(e) => return self.client_failed(index, e),
            };

            debug!(client = %conn.origin(), kind = %command.kind(), "Executing command");
            self.stats.command_processed();
            match self.handler.execute(command, conn.writer()).await {
                Ok(Outcome::Continue) => {}
                Ok(Outcome::Exit) => self.state.exit_requested = true,
                Err(e) => return self.client_failed(index, e.into()),
            }
        }
    }

    /// Stops the loop, or only drops the client when errors are isolated.
    fn client_failed(&mut self, index: usize, error: ConnectionError) -> Result<(), ReactorError> {
        let client = match self.table.get(index) {
            Some(Endpoint::Client(conn)) => conn.origin().clone(),
            _ => return Ok(()),
        };
        if error.is_protocol_violation() {
            self.stats.protocol_error();
        }

        if self.isolate_errors {
            warn!(client = %client, error = %error, "Closing client");
            self.remove(index);
            Ok(())
        } else {
            error!(client = %client, error = %error, "Client error");
            Err(ReactorError::Client {
                client,
                source: error,
            })
        }
    }

    fn remove(&mut self, index: usize) {
        if let Some(Endpoint::Client(conn)) = self.table.unregister(index) {
            self.stats.connection_closed();
            if conn.is_input() {
                debug!("Input exhausted");
                self.state.input_closed = true;
            } else {
                info!(client = %conn.origin(), "Client disconnected");
            }
        }
    }
}
