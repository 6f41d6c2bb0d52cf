//! Server Module
//!
//! Startup wiring around the event loop: open the stats store, bind the
//! listener (or adopt stdin/stdout), install the signal bridge, run, and tear
//! everything down again.
//!
//! ## Modules
//!
//! - `listener`: Bind targets and listening sockets
//! - `signal`: Signal bridge for SIGINT
//! - `reactor`: The event loop

pub mod listener;
pub mod reactor;
pub mod signal;

pub use listener::{BindTarget, Listener};
pub use reactor::{Endpoint, Reactor, ReactorError, Shutdown};
pub use signal::SignalBridge;

use crate::commands::CommandHandler;
use crate::config::Config;
use crate::connection::ClientConnection;
use crate::storage::StatsStore;
use anyhow::Context;
use tracing::info;

/// Runs the daemon described by `config` until it shuts down.
///
/// Setup failures, loop failures and a failure to remove the Unix socket file
/// are all errors; the socket file is removed even when the loop failed.
pub async fn run(config: Config) -> anyhow::Result<Shutdown> {
    let store = StatsStore::open(&config.db).context("failed to open stats store")?;
    info!(db = %store.location(), "Stats store opened");

    let mut reactor = Reactor::new(
        CommandHandler::new(store),
        config.max_connections,
        config.isolate_errors,
    );

    match &config.bind {
        Some(target) => {
            let backlog = u32::try_from(config.max_connections).unwrap_or(u32::MAX);
            let listener = Listener::bind(target, backlog)
                .await
                .with_context(|| format!("failed to bind {}", target))?;
            info!(addr = %listener, "Listening");
            reactor.register(Endpoint::Listener(listener))?;
        }
        None => {
            info!("Reading commands from stdin");
            reactor.register(Endpoint::Client(ClientConnection::stdio()))?;
        }
    }

    let outcome = match SignalBridge::install() {
        Ok(bridge) => match reactor.register(Endpoint::Signal(bridge)) {
            Ok(_) => reactor.run().await.context("event loop failed"),
            Err(e) => Err(e.into()),
        },
        Err(e) => Err(anyhow::Error::new(e).context("failed to install SIGINT handler")),
    };

    let closed = reactor.close().context("failed to remove socket file");
    let shutdown = outcome?;
    closed?;
    Ok(shutdown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DbLocation;

    #[tokio::test]
    async fn test_bad_database_path_fails_setup() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            db: DbLocation::File(dir.path().join("missing").join("stats.db")),
            bind: Some(BindTarget::Tcp("127.0.0.1:0".to_string())),
            ..Config::default()
        };
        assert!(run(config).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_failure_fails_setup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taken.sock");
        std::fs::write(&path, b"").unwrap();
        let config = Config {
            bind: Some(BindTarget::Unix(path)),
            ..Config::default()
        };
        let err = run(config).await.unwrap_err();
        assert!(err.to_string().contains("failed to bind"));
    }
}
