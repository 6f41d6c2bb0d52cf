//! Startup Configuration
//!
//! Command-line flags are parsed with clap into [`Cli`] and turned into a plain
//! [`Config`], which is what the rest of the crate consumes.

use crate::connection::DEFAULT_CAPACITY;
use crate::server::listener::BindTarget;
use crate::storage::DbLocation;
use clap::{ArgAction, Parser};
use thiserror::Error;

/// Signal bridge, listener or input, and one client.
pub const MIN_CONNECTIONS: usize = 3;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "numeraria", version, about = "Command usage telemetry daemon")]
pub struct Cli {
    /// Stats database file, or `:memory:` for a database that lives only as
    /// long as the process
    #[arg(long, value_name = "PATH", default_value = DbLocation::MEMORY_MARKER)]
    pub db_path: String,

    /// Listen on `host:port` or `unix:<path>`; reads commands from stdin when absent
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<BindTarget>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Maximum number of registered endpoints, listener and signal included
    #[arg(long, value_name = "N", default_value_t = DEFAULT_CAPACITY)]
    pub max_connections: usize,

    /// Close only the offending client on protocol or socket errors instead of
    /// stopping the daemon
    #[arg(long)]
    pub isolate_errors: bool,
}

/// Invalid configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("--max-connections must be at least {min} (got {got})")]
    TooFewConnections { got: usize, min: usize },
}

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db: DbLocation,
    /// `None` selects input mode.
    pub bind: Option<BindTarget>,
    pub max_connections: usize,
    pub isolate_errors: bool,
    pub verbosity: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db: DbLocation::Memory,
            bind: None,
            max_connections: DEFAULT_CAPACITY,
            isolate_errors: false,
            verbosity: 0,
        }
    }
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        Self {
            db: DbLocation::parse(&cli.db_path),
            bind: cli.bind,
            max_connections: cli.max_connections,
            isolate_errors: cli.isolate_errors,
            verbosity: cli.verbose,
        }
    }
}

impl Config {
    /// Rejects settings the daemon cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections < MIN_CONNECTIONS {
            return Err(ConfigError::TooFewConnections {
                got: self.max_connections,
                min: MIN_CONNECTIONS,
            });
        }
        Ok(())
    }

    /// Default log filter for the configured verbosity.
    pub fn log_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["numeraria"];
        argv.extend_from_slice(args);
        Config::from(Cli::try_parse_from(argv).unwrap())
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config, Config::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.log_filter(), "info");
    }

    #[test]
    fn test_unix_bind_and_file_db() {
        let config = parse(&["--bind", "unix:/tmp/n.sock", "--db-path", "/tmp/n.db"]);
        assert_eq!(config.bind, Some(BindTarget::Unix(PathBuf::from("/tmp/n.sock"))));
        assert_eq!(config.db, DbLocation::File(PathBuf::from("/tmp/n.db")));
    }

    #[test]
    fn test_tcp_bind_and_flags() {
        let config = parse(&[
            "--bind",
            "0.0.0.0:4545",
            "-vv",
            "--max-connections",
            "64",
            "--isolate-errors",
        ]);
        assert_eq!(config.bind, Some(BindTarget::Tcp("0.0.0.0:4545".to_string())));
        assert_eq!(config.log_filter(), "trace");
        assert_eq!(config.max_connections, 64);
        assert!(config.isolate_errors);
    }

    #[test]
    fn test_rejects_bad_bind() {
        assert!(Cli::try_parse_from(["numeraria", "--bind", "unix:"]).is_err());
    }

    #[test]
    fn test_too_few_connections() {
        let config = parse(&["--max-connections", "2"]);
        assert_eq!(
            config.validate(),
            Err(ConfigError::TooFewConnections { got: 2, min: 3 })
        );
    }
}
