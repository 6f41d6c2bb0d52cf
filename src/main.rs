//! Numeraria - Command Usage Telemetry Daemon
//!
//! This is the main entry point for the daemon. It parses the command line,
//! sets up logging, and runs the event loop on a single-threaded runtime.

use clap::Parser;
use numeraria::config::{Cli, Config};
use numeraria::server;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let config = Config::from(Cli::parse());

    // Logs go to stderr: stdout carries responses in input mode.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = config.validate() {
        error!("{}", e);
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!(version = numeraria::VERSION, "Numeraria starting");
    let result = runtime.block_on(server::run(config));

    // A pending stdin read sits on a blocking thread; don't wait for it.
    runtime.shutdown_background();

    match result {
        Ok(shutdown) => {
            info!(reason = %shutdown, "Shutdown complete");
            ExitCode::from(shutdown.exit_code())
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
