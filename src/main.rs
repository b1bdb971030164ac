//! poll-echo: a single-threaded TCP echo server
//!
//! Serves many concurrent clients from one thread using readiness-based
//! I/O multiplexing (epoll on Linux, kqueue on macOS).
//!
//! Features:
//! - Raw, line and length-prefixed echo framings
//! - Connection limit and optional idle connection reaping
//! - Configuration via CLI arguments or TOML file
//!
//! Exit status: 1 on a fatal runtime error, 2 on a configuration error.

mod config;
mod protocols;
mod runtime;

use config::Config;
use std::process::ExitCode;
use tracing::{error, info, Level};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(2);
        }
    };

    // Initialize logging: warnings and errors to stderr, the rest to stdout
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let writer = std::io::stderr
        .with_max_level(Level::WARN)
        .or_else(std::io::stdout);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(writer)
        .init();

    info!(
        listen = %config.listen,
        framing = ?config.framing,
        backlog = config.backlog,
        batch_size = config.batch_size,
        max_connections = config.max_connections,
        idle_timeout = config.idle_timeout,
        "Starting poll-echo server"
    );

    match runtime::run(config) {
        Ok(never) => match never {},
        Err(e) => {
            error!(error = %e, "Server stopped");
            ExitCode::FAILURE
        }
    }
}
