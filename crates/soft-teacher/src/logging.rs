//! Logging setup for the command-line tool.

use tracing_subscriber::{fmt, prelude::*, util::TryInitError, EnvFilter};

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence; otherwise the level is `info`, or `debug`
/// when `verbose` is set. Logs go to stderr so that stdout carries only JSON.
pub fn init_logging(verbose: bool) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
}
