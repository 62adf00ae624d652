//! Tracing setup for the command-line tool.
//!
//! Logs go to stderr so that stdout stays free for results (`--json`).
//! `RUST_LOG` wins over the verbosity flag when set.

use tracing_subscriber::EnvFilter;

/// Default filter for a given number of `-v` flags.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "boot_console=info",
        2 => "boot_console=debug",
        _ => "trace",
    }
}

/// Install the global subscriber. Calling it again is a no-op.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
