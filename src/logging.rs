//! Structured logging setup for the `ferrite-det` binary.
//!
//! Library code only uses the `tracing` macros; installing a subscriber is
//! left to whoever owns `main`.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs a global `fmt` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `verbose` selects between `debug`
/// (per-batch progress lines) and `info` (per-epoch lines). Calling this
/// twice is harmless: the second install is ignored.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}
