use std::io::{self, IsTerminal};

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Builds the global filter. `RUST_LOG` wins over `default_directive`, and an
/// unparsable directive falls back to [`DEFAULT_LOG_LEVEL`].
pub fn make_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL))
}

/// Color only when stderr, the log writer, is a terminal.
fn use_ansi() -> bool {
    io::stderr().is_terminal()
}

/// Initializes logging to stderr. Call once at startup; later calls are
/// ignored.
///
/// Output is colored only when stderr is a terminal, so redirected logs carry
/// no escape codes whatever stdout is attached to.
pub fn init_logging(default_directive: &str) {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(use_ansi())
        .with_target(false);

    let _ = tracing_subscriber::registry()
        .with(make_filter(default_directive))
        .with(fmt_layer)
        .try_init();
}
