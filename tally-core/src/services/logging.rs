//! Logging setup
//!
//! The core only emits `tracing` events; binaries call [`init_logging`] once
//! to install a subscriber. Output goes to stderr so command output on stdout
//! stays machine-readable.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingSettings;

/// Install the global subscriber.
///
/// `settings.level` is an `EnvFilter` directive. An invalid directive falls
/// back to `warn`. Calling this twice is harmless; the first subscriber stays.
pub fn init_logging(settings: &LoggingSettings) {
    let filter = EnvFilter::try_new(&settings.level).unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);

    let result = if settings.json {
        let layer = fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_ansi(false);
        registry.with(layer).try_init()
    } else {
        let layer = fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr);
        registry.with(layer).try_init()
    };

    if result.is_err() {
        tracing::debug!("logging already initialised");
    }
}
