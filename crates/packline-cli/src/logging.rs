//! Logging initialization for the CLI.
//!
//! The libraries only emit `tracing` events; the binary owns the
//! subscriber.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber.
///
/// `verbosity` raises the `packline` targets: 0 = INFO, 1 = DEBUG,
/// 2+ = TRACE. `RUST_LOG` is honoured for everything else. With `json`,
/// events are written to stderr as JSON lines.
///
/// # Panics
/// If a subscriber is already installed.
pub fn init(verbosity: u8, json: bool) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    for target in ["packline_core", "packline_dev", "packline"] {
        filter = filter.add_directive(format!("{target}={level}").parse().unwrap());
    }

    let subscriber = tracing_subscriber::registry().with(filter);
    if json {
        subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}
