//! Logging setup for panplay
//!
//! Diagnostics go to stderr through `tracing`, so stdout stays clean for
//! command output and `--json`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "panplay=debug,warn"
    } else {
        "panplay=info,warn"
    }
}

/// Initialize the logging system.
///
/// The level can be controlled via the `RUST_LOG` environment variable;
/// otherwise panplay logs at INFO (DEBUG with `--verbose`) and other crates
/// at WARN. Calling this twice is harmless.
pub fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
