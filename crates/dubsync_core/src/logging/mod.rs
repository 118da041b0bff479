//! Logging setup.
//!
//! The engine logs through `tracing` macros:
//! - `info!` per pass and for final decisions
//! - `debug!` per chunk
//! - `warn!` for degraded chunks and fallbacks
//!
//! Binaries call [`init_tracing`] once at startup.
//!
//! # Example
//!
//! ```no_run
//! use dubsync_core::logging::{init_tracing, LogLevel};
//!
//! init_tracing(LogLevel::Debug);
//! tracing::info!("ready");
//! ```

mod types;

pub use types::LogLevel;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize global tracing subscriber for application-wide logging.
///
/// This sets up a subscriber that:
/// - Respects RUST_LOG environment variable
/// - Falls back to the provided default level
/// - Outputs to stderr
///
/// Should be called once at application startup.
pub fn init_tracing(default_level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.as_filter_str()));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false),
        )
        .with(filter)
        .init();
}

/// Initialize tracing for tests (only logs warnings and above).
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}
