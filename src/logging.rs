//! Structured logging for the extension runtime
//!
//! This module sets up tracing-based logging with configurable levels and outputs.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging system
///
/// This sets up tracing with:
/// - Environment-based filtering via RUST_LOG env var
/// - Default level of INFO in release builds, DEBUG in debug builds
/// - Console output with timestamps and target information
pub fn init() {
    // Default log level based on build type
    let default_level = if cfg!(debug_assertions) {
        "lumen_extensions=debug,info"
    } else {
        "lumen_extensions=info,warn"
    };

    // Allow override via RUST_LOG environment variable
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Initialize logging for tests
///
/// Similar to `init()` but with a test-friendly configuration.
/// Uses try_init() to avoid panicking if called multiple times.
#[cfg(test)]
pub fn init_test() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("debug"))
        .with(fmt::layer().with_test_writer())
        .try_init();
}
