//! # portablerpc-logging
//!
//! Structured logging with `tracing`.
//!
//! The protocol crates only emit `tracing` events; binaries pick an output
//! with [`init_subscriber`], [`init_json_subscriber`] or
//! [`init_from_settings`]. `RUST_LOG` takes precedence over the level passed in.
//! [`test_utils::capture_logs`] records events in memory for assertions.

#![deny(unsafe_code)]

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

use portablerpc_settings::{LogFormat, LoggingSettings};
use tracing_subscriber::EnvFilter;

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the global subscriber with compact stderr output.
///
/// Subsequent calls are no-ops.
pub fn init_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // try_init fails harmlessly if a global subscriber is already set
    let _ = subscriber.try_init();
}

/// Initialize the global subscriber with one JSON object per line on stderr.
pub fn init_json_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .json();

    let _ = subscriber.try_init();
}

/// Initialize the global subscriber from [`LoggingSettings`].
pub fn init_from_settings(settings: &LoggingSettings) {
    match settings.format {
        LogFormat::Compact => init_subscriber(&settings.level),
        LogFormat::Json => init_json_subscriber(&settings.level),
    }
}
