//! Logging initialization.
//!
//! Structured logging through the `tracing` ecosystem, either as pretty
//! console output or as JSON lines for machine parsing. The level can be
//! overridden at runtime via `RUST_LOG`.

use serde::Deserialize;
use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct LogConfig {
    /// Output logs as JSON
    pub json: bool,
    /// Sets the default level to DEBUG
    pub verbose: bool,
}

/// Install the global subscriber.
///
/// Returns `false` when a subscriber was already installed, so embedding
/// applications and tests can call this more than once.
pub fn init(config: &LogConfig) -> bool {
    let default_level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("ferry={}", default_level.as_str().to_lowercase()))
    });

    let result = if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()
    };

    result.is_ok()
}
