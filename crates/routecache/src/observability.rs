//! Tracing setup for processes embedding the cache.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LoggingConfig;

/// Install a global fmt subscriber at the configured level.
pub fn init_tracing(logging: &LoggingConfig) {
    init_tracing_with_level(&logging.level);
}

/// Install a global fmt subscriber. `RUST_LOG` wins over `level` when set.
/// Does nothing if a global subscriber is already installed.
pub fn init_tracing_with_level(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(filter(level))
        .with(fmt::layer().with_target(false))
        .try_init();
}

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}
