//! Structured logging.
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - `RUST_LOG` wins over the configured level

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when neither `RUST_LOG` nor a configured level applies.
pub const DEFAULT_FILTER: &str = "loopback_fetch=debug,tower_http=debug";

/// Build the filter for a configured level such as `"info"`.
pub fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("loopback_fetch={level},tower_http={level}")))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Safe to call more than once.
pub fn init_tracing(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(filter_for(level))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
