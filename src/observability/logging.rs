//! Structured logging.
//!
//! `RUST_LOG` wins over the configured level. JSON output is meant for
//! production log shipping, pretty output for local runs.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig};

/// Default filter when neither `RUST_LOG` nor a config level is set.
pub const DEFAULT_FILTER: &str = "job_gateway=debug,tower_http=info";

/// Build the filter: `RUST_LOG`, else the configured level, else the default.
pub fn env_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directive = if config.log_level.is_empty() {
            DEFAULT_FILTER.to_string()
        } else {
            format!("job_gateway={0},tower_http={0}", config.log_level)
        };
        EnvFilter::new(directive)
    })
}

/// Install the global subscriber. Call once, before anything logs.
pub fn init_logging(config: &ObservabilityConfig) {
    let registry = tracing_subscriber::registry().with(env_filter(config));

    if config.log_format == LogFormat::Json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
