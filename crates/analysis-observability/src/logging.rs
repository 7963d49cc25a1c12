//! Structured logging initialization (spec C10).
//!
//! One global subscriber: an [`EnvFilter`] seeded from [`LogConfig::level`],
//! feeding either the pretty human-readable formatter or the JSON formatter
//! selected by [`LogFormat`].

use crate::error::{Error, Result};
use analysis_core::config::{LogConfig, LogFormat};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs the global `tracing` subscriber. Call once, at process start,
/// before any source or scheduler loop begins.
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    let env_filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match config.format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
    };

    result.map_err(|e| Error::Tracing(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_level_falls_back_to_info_instead_of_erroring() {
        // try_new rejects a garbage directive; init_tracing must still produce
        // a usable filter rather than propagating the parse error.
        let filter = EnvFilter::try_new("not a valid directive!!").unwrap_or_else(|_| EnvFilter::new("info"));
        assert_eq!(filter.to_string(), "info");
    }
}
