//! Error type for the observability layer.

use thiserror::Error;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to register metric {name}: {source}")]
    Register {
        name: &'static str,
        #[source]
        source: prometheus::Error,
    },

    #[error("failed to encode metrics: {0}")]
    Encode(#[source] prometheus::Error),

    #[error("failed to bind metrics listener: {0}")]
    Bind(#[source] std::io::Error),

    #[error("metrics server error: {0}")]
    Serve(#[source] std::io::Error),

    #[error("failed to install tracing subscriber: {0}")]
    Tracing(String),
}

pub type Result<T> = std::result::Result<T, Error>;
