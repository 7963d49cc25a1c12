//! Error types for the HTTP webhook source.

use analysis_core::error::SourceError;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WebhookSourceError {
    #[error("invalid bind address '{0}'")]
    InvalidBindAddr(String),

    #[error("failed to bind webhook listener: {0}")]
    Bind(#[from] std::io::Error),
}

/// Every failure mode of this source is a construction- or bind-time
/// misconfiguration; there is no transient runtime state to classify
/// separately.
impl From<WebhookSourceError> for SourceError {
    fn from(err: WebhookSourceError) -> Self {
        SourceError::Fatal(err.to_string())
    }
}
