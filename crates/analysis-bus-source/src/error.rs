//! Error types for the Kafka-backed source.

use analysis_core::error::SourceError;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BusSourceError {
    #[error("kafka client error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("failed to decode task submission: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to configure kafka client: {0}")]
    Config(String),
}

/// A malformed client configuration is fatal at construction; everything
/// observed once the consumer is running is transient and left to the
/// poll loop's own retry cadence.
impl From<BusSourceError> for SourceError {
    fn from(err: BusSourceError) -> Self {
        match err {
            BusSourceError::Config(_) => SourceError::Fatal(err.to_string()),
            BusSourceError::Kafka(_) | BusSourceError::Decode(_) => SourceError::Transient(err.to_string()),
        }
    }
}
