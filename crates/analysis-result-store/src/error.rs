//! Error type for the PostgreSQL-backed result store.

use thiserror::Error;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ResultStoreError {
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("failed to connect to postgres: {0}")]
    Connection(String),

    #[error("failed to serialize payload for task '{task_uuid}': {source}")]
    Serialize {
        task_uuid: String,
        source: serde_json::Error,
    },

    #[error("failed to deserialize row for task '{task_uuid}': {source}")]
    Deserialize {
        task_uuid: String,
        source: serde_json::Error,
    },
}
