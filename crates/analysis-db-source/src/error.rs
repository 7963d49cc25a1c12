//! Error types for the PostgreSQL-backed source.

use analysis_core::error::SourceError;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DbSourceError {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("failed to decode row: {0}")]
    RowDecode(String),

    #[error("failed to connect to postgres: {0}")]
    Connection(String),
}

/// Construction-time failures (bad identifier, connection refused) are fatal
/// to this source; failures on an established connection are transient and
/// left to the poll loop's own retry cadence.
impl From<DbSourceError> for SourceError {
    fn from(err: DbSourceError) -> Self {
        match err {
            DbSourceError::InvalidIdentifier(_) | DbSourceError::Connection(_) => {
                SourceError::Fatal(err.to_string())
            }
            DbSourceError::Postgres(_) | DbSourceError::RowDecode(_) => {
                SourceError::Transient(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_identifier_maps_to_fatal() {
        let err: SourceError = DbSourceError::InvalidIdentifier("1bad".to_string()).into();
        assert!(matches!(err, SourceError::Fatal(_)));
    }

    #[test]
    fn row_decode_maps_to_transient() {
        let err: SourceError = DbSourceError::RowDecode("bad task_type".to_string()).into();
        assert!(matches!(err, SourceError::Transient(_)));
    }
}
