use thiserror::Error;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ArtifactStoreError {
    #[error("artifact key '{0}' must be a relative path with no '..' segments")]
    InvalidKey(String),

    #[error("failed to create parent directory for '{key}': {source}")]
    CreateDir { key: String, source: std::io::Error },

    #[error("failed to copy file for key '{key}': {source}")]
    Copy { key: String, source: std::io::Error },

    #[error("failed to stat key '{key}': {source}")]
    Stat { key: String, source: std::io::Error },
}
