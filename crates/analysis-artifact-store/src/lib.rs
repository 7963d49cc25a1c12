//! Filesystem-backed [`ArtifactStore`] (spec C8): every key is rooted under
//! `root_dir` and copied to or from local disk with `tokio::fs`. A real
//! object-store-backed implementation (S3, GCS) would swap the file copies
//! below for a client SDK call behind the same trait.

mod error;

pub use error::ArtifactStoreError;

use analysis_core::processor::ArtifactStore;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Rejects absolute paths and `..` segments so a task's artifact key can
/// never escape `root_dir`.
fn validate_key(key: &str) -> Result<(), ArtifactStoreError> {
    let path = Path::new(key);
    if path.is_absolute() || path.components().any(|c| c.as_os_str() == "..") {
        return Err(ArtifactStoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct FilesystemArtifactStore {
    root_dir: PathBuf,
}

impl FilesystemArtifactStore {
    #[must_use]
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    fn resolved(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }
}

#[async_trait]
impl ArtifactStore for FilesystemArtifactStore {
    async fn upload_file(&self, key: &str, local_path: &Path) -> anyhow::Result<()> {
        validate_key(key)?;
        let dest = self.resolved(key);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ArtifactStoreError::CreateDir {
                    key: key.to_string(),
                    source,
                })?;
        }
        tokio::fs::copy(local_path, &dest)
            .await
            .map_err(|source| ArtifactStoreError::Copy {
                key: key.to_string(),
                source,
            })?;
        debug!(key, path = %dest.display(), "artifact uploaded");
        Ok(())
    }

    async fn download_file(&self, key: &str, local_path: &Path) -> anyhow::Result<()> {
        validate_key(key)?;
        let src = self.resolved(key);
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ArtifactStoreError::CreateDir {
                    key: key.to_string(),
                    source,
                })?;
        }
        tokio::fs::copy(&src, local_path)
            .await
            .map_err(|source| ArtifactStoreError::Copy {
                key: key.to_string(),
                source,
            })?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        validate_key(key)?;
        match tokio::fs::metadata(self.resolved(key)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(ArtifactStoreError::Stat {
                key: key.to_string(),
                source,
            }
            .into()),
        }
    }

    fn url(&self, key: &str) -> String {
        format!("file://{}", self.resolved(key).display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_file_through_upload_and_download() {
        let root = tempfile::tempdir().unwrap();
        let store = FilesystemArtifactStore::new(root.path());

        let src_dir = tempfile::tempdir().unwrap();
        let src_file = src_dir.path().join("flamegraph.json.gz");
        tokio::fs::write(&src_file, b"payload").await.unwrap();

        store.upload_file("U1/flamegraph.json.gz", &src_file).await.unwrap();
        assert!(store.exists("U1/flamegraph.json.gz").await.unwrap());

        let dest_file = src_dir.path().join("downloaded");
        store.download_file("U1/flamegraph.json.gz", &dest_file).await.unwrap();
        assert_eq!(tokio::fs::read(&dest_file).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn missing_key_reports_not_existing_rather_than_erroring() {
        let root = tempfile::tempdir().unwrap();
        let store = FilesystemArtifactStore::new(root.path());
        assert!(!store.exists("missing/key").await.unwrap());
    }

    #[tokio::test]
    async fn rejects_keys_that_escape_root_dir() {
        let root = tempfile::tempdir().unwrap();
        let store = FilesystemArtifactStore::new(root.path());
        let err = store.exists("../escape").await.unwrap_err();
        assert!(err.to_string().contains("must be a relative path"));
    }

    #[test]
    fn url_is_a_file_scheme_path() {
        let store = FilesystemArtifactStore::new("/data/artifacts");
        assert_eq!(store.url("U1/flamegraph.json.gz"), "file:///data/artifacts/U1/flamegraph.json.gz");
    }
}
