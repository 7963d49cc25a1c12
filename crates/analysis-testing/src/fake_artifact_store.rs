//! A fake [`ArtifactStore`] backed by in-memory maps instead of real blob storage.

use analysis_core::processor::ArtifactStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct FakeArtifactStore {
    inputs: Mutex<HashMap<String, Vec<u8>>>,
    uploaded: Mutex<HashMap<String, Vec<u8>>>,
    fail_uploads: AtomicBool,
}

impl FakeArtifactStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds `key` with `bytes` so a subsequent `download_file` succeeds.
    pub fn seed_input(&self, key: &str, bytes: &[u8]) {
        self.inputs.lock().unwrap_or_else(|e| e.into_inner()).insert(key.to_string(), bytes.to_vec());
    }

    /// Makes every subsequent `upload_file` call fail.
    pub fn fail_uploads(&self) {
        self.fail_uploads.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn uploaded_keys(&self) -> Vec<String> {
        self.uploaded.lock().unwrap_or_else(|e| e.into_inner()).keys().cloned().collect()
    }
}

#[async_trait]
impl ArtifactStore for FakeArtifactStore {
    async fn upload_file(&self, key: &str, local_path: &Path) -> anyhow::Result<()> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            anyhow::bail!("fake upload failure for {key}");
        }
        let bytes = tokio::fs::read(local_path).await?;
        self.uploaded.lock().unwrap_or_else(|e| e.into_inner()).insert(key.to_string(), bytes);
        Ok(())
    }

    async fn download_file(&self, key: &str, local_path: &Path) -> anyhow::Result<()> {
        let bytes = self
            .inputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such key: {key}"))?;
        tokio::fs::write(local_path, bytes).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.inputs.lock().unwrap_or_else(|e| e.into_inner()).contains_key(key)
            || self.uploaded.lock().unwrap_or_else(|e| e.into_inner()).contains_key(key))
    }

    fn url(&self, key: &str) -> String {
        format!("fake://{key}")
    }
}
