//! Local filesystem [`ArtifactStore`] — the one backend this repository
//! ships. Grounded in the teacher's `mqk-artifacts::ensure_file_exists_with`:
//! create parent directories, write the whole file, done. No multipart
//! upload, no retries — those belong to an object-store adapter this
//! repository does not implement (§1 Non-goals).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::{ArtifactStore, WriteOutcome};

pub struct LocalFsArtifactStore {
    base_dir: PathBuf,
}

impl LocalFsArtifactStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl ArtifactStore for LocalFsArtifactStore {
    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> anyhow::Result<WriteOutcome> {
        let full_path = self.base_dir.join(key);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&full_path, bytes).await?;

        Ok(WriteOutcome {
            // No presigning locally: the locator is the file itself. A real
            // object-store adapter would mint a time-limited HTTP URL here.
            url: Some(format!("file://{}", full_path.display())),
            size_bytes: bytes.len() as i64,
        })
    }
}
