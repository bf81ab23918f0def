//! File-backed image storage.
//!
//! Generated images land as individual files under one directory; the
//! returned image ref is the file name. Writes go through a temp file,
//! fsync and rename, so a concurrent reader never observes a partially
//! written image.

use async_trait::async_trait;
use pagecraft_core::{EngineError, ImageStore, Result};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

/// Image store that persists each image as a file on disk.
pub struct FileImageStore {
    base_dir: PathBuf,
}

impl FileImageStore {
    /// Creates a store rooted at the given directory. The directory is
    /// created lazily on the first save.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// The directory this store writes into.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolves an image ref to its on-disk path, for callers that
    /// serve files directly.
    pub fn path(&self, image_ref: &str) -> Result<PathBuf> {
        // Refs are plain file names; reject anything traversing out of
        // the base directory.
        if image_ref.contains('/') || image_ref.contains('\\') || image_ref.contains("..") {
            return Err(EngineError::storage(format!(
                "invalid image ref: {image_ref}"
            )));
        }
        Ok(self.base_dir.join(image_ref))
    }
}

#[async_trait]
impl ImageStore for FileImageStore {
    async fn save(&self, task_id: &str, page: u32, bytes: &[u8]) -> Result<String> {
        fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|err| EngineError::storage(format!("failed to create image dir: {err}")))?;

        let id = Uuid::new_v4().simple().to_string();
        let suffix = &id[..8];
        let image_ref = format!("{task_id}_page_{page:03}_{suffix}.png");
        let path = self.base_dir.join(&image_ref);
        let tmp_path = self.base_dir.join(format!(".{image_ref}.tmp"));

        let mut tmp_file = File::create(&tmp_path)
            .await
            .map_err(|err| EngineError::storage(format!("failed to create temp file: {err}")))?;
        tmp_file
            .write_all(bytes)
            .await
            .map_err(|err| EngineError::storage(format!("failed to write image: {err}")))?;
        tmp_file
            .sync_all()
            .await
            .map_err(|err| EngineError::storage(format!("failed to sync image: {err}")))?;
        drop(tmp_file);

        fs::rename(&tmp_path, &path)
            .await
            .map_err(|err| EngineError::storage(format!("failed to finalize image: {err}")))?;

        debug!(task_id, page, image_ref = %image_ref, size = bytes.len(), "image persisted");
        Ok(image_ref)
    }

    async fn load(&self, image_ref: &str) -> Result<Vec<u8>> {
        let path = self.path(image_ref)?;
        fs::read(&path)
            .await
            .map_err(|err| EngineError::storage(format!("failed to read {image_ref}: {err}")))
    }
}
