use crate::config::LocalConfig;
use crate::traits::{StorageError, StorageResult, UploadOutcome, UploadReader, Uploader};
use crate::BackendKind;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Local filesystem uploader
#[derive(Clone, Debug)]
pub struct LocalUploader {
    base_path: PathBuf,
}

impl LocalUploader {
    /// Create a new LocalUploader, creating the root directory if needed.
    ///
    /// # Arguments
    /// * `base_path` - Root directory for file storage (e.g., "/var/lib/imgbed/uploads")
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::Config(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalUploader { base_path })
    }

    pub async fn from_config(config: &LocalConfig) -> StorageResult<Self> {
        Self::new(&config.storage_path).await
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Convert a root-relative key to a filesystem path with security validation
    ///
    /// Rejects keys containing path traversal sequences or resolving outside
    /// the storage root.
    fn key_to_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("Storage key is empty".to_string()));
        }
        if key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
            return Err(StorageError::InvalidKey(
                "Storage key contains invalid characters".to_string(),
            ));
        }

        let path = self.base_path.join(key);

        let base_canonical = self.base_path.canonicalize().map_err(|e| {
            StorageError::Config(format!("Failed to canonicalize base path: {}", e))
        })?;

        if let Ok(canonical) = path.canonicalize() {
            if canonical.strip_prefix(&base_canonical).is_err() {
                return Err(StorageError::InvalidKey(
                    "Storage key resolves outside storage directory".to_string(),
                ));
            }
        }

        Ok(path)
    }

    /// Ensure parent directory exists
    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Uploader for LocalUploader {
    async fn upload(
        &self,
        mut reader: UploadReader,
        unique_name: &str,
        _content_length: Option<u64>,
    ) -> StorageResult<UploadOutcome> {
        let path = self.key_to_path(unique_name)?;
        let start = std::time::Instant::now();

        self.ensure_parent_dir(&path).await?;

        let mut file = fs::File::create(&path).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to create file {}: {}", path.display(), e))
        })?;

        let copied = tokio::io::copy(&mut reader, &mut file).await;
        let bytes_copied = match copied {
            Ok(n) => n,
            Err(e) => {
                drop(file);
                // Leave no partial file behind.
                let _ = fs::remove_file(&path).await;
                return Err(StorageError::UploadFailed(format!(
                    "Failed to write stream to file {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        file.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to sync file {}: {}", path.display(), e))
        })?;

        tracing::info!(
            path = %path.display(),
            key = %unique_name,
            size_bytes = bytes_copied,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage upload successful"
        );

        Ok(UploadOutcome {
            url: unique_name.to_string(),
            delete_identifier: Some(unique_name.to_string()),
        })
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn delete(&self, delete_identifier: &str) -> StorageResult<()> {
        let path = self.key_to_path(delete_identifier)?;
        let start = std::time::Instant::now();

        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(StorageError::DeleteFailed(format!(
                    "Failed to delete file {}: {}",
                    path.display(),
                    e
                )))
            }
        }

        tracing::info!(
            path = %path.display(),
            key = %delete_identifier,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage delete successful"
        );

        Ok(())
    }

    fn local_path(&self, stored: &str) -> Option<PathBuf> {
        self.key_to_path(stored).ok()
    }
}
