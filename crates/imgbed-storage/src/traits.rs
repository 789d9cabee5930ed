//! Uploader abstraction trait
//!
//! This module defines the Uploader trait that all storage backends must implement.

use crate::BackendKind;
use async_trait::async_trait;
use imgbed_core::AppError;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached (DNS, connect, timeout, TLS).
    #[error("Network error: {0}")]
    Network(String),

    /// The backend answered but refused the request.
    #[error("Rejected by backend: {0}")]
    Rejected(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Attribute this failure to a backend.
    pub fn into_app_error(self, backend_id: i64) -> AppError {
        match self {
            StorageError::Config(msg) => AppError::InvalidInput(msg),
            StorageError::InvalidKey(msg) => AppError::InvalidInput(msg),
            other => AppError::Upstream {
                backend_id,
                message: other.to_string(),
            },
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Config(msg) | StorageError::InvalidKey(msg) => {
                AppError::InvalidInput(msg)
            }
            StorageError::NotFound(msg) => AppError::NotFound(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

/// Byte stream handed to an uploader. Consumed exactly once.
pub type UploadReader = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Public URL, or the path relative to the storage root for local backends.
    pub url: String,
    /// Identifier for a later delete when the URL alone is not enough.
    pub delete_identifier: Option<String>,
}

/// Uploader abstraction trait
///
/// All storage backends (local, object store, third-party hosts) implement
/// this trait. The registry holds them as `Arc<dyn Uploader>` so the
/// distribution and resolution code never depends on a concrete kind.
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Upload a stream under `unique_name`.
    ///
    /// The reader is consumed until EOF and never re-read; callers that
    /// target several backends open one reader per backend.
    async fn upload(
        &self,
        reader: UploadReader,
        unique_name: &str,
        content_length: Option<u64>,
    ) -> StorageResult<UploadOutcome>;

    /// Upload the contents of a local file. The file handle is dropped
    /// before this returns, on success and on error.
    async fn upload_from_path(&self, path: &Path, unique_name: &str) -> StorageResult<UploadOutcome> {
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to open {}: {}", path.display(), e))
        })?;
        let content_length = file.metadata().await.ok().map(|m| m.len());
        self.upload(Box::pin(file), unique_name, content_length).await
    }

    /// Get the storage backend kind
    fn kind(&self) -> BackendKind;

    /// Delete an object. Deleting something that is already gone succeeds.
    async fn delete(&self, delete_identifier: &str) -> StorageResult<()>;

    /// On-disk path of a stored object, for backends that keep files locally.
    fn local_path(&self, _stored: &str) -> Option<PathBuf> {
        None
    }
}
