//! Re-openable byte sources.
//!
//! Fan-out uploads need one independent reader per backend. A `ByteSource`
//! names where the bytes live and hands out a fresh reader on every `open`.

use bytes::Bytes;
use std::path::PathBuf;

use crate::traits::{StorageError, StorageResult, UploadReader};

#[derive(Debug, Clone)]
pub enum ByteSource {
    /// A file on local disk (spooled upload, or a local backend's copy).
    File(PathBuf),
    /// An in-memory buffer; clones share the allocation.
    Memory(Bytes),
}

impl ByteSource {
    /// Open a new reader positioned at the start.
    pub async fn open(&self) -> StorageResult<UploadReader> {
        match self {
            ByteSource::File(path) => {
                let file = tokio::fs::File::open(path).await.map_err(|e| {
                    StorageError::UploadFailed(format!("Failed to open {}: {}", path.display(), e))
                })?;
                Ok(Box::pin(file))
            }
            ByteSource::Memory(bytes) => Ok(Box::pin(std::io::Cursor::new(bytes.clone()))),
        }
    }

    /// Size in bytes.
    pub async fn len(&self) -> StorageResult<u64> {
        match self {
            ByteSource::File(path) => Ok(tokio::fs::metadata(path).await?.len()),
            ByteSource::Memory(bytes) => Ok(bytes.len() as u64),
        }
    }

    pub async fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len().await? == 0)
    }
}
