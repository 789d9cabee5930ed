//! Content hashing for deduplication.

use imgbed_core::AppError;
use imgbed_storage::ByteSource;
use md5::{Digest, Md5};
use tokio::io::AsyncReadExt;

const READ_CHUNK: usize = 64 * 1024;

/// MD5 of the source as 32 lowercase hex characters, read in chunks.
pub async fn content_hash(source: &ByteSource) -> Result<String, AppError> {
    let mut reader = source.open().await.map_err(|e| AppError::InternalWithSource {
        message: "Failed to open upload for hashing".to_string(),
        source: e.into(),
    })?;

    let mut hasher = Md5::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
