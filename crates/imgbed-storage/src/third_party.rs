//! SM.MS-style third-party image host.
//!
//! Upload: multipart `POST {base}upload` with the file in field `smfile` and
//! the API token in `Authorization`. The JSON answer carries the public URL
//! and a deletion hash, which becomes the delete identifier.
//! Delete: `GET {base}delete/{hash}`.

use crate::config::ThirdPartyConfig;
use crate::traits::{StorageError, StorageResult, UploadOutcome, UploadReader, Uploader};
use crate::BackendKind;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tokio::io::AsyncReadExt;

const UPLOAD_FIELD: &str = "smfile";
/// Returned by the host when the same file was uploaded before; `images`
/// then holds the existing URL.
const CODE_IMAGE_REPEATED: &str = "image_repeated";

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<UploadData>,
    #[serde(default)]
    images: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadData {
    url: String,
    #[serde(default)]
    hash: Option<String>,
}

impl ApiResponse {
    fn message_or(&self, fallback: &str) -> String {
        self.message
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| fallback.to_string())
    }
}

/// Third-party image host uploader
#[derive(Clone, Debug)]
pub struct ThirdPartyUploader {
    client: Client,
    api_root: String,
    token: String,
}

impl ThirdPartyUploader {
    pub fn new(config: &ThirdPartyConfig, timeout: Duration) -> StorageResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_root: config.api_root(),
            token: config.token.clone(),
        })
    }

    /// Verify the configured token against the host's profile endpoint.
    pub async fn check_token(&self) -> StorageResult<()> {
        let response = self
            .client
            .post(format!("{}profile", self.api_root))
            .header("Authorization", &self.token)
            .multipart(Form::new())
            .send()
            .await
            .map_err(|e| StorageError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Rejected(format!(
                "token verification failed with status {}: {}",
                status, body
            )));
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| StorageError::Rejected(format!("invalid profile response: {}", e)))?;
        if !parsed.success {
            return Err(StorageError::Rejected(
                parsed.message_or("token verification failed"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Uploader for ThirdPartyUploader {
    async fn upload(
        &self,
        mut reader: UploadReader,
        unique_name: &str,
        content_length: Option<u64>,
    ) -> StorageResult<UploadOutcome> {
        let start = std::time::Instant::now();

        let capacity = usize::try_from(content_length.unwrap_or(0)).unwrap_or(0);
        let mut buffer = Vec::with_capacity(capacity);
        reader.read_to_end(&mut buffer).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to read from stream: {}", e))
        })?;
        drop(reader);
        let size = buffer.len();

        let part = Part::bytes(buffer).file_name(unique_name.to_string());
        let form = Form::new().part(UPLOAD_FIELD, part);

        let response = self
            .client
            .post(format!("{}upload", self.api_root))
            .header("Authorization", &self.token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    name = %unique_name,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Third-party upload request failed"
                );
                StorageError::Network(e.to_string())
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Rejected(format!(
                "upload failed with status {}: {}",
                status, body
            )));
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| StorageError::Rejected(format!("invalid upload response: {}", e)))?;

        if !parsed.success {
            if parsed.code.as_deref() == Some(CODE_IMAGE_REPEATED) {
                if let Some(existing) = parsed.images.clone().filter(|u| !u.is_empty()) {
                    // The host keeps one copy per account; we never got its
                    // delete hash, so this location cannot be deleted remotely.
                    tracing::warn!(
                        name = %unique_name,
                        url = %existing,
                        "Third-party host already had this image"
                    );
                    return Ok(UploadOutcome {
                        url: existing,
                        delete_identifier: None,
                    });
                }
            }
            return Err(StorageError::Rejected(parsed.message_or("unknown upload error")));
        }

        let data = parsed.data.ok_or_else(|| {
            StorageError::Rejected("upload response is missing 'data'".to_string())
        })?;

        tracing::info!(
            name = %unique_name,
            url = %data.url,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Third-party upload successful"
        );

        Ok(UploadOutcome {
            url: data.url,
            delete_identifier: data.hash.filter(|h| !h.is_empty()),
        })
    }

    fn kind(&self) -> BackendKind {
        BackendKind::ThirdPartyHost
    }

    async fn delete(&self, delete_identifier: &str) -> StorageResult<()> {
        if delete_identifier.is_empty() {
            return Err(StorageError::InvalidKey("delete hash is empty".to_string()));
        }
        // Rows without a hash fall back to the URL, which the host cannot delete by.
        if delete_identifier.starts_with("http://") || delete_identifier.starts_with("https://") {
            tracing::warn!(
                identifier = %delete_identifier,
                "No delete hash recorded, leaving remote copy in place"
            );
            return Ok(());
        }

        let response = self
            .client
            .get(format!("{}delete/{}", self.api_root, delete_identifier))
            .header("Authorization", &self.token)
            .send()
            .await
            .map_err(|e| StorageError::Network(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }

        let status = response.status();
        let parsed: ApiResponse = response.json().await.map_err(|e| {
            StorageError::Rejected(format!(
                "invalid delete response (status {}): {}",
                status, e
            ))
        })?;

        if !parsed.success {
            let message = parsed.message_or("unknown delete error");
            if message.to_lowercase().contains("already deleted") {
                return Ok(());
            }
            return Err(StorageError::Rejected(message));
        }

        tracing::info!(hash = %delete_identifier, "Third-party delete successful");
        Ok(())
    }
}
