use crate::config::ObjectStoreConfig;
use crate::traits::{StorageError, StorageResult, UploadOutcome, UploadReader, Uploader};
use crate::BackendKind;
use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::Error as ObjectStoreError;
use object_store::{ObjectStoreExt, PutPayload, Result as ObjectResult};
use tokio::io::AsyncReadExt;

/// S3-compatible object store uploader
#[derive(Clone)]
pub struct ObjectStoreUploader {
    store: AmazonS3,
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
    public_url: Option<String>,
    prefix: Option<String>,
}

impl ObjectStoreUploader {
    /// Create a new ObjectStoreUploader from a backend configuration.
    ///
    /// Explicit access keys win over ambient AWS credentials. A custom
    /// endpoint (e.g. "http://localhost:9000" for MinIO) switches URLs to
    /// path style.
    pub fn new(config: &ObjectStoreConfig) -> StorageResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(config.region.clone())
            .with_bucket_name(config.bucket.clone());

        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.access_key_secret) {
            builder = builder
                .with_access_key_id(key_id.clone())
                .with_secret_access_key(secret.clone());
        }

        if let Some(ref endpoint) = config.endpoint {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let prefix = config
            .upload_path
            .as_deref()
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());

        Ok(ObjectStoreUploader {
            store,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint_url: config.endpoint.clone(),
            public_url: config.public_url.clone(),
            prefix,
        })
    }

    fn object_key(&self, unique_name: &str) -> String {
        object_key(self.prefix.as_deref(), unique_name)
    }

    fn generate_url(&self, key: &str) -> String {
        public_url_for(
            self.public_url.as_deref(),
            self.endpoint_url.as_deref(),
            &self.bucket,
            &self.region,
            key,
        )
    }
}

fn object_key(prefix: Option<&str>, unique_name: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}/{}", prefix, unique_name),
        None => unique_name.to_string(),
    }
}

/// Public URL of an object.
///
/// A configured public base (CDN, custom domain) wins. Otherwise a custom
/// endpoint gives a path-style URL `{endpoint}/{bucket}/{key}`, and plain AWS
/// gives `https://{bucket}.s3.{region}.amazonaws.com/{key}`.
fn public_url_for(
    public_url: Option<&str>,
    endpoint: Option<&str>,
    bucket: &str,
    region: &str,
    key: &str,
) -> String {
    if let Some(base) = public_url.filter(|b| !b.is_empty()) {
        format!("{}/{}", base.trim_end_matches('/'), key)
    } else if let Some(endpoint) = endpoint.filter(|e| !e.is_empty()) {
        format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, key)
    } else {
        format!("https://{}.s3.{}.amazonaws.com/{}", bucket, region, key)
    }
}

/// Transport failures surface as `Network`, refusals by the store as
/// `Rejected`; anything else falls back to the operation's own error.
fn classify(err: ObjectStoreError, fallback: fn(String) -> StorageError) -> StorageError {
    match err {
        e @ ObjectStoreError::Generic { .. } => StorageError::Network(e.to_string()),
        e @ (ObjectStoreError::PermissionDenied { .. }
        | ObjectStoreError::Unauthenticated { .. }
        | ObjectStoreError::Precondition { .. }
        | ObjectStoreError::AlreadyExists { .. }
        | ObjectStoreError::NotSupported { .. }
        | ObjectStoreError::InvalidPath { .. }) => StorageError::Rejected(e.to_string()),
        other => fallback(other.to_string()),
    }
}

#[async_trait]
impl Uploader for ObjectStoreUploader {
    async fn upload(
        &self,
        mut reader: UploadReader,
        unique_name: &str,
        content_length: Option<u64>,
    ) -> StorageResult<UploadOutcome> {
        let key = self.object_key(unique_name);
        let start = std::time::Instant::now();

        // Images are bounded by the upload size limit, so a single put is enough.
        let capacity = usize::try_from(content_length.unwrap_or(0)).unwrap_or(0);
        let mut buffer = Vec::with_capacity(capacity);
        reader.read_to_end(&mut buffer).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to read from stream: {}", e))
        })?;
        drop(reader);

        let size = buffer.len() as u64;
        let location = Path::from(key.clone());

        let result: ObjectResult<_> = self
            .store
            .put(&location, PutPayload::from(Bytes::from(buffer)))
            .await;

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %key,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Object store upload failed"
            );
            classify(e, StorageError::UploadFailed)
        })?;

        let url = self.generate_url(&key);

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Object store upload successful"
        );

        Ok(UploadOutcome {
            url,
            delete_identifier: Some(key),
        })
    }

    fn kind(&self) -> BackendKind {
        BackendKind::ObjectStore
    }

    async fn delete(&self, delete_identifier: &str) -> StorageResult<()> {
        let start = std::time::Instant::now();
        let location = Path::from(delete_identifier.to_string());

        let result: ObjectResult<_> = self.store.delete(&location).await;

        match result {
            Ok(_) | Err(ObjectStoreError::NotFound { .. }) => {}
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %delete_identifier,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Object store delete failed"
                );
                return Err(classify(e, StorageError::DeleteFailed));
            }
        }

        tracing::info!(
            bucket = %self.bucket,
            key = %delete_identifier,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Object store delete successful"
        );

        Ok(())
    }
}
