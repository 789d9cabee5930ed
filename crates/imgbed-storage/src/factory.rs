use crate::config::UploaderConfig;
use crate::{BackendKind, StorageError, StorageResult, Uploader};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Timeout for calls to third-party hosting APIs.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

#[cfg(feature = "storage-local")]
use crate::LocalUploader;
#[cfg(feature = "storage-object-store")]
use crate::ObjectStoreUploader;
#[cfg(feature = "storage-third-party")]
use crate::ThirdPartyUploader;

/// Builds live uploaders from persisted backend configuration.
#[async_trait]
pub trait UploaderFactory: Send + Sync {
    async fn build(
        &self,
        kind: BackendKind,
        config: &serde_json::Value,
    ) -> StorageResult<Arc<dyn Uploader>>;
}

/// Default factory: parses the kind's typed config and constructs the
/// matching uploader.
#[derive(Debug, Clone)]
pub struct ConfigUploaderFactory {
    upstream_timeout: Duration,
}

impl ConfigUploaderFactory {
    pub fn new(upstream_timeout: Duration) -> Self {
        Self { upstream_timeout }
    }
}

impl Default for ConfigUploaderFactory {
    fn default() -> Self {
        Self::new(DEFAULT_UPSTREAM_TIMEOUT)
    }
}

#[async_trait]
impl UploaderFactory for ConfigUploaderFactory {
    async fn build(
        &self,
        kind: BackendKind,
        config: &serde_json::Value,
    ) -> StorageResult<Arc<dyn Uploader>> {
        create_uploader(&UploaderConfig::parse(kind, config)?, self.upstream_timeout).await
    }
}

/// Create an uploader from an already parsed configuration
pub async fn create_uploader(
    config: &UploaderConfig,
    upstream_timeout: Duration,
) -> StorageResult<Arc<dyn Uploader>> {
    match config {
        #[cfg(feature = "storage-local")]
        UploaderConfig::Local(local) => {
            let uploader = LocalUploader::from_config(local).await?;
            Ok(Arc::new(uploader))
        }

        #[cfg(not(feature = "storage-local"))]
        UploaderConfig::Local(_) => Err(StorageError::Config(
            "Local storage backend not available (storage-local feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-object-store")]
        UploaderConfig::ObjectStore(store) => {
            let uploader = ObjectStoreUploader::new(store)?;
            Ok(Arc::new(uploader))
        }

        #[cfg(not(feature = "storage-object-store"))]
        UploaderConfig::ObjectStore(_) => Err(StorageError::Config(
            "Object store backend not available (storage-object-store feature not enabled)"
                .to_string(),
        )),

        #[cfg(feature = "storage-third-party")]
        UploaderConfig::ThirdParty(host) => {
            let uploader = ThirdPartyUploader::new(host, upstream_timeout)?;
            Ok(Arc::new(uploader))
        }

        #[cfg(not(feature = "storage-third-party"))]
        UploaderConfig::ThirdParty(_) => Err(StorageError::Config(
            "Third-party host backend not available (storage-third-party feature not enabled)"
                .to_string(),
        )),
    }
}

#[cfg(all(test, feature = "storage-local"))]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn builds_local_uploader_and_creates_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("uploads");
        let factory = ConfigUploaderFactory::default();

        let uploader = factory
            .build(
                BackendKind::Local,
                &json!({"storagePath": root.to_string_lossy()}),
            )
            .await
            .unwrap();

        assert_eq!(uploader.kind(), BackendKind::Local);
        assert!(root.is_dir());
    }

    #[tokio::test]
    async fn rejects_config_of_another_kind() {
        let factory = ConfigUploaderFactory::default();
        let result = factory
            .build(BackendKind::Local, &json!({"bucket": "imgs"}))
            .await;
        assert!(matches!(result, Err(StorageError::Config(_))));
    }
}
