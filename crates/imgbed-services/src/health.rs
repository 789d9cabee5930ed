//! Liveness probes for stored copies.

use async_trait::async_trait;
use imgbed_core::models::LocationWithBackend;
use imgbed_core::{AppError, BackendKind};
use std::sync::Arc;
use std::time::Duration;

use crate::registry::BackendRegistry;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn is_healthy(&self, candidate: &LocationWithBackend) -> bool;
}

/// Local copies are checked on disk; everything else with a HEAD request
/// that does not follow redirects. Any 2xx or 3xx answer counts as healthy.
pub struct DefaultHealthProbe {
    client: reqwest::Client,
    registry: Arc<BackendRegistry>,
}

impl DefaultHealthProbe {
    pub fn new(registry: Arc<BackendRegistry>, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build probe client: {}", e)))?;
        Ok(Self { client, registry })
    }

    async fn local_copy_exists(&self, candidate: &LocationWithBackend) -> bool {
        let location = &candidate.location;
        let Some(entry) = self.registry.get(location.backend_id).await else {
            tracing::debug!(
                backend_id = location.backend_id,
                "Backend not registered, local copy unreachable"
            );
            return false;
        };
        let Some(path) = entry.uploader.local_path(&location.url) else {
            return false;
        };
        tokio::fs::try_exists(&path).await.unwrap_or(false)
    }

    async fn head_ok(&self, url: &str) -> bool {
        match self.client.head(url).send().await {
            Ok(response) => {
                let status = response.status();
                status.is_success() || status.is_redirection()
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Health probe failed");
                false
            }
        }
    }
}

#[async_trait]
impl HealthProbe for DefaultHealthProbe {
    async fn is_healthy(&self, candidate: &LocationWithBackend) -> bool {
        match candidate.location.backend_kind {
            BackendKind::Local => self.local_copy_exists(candidate).await,
            _ => self.head_ok(&candidate.location.url).await,
        }
    }
}
