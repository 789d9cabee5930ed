//! Backend registry
//!
//! Maps backend ids to live uploaders. Readers take a shared lock and clone
//! an `Arc`; `refresh` builds the complete replacement map without holding
//! the lock and swaps it in one write, so readers never observe a partly
//! rebuilt registry.

use imgbed_core::models::Backend;
use imgbed_core::AppError;
use imgbed_db::BackendStore;
use imgbed_storage::{Uploader, UploaderFactory};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// A backend row together with the uploader built from its configuration.
pub struct RegisteredBackend {
    pub backend: Backend,
    pub uploader: Arc<dyn Uploader>,
}

impl std::fmt::Debug for RegisteredBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredBackend")
            .field("backend_id", &self.backend.id)
            .field("backend_name", &self.backend.name)
            .field("kind", &self.uploader.kind())
            .finish()
    }
}

pub struct BackendRegistry {
    store: Arc<dyn BackendStore>,
    factory: Arc<dyn UploaderFactory>,
    entries: RwLock<HashMap<i64, Arc<RegisteredBackend>>>,
}

impl BackendRegistry {
    /// An empty registry. Call [`refresh`](Self::refresh) to populate it.
    pub fn new(store: Arc<dyn BackendStore>, factory: Arc<dyn UploaderFactory>) -> Self {
        Self {
            store,
            factory,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Reload every backend row and rebuild its uploader.
    ///
    /// Rows whose configuration does not build are skipped with a warning.
    /// If the rows cannot be loaded at all the current map is kept.
    pub async fn refresh(&self) -> Result<usize, AppError> {
        let start = Instant::now();
        let backends = self.store.list_backends().await?;

        let mut next = HashMap::with_capacity(backends.len());
        for backend in backends {
            match self.factory.build(backend.kind, &backend.config).await {
                Ok(uploader) => {
                    next.insert(backend.id, Arc::new(RegisteredBackend { backend, uploader }));
                }
                Err(e) => {
                    tracing::warn!(
                        backend_id = backend.id,
                        backend_name = %backend.name,
                        kind = %backend.kind,
                        error = %e,
                        "Skipping backend with unusable configuration"
                    );
                }
            }
        }

        let count = next.len();
        *self.entries.write().await = next;

        tracing::info!(
            backends = count,
            duration_ms = start.elapsed().as_millis() as u64,
            "Backend registry refreshed"
        );
        Ok(count)
    }

    /// Refresh in the background. Failures are logged.
    pub fn spawn_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = registry.refresh().await {
                tracing::error!(error = %e, "Background registry refresh failed");
            }
        })
    }

    pub async fn get(&self, id: i64) -> Option<Arc<RegisteredBackend>> {
        self.entries.read().await.get(&id).cloned()
    }

    /// Backends accepting new uploads, lowest priority number first, ties by id.
    pub async fn list_active_uploaders(&self) -> Vec<Arc<RegisteredBackend>> {
        let mut active: Vec<Arc<RegisteredBackend>> = self
            .entries
            .read()
            .await
            .values()
            .filter(|entry| entry.backend.accepts_uploads)
            .cloned()
            .collect();
        active.sort_by_key(|entry| (entry.backend.priority, entry.backend.id));
        active
    }

    /// Every registered backend, ordered by id.
    pub async fn list(&self) -> Vec<Arc<RegisteredBackend>> {
        let mut all: Vec<Arc<RegisteredBackend>> =
            self.entries.read().await.values().cloned().collect();
        all.sort_by_key(|entry| entry.backend.id);
        all
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
