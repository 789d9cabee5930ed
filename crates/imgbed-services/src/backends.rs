//! Backend administration.
//!
//! Every mutation is followed by a background registry refresh; callers do
//! not wait for it, so new configuration takes effect shortly after.

use imgbed_core::models::{Backend, BackendFlag, NewBackend};
use imgbed_core::AppError;
use imgbed_db::BackendStore;
use imgbed_storage::UploaderConfig;
use std::sync::Arc;

use crate::registry::BackendRegistry;

pub struct BackendAdmin {
    store: Arc<dyn BackendStore>,
    registry: Arc<BackendRegistry>,
}

impl BackendAdmin {
    pub fn new(store: Arc<dyn BackendStore>, registry: Arc<BackendRegistry>) -> Self {
        Self { store, registry }
    }

    pub async fn list_backends(&self) -> Result<Vec<Backend>, AppError> {
        self.store.list_backends().await
    }

    pub async fn get_backend(&self, id: i64) -> Result<Backend, AppError> {
        self.store
            .get_backend(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Backend {} not found", id)))
    }

    #[tracing::instrument(skip(self, backend), fields(name = %backend.name, kind = %backend.kind))]
    pub async fn create_backend(&self, backend: NewBackend) -> Result<Backend, AppError> {
        let backend = validate(backend)?;
        let created = self.store.create_backend(backend).await?;
        tracing::info!(backend_id = created.id, "Backend created");
        self.registry.spawn_refresh();
        Ok(created)
    }

    #[tracing::instrument(skip(self, backend), fields(backend_id = id))]
    pub async fn update_backend(&self, id: i64, backend: NewBackend) -> Result<Backend, AppError> {
        let backend = validate(backend)?;
        let updated = self
            .store
            .update_backend(id, backend)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Backend {} not found", id)))?;
        tracing::info!("Backend updated");
        self.registry.spawn_refresh();
        Ok(updated)
    }

    #[tracing::instrument(skip(self), fields(backend_id = id))]
    pub async fn set_backend_flag(
        &self,
        id: i64,
        flag: BackendFlag,
        value: bool,
    ) -> Result<Backend, AppError> {
        let updated = self
            .store
            .set_backend_flag(id, flag, value)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Backend {} not found", id)))?;
        tracing::info!(flag = %flag, value, "Backend flag changed");
        self.registry.spawn_refresh();
        Ok(updated)
    }

    /// Refused with `Conflict` while storage locations still point at the backend.
    #[tracing::instrument(skip(self), fields(backend_id = id))]
    pub async fn delete_backend(&self, id: i64) -> Result<(), AppError> {
        let referenced = self.store.count_locations_for_backend(id).await?;
        if referenced > 0 {
            return Err(AppError::Conflict(format!(
                "Backend {} is still referenced by {} storage locations",
                id, referenced
            )));
        }
        if !self.store.delete_backend(id).await? {
            return Err(AppError::NotFound(format!("Backend {} not found", id)));
        }
        tracing::info!("Backend deleted");
        self.registry.spawn_refresh();
        Ok(())
    }
}

fn validate(mut backend: NewBackend) -> Result<NewBackend, AppError> {
    backend.name = backend.name.trim().to_string();
    if backend.name.is_empty() {
        return Err(AppError::InvalidInput("Backend name must not be empty".to_string()));
    }
    UploaderConfig::parse(backend.kind, &backend.config).map_err(|e| {
        AppError::InvalidInput(format!("Invalid {} configuration: {}", backend.kind, e))
    })?;
    Ok(backend)
}
