//! Background bulk delete and bulk backfill.
//!
//! Each call registers a running task, returns its id and finishes the work
//! in a spawned task. Items are processed one at a time; a failing item is
//! logged and counted as done. There is no cancellation.

use imgbed_core::models::{ImageWithLocations, OwnerScope, TaskKind};
use imgbed_core::{AppError, BackendKind};
use imgbed_db::ImageStore;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::images::{unique_name, ImageService};
use crate::registry::{BackendRegistry, RegisteredBackend};
use crate::tasks::TaskTracker;

pub const TARGET_BACKEND_NOT_FOUND: &str = "Target backend not found";

#[derive(Clone)]
pub struct BatchRunner {
    images: Arc<ImageService>,
    store: Arc<dyn ImageStore>,
    registry: Arc<BackendRegistry>,
    tasks: Arc<TaskTracker>,
}

impl BatchRunner {
    pub fn new(
        images: Arc<ImageService>,
        store: Arc<dyn ImageStore>,
        registry: Arc<BackendRegistry>,
        tasks: Arc<TaskTracker>,
    ) -> Self {
        Self {
            images,
            store,
            registry,
            tasks,
        }
    }

    pub fn tasks(&self) -> &Arc<TaskTracker> {
        &self.tasks
    }

    /// Delete every listed image in the background.
    pub async fn batch_delete(&self, public_ids: Vec<Uuid>, scope: OwnerScope) -> Result<Uuid, AppError> {
        self.check_ownership(&public_ids, scope).await?;
        let task_id = self.tasks.start(TaskKind::BatchDelete, public_ids.len()).await;

        let runner = self.clone();
        tokio::spawn(async move {
            for (i, public_id) in public_ids.iter().enumerate() {
                if let Err(e) = runner.images.delete_image(*public_id, scope).await {
                    tracing::warn!(task_id = %task_id, public_id = %public_id, error = %e, "Batch delete item failed");
                }
                runner.tasks.set_progress(task_id, i + 1).await;
            }
            runner.tasks.complete(task_id).await;
        });

        Ok(task_id)
    }

    /// Copy every listed image to `backend_id` in the background, sourcing
    /// the bytes from the image's local copy. Images already on the target
    /// or without a readable local copy are skipped.
    pub async fn batch_backfill_to_backend(
        &self,
        public_ids: Vec<Uuid>,
        backend_id: i64,
        scope: OwnerScope,
    ) -> Result<Uuid, AppError> {
        self.check_ownership(&public_ids, scope).await?;
        let task_id = self.tasks.start(TaskKind::BatchBackfill, public_ids.len()).await;

        let runner = self.clone();
        tokio::spawn(async move {
            let Some(target) = runner.registry.get(backend_id).await else {
                runner.tasks.fail(task_id, TARGET_BACKEND_NOT_FOUND).await;
                return;
            };

            for (i, public_id) in public_ids.iter().enumerate() {
                if let Err(e) = runner.backfill_one(*public_id, scope, &target).await {
                    tracing::warn!(
                        task_id = %task_id,
                        public_id = %public_id,
                        backend_id,
                        error = %e,
                        "Batch backfill item failed"
                    );
                }
                runner.tasks.set_progress(task_id, i + 1).await;
            }
            runner.tasks.complete(task_id).await;
        });

        Ok(task_id)
    }

    async fn backfill_one(
        &self,
        public_id: Uuid,
        scope: OwnerScope,
        target: &Arc<RegisteredBackend>,
    ) -> Result<(), AppError> {
        let image = self
            .store
            .get_image(public_id, scope.owner_filter())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Image {} not found", public_id)))?;

        if image.backend_ids().contains(&target.backend.id) {
            tracing::debug!(public_id = %public_id, "Already on target backend");
            return Ok(());
        }

        let Some(path) = self.local_copy(&image).await else {
            tracing::info!(public_id = %public_id, "No local copy to backfill from, skipping");
            return Ok(());
        };

        let name = unique_name(image.image.public_id, &image.image.original_name);
        self.images
            .distributor()
            .store_from_path(&path, &name, image.image.id, target)
            .await?;
        Ok(())
    }

    /// First local copy that exists on disk.
    async fn local_copy(&self, image: &ImageWithLocations) -> Option<PathBuf> {
        for entry in &image.locations {
            let location = &entry.location;
            if location.backend_kind != BackendKind::Local {
                continue;
            }
            let Some(registered) = self.registry.get(location.backend_id).await else {
                continue;
            };
            let Some(path) = registered.uploader.local_path(&location.url) else {
                continue;
            };
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Some(path);
            }
        }
        None
    }

    /// Non-admin callers must own every listed image.
    async fn check_ownership(&self, public_ids: &[Uuid], scope: OwnerScope) -> Result<(), AppError> {
        let OwnerScope::Owner(owner_id) = scope else {
            return Ok(());
        };
        let distinct: Vec<Uuid> = public_ids
            .iter()
            .copied()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let owned = self.store.count_owned(&distinct, owner_id).await?;
        if owned != distinct.len() as i64 {
            return Err(AppError::NotFound(
                "One or more images not found or not owned by caller".to_string(),
            ));
        }
        Ok(())
    }
}
