//! Fan-out of one upload to several backends.

use imgbed_core::models::{NewStorageLocation, StorageLocation};
use imgbed_core::AppError;
use imgbed_db::LocationStore;
use imgbed_storage::{ByteSource, UploadOutcome};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;

use crate::registry::RegisteredBackend;

#[derive(Clone)]
pub struct Distributor {
    locations: Arc<dyn LocationStore>,
}

impl Distributor {
    pub fn new(locations: Arc<dyn LocationStore>) -> Self {
        Self { locations }
    }

    /// Upload `source` to every target concurrently and record one storage
    /// location per successful upload.
    ///
    /// Each task opens its own reader. Failed backends are logged and left
    /// out of the result; deciding what zero successes means is up to the
    /// caller. Locations come back ordered by id.
    #[tracing::instrument(skip(self, source, targets), fields(targets = targets.len()))]
    pub async fn distribute(
        &self,
        source: &ByteSource,
        unique_name: &str,
        image_id: i64,
        targets: &[Arc<RegisteredBackend>],
    ) -> Vec<StorageLocation> {
        let mut uploads = JoinSet::new();
        for target in targets {
            let target = Arc::clone(target);
            let source = source.clone();
            let unique_name = unique_name.to_string();
            let locations = Arc::clone(&self.locations);
            uploads.spawn(async move {
                let result =
                    upload_one(locations.as_ref(), &source, &unique_name, image_id, &target).await;
                (target, result)
            });
        }

        let mut created = Vec::with_capacity(targets.len());
        while let Some(joined) = uploads.join_next().await {
            match joined {
                Ok((_, Ok(location))) => created.push(location),
                Ok((target, Err(e))) => {
                    tracing::warn!(
                        backend_id = target.backend.id,
                        backend_name = %target.backend.name,
                        kind = %target.uploader.kind(),
                        image_id,
                        error = %e,
                        "Upload to backend failed"
                    );
                }
                Err(e) => {
                    tracing::error!(image_id, error = %e, "Upload task aborted");
                }
            }
        }

        created.sort_by_key(|location| location.id);
        created
    }

    /// Upload one local file to a single backend and record its location.
    #[tracing::instrument(skip(self, target), fields(backend_id = target.backend.id))]
    pub async fn store_from_path(
        &self,
        path: &Path,
        unique_name: &str,
        image_id: i64,
        target: &RegisteredBackend,
    ) -> Result<StorageLocation, AppError> {
        let outcome = target
            .uploader
            .upload_from_path(path, unique_name)
            .await
            .map_err(|e| e.into_app_error(target.backend.id))?;
        let location = record_location(self.locations.as_ref(), image_id, target, outcome).await?;
        tracing::info!(image_id, location_id = location.id, "Stored local file on backend");
        Ok(location)
    }
}

async fn upload_one(
    locations: &dyn LocationStore,
    source: &ByteSource,
    unique_name: &str,
    image_id: i64,
    target: &RegisteredBackend,
) -> Result<StorageLocation, AppError> {
    let backend_id = target.backend.id;
    let start = Instant::now();

    let content_length = source.len().await.ok();
    let reader = source
        .open()
        .await
        .map_err(|e| e.into_app_error(backend_id))?;
    let outcome = target
        .uploader
        .upload(reader, unique_name, content_length)
        .await
        .map_err(|e| e.into_app_error(backend_id))?;

    let location = record_location(locations, image_id, target, outcome).await?;
    tracing::info!(
        backend_id,
        backend_name = %target.backend.name,
        image_id,
        location_id = location.id,
        duration_ms = start.elapsed().as_millis() as u64,
        "Uploaded to backend"
    );
    Ok(location)
}

/// Record an uploaded object as a location of `image_id` on `target`.
async fn record_location(
    locations: &dyn LocationStore,
    image_id: i64,
    target: &RegisteredBackend,
    outcome: UploadOutcome,
) -> Result<StorageLocation, AppError> {
    let backend_id = target.backend.id;
    let recorded = locations
        .create_location(NewStorageLocation {
            image_id,
            backend_id,
            backend_kind: target.uploader.kind(),
            url: outcome.url.clone(),
            delete_identifier: outcome.delete_identifier.clone(),
        })
        .await;
    match recorded {
        Ok(location) => Ok(location),
        Err(AppError::Conflict(_)) => adopt_recorded_copy(locations, image_id, target, &outcome).await,
        Err(e) => {
            tracing::error!(
                backend_id,
                image_id,
                error = %e,
                "Uploaded object could not be recorded"
            );
            Err(e)
        }
    }
}

/// A concurrent upload recorded a copy on this backend first. Its location
/// stands; our object is removed unless it is the very same object.
async fn adopt_recorded_copy(
    locations: &dyn LocationStore,
    image_id: i64,
    target: &RegisteredBackend,
    outcome: &UploadOutcome,
) -> Result<StorageLocation, AppError> {
    let backend_id = target.backend.id;
    let existing = locations
        .list_for_image(image_id)
        .await?
        .into_iter()
        .map(|entry| entry.location)
        .find(|location| location.backend_id == backend_id)
        .ok_or_else(|| {
            AppError::Conflict(format!(
                "Location of image {} on backend {} vanished after a conflict",
                image_id, backend_id
            ))
        })?;

    let ours = outcome
        .delete_identifier
        .as_deref()
        .unwrap_or(&outcome.url);
    if ours != existing.delete_key() {
        if let Err(e) = target.uploader.delete(ours).await {
            tracing::warn!(backend_id, image_id, error = %e, "Failed to remove duplicate object");
        }
    }

    tracing::info!(
        backend_id,
        image_id,
        location_id = existing.id,
        "Backend copy already recorded by a concurrent upload"
    );
    Ok(existing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::Fixture;
    use bytes::Bytes;
    use imgbed_core::BackendKind;

    #[tokio::test]
    async fn partial_failure_keeps_successful_locations() {
        let fx = Fixture::new();
        let a = fx.add_backend("A", BackendKind::ObjectStore, 1).await;
        let b = fx.add_backend("B", BackendKind::ThirdPartyHost, 2).await;
        b.uploader.set_failing(true);
        let image = fx.insert_image("abc123", 1).await;

        let targets = fx.registry.list_active_uploaders().await;
        let source = ByteSource::Memory(Bytes::from_static(b"payload"));
        let created = Distributor::new(fx.catalog.clone())
            .distribute(&source, "x.png", image.id, &targets)
            .await;

        assert_eq!(created.len(), 1);
        assert_eq!(created[0].backend_id, a.backend.id);
        assert_eq!(a.uploader.upload_count(), 1);
        assert_eq!(b.uploader.upload_count(), 1);
        assert_eq!(fx.catalog.locations_of(image.id).len(), 1);
    }

    #[tokio::test]
    async fn every_backend_reads_the_full_stream() {
        let fx = Fixture::new();
        let a = fx.add_backend("A", BackendKind::ObjectStore, 1).await;
        let b = fx.add_backend("B", BackendKind::ObjectStore, 1).await;
        let image = fx.insert_image("abc123", 1).await;

        let targets = fx.registry.list_active_uploaders().await;
        let source = ByteSource::Memory(Bytes::from_static(b"0123456789"));
        let created = Distributor::new(fx.catalog.clone())
            .distribute(&source, "x.png", image.id, &targets)
            .await;

        assert_eq!(created.len(), 2);
        assert_eq!(a.uploader.uploaded_bytes(), vec![10]);
        assert_eq!(b.uploader.uploaded_bytes(), vec![10]);
    }

    #[tokio::test]
    async fn copy_recorded_concurrently_is_adopted() {
        let fx = Fixture::new();
        let a = fx.add_backend("A", BackendKind::ObjectStore, 1).await;
        let image = fx.insert_image("abc123", 1).await;
        let targets = fx.registry.list_active_uploaders().await;
        let source = ByteSource::Memory(Bytes::from_static(b"data"));
        let distributor = Distributor::new(fx.catalog.clone());

        let first = distributor.distribute(&source, "x.png", image.id, &targets).await;
        let second = distributor.distribute(&source, "x.png", image.id, &targets).await;

        assert_eq!(second, first);
        assert_eq!(fx.catalog.locations_of(image.id).len(), 1);
        // same key on the same backend: the stored object is shared, not removed
        assert_eq!(a.uploader.delete_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_object_under_other_key_is_removed() {
        let fx = Fixture::new();
        let a = fx.add_backend("A", BackendKind::ObjectStore, 1).await;
        let image = fx.insert_image_on("abc123", 1, &[&a.backend]).await;
        let recorded = fx.location_on(image.id, a.backend.id);
        let targets = fx.registry.list_active_uploaders().await;
        let source = ByteSource::Memory(Bytes::from_static(b"data"));

        let created = Distributor::new(fx.catalog.clone())
            .distribute(&source, "x.png", image.id, &targets)
            .await;

        assert_eq!(created, vec![recorded]);
        assert_eq!(a.uploader.delete_count(), 1);
        assert_eq!(fx.catalog.locations_of(image.id).len(), 1);
    }
}
