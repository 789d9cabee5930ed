//! Image ingest and administration.
//!
//! An upload takes one of three paths, decided by its content hash:
//!
//! - **backfill**: the owner already has this content. Only upload-accepting
//!   backends without a copy receive it; if none are missing the existing
//!   record is returned unchanged.
//! - **sharing**: another owner has it with at least one active copy. A new
//!   image row is created whose locations point at those same objects, in one
//!   transaction, with no upload.
//! - **new artifact**: the bytes are distributed to the target backends. If
//!   every backend fails and no concurrent same-owner upload stored a copy
//!   meanwhile, the image row is removed again and the upload fails with
//!   `Unavailable`.
//!
//! The (hash, owner) uniqueness is enforced by the store. A concurrent upload
//! that loses the race on that constraint continues on the backfill path of
//! the winning row.

use imgbed_core::models::{Image, ImagePage, ImageWithLocations, NewImage, OwnerScope, StorageLocation};
use imgbed_core::{AppError, SettingsProvider};
use imgbed_db::{ImageStore, LocationStore};
use imgbed_storage::ByteSource;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::dimensions::probe_dimensions;
use crate::distribution::Distributor;
use crate::hashing::content_hash;
use crate::random_cache::RandomImageCache;
use crate::registry::{BackendRegistry, RegisteredBackend};

pub const MAX_PAGE_SIZE: u32 = 100;

/// An incoming upload. The source must be re-openable, one reader per backend.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub source: ByteSource,
    pub original_name: String,
    pub content_type: String,
}

pub struct ImageService {
    images: Arc<dyn ImageStore>,
    locations: Arc<dyn LocationStore>,
    registry: Arc<BackendRegistry>,
    settings: Arc<dyn SettingsProvider>,
    random_cache: Arc<RandomImageCache>,
    distributor: Distributor,
}

impl ImageService {
    pub fn new(
        images: Arc<dyn ImageStore>,
        locations: Arc<dyn LocationStore>,
        registry: Arc<BackendRegistry>,
        settings: Arc<dyn SettingsProvider>,
        random_cache: Arc<RandomImageCache>,
    ) -> Self {
        let distributor = Distributor::new(Arc::clone(&locations));
        Self {
            images,
            locations,
            registry,
            settings,
            random_cache,
            distributor,
        }
    }

    pub fn distributor(&self) -> &Distributor {
        &self.distributor
    }

    /// Store an upload for `owner_id`.
    ///
    /// `explicit_targets` narrows the upload-accepting backends to the given
    /// ids; `None` or an empty list means all of them.
    #[tracing::instrument(
        skip(self, request, explicit_targets),
        fields(original_name = %request.original_name)
    )]
    pub async fn upload_image(
        &self,
        request: UploadRequest,
        owner_id: i64,
        explicit_targets: Option<&[i64]>,
    ) -> Result<ImageWithLocations, AppError> {
        let settings = self.settings.snapshot().await;
        let size = request.source.len().await?;
        if size == 0 {
            return Err(AppError::InvalidInput("Uploaded file is empty".to_string()));
        }
        if size > settings.max_upload_bytes() {
            return Err(AppError::PayloadTooLarge(format!(
                "Upload of {} bytes exceeds the {} MB limit",
                size, settings.max_upload_mb
            )));
        }

        let hash = content_hash(&request.source).await?;

        if let Some(existing) = self.images.find_by_hash_and_owner(&hash, owner_id).await? {
            tracing::info!(hash = %hash, image_id = existing.image.id, "Same-owner duplicate, backfilling");
            return self
                .backfill_missing(existing, &request.source, explicit_targets)
                .await;
        }

        if let Some(shared) = self.images.find_shareable_by_hash(&hash, owner_id).await? {
            tracing::info!(
                hash = %hash,
                source_image_id = shared.image.id,
                "Content exists for another owner, linking existing objects"
            );
            return self
                .share_existing(shared, &request, &hash, size, owner_id, explicit_targets)
                .await;
        }

        tracing::info!(hash = %hash, "New content, distributing");
        self.create_new(&request, &hash, size, owner_id, explicit_targets)
            .await
    }

    async fn backfill_missing(
        &self,
        existing: ImageWithLocations,
        source: &ByteSource,
        explicit_targets: Option<&[i64]>,
    ) -> Result<ImageWithLocations, AppError> {
        let present: HashSet<i64> = existing.backend_ids().into_iter().collect();
        let missing: Vec<Arc<RegisteredBackend>> = self
            .resolve_targets(explicit_targets)
            .await
            .into_iter()
            .filter(|target| !present.contains(&target.backend.id))
            .collect();

        if missing.is_empty() {
            return Ok(existing);
        }

        let image_id = existing.image.id;
        let name = unique_name(existing.image.public_id, &existing.image.original_name);
        let created = self
            .distributor
            .distribute(source, &name, image_id, &missing)
            .await;
        tracing::info!(
            image_id,
            attempted = missing.len(),
            created = created.len(),
            "Backfill finished"
        );

        self.reload(image_id).await
    }

    async fn share_existing(
        &self,
        shared: ImageWithLocations,
        request: &UploadRequest,
        hash: &str,
        size: u64,
        owner_id: i64,
        explicit_targets: Option<&[i64]>,
    ) -> Result<ImageWithLocations, AppError> {
        let sources: Vec<StorageLocation> = shared
            .locations
            .iter()
            .filter(|l| l.location.is_active)
            .map(|l| l.location.clone())
            .collect();

        let (width, height) = match probe_dimensions(&request.source).await {
            Some((w, h)) => (to_i32(w), to_i32(h)),
            None => (shared.image.width, shared.image.height),
        };

        let image = new_image(request, hash, size, owner_id, width, height);
        match self.images.create_shared_image(image, &sources).await {
            Ok(created) => Ok(created),
            Err(AppError::Conflict(_)) => {
                self.continue_after_race(hash, owner_id, &request.source, explicit_targets)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    async fn create_new(
        &self,
        request: &UploadRequest,
        hash: &str,
        size: u64,
        owner_id: i64,
        explicit_targets: Option<&[i64]>,
    ) -> Result<ImageWithLocations, AppError> {
        let targets = self.resolve_targets(explicit_targets).await;
        if targets.is_empty() {
            return Err(AppError::Unavailable(
                "No upload-accepting backend is configured or selected".to_string(),
            ));
        }

        let (width, height) = probe_dimensions(&request.source)
            .await
            .map(|(w, h)| (to_i32(w), to_i32(h)))
            .unwrap_or((0, 0));

        let image = match self
            .images
            .create_image(new_image(request, hash, size, owner_id, width, height))
            .await
        {
            Ok(image) => image,
            Err(AppError::Conflict(_)) => {
                return self
                    .continue_after_race(hash, owner_id, &request.source, explicit_targets)
                    .await;
            }
            Err(e) => return Err(e),
        };

        let name = unique_name(image.public_id, &image.original_name);
        let created = self
            .distributor
            .distribute(&request.source, &name, image.id, &targets)
            .await;

        if created.is_empty() {
            // a same-owner upload may have stored copies on this row meanwhile
            let current = self.reload(image.id).await?;
            if !current.locations.is_empty() {
                tracing::info!(image_id = image.id, "Copies stored by a concurrent upload");
                return Ok(current);
            }
            if let Err(e) = self.images.delete_image(image.id).await {
                tracing::error!(image_id = image.id, error = %e, "Failed to remove image after failed upload");
            }
            return Err(AppError::Unavailable(format!(
                "Upload failed on all {} target backends",
                targets.len()
            )));
        }

        tracing::info!(
            image_id = image.id,
            public_id = %image.public_id,
            attempted = targets.len(),
            created = created.len(),
            "Image stored"
        );
        self.reload(image.id).await
    }

    /// Another upload created (hash, owner) first; add our targets to it.
    async fn continue_after_race(
        &self,
        hash: &str,
        owner_id: i64,
        source: &ByteSource,
        explicit_targets: Option<&[i64]>,
    ) -> Result<ImageWithLocations, AppError> {
        let winner = self
            .images
            .find_by_hash_and_owner(hash, owner_id)
            .await?
            .ok_or_else(|| {
                AppError::Conflict(format!("Image with hash {} was created concurrently", hash))
            })?;
        tracing::info!(image_id = winner.image.id, "Lost creation race, backfilling winner");
        self.backfill_missing(winner, source, explicit_targets).await
    }

    /// Upload-accepting backends, narrowed to `explicit` when it names any.
    async fn resolve_targets(&self, explicit: Option<&[i64]>) -> Vec<Arc<RegisteredBackend>> {
        let active = self.registry.list_active_uploaders().await;
        match explicit {
            Some(ids) if !ids.is_empty() => active
                .into_iter()
                .filter(|target| ids.contains(&target.backend.id))
                .collect(),
            _ => active,
        }
    }

    async fn reload(&self, image_id: i64) -> Result<ImageWithLocations, AppError> {
        self.images
            .get_image_by_id(image_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Image {} disappeared", image_id)))
    }

    /// Delete an image visible to `scope`.
    ///
    /// Stored objects are removed from every backend only when no other image
    /// carries the same hash; the rows go in one transaction afterwards.
    #[tracing::instrument(skip(self), fields(public_id = %public_id))]
    pub async fn delete_image(&self, public_id: Uuid, scope: OwnerScope) -> Result<(), AppError> {
        let image = self.get_image(public_id, scope).await?;

        let others = self
            .images
            .count_other_with_hash(&image.image.hash, image.image.id)
            .await?;
        if others == 0 {
            self.delete_objects(&image).await;
        } else {
            tracing::info!(
                image_id = image.image.id,
                hash = %image.image.hash,
                others,
                "Hash still referenced, keeping stored objects"
            );
        }

        self.images.delete_image(image.image.id).await?;
        if image.image.allow_random {
            self.random_cache.spawn_refresh();
        }
        Ok(())
    }

    async fn delete_objects(&self, image: &ImageWithLocations) {
        let mut deletes = JoinSet::new();
        for entry in &image.locations {
            let location = entry.location.clone();
            let Some(target) = self.registry.get(location.backend_id).await else {
                tracing::warn!(
                    backend_id = location.backend_id,
                    url = %location.url,
                    "Backend not registered, cannot delete stored object"
                );
                continue;
            };
            deletes.spawn(async move {
                let result = target.uploader.delete(location.delete_key()).await;
                (target, location, result)
            });
        }

        while let Some(joined) = deletes.join_next().await {
            match joined {
                Ok((target, location, Ok(()))) => {
                    tracing::info!(
                        backend_id = target.backend.id,
                        location_id = location.id,
                        "Deleted stored object"
                    );
                }
                Ok((target, location, Err(e))) => {
                    tracing::warn!(
                        backend_id = target.backend.id,
                        backend_name = %target.backend.name,
                        location_id = location.id,
                        error = %e,
                        "Failed to delete stored object"
                    );
                }
                Err(e) => tracing::error!(error = %e, "Delete task aborted"),
            }
        }
    }

    /// Newest first. `page` starts at 1; `page_size` is clamped to 1..=100.
    pub async fn list_images(
        &self,
        scope: OwnerScope,
        keyword: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> Result<ImagePage, AppError> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let offset = i64::from(page - 1) * i64::from(page_size);

        let (total, items) = self
            .images
            .list_images(scope.owner_filter(), keyword, i64::from(page_size), offset)
            .await?;

        Ok(ImagePage {
            total,
            page,
            page_size,
            items,
        })
    }

    pub async fn get_image(
        &self,
        public_id: Uuid,
        scope: OwnerScope,
    ) -> Result<ImageWithLocations, AppError> {
        self.images
            .get_image(public_id, scope.owner_filter())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Image {} not found", public_id)))
    }

    /// Flip the random-pool flag of one image.
    pub async fn toggle_random_eligibility(
        &self,
        public_id: Uuid,
        scope: OwnerScope,
    ) -> Result<Image, AppError> {
        let current = self.get_image(public_id, scope).await?;
        let allow = !current.image.allow_random;
        self.images
            .set_allow_random(&[public_id], scope.owner_filter(), allow)
            .await?;
        self.random_cache.spawn_refresh();

        let mut image = current.image;
        image.allow_random = allow;
        Ok(image)
    }

    /// Set the random-pool flag on every listed image visible to `scope`.
    pub async fn set_random_eligibility(
        &self,
        public_ids: &[Uuid],
        scope: OwnerScope,
        allow: bool,
    ) -> Result<u64, AppError> {
        let updated = self
            .images
            .set_allow_random(public_ids, scope.owner_filter(), allow)
            .await?;
        self.random_cache.spawn_refresh();
        Ok(updated)
    }

    pub async fn set_location_active(&self, location_id: i64, active: bool) -> Result<(), AppError> {
        if !self.locations.set_active(location_id, active).await? {
            return Err(AppError::NotFound(format!(
                "Storage location {} not found",
                location_id
            )));
        }
        tracing::info!(location_id, active, "Storage location toggled");
        Ok(())
    }
}

/// `{public_id}.{ext}` using the original extension when it is plain
/// alphanumeric, otherwise just the id.
pub fn unique_name(public_id: Uuid, original_name: &str) -> String {
    match Path::new(original_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
    {
        Some(ext) => format!("{}.{}", public_id, ext.to_ascii_lowercase()),
        None => public_id.to_string(),
    }
}

fn new_image(
    request: &UploadRequest,
    hash: &str,
    size: u64,
    owner_id: i64,
    width: i32,
    height: i32,
) -> NewImage {
    NewImage {
        public_id: Uuid::new_v4(),
        hash: hash.to_string(),
        original_name: request.original_name.clone(),
        size_bytes: i64::try_from(size).unwrap_or(i64::MAX),
        content_type: request.content_type.clone(),
        width,
        height,
        owner_id,
        allow_random: false,
    }
}

fn to_i32(v: u32) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}
