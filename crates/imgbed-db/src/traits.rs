//! Store trait abstractions
//!
//! These traits define the persistence interface the services need, allowing
//! them to be tested without a database. The PostgreSQL repositories in
//! [`crate::db`] implement them.

use async_trait::async_trait;
use imgbed_core::models::{
    Backend, BackendFlag, Image, ImageWithLocations, LocationWithBackend, NewBackend, NewImage,
    NewStorageLocation, StorageLocation,
};
use imgbed_core::AppError;
use std::collections::HashMap;
use uuid::Uuid;

#[async_trait]
pub trait BackendStore: Send + Sync {
    /// All backends with a recognised kind, ordered by id.
    async fn list_backends(&self) -> Result<Vec<Backend>, AppError>;

    async fn get_backend(&self, id: i64) -> Result<Option<Backend>, AppError>;

    /// Fails with `Conflict` when the name is taken.
    async fn create_backend(&self, backend: NewBackend) -> Result<Backend, AppError>;

    async fn update_backend(&self, id: i64, backend: NewBackend)
        -> Result<Option<Backend>, AppError>;

    async fn set_backend_flag(
        &self,
        id: i64,
        flag: BackendFlag,
        value: bool,
    ) -> Result<Option<Backend>, AppError>;

    /// Returns whether a row was deleted. Fails with `Conflict` while
    /// storage locations still reference the backend.
    async fn delete_backend(&self, id: i64) -> Result<bool, AppError>;

    async fn count_locations_for_backend(&self, id: i64) -> Result<i64, AppError>;
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn find_by_hash_and_owner(
        &self,
        hash: &str,
        owner_id: i64,
    ) -> Result<Option<ImageWithLocations>, AppError>;

    /// Oldest image with `hash` owned by someone other than `owner_id` that
    /// still has at least one active location.
    async fn find_shareable_by_hash(
        &self,
        hash: &str,
        owner_id: i64,
    ) -> Result<Option<ImageWithLocations>, AppError>;

    /// Fails with `Conflict` when (hash, owner) already exists.
    async fn create_image(&self, image: NewImage) -> Result<Image, AppError>;

    /// Create an image whose locations point at existing objects, atomically:
    /// either the image and every linked location are stored, or nothing is.
    async fn create_shared_image(
        &self,
        image: NewImage,
        sources: &[StorageLocation],
    ) -> Result<ImageWithLocations, AppError>;

    /// Look up by public id, restricted to `owner_id` when given.
    async fn get_image(
        &self,
        public_id: Uuid,
        owner_id: Option<i64>,
    ) -> Result<Option<ImageWithLocations>, AppError>;

    async fn get_image_by_id(&self, id: i64) -> Result<Option<ImageWithLocations>, AppError>;

    /// Number of listed images owned by `owner_id`.
    async fn count_owned(&self, public_ids: &[Uuid], owner_id: i64) -> Result<i64, AppError>;

    /// Number of images other than `exclude_id` carrying `hash`.
    async fn count_other_with_hash(&self, hash: &str, exclude_id: i64) -> Result<i64, AppError>;

    /// Delete the image row and, by cascade, its locations.
    async fn delete_image(&self, id: i64) -> Result<(), AppError>;

    /// Newest first. Returns the total match count and the requested window.
    async fn list_images(
        &self,
        owner_id: Option<i64>,
        keyword: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(i64, Vec<ImageWithLocations>), AppError>;

    async fn set_allow_random(
        &self,
        public_ids: &[Uuid],
        owner_id: Option<i64>,
        allow: bool,
    ) -> Result<u64, AppError>;

    async fn list_random_eligible(&self) -> Result<Vec<Uuid>, AppError>;
}

#[async_trait]
pub trait LocationStore: Send + Sync {
    /// Fails with `Conflict` when the image already has a location on the backend.
    async fn create_location(
        &self,
        location: NewStorageLocation,
    ) -> Result<StorageLocation, AppError>;

    async fn list_for_image(&self, image_id: i64) -> Result<Vec<LocationWithBackend>, AppError>;

    async fn increment_failure(&self, id: i64) -> Result<(), AppError>;

    async fn reset_failure(&self, id: i64) -> Result<(), AppError>;

    /// Returns whether the location exists.
    async fn set_active(&self, id: i64, active: bool) -> Result<bool, AppError>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load_settings(&self) -> Result<HashMap<String, String>, AppError>;

    async fn save_setting(&self, key: &str, value: &str) -> Result<(), AppError>;
}
