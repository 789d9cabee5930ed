//! In-memory stores, mock uploaders and a wiring fixture for service tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use imgbed_core::models::{
    Backend, BackendFlag, Image, ImageWithLocations, LocationWithBackend, NewBackend, NewImage,
    NewStorageLocation, StorageLocation,
};
use imgbed_core::{AppError, BackendKind, RuntimeSettings, SettingsProvider};
use imgbed_db::{BackendStore, ImageStore, LocationStore};
use imgbed_storage::{
    ByteSource, StorageError, StorageResult, UploadOutcome, UploadReader, Uploader, UploaderFactory,
};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::backends::BackendAdmin;
use crate::batch::BatchRunner;
use crate::health::HealthProbe;
use crate::images::{ImageService, UploadRequest};
use crate::random_cache::RandomImageCache;
use crate::registry::BackendRegistry;
use crate::resolution::LocationResolver;
use crate::tasks::TaskTracker;

// ---------------------------------------------------------------------------
// In-memory catalogue
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CatalogState {
    next_id: i64,
    backends: Vec<Backend>,
    images: Vec<Image>,
    locations: Vec<StorageLocation>,
}

impl CatalogState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_image(&mut self, image: NewImage) -> Result<Image, AppError> {
        if self
            .images
            .iter()
            .any(|i| i.hash == image.hash && i.owner_id == image.owner_id)
        {
            return Err(AppError::Conflict(format!(
                "duplicate key (hash, owner_id) = ({}, {})",
                image.hash, image.owner_id
            )));
        }
        let now = Utc::now();
        let stored = Image {
            id: self.next_id(),
            public_id: image.public_id,
            hash: image.hash,
            original_name: image.original_name,
            size_bytes: image.size_bytes,
            content_type: image.content_type,
            width: image.width,
            height: image.height,
            owner_id: image.owner_id,
            allow_random: image.allow_random,
            created_at: now,
            updated_at: now,
        };
        self.images.push(stored.clone());
        Ok(stored)
    }

    fn insert_location(&mut self, location: NewStorageLocation) -> Result<StorageLocation, AppError> {
        if self
            .locations
            .iter()
            .any(|l| l.image_id == location.image_id && l.backend_id == location.backend_id)
        {
            return Err(AppError::Conflict(format!(
                "duplicate key (image_id, backend_id) = ({}, {})",
                location.image_id, location.backend_id
            )));
        }
        let now = Utc::now();
        let stored = StorageLocation {
            id: self.next_id(),
            image_id: location.image_id,
            backend_id: location.backend_id,
            backend_kind: location.backend_kind,
            url: location.url,
            delete_identifier: location.delete_identifier,
            is_active: true,
            failure_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.locations.push(stored.clone());
        Ok(stored)
    }

    fn with_locations(&self, image: &Image) -> ImageWithLocations {
        let mut locations: Vec<LocationWithBackend> = self
            .locations
            .iter()
            .filter(|l| l.image_id == image.id)
            .filter_map(|l| {
                self.backends
                    .iter()
                    .find(|b| b.id == l.backend_id)
                    .map(|b| LocationWithBackend {
                        location: l.clone(),
                        backend: b.clone(),
                    })
            })
            .collect();
        locations.sort_by_key(|l| l.location.id);
        ImageWithLocations {
            image: image.clone(),
            locations,
        }
    }

    fn backend_from(&mut self, id: i64, backend: NewBackend) -> Backend {
        let now = Utc::now();
        Backend {
            id,
            name: backend.name,
            kind: backend.kind,
            config: backend.config,
            priority: backend.priority,
            accepts_uploads: backend.accepts_uploads,
            serves_redirects: backend.serves_redirects,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Implements every store trait over plain vectors, with the same unique
/// constraints as the schema.
#[derive(Default)]
pub(crate) struct MemoryCatalog {
    state: Mutex<CatalogState>,
    fail_listing: AtomicBool,
    fail_links: AtomicBool,
    race_create: AtomicBool,
    random_listing_delay: Mutex<Option<Duration>>,
}

impl MemoryCatalog {
    pub fn fail_backend_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn fail_shared_links(&self, fail: bool) {
        self.fail_links.store(fail, Ordering::SeqCst);
    }

    /// The next random-pool listing returns its snapshot only after `delay`.
    pub fn delay_next_random_listing(&self, delay: Duration) {
        *self.random_listing_delay.lock().unwrap() = Some(delay);
    }

    /// The next `create_image` finds a concurrently created twin.
    pub fn race_next_create(&self, race: bool) {
        self.race_create.store(race, Ordering::SeqCst);
    }

    pub fn image_count(&self) -> usize {
        self.state.lock().unwrap().images.len()
    }

    pub fn locations_of(&self, image_id: i64) -> Vec<StorageLocation> {
        let state = self.state.lock().unwrap();
        let mut found: Vec<StorageLocation> = state
            .locations
            .iter()
            .filter(|l| l.image_id == image_id)
            .cloned()
            .collect();
        found.sort_by_key(|l| l.id);
        found
    }

    pub fn location(&self, id: i64) -> Option<StorageLocation> {
        let state = self.state.lock().unwrap();
        state.locations.iter().find(|l| l.id == id).cloned()
    }

    pub fn set_random_flag(&self, image_id: i64, allow: bool) {
        let mut state = self.state.lock().unwrap();
        if let Some(image) = state.images.iter_mut().find(|i| i.id == image_id) {
            image.allow_random = allow;
        }
    }
}

#[async_trait]
impl BackendStore for MemoryCatalog {
    async fn list_backends(&self) -> Result<Vec<Backend>, AppError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(AppError::Internal("backend listing unavailable".to_string()));
        }
        let mut backends = self.state.lock().unwrap().backends.clone();
        backends.sort_by_key(|b| b.id);
        Ok(backends)
    }

    async fn get_backend(&self, id: i64) -> Result<Option<Backend>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state.backends.iter().find(|b| b.id == id).cloned())
    }

    async fn create_backend(&self, backend: NewBackend) -> Result<Backend, AppError> {
        let mut state = self.state.lock().unwrap();
        if state.backends.iter().any(|b| b.name == backend.name) {
            return Err(AppError::Conflict(format!("duplicate backend name {}", backend.name)));
        }
        let id = state.next_id();
        let created = state.backend_from(id, backend);
        state.backends.push(created.clone());
        Ok(created)
    }

    async fn update_backend(
        &self,
        id: i64,
        backend: NewBackend,
    ) -> Result<Option<Backend>, AppError> {
        let mut state = self.state.lock().unwrap();
        let Some(pos) = state.backends.iter().position(|b| b.id == id) else {
            return Ok(None);
        };
        let updated = state.backend_from(id, backend);
        state.backends[pos] = updated.clone();
        Ok(Some(updated))
    }

    async fn set_backend_flag(
        &self,
        id: i64,
        flag: BackendFlag,
        value: bool,
    ) -> Result<Option<Backend>, AppError> {
        let mut state = self.state.lock().unwrap();
        let Some(backend) = state.backends.iter_mut().find(|b| b.id == id) else {
            return Ok(None);
        };
        match flag {
            BackendFlag::AcceptsUploads => backend.accepts_uploads = value,
            BackendFlag::ServesRedirects => backend.serves_redirects = value,
        }
        Ok(Some(backend.clone()))
    }

    async fn delete_backend(&self, id: i64) -> Result<bool, AppError> {
        let mut state = self.state.lock().unwrap();
        if state.locations.iter().any(|l| l.backend_id == id) {
            return Err(AppError::Conflict(format!("backend {} still referenced", id)));
        }
        let before = state.backends.len();
        state.backends.retain(|b| b.id != id);
        Ok(state.backends.len() != before)
    }

    async fn count_locations_for_backend(&self, id: i64) -> Result<i64, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state.locations.iter().filter(|l| l.backend_id == id).count() as i64)
    }
}

#[async_trait]
impl ImageStore for MemoryCatalog {
    async fn find_by_hash_and_owner(
        &self,
        hash: &str,
        owner_id: i64,
    ) -> Result<Option<ImageWithLocations>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .images
            .iter()
            .find(|i| i.hash == hash && i.owner_id == owner_id)
            .map(|i| state.with_locations(i)))
    }

    async fn find_shareable_by_hash(
        &self,
        hash: &str,
        owner_id: i64,
    ) -> Result<Option<ImageWithLocations>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .images
            .iter()
            .filter(|i| i.hash == hash && i.owner_id != owner_id)
            .map(|i| state.with_locations(i))
            .filter(|i| i.has_active_location())
            .min_by_key(|i| i.image.id))
    }

    async fn create_image(&self, image: NewImage) -> Result<Image, AppError> {
        let mut state = self.state.lock().unwrap();
        if self.race_create.swap(false, Ordering::SeqCst) {
            let twin = NewImage {
                public_id: Uuid::new_v4(),
                ..image.clone()
            };
            state.insert_image(twin)?;
        }
        state.insert_image(image)
    }

    async fn create_shared_image(
        &self,
        image: NewImage,
        sources: &[StorageLocation],
    ) -> Result<ImageWithLocations, AppError> {
        let mut state = self.state.lock().unwrap();
        if self.fail_links.load(Ordering::SeqCst) {
            return Err(AppError::Internal("link insert failed".to_string()));
        }
        let created = state.insert_image(image)?;
        for source in sources {
            state.insert_location(NewStorageLocation {
                image_id: created.id,
                backend_id: source.backend_id,
                backend_kind: source.backend_kind,
                url: source.url.clone(),
                delete_identifier: source.delete_identifier.clone(),
            })?;
        }
        Ok(state.with_locations(&created))
    }

    async fn get_image(
        &self,
        public_id: Uuid,
        owner_id: Option<i64>,
    ) -> Result<Option<ImageWithLocations>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .images
            .iter()
            .find(|i| i.public_id == public_id && owner_id.is_none_or(|o| i.owner_id == o))
            .map(|i| state.with_locations(i)))
    }

    async fn get_image_by_id(&self, id: i64) -> Result<Option<ImageWithLocations>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .images
            .iter()
            .find(|i| i.id == id)
            .map(|i| state.with_locations(i)))
    }

    async fn count_owned(&self, public_ids: &[Uuid], owner_id: i64) -> Result<i64, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .images
            .iter()
            .filter(|i| i.owner_id == owner_id && public_ids.contains(&i.public_id))
            .count() as i64)
    }

    async fn count_other_with_hash(&self, hash: &str, exclude_id: i64) -> Result<i64, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .images
            .iter()
            .filter(|i| i.hash == hash && i.id != exclude_id)
            .count() as i64)
    }

    async fn delete_image(&self, id: i64) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.locations.retain(|l| l.image_id != id);
        state.images.retain(|i| i.id != id);
        Ok(())
    }

    async fn list_images(
        &self,
        owner_id: Option<i64>,
        keyword: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(i64, Vec<ImageWithLocations>), AppError> {
        let state = self.state.lock().unwrap();
        let needle = keyword.map(|k| k.trim().to_lowercase()).filter(|k| !k.is_empty());
        let mut matching: Vec<&Image> = state
            .images
            .iter()
            .filter(|i| owner_id.is_none_or(|o| i.owner_id == o))
            .filter(|i| {
                needle
                    .as_ref()
                    .is_none_or(|n| i.original_name.to_lowercase().contains(n.as_str()))
            })
            .collect();
        matching.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|i| state.with_locations(i))
            .collect();
        Ok((total, items))
    }

    async fn set_allow_random(
        &self,
        public_ids: &[Uuid],
        owner_id: Option<i64>,
        allow: bool,
    ) -> Result<u64, AppError> {
        let mut state = self.state.lock().unwrap();
        let mut updated = 0;
        for image in state.images.iter_mut() {
            if public_ids.contains(&image.public_id) && owner_id.is_none_or(|o| image.owner_id == o)
            {
                image.allow_random = allow;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn list_random_eligible(&self) -> Result<Vec<Uuid>, AppError> {
        let ids: Vec<Uuid> = self
            .state
            .lock()
            .unwrap()
            .images
            .iter()
            .filter(|i| i.allow_random)
            .map(|i| i.public_id)
            .collect();
        let delay = self.random_listing_delay.lock().unwrap().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(ids)
    }
}

#[async_trait]
impl LocationStore for MemoryCatalog {
    async fn create_location(
        &self,
        location: NewStorageLocation,
    ) -> Result<StorageLocation, AppError> {
        self.state.lock().unwrap().insert_location(location)
    }

    async fn list_for_image(&self, image_id: i64) -> Result<Vec<LocationWithBackend>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .images
            .iter()
            .find(|i| i.id == image_id)
            .map(|i| state.with_locations(i).locations)
            .unwrap_or_default())
    }

    async fn increment_failure(&self, id: i64) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if let Some(l) = state.locations.iter_mut().find(|l| l.id == id) {
            l.failure_count += 1;
        }
        Ok(())
    }

    async fn reset_failure(&self, id: i64) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if let Some(l) = state.locations.iter_mut().find(|l| l.id == id) {
            l.failure_count = 0;
        }
        Ok(())
    }

    async fn set_active(&self, id: i64, active: bool) -> Result<bool, AppError> {
        let mut state = self.state.lock().unwrap();
        match state.locations.iter_mut().find(|l| l.id == id) {
            Some(l) => {
                l.is_active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Uploaders
// ---------------------------------------------------------------------------

/// Records every call. Local-kind mocks write real files under `local_root`.
pub(crate) struct MockUploader {
    name: String,
    kind: BackendKind,
    local_root: Option<PathBuf>,
    failing: AtomicBool,
    next_upload_delay: Mutex<Option<Duration>>,
    uploads: Mutex<Vec<(String, usize)>>,
    path_uploads: AtomicUsize,
    deletes: Mutex<Vec<String>>,
}

impl MockUploader {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Hold the next upload for `delay` after its bytes are read.
    pub fn delay_next_upload(&self, delay: Duration) {
        *self.next_upload_delay.lock().unwrap() = Some(delay);
    }

    /// Upload attempts, failed ones included.
    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    /// Uploads that came in through `upload_from_path`.
    pub fn path_upload_count(&self) -> usize {
        self.path_uploads.load(Ordering::SeqCst)
    }

    pub fn uploaded_bytes(&self) -> Vec<usize> {
        self.uploads.lock().unwrap().iter().map(|(_, n)| *n).collect()
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.lock().unwrap().len()
    }
}

#[async_trait]
impl Uploader for MockUploader {
    async fn upload(
        &self,
        mut reader: UploadReader,
        unique_name: &str,
        _content_length: Option<u64>,
    ) -> StorageResult<UploadOutcome> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        self.uploads
            .lock()
            .unwrap()
            .push((unique_name.to_string(), data.len()));

        let delay = self.next_upload_delay.lock().unwrap().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Network(format!("{} is down", self.name)));
        }

        match &self.local_root {
            Some(root) => {
                tokio::fs::write(root.join(unique_name), &data).await?;
                Ok(UploadOutcome {
                    url: unique_name.to_string(),
                    delete_identifier: Some(unique_name.to_string()),
                })
            }
            None => Ok(UploadOutcome {
                url: format!("https://{}.example/{}", self.name, unique_name),
                delete_identifier: Some(format!("del-{}", unique_name)),
            }),
        }
    }

    async fn upload_from_path(&self, path: &Path, unique_name: &str) -> StorageResult<UploadOutcome> {
        self.path_uploads.fetch_add(1, Ordering::SeqCst);
        let file = tokio::fs::File::open(path).await?;
        self.upload(Box::pin(file), unique_name, None).await
    }

    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn delete(&self, delete_identifier: &str) -> StorageResult<()> {
        self.deletes
            .lock()
            .unwrap()
            .push(delete_identifier.to_string());
        if let Some(root) = &self.local_root {
            match tokio::fs::remove_file(root.join(delete_identifier)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn local_path(&self, stored: &str) -> Option<PathBuf> {
        self.local_root.as_ref().map(|root| root.join(stored))
    }
}

/// Hands out registered mocks by the `mock` key of the backend config.
#[derive(Default)]
pub(crate) struct MockFactory {
    mocks: Mutex<HashMap<String, Arc<MockUploader>>>,
}

#[async_trait]
impl UploaderFactory for MockFactory {
    async fn build(
        &self,
        kind: BackendKind,
        config: &serde_json::Value,
    ) -> StorageResult<Arc<dyn Uploader>> {
        let name = config
            .get("mock")
            .and_then(|v| v.as_str())
            .ok_or_else(|| StorageError::Config("no mock configured".to_string()))?;
        let mock = self
            .mocks
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::Config(format!("unknown mock {}", name)))?;
        if mock.kind != kind {
            return Err(StorageError::Config(format!("mock {} is not {}", name, kind)));
        }
        Ok(mock as Arc<dyn Uploader>)
    }
}

// ---------------------------------------------------------------------------
// Probe and settings
// ---------------------------------------------------------------------------

/// Healthy unless the location's backend was marked down. Counts probes.
#[derive(Default)]
pub(crate) struct ScriptedProbe {
    down: Mutex<HashSet<i64>>,
    probed: AtomicUsize,
}

impl ScriptedProbe {
    pub fn all_healthy() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn mark_down(&self, backend_id: i64) {
        self.down.lock().unwrap().insert(backend_id);
    }

    pub fn mark_up(&self, backend_id: i64) {
        self.down.lock().unwrap().remove(&backend_id);
    }

    pub fn probed(&self) -> usize {
        self.probed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn is_healthy(&self, candidate: &LocationWithBackend) -> bool {
        self.probed.fetch_add(1, Ordering::SeqCst);
        !self
            .down
            .lock()
            .unwrap()
            .contains(&candidate.location.backend_id)
    }
}

#[derive(Default)]
pub(crate) struct StaticSettings {
    current: RwLock<RuntimeSettings>,
}

impl StaticSettings {
    pub async fn set(&self, settings: RuntimeSettings) {
        *self.current.write().await = settings;
    }
}

#[async_trait]
impl SettingsProvider for StaticSettings {
    async fn snapshot(&self) -> RuntimeSettings {
        *self.current.read().await
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

pub(crate) struct TestBackend {
    pub backend: Backend,
    pub uploader: Arc<MockUploader>,
}

pub(crate) struct Fixture {
    pub catalog: Arc<MemoryCatalog>,
    pub factory: Arc<MockFactory>,
    pub registry: Arc<BackendRegistry>,
    pub settings: Arc<StaticSettings>,
    pub random_cache: Arc<RandomImageCache>,
    pub tasks: Arc<TaskTracker>,
    dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let catalog = Arc::new(MemoryCatalog::default());
        let factory = Arc::new(MockFactory::default());
        let registry = Arc::new(BackendRegistry::new(catalog.clone(), factory.clone()));
        let random_cache = Arc::new(RandomImageCache::new(catalog.clone()));
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("local")).unwrap();
        Self {
            catalog,
            factory,
            registry,
            settings: Arc::new(StaticSettings::default()),
            random_cache,
            tasks: Arc::new(TaskTracker::new()),
            dir,
        }
    }

    fn local_root(&self) -> PathBuf {
        self.dir.path().join("local")
    }

    /// Make a mock available to the factory under `name`.
    pub fn register_mock(&self, name: &str, kind: BackendKind) -> Arc<MockUploader> {
        let mock = Arc::new(MockUploader {
            name: name.to_string(),
            kind,
            local_root: (kind == BackendKind::Local).then(|| self.local_root()),
            failing: AtomicBool::new(false),
            next_upload_delay: Mutex::new(None),
            uploads: Mutex::new(Vec::new()),
            path_uploads: AtomicUsize::new(0),
            deletes: Mutex::new(Vec::new()),
        });
        self.factory
            .mocks
            .lock()
            .unwrap()
            .insert(name.to_string(), mock.clone());
        mock
    }

    /// Persist a backend wired to a fresh mock and refresh the registry.
    pub async fn add_backend(&self, name: &str, kind: BackendKind, priority: i32) -> TestBackend {
        let uploader = self.register_mock(name, kind);
        let backend = self
            .catalog
            .create_backend(NewBackend {
                name: name.to_string(),
                kind,
                config: json!({ "mock": name }),
                priority,
                accepts_uploads: true,
                serves_redirects: true,
            })
            .await
            .unwrap();
        self.registry.refresh().await.unwrap();
        TestBackend { backend, uploader }
    }

    /// Persist a backend the factory cannot build.
    pub async fn add_unbuildable_backend(&self, name: &str) -> Backend {
        self.catalog
            .create_backend(NewBackend {
                name: name.to_string(),
                kind: BackendKind::ObjectStore,
                config: json!({}),
                priority: 1,
                accepts_uploads: true,
                serves_redirects: true,
            })
            .await
            .unwrap()
    }

    pub async fn insert_image(&self, hash: &str, owner_id: i64) -> Image {
        self.catalog
            .create_image(NewImage {
                public_id: Uuid::new_v4(),
                hash: hash.to_string(),
                original_name: format!("{}.png", hash),
                size_bytes: 3,
                content_type: "image/png".to_string(),
                width: 0,
                height: 0,
                owner_id,
                allow_random: false,
            })
            .await
            .unwrap()
    }

    /// An image with one active location on each of `backends`.
    pub async fn insert_image_on(&self, hash: &str, owner_id: i64, backends: &[&Backend]) -> Image {
        let image = self.insert_image(hash, owner_id).await;
        for backend in backends {
            self.catalog
                .create_location(NewStorageLocation {
                    image_id: image.id,
                    backend_id: backend.id,
                    backend_kind: backend.kind,
                    url: format!("https://{}.example/{}", backend.name, hash),
                    delete_identifier: None,
                })
                .await
                .unwrap();
        }
        image
    }

    pub fn location_on(&self, image_id: i64, backend_id: i64) -> StorageLocation {
        self.catalog
            .locations_of(image_id)
            .into_iter()
            .find(|l| l.backend_id == backend_id)
            .expect("location on backend")
    }

    /// Write a file under the local mock root and return its stored name.
    pub async fn write_local_file(&self, name: &str, bytes: &[u8]) -> String {
        tokio::fs::write(self.local_root().join(name), bytes)
            .await
            .unwrap();
        name.to_string()
    }

    pub fn image_service(&self) -> Arc<ImageService> {
        Arc::new(ImageService::new(
            self.catalog.clone(),
            self.catalog.clone(),
            self.registry.clone(),
            self.settings.clone(),
            self.random_cache.clone(),
        ))
    }

    pub fn resolver(&self, probe: Arc<ScriptedProbe>) -> LocationResolver {
        LocationResolver::new(
            self.catalog.clone(),
            self.catalog.clone(),
            self.settings.clone(),
            probe,
        )
    }

    pub fn backend_admin(&self) -> BackendAdmin {
        BackendAdmin::new(self.catalog.clone(), self.registry.clone())
    }

    pub fn batch_runner(&self) -> BatchRunner {
        BatchRunner::new(
            self.image_service(),
            self.catalog.clone(),
            self.registry.clone(),
            self.tasks.clone(),
        )
    }

    pub async fn upload(&self, bytes: &'static [u8], owner_id: i64) -> ImageWithLocations {
        self.upload_to(bytes, owner_id, &[]).await
    }

    pub async fn upload_to(
        &self,
        bytes: &'static [u8],
        owner_id: i64,
        backend_ids: &[i64],
    ) -> ImageWithLocations {
        let request = UploadRequest {
            source: ByteSource::Memory(Bytes::from_static(bytes)),
            original_name: "upload.png".to_string(),
            content_type: "image/png".to_string(),
        };
        self.image_service()
            .upload_image(request, owner_id, Some(backend_ids))
            .await
            .unwrap()
    }
}

/// A detached location joined with a default backend of `backend_id`.
pub(crate) fn location_with_backend(backend_id: i64, kind: BackendKind, url: &str) -> LocationWithBackend {
    let now = Utc::now();
    LocationWithBackend {
        location: StorageLocation {
            id: backend_id * 100,
            image_id: 1,
            backend_id,
            backend_kind: kind,
            url: url.to_string(),
            delete_identifier: None,
            is_active: true,
            failure_count: 0,
            created_at: now,
            updated_at: now,
        },
        backend: Backend {
            id: backend_id,
            name: format!("backend-{}", backend_id),
            kind,
            config: json!({}),
            priority: 1,
            accepts_uploads: true,
            serves_redirects: true,
            created_at: now,
            updated_at: now,
        },
    }
}

pub(crate) fn png_source(width: u32, height: u32) -> ByteSource {
    let img = image::RgbImage::new(width, height);
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    ByteSource::Memory(Bytes::from(out.into_inner()))
}

/// Poll until `check` holds; fails the test after about two seconds.
pub(crate) async fn eventually<F: Fn() -> bool>(check: F) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

pub(crate) async fn eventually_async<F, Fut>(check: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
