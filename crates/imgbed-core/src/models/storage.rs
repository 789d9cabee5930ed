//! Storage location model: one copy of an image on one backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::descriptor::LocationDescriptor;
use crate::storage_types::BackendKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageLocation {
    pub id: i64,
    pub image_id: i64,
    pub backend_id: i64,
    /// Copied from the backend at creation time.
    pub backend_kind: BackendKind,
    /// Public URL, or the root-relative path for local backends.
    pub url: String,
    /// Whatever the backend needs to delete the object, when it differs from the URL.
    pub delete_identifier: Option<String>,
    pub is_active: bool,
    pub failure_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StorageLocation {
    /// Rows written before the URL and delete identifier were split carry
    /// `url@@@token` in the URL column. Split those in place.
    pub fn normalize_legacy(mut self) -> Self {
        if self.delete_identifier.is_none() {
            let descriptor = LocationDescriptor::parse(&self.url);
            self.url = descriptor.url;
            self.delete_identifier = descriptor.delete_identifier;
        }
        self
    }

    pub fn descriptor(&self) -> LocationDescriptor {
        LocationDescriptor::new(self.url.clone(), self.delete_identifier.clone())
    }

    /// Identifier handed to the uploader's delete call.
    pub fn delete_key(&self) -> &str {
        self.delete_identifier.as_deref().unwrap_or(&self.url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStorageLocation {
    pub image_id: i64,
    pub backend_id: i64,
    pub backend_kind: BackendKind,
    pub url: String,
    pub delete_identifier: Option<String>,
}
