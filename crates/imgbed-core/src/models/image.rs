use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::backend::Backend;
use super::storage::StorageLocation;

/// A logical image owned by one user. Physical bytes may be shared with other
/// users' images carrying the same hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: i64,
    pub public_id: Uuid,
    /// Lowercase hex MD5 of the content.
    pub hash: String,
    pub original_name: String,
    pub size_bytes: i64,
    pub content_type: String,
    /// 0 when the dimensions could not be determined.
    pub width: i32,
    pub height: i32,
    pub owner_id: i64,
    pub allow_random: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewImage {
    pub public_id: Uuid,
    pub hash: String,
    pub original_name: String,
    pub size_bytes: i64,
    pub content_type: String,
    pub width: i32,
    pub height: i32,
    pub owner_id: i64,
    pub allow_random: bool,
}

/// A location together with the backend it lives on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationWithBackend {
    pub location: StorageLocation,
    pub backend: Backend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageWithLocations {
    pub image: Image,
    pub locations: Vec<LocationWithBackend>,
}

impl ImageWithLocations {
    pub fn has_active_location(&self) -> bool {
        self.locations.iter().any(|l| l.location.is_active)
    }

    pub fn backend_ids(&self) -> Vec<i64> {
        self.locations.iter().map(|l| l.location.backend_id).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagePage {
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
    pub items: Vec<ImageWithLocations>,
}

/// Whose images an operation may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnerScope {
    Admin,
    Owner(i64),
}

impl OwnerScope {
    /// Owner id to filter by, `None` for admins.
    pub fn owner_filter(&self) -> Option<i64> {
        match self {
            OwnerScope::Admin => None,
            OwnerScope::Owner(id) => Some(*id),
        }
    }

    pub fn permits(&self, image: &Image) -> bool {
        match self {
            OwnerScope::Admin => true,
            OwnerScope::Owner(id) => image.owner_id == *id,
        }
    }
}
