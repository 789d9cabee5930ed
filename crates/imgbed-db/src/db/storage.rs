//! Storage location repository: CRUD for storage_locations table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use imgbed_core::models::{Backend, LocationWithBackend, NewStorageLocation, StorageLocation};
use imgbed_core::{AppError, BackendKind};
use sqlx::{PgConnection, PgPool, Postgres};
use std::collections::HashMap;

use crate::traits::LocationStore;

pub(crate) const LOCATION_COLUMNS: &str = "id, image_id, backend_id, backend_kind, url, \
     delete_identifier, is_active, failure_count, created_at, updated_at";

/// Row type for storage_locations table (for FromRow).
#[derive(Debug, sqlx::FromRow)]
pub struct StorageLocationRow {
    pub id: i64,
    pub image_id: i64,
    pub backend_id: i64,
    pub backend_kind: String,
    pub url: String,
    pub delete_identifier: Option<String>,
    pub is_active: bool,
    pub failure_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StorageLocationRow {
    pub fn to_storage_location(self) -> Result<StorageLocation, AppError> {
        let backend_kind: BackendKind = self.backend_kind.parse().map_err(|e: anyhow::Error| {
            AppError::Internal(format!("storage location {}: {}", self.id, e))
        })?;
        Ok(StorageLocation {
            id: self.id,
            image_id: self.image_id,
            backend_id: self.backend_id,
            backend_kind,
            url: self.url,
            delete_identifier: self.delete_identifier.filter(|d| !d.is_empty()),
            is_active: self.is_active,
            failure_count: self.failure_count,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
        .normalize_legacy())
    }
}

/// A storage location joined with its backend.
#[derive(Debug, sqlx::FromRow)]
pub struct LocationWithBackendRow {
    #[sqlx(flatten)]
    pub location: StorageLocationRow,
    pub b_name: String,
    pub b_kind: String,
    pub b_config: serde_json::Value,
    pub b_priority: i32,
    pub b_accepts_uploads: bool,
    pub b_serves_redirects: bool,
    pub b_created_at: DateTime<Utc>,
    pub b_updated_at: DateTime<Utc>,
}

impl LocationWithBackendRow {
    pub fn to_location_with_backend(self) -> Result<LocationWithBackend, AppError> {
        let kind: BackendKind = self.b_kind.parse().map_err(|e: anyhow::Error| {
            AppError::Internal(format!("backend {}: {}", self.location.backend_id, e))
        })?;
        let backend = Backend {
            id: self.location.backend_id,
            name: self.b_name,
            kind,
            config: self.b_config,
            priority: self.b_priority,
            accepts_uploads: self.b_accepts_uploads,
            serves_redirects: self.b_serves_redirects,
            created_at: self.b_created_at,
            updated_at: self.b_updated_at,
        };
        Ok(LocationWithBackend {
            location: self.location.to_storage_location()?,
            backend,
        })
    }
}

const JOINED_SELECT: &str = r#"
    SELECT l.id, l.image_id, l.backend_id, l.backend_kind, l.url, l.delete_identifier,
           l.is_active, l.failure_count, l.created_at, l.updated_at,
           b.name AS b_name, b.kind AS b_kind, b.config AS b_config,
           b.priority AS b_priority, b.accepts_uploads AS b_accepts_uploads,
           b.serves_redirects AS b_serves_redirects,
           b.created_at AS b_created_at, b.updated_at AS b_updated_at
    FROM storage_locations l
    JOIN backends b ON b.id = l.backend_id
"#;

/// Load the locations of several images in one query, grouped by image id.
pub(crate) async fn load_locations(
    conn: &mut PgConnection,
    image_ids: &[i64],
) -> Result<HashMap<i64, Vec<LocationWithBackend>>, AppError> {
    if image_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let sql = format!("{} WHERE l.image_id = ANY($1) ORDER BY l.id", JOINED_SELECT);
    let rows: Vec<LocationWithBackendRow> =
        sqlx::query_as::<Postgres, LocationWithBackendRow>(&sql)
            .bind(image_ids)
            .fetch_all(&mut *conn)
            .await?;

    let mut grouped: HashMap<i64, Vec<LocationWithBackend>> = HashMap::new();
    for row in rows {
        let loc = row.to_location_with_backend()?;
        grouped.entry(loc.location.image_id).or_default().push(loc);
    }
    Ok(grouped)
}

/// Insert one location on an open connection or transaction.
pub(crate) async fn insert_location(
    conn: &mut PgConnection,
    location: &NewStorageLocation,
) -> Result<StorageLocation, AppError> {
    let sql = format!(
        r#"
        INSERT INTO storage_locations (image_id, backend_id, backend_kind, url, delete_identifier)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {}
        "#,
        LOCATION_COLUMNS
    );
    let row: StorageLocationRow = sqlx::query_as::<Postgres, StorageLocationRow>(&sql)
        .bind(location.image_id)
        .bind(location.backend_id)
        .bind(location.backend_kind.as_str())
        .bind(&location.url)
        .bind(&location.delete_identifier)
        .fetch_one(&mut *conn)
        .await?;
    row.to_storage_location()
}

/// Repository for storage_locations table.
#[derive(Clone)]
pub struct StorageLocationRepository {
    pool: PgPool,
}

impl StorageLocationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch a storage location by id.
    #[tracing::instrument(skip(self), fields(db.table = "storage_locations", db.record_id = %id))]
    pub async fn get_by_id(&self, id: i64) -> Result<Option<StorageLocation>, AppError> {
        let sql = format!("SELECT {} FROM storage_locations WHERE id = $1", LOCATION_COLUMNS);
        let row: Option<StorageLocationRow> =
            sqlx::query_as::<Postgres, StorageLocationRow>(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|r| r.to_storage_location()).transpose()
    }
}

#[async_trait]
impl LocationStore for StorageLocationRepository {
    #[tracing::instrument(skip(self), fields(db.table = "storage_locations"))]
    async fn create_location(
        &self,
        location: NewStorageLocation,
    ) -> Result<StorageLocation, AppError> {
        let mut conn = self.pool.acquire().await?;
        insert_location(&mut conn, &location).await
    }

    #[tracing::instrument(skip(self), fields(db.table = "storage_locations"))]
    async fn list_for_image(&self, image_id: i64) -> Result<Vec<LocationWithBackend>, AppError> {
        let mut conn = self.pool.acquire().await?;
        let mut grouped = load_locations(&mut conn, &[image_id]).await?;
        Ok(grouped.remove(&image_id).unwrap_or_default())
    }

    #[tracing::instrument(skip(self), fields(db.table = "storage_locations", db.record_id = %id))]
    async fn increment_failure(&self, id: i64) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE storage_locations SET failure_count = failure_count + 1, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "storage_locations", db.record_id = %id))]
    async fn reset_failure(&self, id: i64) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE storage_locations SET failure_count = 0, updated_at = NOW() WHERE id = $1 AND failure_count <> 0",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "storage_locations", db.record_id = %id))]
    async fn set_active(&self, id: i64, active: bool) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE storage_locations SET is_active = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(active)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
