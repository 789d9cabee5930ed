//! Image repository: CRUD for images table, with their storage locations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use imgbed_core::models::{
    Image, ImageWithLocations, LocationWithBackend, NewImage, NewStorageLocation, StorageLocation,
};
use imgbed_core::AppError;
use sqlx::{PgConnection, PgPool, Postgres};
use std::collections::HashMap;
use uuid::Uuid;

use super::storage::{insert_location, load_locations};
use super::transaction::{with_transaction, TransactionGuard};
use crate::traits::ImageStore;

const IMAGE_COLUMNS: &str = "id, public_id, hash, original_name, size_bytes, content_type, \
     width, height, owner_id, allow_random, created_at, updated_at";

/// Row type for images table (for FromRow).
#[derive(Debug, sqlx::FromRow)]
pub struct ImageRow {
    pub id: i64,
    pub public_id: Uuid,
    pub hash: String,
    pub original_name: String,
    pub size_bytes: i64,
    pub content_type: String,
    pub width: i32,
    pub height: i32,
    pub owner_id: i64,
    pub allow_random: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ImageRow> for Image {
    fn from(row: ImageRow) -> Self {
        Image {
            id: row.id,
            public_id: row.public_id,
            hash: row.hash,
            original_name: row.original_name,
            size_bytes: row.size_bytes,
            content_type: row.content_type,
            width: row.width,
            height: row.height,
            owner_id: row.owner_id,
            allow_random: row.allow_random,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Escape LIKE wildcards so a keyword matches literally.
fn like_pattern(keyword: &str) -> String {
    let escaped = keyword
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Attach locations to image rows, preserving row order.
async fn with_locations(
    conn: &mut PgConnection,
    rows: Vec<ImageRow>,
) -> Result<Vec<ImageWithLocations>, AppError> {
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let mut grouped: HashMap<i64, Vec<LocationWithBackend>> = load_locations(conn, &ids).await?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let locations = grouped.remove(&row.id).unwrap_or_default();
            ImageWithLocations {
                image: row.into(),
                locations,
            }
        })
        .collect())
}

async fn insert_image(conn: &mut PgConnection, image: &NewImage) -> Result<Image, AppError> {
    let sql = format!(
        r#"
        INSERT INTO images (public_id, hash, original_name, size_bytes, content_type,
                            width, height, owner_id, allow_random)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {}
        "#,
        IMAGE_COLUMNS
    );
    let row: ImageRow = sqlx::query_as::<Postgres, ImageRow>(&sql)
        .bind(image.public_id)
        .bind(&image.hash)
        .bind(&image.original_name)
        .bind(image.size_bytes)
        .bind(&image.content_type)
        .bind(image.width)
        .bind(image.height)
        .bind(image.owner_id)
        .bind(image.allow_random)
        .fetch_one(&mut *conn)
        .await?;
    Ok(row.into())
}

/// Repository for images table.
#[derive(Clone)]
pub struct ImageRepository {
    pool: PgPool,
}

impl ImageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_with_locations(
        &self,
        sql: &str,
        bind: impl FnOnce(
            sqlx::query::QueryAs<'_, Postgres, ImageRow, sqlx::postgres::PgArguments>,
        ) -> sqlx::query::QueryAs<'_, Postgres, ImageRow, sqlx::postgres::PgArguments>,
    ) -> Result<Option<ImageWithLocations>, AppError> {
        let mut conn = self.pool.acquire().await?;
        let row: Option<ImageRow> = bind(sqlx::query_as::<Postgres, ImageRow>(sql))
            .fetch_optional(&mut *conn)
            .await?;
        match row {
            Some(row) => Ok(with_locations(&mut conn, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ImageStore for ImageRepository {
    #[tracing::instrument(skip(self), fields(db.table = "images"))]
    async fn find_by_hash_and_owner(
        &self,
        hash: &str,
        owner_id: i64,
    ) -> Result<Option<ImageWithLocations>, AppError> {
        let sql = format!(
            "SELECT {} FROM images WHERE hash = $1 AND owner_id = $2",
            IMAGE_COLUMNS
        );
        self.fetch_one_with_locations(&sql, |q| q.bind(hash.to_string()).bind(owner_id))
            .await
    }

    #[tracing::instrument(skip(self), fields(db.table = "images"))]
    async fn find_shareable_by_hash(
        &self,
        hash: &str,
        owner_id: i64,
    ) -> Result<Option<ImageWithLocations>, AppError> {
        let sql = format!(
            r#"
            SELECT {} FROM images i
            WHERE i.hash = $1 AND i.owner_id <> $2
              AND EXISTS (
                  SELECT 1 FROM storage_locations l
                  WHERE l.image_id = i.id AND l.is_active
              )
            ORDER BY i.id
            LIMIT 1
            "#,
            IMAGE_COLUMNS
        );
        self.fetch_one_with_locations(&sql, |q| q.bind(hash.to_string()).bind(owner_id))
            .await
    }

    #[tracing::instrument(skip(self, image), fields(db.table = "images", public_id = %image.public_id))]
    async fn create_image(&self, image: NewImage) -> Result<Image, AppError> {
        let mut conn = self.pool.acquire().await?;
        insert_image(&mut conn, &image).await
    }

    #[tracing::instrument(
        skip(self, image, sources),
        fields(db.table = "images", public_id = %image.public_id, links = sources.len())
    )]
    async fn create_shared_image(
        &self,
        image: NewImage,
        sources: &[StorageLocation],
    ) -> Result<ImageWithLocations, AppError> {
        let mut tx = TransactionGuard::begin(&self.pool).await?;

        let created = match insert_image(&mut tx, &image).await {
            Ok(created) => created,
            Err(e) => {
                tx.rollback().await?;
                return Err(e);
            }
        };

        for source in sources {
            let link = NewStorageLocation {
                image_id: created.id,
                backend_id: source.backend_id,
                backend_kind: source.backend_kind,
                url: source.url.clone(),
                delete_identifier: source.delete_identifier.clone(),
            };
            if let Err(e) = insert_location(&mut tx, &link).await {
                tx.rollback().await?;
                return Err(e);
            }
        }

        let mut result = with_locations(&mut tx, vec![ImageRow::from_image(&created)]).await?;
        tx.commit().await?;

        result.pop().ok_or_else(|| {
            AppError::Internal(format!("shared image {} vanished after insert", created.id))
        })
    }

    #[tracing::instrument(skip(self), fields(db.table = "images", public_id = %public_id))]
    async fn get_image(
        &self,
        public_id: Uuid,
        owner_id: Option<i64>,
    ) -> Result<Option<ImageWithLocations>, AppError> {
        let sql = format!(
            "SELECT {} FROM images WHERE public_id = $1 AND ($2::BIGINT IS NULL OR owner_id = $2)",
            IMAGE_COLUMNS
        );
        self.fetch_one_with_locations(&sql, |q| q.bind(public_id).bind(owner_id))
            .await
    }

    #[tracing::instrument(skip(self), fields(db.table = "images", db.record_id = %id))]
    async fn get_image_by_id(&self, id: i64) -> Result<Option<ImageWithLocations>, AppError> {
        let sql = format!("SELECT {} FROM images WHERE id = $1", IMAGE_COLUMNS);
        self.fetch_one_with_locations(&sql, |q| q.bind(id)).await
    }

    #[tracing::instrument(skip(self, public_ids), fields(db.table = "images", count = public_ids.len()))]
    async fn count_owned(&self, public_ids: &[Uuid], owner_id: i64) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM images WHERE public_id = ANY($1) AND owner_id = $2",
        )
        .bind(public_ids)
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    #[tracing::instrument(skip(self), fields(db.table = "images"))]
    async fn count_other_with_hash(&self, hash: &str, exclude_id: i64) -> Result<i64, AppError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM images WHERE hash = $1 AND id <> $2")
                .bind(hash)
                .bind(exclude_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    #[tracing::instrument(skip(self), fields(db.table = "images", db.record_id = %id))]
    async fn delete_image(&self, id: i64) -> Result<(), AppError> {
        with_transaction(&self.pool, |tx| {
            Box::pin(async move {
                sqlx::query("DELETE FROM storage_locations WHERE image_id = $1")
                    .bind(id)
                    .execute(&mut **tx)
                    .await?;
                sqlx::query("DELETE FROM images WHERE id = $1")
                    .bind(id)
                    .execute(&mut **tx)
                    .await?;
                Ok::<_, sqlx::Error>(())
            })
        })
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "images"))]
    async fn list_images(
        &self,
        owner_id: Option<i64>,
        keyword: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(i64, Vec<ImageWithLocations>), AppError> {
        let pattern = keyword
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(like_pattern);

        const FILTER: &str = "($1::BIGINT IS NULL OR owner_id = $1) \
             AND ($2::TEXT IS NULL OR original_name ILIKE $2)";

        let mut conn = self.pool.acquire().await?;

        let total: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM images WHERE {}", FILTER))
                .bind(owner_id)
                .bind(&pattern)
                .fetch_one(&mut *conn)
                .await?;

        let sql = format!(
            "SELECT {} FROM images WHERE {} ORDER BY created_at DESC, id DESC LIMIT $3 OFFSET $4",
            IMAGE_COLUMNS, FILTER
        );
        let rows: Vec<ImageRow> = sqlx::query_as::<Postgres, ImageRow>(&sql)
            .bind(owner_id)
            .bind(&pattern)
            .bind(limit)
            .bind(offset)
            .fetch_all(&mut *conn)
            .await?;

        Ok((total, with_locations(&mut conn, rows).await?))
    }

    #[tracing::instrument(skip(self, public_ids), fields(db.table = "images", count = public_ids.len()))]
    async fn set_allow_random(
        &self,
        public_ids: &[Uuid],
        owner_id: Option<i64>,
        allow: bool,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE images SET allow_random = $3, updated_at = NOW()
            WHERE public_id = ANY($1) AND ($2::BIGINT IS NULL OR owner_id = $2)
            "#,
        )
        .bind(public_ids)
        .bind(owner_id)
        .bind(allow)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    #[tracing::instrument(skip(self), fields(db.table = "images"))]
    async fn list_random_eligible(&self) -> Result<Vec<Uuid>, AppError> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT public_id FROM images WHERE allow_random ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }
}

impl ImageRow {
    fn from_image(image: &Image) -> Self {
        ImageRow {
            id: image.id,
            public_id: image.public_id,
            hash: image.hash.clone(),
            original_name: image.original_name.clone(),
            size_bytes: image.size_bytes,
            content_type: image.content_type.clone(),
            width: image.width,
            height: image.height,
            owner_id: image.owner_id,
            allow_random: image.allow_random,
            created_at: image.created_at,
            updated_at: image.updated_at,
        }
    }
}
