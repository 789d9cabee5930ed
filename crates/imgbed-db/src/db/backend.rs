//! Backend repository: CRUD for backends table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use imgbed_core::models::{Backend, BackendFlag, NewBackend};
use imgbed_core::{AppError, BackendKind};
use sqlx::{PgPool, Postgres};

use crate::traits::BackendStore;

const BACKEND_COLUMNS: &str =
    "id, name, kind, config, priority, accepts_uploads, serves_redirects, created_at, updated_at";

/// Row type for backends table (for FromRow).
#[derive(Debug, sqlx::FromRow)]
pub struct BackendRow {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub config: serde_json::Value,
    pub priority: i32,
    pub accepts_uploads: bool,
    pub serves_redirects: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BackendRow {
    pub fn to_backend(self) -> Result<Backend, AppError> {
        let kind: BackendKind = self.kind.parse().map_err(|e: anyhow::Error| {
            AppError::Internal(format!("backend {}: {}", self.id, e))
        })?;
        Ok(Backend {
            id: self.id,
            name: self.name,
            kind,
            config: self.config,
            priority: self.priority,
            accepts_uploads: self.accepts_uploads,
            serves_redirects: self.serves_redirects,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Repository for backends table.
#[derive(Clone)]
pub struct BackendRepository {
    pool: PgPool,
}

impl BackendRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BackendStore for BackendRepository {
    #[tracing::instrument(skip(self), fields(db.table = "backends"))]
    async fn list_backends(&self) -> Result<Vec<Backend>, AppError> {
        let sql = format!("SELECT {} FROM backends ORDER BY id", BACKEND_COLUMNS);
        let rows: Vec<BackendRow> = sqlx::query_as::<Postgres, BackendRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        let mut backends = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            match row.to_backend() {
                Ok(backend) => backends.push(backend),
                Err(e) => tracing::warn!(backend_id = id, error = %e, "Skipping backend with unknown kind"),
            }
        }
        Ok(backends)
    }

    #[tracing::instrument(skip(self), fields(db.table = "backends", db.record_id = %id))]
    async fn get_backend(&self, id: i64) -> Result<Option<Backend>, AppError> {
        let sql = format!("SELECT {} FROM backends WHERE id = $1", BACKEND_COLUMNS);
        let row: Option<BackendRow> = sqlx::query_as::<Postgres, BackendRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.to_backend()).transpose()
    }

    #[tracing::instrument(skip(self, backend), fields(db.table = "backends", name = %backend.name))]
    async fn create_backend(&self, backend: NewBackend) -> Result<Backend, AppError> {
        let sql = format!(
            r#"
            INSERT INTO backends (name, kind, config, priority, accepts_uploads, serves_redirects)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            BACKEND_COLUMNS
        );
        let row: BackendRow = sqlx::query_as::<Postgres, BackendRow>(&sql)
            .bind(&backend.name)
            .bind(backend.kind.as_str())
            .bind(&backend.config)
            .bind(backend.priority)
            .bind(backend.accepts_uploads)
            .bind(backend.serves_redirects)
            .fetch_one(&self.pool)
            .await?;
        row.to_backend()
    }

    #[tracing::instrument(skip(self, backend), fields(db.table = "backends", db.record_id = %id))]
    async fn update_backend(
        &self,
        id: i64,
        backend: NewBackend,
    ) -> Result<Option<Backend>, AppError> {
        let sql = format!(
            r#"
            UPDATE backends
            SET name = $2, kind = $3, config = $4, priority = $5,
                accepts_uploads = $6, serves_redirects = $7, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            BACKEND_COLUMNS
        );
        let row: Option<BackendRow> = sqlx::query_as::<Postgres, BackendRow>(&sql)
            .bind(id)
            .bind(&backend.name)
            .bind(backend.kind.as_str())
            .bind(&backend.config)
            .bind(backend.priority)
            .bind(backend.accepts_uploads)
            .bind(backend.serves_redirects)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.to_backend()).transpose()
    }

    #[tracing::instrument(skip(self), fields(db.table = "backends", db.record_id = %id))]
    async fn set_backend_flag(
        &self,
        id: i64,
        flag: BackendFlag,
        value: bool,
    ) -> Result<Option<Backend>, AppError> {
        // Column name comes from a closed enum, never from input.
        let sql = format!(
            "UPDATE backends SET {} = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            flag.column(),
            BACKEND_COLUMNS
        );
        let row: Option<BackendRow> = sqlx::query_as::<Postgres, BackendRow>(&sql)
            .bind(id)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.to_backend()).transpose()
    }

    #[tracing::instrument(skip(self), fields(db.table = "backends", db.record_id = %id))]
    async fn delete_backend(&self, id: i64) -> Result<bool, AppError> {
        // ON DELETE RESTRICT turns a still-referenced backend into a Conflict.
        let result = sqlx::query("DELETE FROM backends WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self), fields(db.table = "storage_locations", backend_id = %id))]
    async fn count_locations_for_backend(&self, id: i64) -> Result<i64, AppError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM storage_locations WHERE backend_id = $1")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
