//! Database repositories for data access layer
//!
//! One repository per table. Each repository owns a cloned `PgPool` and
//! implements the matching store trait from [`crate::traits`].

mod backend;
mod image;
mod settings;
mod storage;
pub mod transaction;

pub use backend::{BackendRepository, BackendRow};
pub use image::{ImageRepository, ImageRow};
pub use settings::SettingsRepository;
pub use storage::{LocationWithBackendRow, StorageLocationRepository, StorageLocationRow};

use anyhow::{Context, Result};
use imgbed_core::Config;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

/// Open the connection pool.
pub async fn connect(config: &Config) -> Result<PgPool> {
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(config.db_timeout_seconds))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!(
        max_connections = config.db_max_connections,
        "Database connected successfully"
    );

    Ok(pool)
}

/// Apply the embedded schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");
    Ok(())
}
