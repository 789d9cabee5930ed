//! Application wiring shared by the `imgbed` binary.

use anyhow::Context;
use imgbed_core::models::OwnerScope;
use imgbed_core::{AppError, Config, ErrorMetadata, LogLevel, SettingsCache};
use imgbed_db::{
    connect, run_migrations, BackendRepository, ImageRepository, SettingsRepository, SettingsStore,
    StorageLocationRepository,
};
use imgbed_services::{
    BackendAdmin, BackendRegistry, BatchRunner, DefaultHealthProbe, ImageService, LocationResolver,
    RandomImageCache, TaskTracker,
};
use imgbed_storage::ConfigUploaderFactory;
use std::path::Path;
use std::sync::Arc;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Initialize tracing for CLI binaries.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("imgbed=info")),
        )
        .init();
}

/// Every long-lived component, wired against PostgreSQL.
pub struct AppContext {
    pub config: Config,
    pub settings_store: Arc<dyn SettingsStore>,
    pub settings: Arc<SettingsCache>,
    pub registry: Arc<BackendRegistry>,
    pub random_cache: Arc<RandomImageCache>,
    pub images: Arc<ImageService>,
    pub resolver: LocationResolver,
    pub backends: BackendAdmin,
    pub batch: BatchRunner,
}

impl AppContext {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let pool = connect(&config).await?;
        run_migrations(&pool).await?;

        let backend_repo = Arc::new(BackendRepository::new(pool.clone()));
        let image_repo = Arc::new(ImageRepository::new(pool.clone()));
        let location_repo = Arc::new(StorageLocationRepository::new(pool.clone()));
        let settings_store: Arc<dyn SettingsStore> = Arc::new(SettingsRepository::new(pool));

        let settings = Arc::new(SettingsCache::new(config.default_settings()));
        let values = settings_store
            .load_settings()
            .await
            .context("Failed to load settings")?;
        settings.load(&values).await;

        let factory = Arc::new(ConfigUploaderFactory::new(config.upstream_timeout()));
        let registry = Arc::new(BackendRegistry::new(backend_repo.clone(), factory));
        let registered = registry
            .refresh()
            .await
            .context("Failed to load storage backends")?;
        tracing::info!(backends = registered, "Backend registry ready");

        let random_cache = Arc::new(RandomImageCache::new(image_repo.clone()));
        random_cache
            .refresh()
            .await
            .context("Failed to load random image pool")?;

        let images = Arc::new(ImageService::new(
            image_repo.clone(),
            location_repo.clone(),
            registry.clone(),
            settings.clone(),
            random_cache.clone(),
        ));

        let probe = Arc::new(
            DefaultHealthProbe::new(registry.clone(), config.health_probe_timeout())
                .context("Failed to build health probe")?,
        );
        let resolver = LocationResolver::new(
            image_repo.clone(),
            location_repo,
            settings.clone(),
            probe,
        );
        let backends = BackendAdmin::new(backend_repo, registry.clone());
        let batch = BatchRunner::new(
            images.clone(),
            image_repo,
            registry.clone(),
            Arc::new(TaskTracker::new()),
        );

        Ok(Self {
            config,
            settings_store,
            settings,
            registry,
            random_cache,
            images,
            resolver,
            backends,
            batch,
        })
    }

    /// Re-read the settings table into the cache.
    pub async fn reload_settings(&self) -> anyhow::Result<()> {
        let values = self.settings_store.load_settings().await?;
        self.settings.load(&values).await;
        Ok(())
    }
}

/// Log a failed command at the severity its error class calls for.
pub fn report_error(err: &anyhow::Error) {
    match err.downcast_ref::<AppError>() {
        Some(app) => {
            let code = app.error_code();
            let details = app.detailed_message();
            match app.log_level() {
                LogLevel::Debug => tracing::debug!(code, error = %details, "Command failed"),
                LogLevel::Warn => tracing::warn!(code, error = %details, "Command failed"),
                LogLevel::Error => tracing::error!(code, error = %details, "Command failed"),
            }
            eprintln!(
                "error [{}{}]: {}",
                code,
                if app.is_recoverable() { ", retryable" } else { "" },
                app.client_message()
            );
        }
        None => {
            tracing::error!(error = ?err, "Command failed");
            eprintln!("error: {:#}", err);
        }
    }
}

/// `--owner` given means acting as that user; absent means admin.
pub fn owner_scope(owner: Option<i64>) -> OwnerScope {
    owner.map_or(OwnerScope::Admin, OwnerScope::Owner)
}

/// MIME type from the file extension, falling back to a generic binary type.
pub fn content_type_for(path: &Path) -> String {
    image::ImageFormat::from_path(path)
        .map(|format| format.to_mime_type().to_string())
        .unwrap_or_else(|_| FALLBACK_CONTENT_TYPE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_from_extension() {
        assert_eq!(content_type_for(Path::new("cat.PNG")), "image/png");
        assert_eq!(content_type_for(Path::new("/tmp/dog.jpeg")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("notes")), FALLBACK_CONTENT_TYPE);
        assert_eq!(content_type_for(Path::new("archive.zip")), FALLBACK_CONTENT_TYPE);
    }

    #[test]
    fn owner_flag_selects_scope() {
        assert_eq!(owner_scope(None), OwnerScope::Admin);
        assert_eq!(owner_scope(Some(7)), OwnerScope::Owner(7));
    }
}
