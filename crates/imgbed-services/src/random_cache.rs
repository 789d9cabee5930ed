//! Pool of public ids eligible for the random-image endpoint.

use imgbed_core::AppError;
use imgbed_db::ImageStore;
use rand::seq::IndexedRandom;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;
use uuid::Uuid;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

pub struct RandomImageCache {
    images: Arc<dyn ImageStore>,
    ids: RwLock<Vec<Uuid>>,
    // held across load and swap so refreshes land in call order
    refreshing: Mutex<()>,
}

impl RandomImageCache {
    pub fn new(images: Arc<dyn ImageStore>) -> Self {
        Self {
            images,
            ids: RwLock::new(Vec::new()),
            refreshing: Mutex::new(()),
        }
    }

    /// Reload the pool from the image table and swap it in.
    pub async fn refresh(&self) -> Result<usize, AppError> {
        let _refreshing = self.refreshing.lock().await;
        let ids = self.images.list_random_eligible().await?;
        let count = ids.len();
        *self.ids.write().await = ids;
        tracing::info!(pool_size = count, "Random image cache updated");
        Ok(count)
    }

    /// Rebuild in the background after an eligibility change.
    pub fn spawn_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = cache.refresh().await {
                tracing::error!(error = %e, "Random image cache refresh failed");
            }
        })
    }

    /// Refresh now and then on every tick of `every`.
    /// Returns a JoinHandle for graceful shutdown
    pub fn start(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            loop {
                ticker.tick().await;
                if let Err(e) = self.refresh().await {
                    tracing::error!(error = %e, "Scheduled random image cache refresh failed");
                }
            }
        })
    }

    /// A uniformly chosen eligible id.
    pub async fn random_image_id(&self) -> Result<Uuid, AppError> {
        let ids = self.ids.read().await;
        ids.choose(&mut rand::rng())
            .copied()
            .ok_or_else(|| AppError::NotFound("No images available in the random pool".to_string()))
    }

    pub async fn len(&self) -> usize {
        self.ids.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ids.read().await.is_empty()
    }
}
