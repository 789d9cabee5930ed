//! Read-path selection of a healthy storage location.
//!
//! Candidates are the active locations on redirect-serving backends whose
//! failure counter is below the configured threshold. They are ordered by
//! backend priority or shuffled, then probed one at a time. A threshold of
//! zero disables both the counter filter and probing.
//!
//! Failure counters are advisory. Resets and increments are spawned and not
//! awaited, so a read that follows closely may still see the old value.

use imgbed_core::models::LocationWithBackend;
use imgbed_core::{AccessPolicy, AppError, SettingsProvider};
use imgbed_db::{ImageStore, LocationStore};
use rand::seq::SliceRandom;
use std::sync::Arc;
use uuid::Uuid;

use crate::health::HealthProbe;

pub struct LocationResolver {
    images: Arc<dyn ImageStore>,
    locations: Arc<dyn LocationStore>,
    settings: Arc<dyn SettingsProvider>,
    probe: Arc<dyn HealthProbe>,
}

impl LocationResolver {
    pub fn new(
        images: Arc<dyn ImageStore>,
        locations: Arc<dyn LocationStore>,
        settings: Arc<dyn SettingsProvider>,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        Self {
            images,
            locations,
            settings,
            probe,
        }
    }

    /// Pick a location to serve `public_id` from.
    ///
    /// `NotFound` means the image does not exist. `Unavailable` means it
    /// exists but no candidate passed the filter or the probe.
    #[tracing::instrument(skip(self), fields(public_id = %public_id))]
    pub async fn get_healthy_location(
        &self,
        public_id: Uuid,
    ) -> Result<LocationWithBackend, AppError> {
        let image = self
            .images
            .get_image(public_id, None)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Image {} not found", public_id)))?;

        let settings = self.settings.snapshot().await;
        let threshold = settings.failure_threshold;

        let mut candidates = eligible_candidates(image.locations, threshold);
        if candidates.is_empty() {
            return Err(AppError::Unavailable(format!(
                "No available storage locations for image {}",
                public_id
            )));
        }
        order_candidates(&mut candidates, settings.access_policy);

        if threshold == 0 {
            return Ok(candidates.swap_remove(0));
        }

        for candidate in candidates {
            if self.probe.is_healthy(&candidate).await {
                if candidate.location.failure_count != 0 {
                    self.spawn_reset(candidate.location.id);
                }
                return Ok(candidate);
            }
            tracing::info!(
                location_id = candidate.location.id,
                backend_id = candidate.location.backend_id,
                failure_count = candidate.location.failure_count,
                "Storage location failed health probe"
            );
            self.spawn_increment(candidate.location.id);
        }

        Err(AppError::Unavailable(format!(
            "All storage locations for image {} are unreachable",
            public_id
        )))
    }

    fn spawn_reset(&self, location_id: i64) {
        let locations = Arc::clone(&self.locations);
        tokio::spawn(async move {
            if let Err(e) = locations.reset_failure(location_id).await {
                tracing::warn!(location_id, error = %e, "Failed to reset failure counter");
            }
        });
    }

    fn spawn_increment(&self, location_id: i64) {
        let locations = Arc::clone(&self.locations);
        tokio::spawn(async move {
            if let Err(e) = locations.increment_failure(location_id).await {
                tracing::warn!(location_id, error = %e, "Failed to increment failure counter");
            }
        });
    }
}

/// Active locations on redirect-serving backends under the failure threshold.
/// A threshold of zero admits any failure count.
pub fn eligible_candidates(
    locations: Vec<LocationWithBackend>,
    threshold: u32,
) -> Vec<LocationWithBackend> {
    locations
        .into_iter()
        .filter(|c| c.location.is_active && c.backend.serves_redirects)
        .filter(|c| threshold == 0 || i64::from(c.location.failure_count) < i64::from(threshold))
        .collect()
}

/// Stable ascending sort by backend priority, or one uniform shuffle.
pub fn order_candidates(candidates: &mut [LocationWithBackend], policy: AccessPolicy) {
    match policy {
        AccessPolicy::Priority => candidates.sort_by_key(|c| c.backend.priority),
        AccessPolicy::Random => candidates.shuffle(&mut rand::rng()),
    }
}
