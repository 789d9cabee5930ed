//! Runtime settings
//!
//! Operator tunables persisted as key/value rows. The services never read the
//! table directly: they take a [`RuntimeSettings`] snapshot from a
//! [`SettingsProvider`] at the start of each operation.

use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

pub const KEY_RETRY_COUNT: &str = "retry_count";
pub const KEY_ACCESS_POLICY: &str = "access_policy";
pub const KEY_MAX_UPLOAD_MB: &str = "max_upload_mb";

/// How candidate locations are ordered on the read path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessPolicy {
    /// Lowest backend priority first, stable among equals.
    Priority,
    /// Uniform shuffle of the eligible candidates.
    Random,
}

impl Display for AccessPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            AccessPolicy::Priority => write!(f, "priority"),
            AccessPolicy::Random => write!(f, "random"),
        }
    }
}

impl FromStr for AccessPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "priority" => Ok(AccessPolicy::Priority),
            "random" => Ok(AccessPolicy::Random),
            _ => Err(anyhow::anyhow!("Invalid access policy: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Consecutive probe failures after which a location stops being served.
    /// 0 disables both the exclusion and probing.
    pub failure_threshold: u32,
    pub access_policy: AccessPolicy,
    pub max_upload_mb: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            access_policy: AccessPolicy::Random,
            max_upload_mb: 10,
        }
    }
}

impl RuntimeSettings {
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    /// Overlay persisted key/value rows. Unknown keys and unparseable values
    /// leave the current value in place.
    pub fn apply(&mut self, values: &HashMap<String, String>) {
        for (key, value) in values {
            match key.as_str() {
                KEY_RETRY_COUNT => match value.trim().parse::<u32>() {
                    Ok(v) => self.failure_threshold = v,
                    Err(_) => tracing::warn!(key = %key, value = %value, "Ignoring invalid setting"),
                },
                KEY_ACCESS_POLICY => match value.parse::<AccessPolicy>() {
                    Ok(v) => self.access_policy = v,
                    Err(_) => tracing::warn!(key = %key, value = %value, "Ignoring invalid setting"),
                },
                KEY_MAX_UPLOAD_MB => match value.trim().parse::<u64>() {
                    Ok(v) if v > 0 => self.max_upload_mb = v,
                    _ => tracing::warn!(key = %key, value = %value, "Ignoring invalid setting"),
                },
                _ => {}
            }
        }
    }
}

/// Source of settings snapshots.
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    async fn snapshot(&self) -> RuntimeSettings;
}

/// Process-wide settings cache, reloaded by whoever owns the settings table.
pub struct SettingsCache {
    defaults: RuntimeSettings,
    current: RwLock<RuntimeSettings>,
}

impl SettingsCache {
    pub fn new(defaults: RuntimeSettings) -> Self {
        Self {
            defaults,
            current: RwLock::new(defaults),
        }
    }

    /// Replace the cached values with `defaults` overlaid by `values`.
    pub async fn load(&self, values: &HashMap<String, String>) {
        let mut next = self.defaults;
        next.apply(values);
        *self.current.write().await = next;
    }
}

#[async_trait]
impl SettingsProvider for SettingsCache {
    async fn snapshot(&self) -> RuntimeSettings {
        *self.current.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn apply_overrides_known_keys_only() {
        let mut settings = RuntimeSettings::default();
        settings.apply(&values(&[
            ("retry_count", "0"),
            ("access_policy", "Priority"),
            ("max_upload_mb", "25"),
            ("site_title", "whatever"),
        ]));

        assert_eq!(settings.failure_threshold, 0);
        assert_eq!(settings.access_policy, AccessPolicy::Priority);
        assert_eq!(settings.max_upload_bytes(), 25 * 1024 * 1024);
    }

    #[test]
    fn apply_keeps_current_value_on_garbage() {
        let mut settings = RuntimeSettings::default();
        settings.apply(&values(&[
            ("retry_count", "-1"),
            ("access_policy", "fastest"),
            ("max_upload_mb", "0"),
        ]));
        assert_eq!(settings, RuntimeSettings::default());
    }

    #[tokio::test]
    async fn cache_reload_starts_from_defaults() {
        let cache = SettingsCache::new(RuntimeSettings::default());
        cache.load(&values(&[("retry_count", "7")])).await;
        assert_eq!(cache.snapshot().await.failure_threshold, 7);

        // A key removed from the table reverts to its default.
        cache.load(&values(&[])).await;
        assert_eq!(cache.snapshot().await.failure_threshold, 3);
    }
}
