//! Configuration module
//!
//! Process configuration read from the environment (after loading `.env`).
//! Tunables that operators change at runtime (failure threshold, access
//! policy, upload size limit) live in the `settings` table; the values here
//! are only their defaults when the table has no row for a key.

use std::env;
use std::time::Duration;

use crate::settings::{AccessPolicy, RuntimeSettings};

// Common constants
const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const HEALTH_PROBE_TIMEOUT_SECS: u64 = 5;
const UPSTREAM_TIMEOUT_SECS: u64 = 30;
const RANDOM_CACHE_REFRESH_SECS: u64 = 300;
const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
const DEFAULT_MAX_UPLOAD_MB: u64 = 10;

/// Application configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub environment: String,
    /// Timeout for a single HEAD probe against a location URL.
    pub health_probe_timeout_secs: u64,
    /// Timeout for calls to third-party hosting APIs.
    pub upstream_timeout_secs: u64,
    /// Interval of the background random-image cache rebuild. 0 = disabled.
    pub random_cache_refresh_secs: u64,
    pub default_failure_threshold: u32,
    pub default_access_policy: AccessPolicy,
    pub default_max_upload_mb: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = lookup("ENVIRONMENT")
            .or_else(|| lookup("APP_ENV"))
            .unwrap_or_else(|| "development".to_string());

        let default_access_policy = match lookup("DEFAULT_ACCESS_POLICY") {
            Some(raw) => raw
                .parse()
                .map_err(|_| anyhow::anyhow!("DEFAULT_ACCESS_POLICY must be 'priority' or 'random'"))?,
            None => AccessPolicy::Random,
        };

        let config = Config {
            database_url: lookup("DATABASE_URL")
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set"))?,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", MAX_CONNECTIONS),
            db_timeout_seconds: parse_or(&lookup, "DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS),
            environment,
            health_probe_timeout_secs: parse_or(
                &lookup,
                "HEALTH_PROBE_TIMEOUT_SECS",
                HEALTH_PROBE_TIMEOUT_SECS,
            ),
            upstream_timeout_secs: parse_or(&lookup, "UPSTREAM_TIMEOUT_SECS", UPSTREAM_TIMEOUT_SECS),
            random_cache_refresh_secs: parse_or(
                &lookup,
                "RANDOM_CACHE_REFRESH_SECS",
                RANDOM_CACHE_REFRESH_SECS,
            ),
            default_failure_threshold: parse_or(
                &lookup,
                "DEFAULT_FAILURE_THRESHOLD",
                DEFAULT_FAILURE_THRESHOLD,
            ),
            default_access_policy,
            default_max_upload_mb: parse_or(&lookup, "DEFAULT_MAX_UPLOAD_MB", DEFAULT_MAX_UPLOAD_MB),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.database_url.starts_with("postgresql://")
            && !self.database_url.starts_with("postgres://")
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        if self.health_probe_timeout_secs == 0 {
            return Err(anyhow::anyhow!(
                "HEALTH_PROBE_TIMEOUT_SECS must be greater than zero"
            ));
        }

        if self.upstream_timeout_secs == 0 {
            return Err(anyhow::anyhow!("UPSTREAM_TIMEOUT_SECS must be greater than zero"));
        }

        Ok(())
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn health_probe_timeout(&self) -> Duration {
        Duration::from_secs(self.health_probe_timeout_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    /// Settings used until (and wherever) the settings table has no value.
    pub fn default_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            failure_threshold: self.default_failure_threshold,
            access_policy: self.default_access_policy,
            max_upload_mb: self.default_max_upload_mb,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}
