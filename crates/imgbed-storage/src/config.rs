//! Per-kind backend configuration.
//!
//! Backends persist their configuration as a JSON object with camelCase
//! keys. Each kind parses it into its own typed struct; a blob that does not
//! fit the kind is a [`StorageError::Config`].

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::traits::{StorageError, StorageResult};
use crate::BackendKind;

const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalConfig {
    /// Root directory files are written under.
    pub storage_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStoreConfig {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible providers (MinIO, OSS, Spaces...).
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub access_key_secret: Option<String>,
    /// Public base URL objects are served from (CDN or custom domain).
    #[serde(default)]
    pub public_url: Option<String>,
    /// Key prefix, without leading or trailing slashes.
    #[serde(default)]
    pub upload_path: Option<String>,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThirdPartyConfig {
    /// API root, e.g. `https://sm.ms/api/v2/`.
    #[serde(alias = "baseURL")]
    pub base_url: String,
    pub token: String,
}

impl ThirdPartyConfig {
    /// Base URL with exactly one trailing slash.
    pub fn api_root(&self) -> String {
        format!("{}/", self.base_url.trim_end_matches('/'))
    }
}

/// Typed configuration of one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploaderConfig {
    Local(LocalConfig),
    ObjectStore(ObjectStoreConfig),
    ThirdParty(ThirdPartyConfig),
}

impl UploaderConfig {
    pub fn parse(kind: BackendKind, raw: &serde_json::Value) -> StorageResult<Self> {
        match kind {
            BackendKind::Local => {
                let config: LocalConfig = parse_as(kind, raw)?;
                require(kind, "storagePath", &config.storage_path)?;
                Ok(UploaderConfig::Local(config))
            }
            BackendKind::ObjectStore => {
                let config: ObjectStoreConfig = parse_as(kind, raw)?;
                require(kind, "bucket", &config.bucket)?;
                if config.access_key_id.is_some() != config.access_key_secret.is_some() {
                    return Err(StorageError::Config(
                        "object-store backend needs both accessKeyId and accessKeySecret, or neither"
                            .to_string(),
                    ));
                }
                Ok(UploaderConfig::ObjectStore(config))
            }
            BackendKind::ThirdPartyHost => {
                let config: ThirdPartyConfig = parse_as(kind, raw)?;
                require(kind, "baseUrl", &config.base_url)?;
                require(kind, "token", &config.token)?;
                if !config.base_url.starts_with("http://") && !config.base_url.starts_with("https://")
                {
                    return Err(StorageError::Config(format!(
                        "third-party-host baseUrl must be an http(s) URL, got {}",
                        config.base_url
                    )));
                }
                Ok(UploaderConfig::ThirdParty(config))
            }
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            UploaderConfig::Local(_) => BackendKind::Local,
            UploaderConfig::ObjectStore(_) => BackendKind::ObjectStore,
            UploaderConfig::ThirdParty(_) => BackendKind::ThirdPartyHost,
        }
    }
}

fn parse_as<T: DeserializeOwned>(kind: BackendKind, raw: &serde_json::Value) -> StorageResult<T> {
    serde_json::from_value(raw.clone())
        .map_err(|e| StorageError::Config(format!("invalid {} configuration: {}", kind, e)))
}

fn require(kind: BackendKind, key: &str, value: &str) -> StorageResult<()> {
    if value.trim().is_empty() {
        return Err(StorageError::Config(format!(
            "{} backend requires a non-empty {}",
            kind, key
        )));
    }
    Ok(())
}
