use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use crate::storage_types::BackendKind;

pub const DEFAULT_BACKEND_PRIORITY: i32 = 1;

/// A configured storage backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backend {
    pub id: i64,
    pub name: String,
    pub kind: BackendKind,
    /// Kind-specific configuration; parsed by the uploader factory.
    pub config: serde_json::Value,
    /// Lower is preferred.
    pub priority: i32,
    pub accepts_uploads: bool,
    pub serves_redirects: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBackend {
    pub name: String,
    pub kind: BackendKind,
    pub config: serde_json::Value,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub accepts_uploads: bool,
    #[serde(default = "default_true")]
    pub serves_redirects: bool,
}

fn default_priority() -> i32 {
    DEFAULT_BACKEND_PRIORITY
}

fn default_true() -> bool {
    true
}

/// Boolean switches on a backend that can be toggled independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendFlag {
    AcceptsUploads,
    ServesRedirects,
}

impl BackendFlag {
    pub fn column(&self) -> &'static str {
        match self {
            BackendFlag::AcceptsUploads => "accepts_uploads",
            BackendFlag::ServesRedirects => "serves_redirects",
        }
    }
}

impl Display for BackendFlag {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.column())
    }
}

impl FromStr for BackendFlag {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accepts_uploads" | "upload" => Ok(BackendFlag::AcceptsUploads),
            "serves_redirects" | "redirect" => Ok(BackendFlag::ServesRedirects),
            _ => Err(anyhow::anyhow!("Invalid backend flag: {}", s)),
        }
    }
}
