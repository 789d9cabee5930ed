//! imgbed core library
//!
//! This crate provides the domain models, error types, configuration, runtime
//! settings and the storage-location descriptor codec shared by all imgbed
//! components.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod models;
pub mod settings;
pub mod storage_types;

// Re-export commonly used types
pub use config::Config;
pub use descriptor::LocationDescriptor;
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use settings::{AccessPolicy, RuntimeSettings, SettingsCache, SettingsProvider};
pub use storage_types::BackendKind;
