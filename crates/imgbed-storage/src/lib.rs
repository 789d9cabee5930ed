//! imgbed storage library
//!
//! This crate provides the uploader abstraction and its implementations: the
//! local filesystem, S3-compatible object stores and SM.MS-style third-party
//! image hosts.
//!
//! # Names and identifiers
//!
//! Every upload is addressed by a caller-chosen unique name (`{uuid}.{ext}`).
//! An upload yields an [`UploadOutcome`]: the URL the object is served from
//! and, when the backend needs something else to delete it, a separate delete
//! identifier. Local uploads return the path relative to the storage root so
//! the public base URL can change without touching stored rows.

pub mod config;
pub mod factory;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-object-store")]
pub mod object_storage;
pub mod source;
#[cfg(feature = "storage-third-party")]
pub mod third_party;
pub mod traits;

// Re-export commonly used types
pub use config::{LocalConfig, ObjectStoreConfig, ThirdPartyConfig, UploaderConfig};
pub use factory::{create_uploader, ConfigUploaderFactory, UploaderFactory};
pub use imgbed_core::BackendKind;
#[cfg(feature = "storage-local")]
pub use local::LocalUploader;
#[cfg(feature = "storage-object-store")]
pub use object_storage::ObjectStoreUploader;
pub use source::ByteSource;
#[cfg(feature = "storage-third-party")]
pub use third_party::ThirdPartyUploader;
pub use traits::{StorageError, StorageResult, UploadOutcome, UploadReader, Uploader};
