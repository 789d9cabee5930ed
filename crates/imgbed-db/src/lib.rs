//! imgbed database layer
//!
//! PostgreSQL repositories for backends, images, storage locations and
//! settings, plus the store traits the services depend on. The services only
//! see the traits, so they can run against an in-memory catalogue in tests.

pub mod db;
pub mod traits;

pub use db::transaction::{with_transaction, TransactionGuard};
pub use db::{
    connect, run_migrations, BackendRepository, ImageRepository, SettingsRepository,
    StorageLocationRepository,
};
pub use traits::{BackendStore, ImageStore, LocationStore, SettingsStore};
