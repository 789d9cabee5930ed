//! imgbed services
//!
//! Upload deduplication and fan-out, location resolution with health probes,
//! backend administration, batch tasks and the random image pool. Services
//! depend only on the store traits from `imgbed-db` and the uploader
//! abstraction from `imgbed-storage`.

pub mod backends;
pub mod batch;
pub mod dimensions;
pub mod distribution;
pub mod hashing;
pub mod health;
pub mod images;
pub mod random_cache;
pub mod registry;
pub mod resolution;
pub mod tasks;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use backends::BackendAdmin;
pub use batch::BatchRunner;
pub use dimensions::probe_dimensions;
pub use distribution::Distributor;
pub use hashing::content_hash;
pub use health::{DefaultHealthProbe, HealthProbe, DEFAULT_PROBE_TIMEOUT};
pub use images::{ImageService, UploadRequest};
pub use random_cache::{RandomImageCache, DEFAULT_REFRESH_INTERVAL};
pub use registry::{BackendRegistry, RegisteredBackend};
pub use resolution::LocationResolver;
pub use tasks::TaskTracker;
