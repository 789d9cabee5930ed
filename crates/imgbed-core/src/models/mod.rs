//! Data models for the gateway
//!
//! Plain domain structs shared by the repositories and services. Database row
//! types live next to the repositories and convert into these.

mod backend;
mod image;
mod storage;
mod task;

pub use backend::{Backend, BackendFlag, NewBackend};
pub use image::{Image, ImagePage, ImageWithLocations, LocationWithBackend, NewImage, OwnerScope};
pub use storage::{NewStorageLocation, StorageLocation};
pub use task::{BatchTask, TaskKind, TaskStatus};
