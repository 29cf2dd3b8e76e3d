/// Upload storage
///
/// Member files (avatars, payment proofs, blog images, documents) are stored
/// content-addressed on a backend, with their metadata in the database.

pub mod disk;
pub mod models;
pub mod store;

pub use disk::DiskUploadBackend;
pub use models::*;
pub use store::UploadStore;

use crate::error::PortalResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A stored object as listed by a backend
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub key: String,
    pub modified: DateTime<Utc>,
}

/// Upload storage backend trait
///
/// Implementations store raw bytes under a content key.
#[async_trait]
pub trait UploadBackend: Send + Sync {
    /// Store bytes under a key
    async fn put(&self, key: &str, data: Vec<u8>) -> PortalResult<()>;

    /// Retrieve bytes by key
    async fn get(&self, key: &str) -> PortalResult<Option<Vec<u8>>>;

    /// Delete bytes by key; missing keys are not an error
    async fn delete(&self, key: &str) -> PortalResult<()>;

    /// Check if a key exists
    async fn exists(&self, key: &str) -> PortalResult<bool>;

    /// Every stored key
    async fn list(&self) -> PortalResult<Vec<StoredObject>>;
}
