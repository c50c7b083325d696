//! Object-storage capability contract.
//!
//! One trait implemented by every cloud backend. Callers hold an
//! `Arc<dyn ObjectStorage>` resolved through the provider factory and never
//! see vendor-specific types.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::types::ObjectStat;

/// Capability contract for one object-storage bucket.
///
/// Implementations translate these operations onto a vendor REST API. Keys
/// are bucket-relative paths without a leading slash.
///
/// # Contract notes
///
/// - `exists` distinguishes absence from transport failure: a missing object
///   is `Ok(false)`, never an error.
/// - `download`/`stat` on a missing object return
///   [`OssError::ObjectNotFound`](crate::OssError::ObjectNotFound).
/// - `test_connection` is a cheap read-only probe used for configuration
///   validation; it must not create or mutate objects.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Upload an object, replacing any existing object at `key`.
    async fn upload(&self, key: &str, data: Bytes, content_type: &str) -> Result<()>;

    /// Download the full object body.
    async fn download(&self, key: &str) -> Result<Bytes>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Whether an object exists at `key`.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Fetch object metadata without the body.
    async fn stat(&self, key: &str) -> Result<ObjectStat>;

    /// List up to `max` objects under `prefix`.
    async fn list(&self, prefix: &str, max: u32) -> Result<Vec<ObjectStat>>;

    /// Validate credentials and reachability with a read-only call.
    async fn test_connection(&self) -> Result<()>;
}
