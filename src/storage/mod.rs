//! Object-storage access.
//!
//! The external store is treated as a black-box key-value blob store with
//! list-by-bucket and metadata-on-read. `ObjectStore` is the seam: the real
//! implementation wraps the AWS S3 SDK, and an in-memory fake backs the
//! pipeline and handler tests.

pub mod error;
pub mod fake;
pub mod s3;

pub use error::StorageError;
pub use fake::FakeObjectStore;
pub use s3::S3ObjectStore;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Metadata for one stored object, copied from the store at list/head time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

/// Interface for reading from S3-compatible object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// List objects in a bucket, optionally restricted to a key suffix.
    /// Results are in the store's native (lexicographic) key order.
    async fn list_objects(
        &self,
        bucket: &str,
        suffix: Option<&str>,
    ) -> Result<Vec<ObjectMeta>, StorageError>;

    /// Download one object's bytes.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError>;

    /// Fetch one object's metadata without downloading it.
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMeta, StorageError>;
}

/// `ObjectStore` for `Arc<T>`, so shared clients can be passed around cheaply.
#[async_trait]
impl<T: ObjectStore + ?Sized> ObjectStore for Arc<T> {
    async fn list_objects(
        &self,
        bucket: &str,
        suffix: Option<&str>,
    ) -> Result<Vec<ObjectMeta>, StorageError> {
        (**self).list_objects(bucket, suffix).await
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        (**self).get_object(bucket, key).await
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMeta, StorageError> {
        (**self).head_object(bucket, key).await
    }
}
