use crate::config::ObjectStoreConfig;
use crate::storage::error::StorageError;
use crate::storage::{ObjectMeta, ObjectStore};
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::{config::Region, Client};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Number of JSON payloads kept in the read cache.
const CACHE_SIZE: usize = 256;

/// S3-backed implementation of the `ObjectStore` trait.
///
/// JSON result payloads are small and re-read often (preload, detail view,
/// comparison), so they go through an LRU cache keyed by `bucket/key`. Image
/// objects bypass the cache.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    cache: Arc<Mutex<lru::LruCache<String, Bytes>>>,
}

impl S3ObjectStore {
    /// Create a new store client from configuration.
    pub async fn new(config: &ObjectStoreConfig) -> Result<Self, StorageError> {
        let config_loader = aws_config::from_env().region(Region::new(config.region.clone()));

        let aws_config = if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = Credentials::new(
                access_key.as_str(),
                secret_key.as_str(),
                None,
                None,
                "StaticCredentialsProvider",
            );
            config_loader.credentials_provider(credentials).load().await
        } else {
            config_loader.load().await
        };

        let mut client_builder = aws_sdk_s3::config::Builder::from(&aws_config);
        if let Some(endpoint) = &config.endpoint {
            client_builder = client_builder
                .endpoint_url(endpoint)
                .force_path_style(true);
        }

        let client = Client::from_conf(client_builder.build());

        let cache_size = NonZeroUsize::new(CACHE_SIZE)
            .ok_or_else(|| StorageError::Connection("cache size must be nonzero".to_string()))?;
        let cache = Arc::new(Mutex::new(lru::LruCache::new(cache_size)));

        info!(region = %config.region, endpoint = ?config.endpoint, "Connected to object store");

        Ok(Self { client, cache })
    }

    fn cache_key(bucket: &str, key: &str) -> String {
        format!("{}/{}", bucket, key)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_objects(
        &self,
        bucket: &str,
        suffix: Option<&str>,
    ) -> Result<Vec<ObjectMeta>, StorageError> {
        let mut metas = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(bucket);
            if let Some(token) = &continuation {
                request = request.continuation_token(token.clone());
            }

            let response = request.send().await.map_err(|e| {
                let text = e.to_string();
                if text.contains("NoSuchBucket") {
                    StorageError::BucketNotFound(bucket.to_string())
                } else if text.contains("AccessDenied") {
                    StorageError::AccessDenied(bucket.to_string(), text)
                } else {
                    StorageError::List(bucket.to_string(), text)
                }
            })?;

            for object in response.contents() {
                let key = match object.key() {
                    Some(key) => key,
                    None => continue,
                };
                if let Some(suffix) = suffix {
                    if !key.ends_with(suffix) {
                        continue;
                    }
                }
                metas.push(ObjectMeta {
                    key: key.to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                    last_modified: object.last_modified().and_then(to_chrono),
                });
            }

            if response.is_truncated() == Some(true) {
                continuation = response.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }

        debug!(bucket = %bucket, count = metas.len(), "Listed objects");
        Ok(metas)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        let cacheable = key.ends_with(".json");
        let cache_key = Self::cache_key(bucket, key);

        if cacheable {
            let mut cache = self.cache.lock().await;
            if let Some(data) = cache.get(&cache_key) {
                debug!(key = %key, "Cache hit for object");
                return Ok(data.clone());
            }
        }

        debug!(bucket = %bucket, key = %key, "Fetching object from store");

        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let text = e.to_string();
                if text.contains("NoSuchKey") {
                    StorageError::ObjectNotFound(key.to_string())
                } else if text.contains("NoSuchBucket") {
                    StorageError::BucketNotFound(bucket.to_string())
                } else if text.contains("AccessDenied") {
                    StorageError::AccessDenied(key.to_string(), text)
                } else {
                    StorageError::Read(key.to_string(), text)
                }
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Read(key.to_string(), e.to_string()))?
            .into_bytes();

        if cacheable {
            let mut cache = self.cache.lock().await;
            cache.put(cache_key, data.clone());
        }

        Ok(data)
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMeta, StorageError> {
        let response = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let text = e.to_string();
                if text.contains("NotFound") || text.contains("NoSuchKey") {
                    StorageError::ObjectNotFound(key.to_string())
                } else {
                    StorageError::Read(key.to_string(), text)
                }
            })?;

        Ok(ObjectMeta {
            key: key.to_string(),
            size: response.content_length().unwrap_or(0).max(0) as u64,
            last_modified: response.last_modified().and_then(to_chrono),
        })
    }
}

/// Convert the SDK's timestamp type to chrono.
fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}
