use crate::storage::error::StorageError;
use crate::storage::{ObjectMeta, ObjectStore};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// In-memory implementation of the `ObjectStore` trait for tests.
///
/// Supports per-key failure injection and fetch delays, and records enough
/// scheduling detail (in-flight high-water mark, which keys had settled when a
/// given fetch started) to assert the pipeline's batching behavior.
#[derive(Clone, Default)]
pub struct FakeObjectStore {
    inner: Arc<Mutex<FakeInner>>,
}

#[derive(Default)]
struct FakeInner {
    /// bucket -> key -> data; BTreeMap gives the store's lexicographic listing order.
    objects: HashMap<String, BTreeMap<String, Bytes>>,
    fail_keys: HashSet<String>,
    delays: HashMap<String, Duration>,
    default_delay: Option<Duration>,
    in_flight: usize,
    max_in_flight: usize,
    started: Vec<String>,
    settled: Vec<String>,
    /// Keys that had already settled when this key's fetch started.
    settled_before: HashMap<String, Vec<String>>,
}

#[allow(dead_code)]
impl FakeObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object.
    pub async fn insert_object(&self, bucket: &str, key: &str, data: Bytes) {
        let mut inner = self.inner.lock().await;
        inner
            .objects
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), data);
    }

    /// Store a JSON object.
    pub async fn insert_json(&self, bucket: &str, key: &str, value: &serde_json::Value) {
        self.insert_object(bucket, key, Bytes::from(value.to_string()))
            .await;
    }

    /// Make fetches of this key fail with a read error.
    pub async fn fail_object(&self, bucket: &str, key: &str) {
        let mut inner = self.inner.lock().await;
        inner.fail_keys.insert(qualified(bucket, key));
    }

    /// Delay fetches of this key.
    pub async fn set_delay(&self, bucket: &str, key: &str, delay: Duration) {
        let mut inner = self.inner.lock().await;
        inner.delays.insert(qualified(bucket, key), delay);
    }

    /// Delay every fetch that has no per-key delay.
    pub async fn set_default_delay(&self, delay: Duration) {
        let mut inner = self.inner.lock().await;
        inner.default_delay = Some(delay);
    }

    /// Highest number of fetches observed in flight at once.
    pub async fn max_in_flight(&self) -> usize {
        self.inner.lock().await.max_in_flight
    }

    /// Keys in the order their fetches started.
    pub async fn started(&self) -> Vec<String> {
        self.inner.lock().await.started.clone()
    }

    /// Keys that had already settled when `key`'s fetch started.
    pub async fn settled_before(&self, bucket: &str, key: &str) -> Vec<String> {
        self.inner
            .lock()
            .await
            .settled_before
            .get(&qualified(bucket, key))
            .cloned()
            .unwrap_or_default()
    }
}

fn qualified(bucket: &str, key: &str) -> String {
    format!("{}/{}", bucket, key)
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn list_objects(
        &self,
        bucket: &str,
        suffix: Option<&str>,
    ) -> Result<Vec<ObjectMeta>, StorageError> {
        let inner = self.inner.lock().await;
        let objects = inner
            .objects
            .get(bucket)
            .ok_or_else(|| StorageError::BucketNotFound(bucket.to_string()))?;

        Ok(objects
            .iter()
            .filter(|(key, _)| suffix.map(|s| key.ends_with(s)).unwrap_or(true))
            .map(|(key, data)| ObjectMeta {
                key: key.clone(),
                size: data.len() as u64,
                last_modified: None,
            })
            .collect())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        let qualified_key = qualified(bucket, key);

        let (delay, outcome) = {
            let mut inner = self.inner.lock().await;

            let settled = inner.settled.clone();
            inner.settled_before.insert(qualified_key.clone(), settled);
            inner.started.push(key.to_string());
            inner.in_flight += 1;
            inner.max_in_flight = inner.max_in_flight.max(inner.in_flight);

            let delay = inner
                .delays
                .get(&qualified_key)
                .copied()
                .or(inner.default_delay);

            let outcome = if inner.fail_keys.contains(&qualified_key) {
                Err(StorageError::Read(
                    key.to_string(),
                    "injected failure".to_string(),
                ))
            } else {
                inner
                    .objects
                    .get(bucket)
                    .and_then(|objects| objects.get(key))
                    .cloned()
                    .ok_or_else(|| StorageError::ObjectNotFound(key.to_string()))
            };

            (delay, outcome)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock().await;
        inner.in_flight -= 1;
        inner.settled.push(qualified_key);

        outcome
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMeta, StorageError> {
        let inner = self.inner.lock().await;
        inner
            .objects
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|data| ObjectMeta {
                key: key.to_string(),
                size: data.len() as u64,
                last_modified: None,
            })
            .ok_or_else(|| StorageError::ObjectNotFound(key.to_string()))
    }
}
