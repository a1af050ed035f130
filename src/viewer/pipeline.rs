//! Batched preload pipeline.
//!
//! Turns a listed key sequence into an enriched submission table: keys are
//! partitioned into consecutive fixed-width batches, batches run strictly in
//! sequence, and within a batch every fetch runs concurrently and must settle
//! (success or failure) before the next batch starts. In-flight requests are
//! therefore bounded by the batch width. A per-item fetch failure marks only
//! that record; nothing aborts the run. There is no retry: a failed record
//! stays failed until the whole list is reloaded.
//!
//! Each fetch is bounded by a timeout, and a watch-channel stop signal is
//! observed between batches; a stopped run leaves its remaining records
//! pending.

use crate::storage::ObjectStore;
use crate::viewer::progress::ProgressTracker;
use crate::viewer::records::SubmissionTable;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Default number of concurrent fetches per batch.
pub const DEFAULT_BATCH_WIDTH: usize = 20;

/// Default bound on a single payload fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Pipeline tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct PreloadConfig {
    pub batch_width: usize,
    pub fetch_timeout: Duration,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            batch_width: DEFAULT_BATCH_WIDTH,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

/// Runs preloads against an object store.
pub struct Preloader {
    store: Arc<dyn ObjectStore>,
    config: PreloadConfig,
}

impl Preloader {
    pub fn new(store: Arc<dyn ObjectStore>, config: PreloadConfig) -> Self {
        Self { store, config }
    }

    /// Drive every record in `table` to loaded or failed.
    ///
    /// The table must already hold placeholder records (from a listing); this
    /// is the only writer for the duration of the run apart from single-key
    /// refreshes, which touch disjoint slots.
    pub async fn run(
        &self,
        bucket: &str,
        table: Arc<RwLock<SubmissionTable>>,
        progress: Arc<ProgressTracker>,
        stop: watch::Receiver<bool>,
    ) {
        let keys = table.read().unwrap().keyed_indexes();
        let width = self.config.batch_width.max(1);

        if keys.is_empty() {
            debug!(bucket = %bucket, "Nothing to preload");
            return;
        }

        info!(
            bucket = %bucket,
            total = keys.len(),
            batch_width = width,
            "Starting submission preload"
        );

        for batch in keys.chunks(width) {
            if *stop.borrow() {
                info!(bucket = %bucket, "Preload stopped before completion");
                return;
            }

            let fetches = batch.iter().map(|(index, key)| {
                let store = self.store.clone();
                let table = table.clone();
                let progress = progress.clone();
                let bucket = bucket.to_string();
                let key = key.clone();
                let index = *index;
                let timeout = self.config.fetch_timeout;

                async move {
                    let outcome = fetch_payload(&store, &bucket, &key, timeout).await;
                    match outcome {
                        Ok(payload) => {
                            table.write().unwrap().mark_loaded(index, payload);
                            progress.record_loaded();
                        }
                        Err(error) => {
                            warn!(key = %key, error = %error, "Submission fetch failed");
                            table.write().unwrap().mark_failed(index);
                            progress.record_failed();
                        }
                    }
                }
            });

            // Batch barrier: every fetch settles before the next batch starts.
            futures::future::join_all(fetches).await;
        }

        let snapshot = progress.snapshot();
        info!(
            bucket = %bucket,
            loaded = snapshot.loaded,
            failed = snapshot.failed,
            "Submission preload complete"
        );
    }
}

/// Fetch and parse one payload within the configured timeout.
async fn fetch_payload(
    store: &Arc<dyn ObjectStore>,
    bucket: &str,
    key: &str,
    timeout: Duration,
) -> Result<Value, String> {
    let bytes = match tokio::time::timeout(timeout, store.get_object(bucket, key)).await {
        Err(_) => return Err(format!("fetch timed out after {:?}", timeout)),
        Ok(Err(e)) => return Err(e.to_string()),
        Ok(Ok(bytes)) => bytes,
    };
    serde_json::from_slice(&bytes).map_err(|e| format!("invalid JSON payload: {}", e))
}
