//! Review dashboard for photo-submission results stored in object storage.
//!
//! Submissions arrive from a separate mobile capture client as JSON+JPEG pairs
//! in an S3-compatible bucket. This crate serves a browser dashboard over
//! them, plus a file-backed study-configuration store and a capture-link
//! generator.
//!
//! ## Architecture
//!
//! 1. **Object store client** (`storage` module) - wraps the S3 SDK behind an
//!    `ObjectStore` trait: list bucket objects, download JSON payloads, fetch
//!    image bytes.
//!
//! 2. **Preload pipeline** (`viewer::pipeline`) - turns a listed key sequence
//!    into an enriched in-memory submission table using fixed-width batches of
//!    concurrent fetches, with monotonic progress reporting.
//!
//! 3. **Study store** (`studies` module) - CRUD over one JSON file per study
//!    configuration.
//!
//! 4. **HTTP server** (`viewer::server`) - axum routes serving the dashboard
//!    pages and the JSON API over the store, the pipeline, and the studies.
//!
//! ## Usage
//!
//! ```bash
//! capture-review \
//!   --port 8060 \
//!   --config capture-review.toml \
//!   --data-dir ./data
//! ```

pub mod config;
pub mod keys;
pub mod storage;
pub mod studies;
pub mod viewer;
