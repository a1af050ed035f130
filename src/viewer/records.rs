//! Submission records and the in-memory table the preload pipeline fills.
//!
//! The table is positional: same length and order as the key list it was built
//! from, with placeholder records that are enriched in place as payloads
//! resolve. A key -> index map gives O(1) lookup; when the input contains
//! duplicate keys each occurrence keeps its own slot and the map points at the
//! last one.

use crate::keys::{parse_key, ParsedKey};
use crate::storage::ObjectMeta;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// Fetch lifecycle of one submission's JSON payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Pending,
    Loaded,
    Failed,
}

/// Summary fields derived from a submission's result JSON.
///
/// `valid_selfie` and `status` are opaque passthrough from the upstream
/// analysis payload; this crate never re-derives them. Numeric fields default
/// to zero and flags to false until a payload resolves, and stay at those
/// defaults when the fetch fails.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_selfie: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub score_count: usize,
    pub concern_total: u64,
    pub device_present: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_quality: Option<String>,
}

impl SubmissionSummary {
    /// Derive summary fields from a result payload.
    ///
    /// The payload shape is controlled by the external analysis service, so
    /// every field is read defensively: absent or mistyped fields degrade to
    /// the zero/false defaults instead of erroring.
    pub fn from_payload(payload: &Value) -> Self {
        let score_count = payload
            .get("scores")
            .and_then(Value::as_array)
            .map(|scores| scores.len())
            .unwrap_or(0);

        let concern_total = ["minor", "moderate", "severe"]
            .iter()
            .filter_map(|level| {
                payload
                    .get("concerns")
                    .and_then(|concerns| concerns.get(level))
                    .and_then(Value::as_u64)
            })
            .sum();

        let device_present = payload
            .get("device")
            .and_then(|device| device.get("brand"))
            .map(|brand| !brand.is_null())
            .unwrap_or(false);

        let network_quality = payload
            .get("network")
            .and_then(|network| network.get("quality"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Self {
            valid_selfie: payload.get("validSelfie").and_then(Value::as_bool),
            status: payload
                .get("status")
                .and_then(Value::as_str)
                .map(str::to_string),
            score_count,
            concern_total,
            device_present,
            network_quality,
        }
    }
}

/// One submission's table entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRecord {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed: Option<ParsedKey>,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    pub status: FetchStatus,
    /// Raw payload, held for the detail/comparison paths but not serialized
    /// into list responses.
    #[serde(skip_serializing)]
    pub payload: Option<Value>,
    #[serde(flatten)]
    pub summary: SubmissionSummary,
}

/// Positional collection of submission records for one bucket load.
pub struct SubmissionTable {
    records: Vec<SubmissionRecord>,
    by_key: HashMap<String, usize>,
}

impl SubmissionTable {
    /// Build placeholder records from a listing, in listing order.
    pub fn new(metas: &[ObjectMeta]) -> Self {
        let mut records = Vec::with_capacity(metas.len());
        let mut by_key = HashMap::with_capacity(metas.len());

        for (index, meta) in metas.iter().enumerate() {
            by_key.insert(meta.key.clone(), index);
            records.push(SubmissionRecord {
                key: meta.key.clone(),
                parsed: parse_key(&meta.key).parsed(),
                size: meta.size,
                last_modified: meta.last_modified,
                status: FetchStatus::Pending,
                payload: None,
                summary: SubmissionSummary::default(),
            });
        }

        Self { records, by_key }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[SubmissionRecord] {
        &self.records
    }

    /// Keys with their positional indexes, in table order.
    pub fn keyed_indexes(&self) -> Vec<(usize, String)> {
        self.records
            .iter()
            .enumerate()
            .map(|(index, record)| (index, record.key.clone()))
            .collect()
    }

    pub fn get(&self, index: usize) -> Option<&SubmissionRecord> {
        self.records.get(index)
    }

    /// The record for a key (last occurrence wins for duplicate keys).
    pub fn get_by_key(&self, key: &str) -> Option<&SubmissionRecord> {
        self.by_key.get(key).and_then(|&index| self.records.get(index))
    }

    /// Settle a slot as loaded, deriving its summary from the payload.
    pub fn mark_loaded(&mut self, index: usize, payload: Value) {
        if let Some(record) = self.records.get_mut(index) {
            record.summary = SubmissionSummary::from_payload(&payload);
            record.payload = Some(payload);
            record.status = FetchStatus::Loaded;
        }
    }

    /// Settle a slot as failed. Summary fields stay at their defaults.
    pub fn mark_failed(&mut self, index: usize) {
        if let Some(record) = self.records.get_mut(index) {
            record.summary = SubmissionSummary::default();
            record.payload = None;
            record.status = FetchStatus::Failed;
        }
    }

    /// Replace one record's payload and summary after a single-key re-fetch.
    /// Sibling records and run-level counters are untouched. Returns false if
    /// the key is not in this table.
    pub fn refresh_by_key(&mut self, key: &str, payload: Value) -> bool {
        match self.by_key.get(key).copied() {
            Some(index) => {
                self.mark_loaded(index, payload);
                true
            }
            None => false,
        }
    }
}
