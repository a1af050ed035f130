//! File-backed study configuration store.
//!
//! Each study is one JSON document under `<data_dir>/studies/`, named
//! `<studyId>.json`. `studyId` is unique and immutable after creation; `label`
//! is required; any remaining fields are free-form and preserved verbatim.
//! `createdAt` is set once, `updatedAt` refreshed on every write. Writes go
//! through a temp file and rename so a crashed write never leaves a truncated
//! study behind. This store is the sole writer of the directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

/// Fields every study carries; the rest of the document is free-form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyRecord {
    #[serde(rename = "studyId")]
    pub study_id: String,
    pub label: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Study store errors.
#[derive(Error, Debug)]
pub enum StudyStoreError {
    #[error("Study {0} not found")]
    NotFound(String),

    #[error("Study {0} already exists")]
    AlreadyExists(String),

    #[error("Invalid study id: {0}")]
    InvalidId(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Fields managed by the store itself, excluded from the free-form remainder.
const RESERVED_FIELDS: &[&str] = &["studyId", "label", "createdAt", "updatedAt"];

/// CRUD over one-file-per-study JSON documents.
pub struct StudyStore {
    dir: PathBuf,
}

impl StudyStore {
    /// Open (creating if needed) the study directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StudyStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// All studies, sorted by id. Unreadable files are skipped with a warning
    /// rather than failing the listing.
    pub fn list(&self) -> Result<Vec<StudyRecord>, StudyStoreError> {
        let mut studies = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(StudyStoreError::from)
                .and_then(|text| serde_json::from_str::<StudyRecord>(&text).map_err(Into::into))
            {
                Ok(study) => studies.push(study),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable study file");
                }
            }
        }

        studies.sort_by(|a, b| a.study_id.cmp(&b.study_id));
        Ok(studies)
    }

    /// Load one study by id.
    pub fn get(&self, id: &str) -> Result<StudyRecord, StudyStoreError> {
        validate_id(id)?;
        let path = self.path_for(id);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StudyStoreError::NotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&text)?)
    }

    /// Create a new study from a request body. Requires `studyId` and `label`;
    /// all other fields are stored verbatim. Timestamps are set here, not
    /// taken from the body.
    pub fn create(&self, body: &Value) -> Result<StudyRecord, StudyStoreError> {
        let study_id = body
            .get("studyId")
            .and_then(Value::as_str)
            .ok_or(StudyStoreError::MissingField("studyId"))?;
        let label = body
            .get("label")
            .and_then(Value::as_str)
            .ok_or(StudyStoreError::MissingField("label"))?;
        validate_id(study_id)?;

        if self.path_for(study_id).exists() {
            return Err(StudyStoreError::AlreadyExists(study_id.to_string()));
        }

        let now = Utc::now();
        let study = StudyRecord {
            study_id: study_id.to_string(),
            label: label.to_string(),
            created_at: now,
            updated_at: now,
            extra: extra_fields(body),
        };
        self.write(&study)?;
        Ok(study)
    }

    /// Replace a study's document. `studyId` and `createdAt` are preserved
    /// from the stored record regardless of the body; `label` is required;
    /// `updatedAt` is refreshed.
    pub fn update(&self, id: &str, body: &Value) -> Result<StudyRecord, StudyStoreError> {
        let existing = self.get(id)?;
        let label = body
            .get("label")
            .and_then(Value::as_str)
            .ok_or(StudyStoreError::MissingField("label"))?;

        let study = StudyRecord {
            study_id: existing.study_id,
            label: label.to_string(),
            created_at: existing.created_at,
            updated_at: Utc::now(),
            extra: extra_fields(body),
        };
        self.write(&study)?;
        Ok(study)
    }

    /// Delete a study by id.
    pub fn delete(&self, id: &str) -> Result<(), StudyStoreError> {
        validate_id(id)?;
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StudyStoreError::NotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Write via temp file + rename.
    fn write(&self, study: &StudyRecord) -> Result<(), StudyStoreError> {
        let path = self.path_for(&study.study_id);
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(study)?;
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

/// Ids become filenames, so only a conservative character set is allowed.
fn validate_id(id: &str) -> Result<(), StudyStoreError> {
    if id.is_empty() || id.len() > 64 {
        return Err(StudyStoreError::InvalidId(id.to_string()));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(StudyStoreError::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Body fields other than the reserved ones, preserved verbatim.
fn extra_fields(body: &Value) -> Map<String, Value> {
    body.as_object()
        .map(|object| {
            object
                .iter()
                .filter(|(key, _)| !RESERVED_FIELDS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default()
}
