//! Settings file loading.
//!
//! Object-store credentials and server defaults live in an optional TOML file;
//! per-run options (port, batch width, timeouts) come from the CLI. A missing
//! settings file falls back to defaults so local development against a
//! credential-less endpoint (e.g. MinIO with env credentials) works out of the
//! box.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub object_store: ObjectStoreConfig,
    #[serde(default)]
    pub server: ServerSettings,
}

#[derive(Debug, Deserialize)]
pub struct ObjectStoreConfig {
    /// Endpoint override for S3-compatible stores (MinIO, localstack).
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: default_region(),
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerSettings {
    /// Base URL of the mobile capture client used by the link generator.
    pub capture_base_url: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Config {
    /// Load settings from `path`, or defaults when no path is given.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read settings file {}", path.display()))?;
                let config: Config = toml::from_str(&text)
                    .with_context(|| format!("Failed to parse settings file {}", path.display()))?;
                Ok(config)
            }
            None => Ok(Config::default()),
        }
    }
}
