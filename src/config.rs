// src/config.rs
//! Runtime configuration for extraction and downloads
//!
//! Every field has a default, so an empty (or absent) file is valid:
//!
//! ```toml
//! [extractor]
//! poll_interval_ms = 50
//! progress_steps = 20
//!
//! [download]
//! timeout_secs = 60
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PackagerConfig {
    pub extractor: ExtractorConfig,
    pub download: DownloadConfig,
}

impl PackagerConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Format(format!("invalid configuration: {}", e)))
    }
}

/// Streaming extractor tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Upper bound on a single wait for more bytes from a live source
    pub poll_interval_ms: u64,
    /// Number of progress buckets; one notification per bucket at most
    pub progress_steps: u32,
    /// Copy buffer size for payload files
    pub buffer_size: usize,
    /// Largest accepted header or (accumulated) footer, in bytes
    pub max_metadata_size: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            progress_steps: 100,
            buffer_size: 64 * 1024,
            max_metadata_size: 1024 * 1024,
        }
    }
}

impl ExtractorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// HTTP download settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            user_agent: format!("ampkg/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}
