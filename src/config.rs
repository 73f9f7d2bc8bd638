//! Runtime configuration

use crate::diagnostics::{DiagnosticSink, LogLevel};
use crate::error::{Result, StoreError};
use crate::gz::CompressionLevel;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration read from a JSON file; every field has a default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker threads to use for parallel work
    pub number_of_threads: usize,

    /// Gzip level used when writing segment files
    pub compression_level: CompressionLevel,

    /// Diagnostic verbosity
    pub log_level: LogLevel,

    /// Prefix for diagnostic messages
    pub app_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            number_of_threads: 1,
            compression_level: CompressionLevel::default(),
            log_level: LogLevel::default(),
            app_name: "gzvol".to_string(),
        }
    }
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        Self::from_json_str(&text)
    }

    /// Sink on stdout/stderr honoring `app_name` and `log_level`
    pub fn diagnostic_sink(&self) -> DiagnosticSink {
        DiagnosticSink::stdio(self.app_name.clone(), self.log_level)
    }
}
