// Copyright (c) 2026 Memoria
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! `MemoCore` construction configuration, loadable from a TOML file with
//! environment-variable overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Construction-time configuration for a `MemoCore`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoCoreConfig {
    /// Logical identifier, used to derive default metadata/blob locations
    /// and to namespace metrics.
    pub name: String,
    /// Directory for the default sled-backed metadata store.
    #[serde(default = "default_metadata_dir")]
    pub metadata_dir: String,
    /// Directory for the default filesystem-backed blob store.
    #[serde(default = "default_blob_dir")]
    pub blob_dir: String,
    /// Tokens per minute; `None` disables rate limiting.
    #[serde(default)]
    pub tpm: Option<f64>,
    /// Burst reservoir in cost units; defaults to `tpm` when unset.
    #[serde(default)]
    pub burst: Option<f64>,
    /// Byte count over which a `DIRECT_BLOB` record warns (default 1 MiB).
    #[serde(default = "default_blob_warning_threshold")]
    pub blob_warning_threshold: usize,
    /// Worker threads for an internally-owned executor (ignored if an
    /// executor is injected).
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

fn default_metadata_dir() -> String {
    "./data/metadata".to_string()
}

fn default_blob_dir() -> String {
    "./data/blobs".to_string()
}

fn default_blob_warning_threshold() -> usize {
    1024 * 1024
}

fn default_worker_threads() -> usize {
    2
}

impl MemoCoreConfig {
    /// A config with just a name and all other fields defaulted.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metadata_dir: default_metadata_dir(),
            blob_dir: default_blob_dir(),
            tpm: None,
            burst: None,
            blob_warning_threshold: default_blob_warning_threshold(),
            worker_threads: default_worker_threads(),
        }
    }

    /// Load from a TOML file, then apply `MEMORIA_*` environment overrides
    /// (`MEMORIA_TPM`, `MEMORIA_METADATA_DIR`, `MEMORIA_BLOB_DIR`), mirroring
    /// the `env(key, default)` override pattern used at node startup.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let mut cfg: MemoCoreConfig = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MEMORIA_TPM") {
            if let Ok(tpm) = v.parse::<f64>() {
                self.tpm = Some(tpm);
            }
        }
        if let Ok(v) = std::env::var("MEMORIA_METADATA_DIR") {
            self.metadata_dir = v;
        }
        if let Ok(v) = std::env::var("MEMORIA_BLOB_DIR") {
            self.blob_dir = v;
        }
    }
}

/// Configuration loading failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("io: {0}")]
    Io(String),
    /// The config file was not valid TOML for this shape.
    #[error("parse: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_applied_for_a_minimal_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memoria.toml");
        std::fs::write(&path, "name = \"jobs\"\n").unwrap();
        let cfg = MemoCoreConfig::load(&path).unwrap();
        assert_eq!(cfg.name, "jobs");
        assert_eq!(cfg.blob_warning_threshold, 1024 * 1024);
        assert!(cfg.tpm.is_none());
    }
}
