//! Protocol configuration
//!
//! Defaults, then an optional YAML file, then environment overrides.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tools::BatchLimits;

pub const ENV_MAX_BATCH: &str = "TRANSLATION_WORKFLOW_MAX_BATCH";
pub const ENV_DATABASE: &str = "TRANSLATION_WORKFLOW_DB";
pub const ENV_LOG: &str = "RUST_LOG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("max_batch must be at least 1 (got {0})")]
    MaxBatch(usize),

    #[error("tolerance_factor must be at least 1.0 (got {0})")]
    Tolerance(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub max_batch: usize,
    pub tolerance_factor: f64,
    pub database_path: PathBuf,
    pub log_filter: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        let limits = BatchLimits::default();
        Self {
            max_batch: limits.max_batch,
            tolerance_factor: limits.tolerance_factor,
            database_path: default_database_path(),
            log_filter: "info".to_string(),
        }
    }
}

/// `translation.db` under the platform data directory
pub fn default_database_path() -> PathBuf {
    use directories::ProjectDirs;

    if let Some(proj_dirs) = ProjectDirs::from("com", "translation-workflow", "translation-workflow") {
        proj_dirs.data_dir().join("translation.db")
    } else {
        PathBuf::from(".translation-workflow.db")
    }
}

impl ProtocolConfig {
    /// Load from an optional YAML file and the process environment.
    ///
    /// A local `.env` is read first so its values act as environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Apply overrides from a variable lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_MAX_BATCH) {
            self.max_batch = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: ENV_MAX_BATCH,
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup(ENV_DATABASE).filter(|v| !v.trim().is_empty()) {
            self.database_path = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_LOG).filter(|v| !v.trim().is_empty()) {
            self.log_filter = value;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch < 1 {
            return Err(ConfigError::MaxBatch(self.max_batch));
        }
        if self.tolerance_factor.is_nan() || self.tolerance_factor < 1.0 {
            return Err(ConfigError::Tolerance(self.tolerance_factor));
        }
        Ok(())
    }

    pub fn batch_limits(&self) -> BatchLimits {
        BatchLimits {
            max_batch: self.max_batch,
            tolerance_factor: self.tolerance_factor,
        }
    }
}
