//! Configuration loading from YAML files with environment overrides.

use super::{validator, ConfigError, LoadgenConfig};
use std::path::Path;
use tracing::{info, warn};

/// Overrides `metrics.listen_addr`.
pub const ENV_METRICS_ADDR: &str = "LOADGEN_METRICS_ADDR";

impl LoadgenConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let cfg: LoadgenConfig = serde_yaml::from_str(content)?;
        validator::validate(&cfg)?;
        Ok(cfg)
    }

    /// Read, parse and validate a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadError {
            path: path.display().to_string(),
            reason: e.to_string(),
            hint: None,
        })?;
        let cfg = Self::from_yaml_str(&content).map_err(|e| match e {
            ConfigError::YamlError(reason) => ConfigError::LoadError {
                path: path.display().to_string(),
                reason,
                hint: Some("check indentation and field names against config/loadgen.yaml".into()),
            },
            other => other,
        })?;
        info!(
            path = %path.display(),
            vendors = cfg.vendors.len(),
            destinations = cfg.destinations.len(),
            "configuration loaded"
        );
        Ok(cfg)
    }

    /// Like [`LoadgenConfig::from_file`], but a missing file yields the built-in layout.
    ///
    /// Any other failure (unreadable file, bad YAML, failed validation) is still an error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(
                path = %path.display(),
                "configuration file not found, using built-in defaults"
            );
            let cfg = Self::builtin();
            validator::validate(&cfg)?;
            return Ok(cfg);
        }
        Self::from_file(path)
    }

    /// Apply `LOADGEN_*` environment overrides, then re-validate.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(addr) = std::env::var(ENV_METRICS_ADDR) {
            if !addr.trim().is_empty() {
                self.metrics.listen_addr = addr.trim().to_string();
            }
        }
        validator::validate(&self)?;
        Ok(self)
    }
}
