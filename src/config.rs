//! Resolver configuration, persisted as TOML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Tunables for resolution, compilation, and execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Coverage counts as complete when its fraction is at least `1 - tolerance`.
    #[serde(default = "default_completeness_tolerance")]
    pub completeness_tolerance: f64,
    /// Candidates adding less than this fraction of new coverage are skipped.
    #[serde(default = "default_min_contribution")]
    pub min_contribution: f64,
    /// Maximum dependency depth below the requested observable.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Search deadline in milliseconds. Unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Whether partial resolutions are compiled when the request does not say.
    #[serde(default)]
    pub accept_partial: bool,
    /// Deepest actuator nesting the encoder will print.
    #[serde(default = "default_max_encode_depth")]
    pub max_encode_depth: usize,
    /// Agent recorded in provenance when the request names none.
    #[serde(default = "default_agent")]
    pub agent: String,
    /// Model catalog loaded by the CLI when none is given on the command line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<PathBuf>,
}

fn default_completeness_tolerance() -> f64 {
    1e-6
}
fn default_min_contribution() -> f64 {
    0.01
}
fn default_max_depth() -> usize {
    32
}
fn default_max_encode_depth() -> usize {
    256
}
fn default_agent() -> String {
    "twinflow".into()
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            completeness_tolerance: default_completeness_tolerance(),
            min_contribution: default_min_contribution(),
            max_depth: default_max_depth(),
            timeout_ms: None,
            accept_partial: false,
            max_encode_depth: default_max_encode_depth(),
            agent: default_agent(),
            catalog: None,
        }
    }
}

impl ResolverConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |message: String| Err(ConfigError::Invalid { message });
        if !(0.0..1.0).contains(&self.completeness_tolerance) {
            return invalid(format!(
                "completeness_tolerance must be in [0, 1), got {}",
                self.completeness_tolerance
            ));
        }
        if !(0.0..=1.0).contains(&self.min_contribution) {
            return invalid(format!(
                "min_contribution must be in [0, 1], got {}",
                self.min_contribution
            ));
        }
        if self.max_depth == 0 {
            return invalid("max_depth must be at least 1".into());
        }
        if self.max_encode_depth == 0 {
            return invalid("max_encode_depth must be at least 1".into());
        }
        Ok(())
    }

    /// Load from a TOML file and validate.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }
}
