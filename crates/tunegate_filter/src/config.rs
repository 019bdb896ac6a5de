//! Configuration for the filter

use crate::error::{FilterError, Result};
use crate::patterns::PathMatcher;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Default number of train files moved to the test set when none is given.
pub const DEFAULT_AUTOSELECT_TEST_FILES_NUM: usize = 3;

/// Main filter configuration, read from `filter_config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Files whose mean loss is strictly above this value are rejected
    pub filter_loss_threshold: f64,

    /// How many test files to pick from the train set when no test set exists
    #[serde(default = "default_autoselect_test_files_num")]
    pub autoselect_test_files_num: usize,

    /// Scorer process command line (program followed by arguments)
    #[serde(default)]
    pub scorer_command: Vec<String>,
}

fn default_autoselect_test_files_num() -> usize {
    DEFAULT_AUTOSELECT_TEST_FILES_NUM
}

impl FilterConfig {
    pub fn new(filter_loss_threshold: f64) -> Self {
        Self {
            filter_loss_threshold,
            autoselect_test_files_num: default_autoselect_test_files_num(),
            scorer_command: Vec::new(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FilterError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: FilterConfig = toml::from_str(&content)
            .map_err(|e| FilterError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| FilterError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.filter_loss_threshold.is_finite() {
            return Err(FilterError::Config(format!(
                "filter_loss_threshold must be a finite number, got {}",
                self.filter_loss_threshold
            )));
        }
        Ok(())
    }
}

/// Force include/exclude rules, read from `filetypes.json`.
///
/// Unknown keys in the file are ignored; other tools share it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForceRules {
    #[serde(default)]
    pub force_include: String,
    #[serde(default)]
    pub force_exclude: String,
}

impl ForceRules {
    /// Load rules; a missing file means no rules.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        info!("Reading {}", path.display());
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| FilterError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Compile both rules into `(include, exclude)` matchers.
    pub fn compile(&self) -> Result<(PathMatcher, PathMatcher)> {
        Ok((
            PathMatcher::compile(&self.force_include)?,
            PathMatcher::compile(&self.force_exclude)?,
        ))
    }
}
