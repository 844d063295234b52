// Host configuration, persisted as RON

use crate::module::search;
use crate::module::{ModuleError, ModuleResult};
use ron::{from_str as ron_from_str, ser::PrettyConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Extra directories searched for module libraries, in order
    pub search_paths: Vec<PathBuf>,
    /// Append the platform default roots after `search_paths`
    pub include_default_paths: bool,
    /// How deep to walk each root when the library is not at its top level
    pub max_search_depth: usize,
    pub sample_rate: f64,
    pub block_size: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            include_default_paths: true,
            max_search_depth: 3,
            sample_rate: 48000.0,
            block_size: 64,
        }
    }
}

impl HostConfig {
    /// Read a config file; a missing file yields the defaults
    pub fn load(path: &Path) -> ModuleResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = ron_from_str(&content).map_err(|e| {
            ModuleError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> ModuleResult<()> {
        let content = ron::ser::to_string_pretty(self, PrettyConfig::default())
            .map_err(|e| ModuleError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> ModuleResult<()> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(ModuleError::Config(format!(
                "sample_rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if self.block_size == 0 {
            return Err(ModuleError::Config("block_size must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Configured roots followed by the platform defaults (if enabled)
    pub fn resolved_search_paths(&self) -> Vec<PathBuf> {
        let mut paths = self.search_paths.clone();
        if self.include_default_paths {
            for path in search::get_default_search_paths() {
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
        }
        paths
    }

    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    pub fn with_default_paths(mut self, include: bool) -> Self {
        self.include_default_paths = include;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }
}
