//! ConfigLoader facade delegating to the merge service.

use super::merge::MergeService;
use super::StoretreeConfig;
use crate::error::ApiError;
use std::path::Path;

/// Configuration loader facade.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from defaults, the global file, an optional explicit file, and
    /// the environment, then validate.
    pub fn load(explicit: Option<&Path>) -> Result<StoretreeConfig, ApiError> {
        let config = MergeService::load(explicit)?;
        config.validate()?;
        Ok(config)
    }

    /// Load one file plus environment overrides.
    pub fn load_from_file(path: &Path) -> Result<StoretreeConfig, ApiError> {
        let config = MergeService::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Built-in defaults: in-memory index, no database path.
    pub fn default() -> StoretreeConfig {
        StoretreeConfig::default()
    }
}
