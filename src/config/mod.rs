//! Configuration
//!
//! [`StoretreeConfig`] is assembled by [`ConfigLoader`] from built-in defaults,
//! `$XDG_CONFIG_HOME/storetree/config.toml`, an optional explicit file, and
//! `STORETREE__SECTION__KEY` environment variables, in that order.

pub mod facade;
pub mod merge;
pub mod paths;
pub mod sources;

pub use facade::ConfigLoader;

use crate::error::ApiError;
use crate::index::IndexConfig;
use crate::logging::LoggingConfig;
use crate::permission::StaticMembership;
use crate::service::ViewPolicy;
use crate::task::QueueConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Smallest writer budget tantivy accepts for one indexing thread
pub const MIN_WRITER_HEAP_BYTES: usize = 15_000_000;

/// Storage configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// sled database directory; `None` uses a temporary database
    pub db_path: Option<PathBuf>,
}

/// Tree query defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Levels below the requested node when the caller gives no depth
    pub default_depth: u32,
    pub view_policy: ViewPolicy,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            default_depth: 1,
            view_policy: ViewPolicy::Annotate,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoretreeConfig {
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub index: IndexConfig,
    pub tree: TreeConfig,
    /// Static group table: group name to member user ids
    pub groups: HashMap<String, Vec<String>>,
}

impl StoretreeConfig {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.queue.poll_interval_ms == 0 {
            return Err(ApiError::ConfigError(
                "queue.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.index.writer_heap_bytes < MIN_WRITER_HEAP_BYTES {
            return Err(ApiError::ConfigError(format!(
                "index.writer_heap_bytes must be at least {}",
                MIN_WRITER_HEAP_BYTES
            )));
        }
        if self.index.search_limit == 0 {
            return Err(ApiError::ConfigError(
                "index.search_limit must be greater than 0".to_string(),
            ));
        }
        for (group, members) in &self.groups {
            if group.trim().is_empty() {
                return Err(ApiError::ConfigError("group names must not be empty".to_string()));
            }
            if members.iter().any(|m| m.trim().is_empty()) {
                return Err(ApiError::ConfigError(format!(
                    "group '{}' has an empty member id",
                    group
                )));
            }
        }
        Ok(())
    }

    /// Membership oracle backed by the `groups` table
    pub fn membership(&self) -> StaticMembership {
        StaticMembership::from_table(&self.groups)
    }

    pub fn to_toml(&self) -> Result<String, ApiError> {
        toml::to_string_pretty(self).map_err(|e| ApiError::ConfigError(format!("Failed to render config: {}", e)))
    }
}
