//! MergeService: stacks sources in precedence order and deserializes.

use super::{paths, sources, StoretreeConfig};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};
use std::path::Path;

/// Merge service for config composition.
pub struct MergeService;

impl MergeService {
    /// Defaults that depend on the environment: on-disk database and index
    /// locations under the XDG data directory.
    fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let mut builder = Config::builder();
        if let Some(data_dir) = paths::data_dir() {
            builder = builder
                .set_default("storage.db_path", data_dir.join("db").to_string_lossy().to_string())?
                .set_default("index.root", data_dir.join("index").to_string_lossy().to_string())?;
        }
        Ok(builder)
    }

    /// Precedence, lowest first: defaults, global file, explicit file, environment.
    pub fn load(explicit: Option<&Path>) -> Result<StoretreeConfig, ConfigError> {
        let builder = Self::builder_with_defaults()?;
        let builder = sources::global_file(builder)?;
        let builder = match explicit {
            Some(path) => sources::explicit_file(builder, path)?,
            None => builder,
        };
        let builder = sources::environment(builder)?;
        builder.build()?.try_deserialize()
    }

    /// A single file with the environment overlay; no global file or path defaults.
    pub fn load_from_file(path: &Path) -> Result<StoretreeConfig, ConfigError> {
        let builder = sources::explicit_file(Config::builder(), path)?;
        let builder = sources::environment(builder)?;
        builder.build()?.try_deserialize()
    }
}
