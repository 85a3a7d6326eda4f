//! Configuration sources layered by the merge service.

use super::paths;
use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment, File};
use std::path::Path;

pub const ENV_PREFIX: &str = "STORETREE";

/// Optional `$XDG_CONFIG_HOME/storetree/config.toml`
pub fn global_file(builder: ConfigBuilder<DefaultState>) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    match paths::global_config_file() {
        Ok(path) => Ok(builder.add_source(File::from(path).required(false))),
        Err(_) => Ok(builder),
    }
}

/// A file named on the command line; must exist
pub fn explicit_file(
    builder: ConfigBuilder<DefaultState>,
    path: &Path,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }
    Ok(builder.add_source(File::from(path.to_path_buf()).required(true)))
}

/// `STORETREE__SECTION__KEY` variables
pub fn environment(builder: ConfigBuilder<DefaultState>) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Ok(builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    ))
}
