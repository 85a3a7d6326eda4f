//! Logging setup
//!
//! Installs a `tracing` subscriber from [`LoggingConfig`], with `STORETREE_LOG*`
//! environment variables taking precedence over the configuration file.

use crate::error::ApiError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt as stdfmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

pub const ENV_FILTER: &str = "STORETREE_LOG";
pub const ENV_FORMAT: &str = "STORETREE_LOG_FORMAT";
pub const ENV_OUTPUT: &str = "STORETREE_LOG_OUTPUT";
pub const ENV_FILE: &str = "STORETREE_LOG_FILE";
pub const ENV_MODULES: &str = "STORETREE_LOG_MODULES";

/// Line format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ApiError::ConfigError(format!(
                "Invalid log format: {} (must be 'json' or 'text')",
                other
            ))),
        }
    }
}

/// Where log lines go
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogOutput {
    #[serde(rename = "stdout")]
    Stdout,
    #[serde(rename = "stderr")]
    Stderr,
    #[default]
    #[serde(rename = "file")]
    File,
    #[serde(rename = "file+stderr")]
    FileAndStderr,
    /// stdout and stderr
    #[serde(rename = "both")]
    Both,
}

impl LogOutput {
    pub fn writes_file(self) -> bool {
        matches!(self, LogOutput::File | LogOutput::FileAndStderr)
    }
}

impl FromStr for LogOutput {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(LogOutput::Stdout),
            "stderr" => Ok(LogOutput::Stderr),
            "file" => Ok(LogOutput::File),
            "file+stderr" => Ok(LogOutput::FileAndStderr),
            "both" => Ok(LogOutput::Both),
            other => Err(ApiError::ConfigError(format!(
                "Invalid log output: {} (must be 'stdout', 'stderr', 'file', 'file+stderr', or 'both')",
                other
            ))),
        }
    }
}

impl stdfmt::Display for LogOutput {
    fn fmt(&self, f: &mut stdfmt::Formatter<'_>) -> stdfmt::Result {
        let s = match self {
            LogOutput::Stdout => "stdout",
            LogOutput::Stderr => "stderr",
            LogOutput::File => "file",
            LogOutput::FileAndStderr => "file+stderr",
            LogOutput::Both => "both",
        };
        f.write_str(s)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    /// trace, debug, info, warn, error, off
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Log file when output includes a file; `None` uses the platform state dir
    pub file: Option<PathBuf>,
    /// ANSI colors for text output on a terminal stream
    pub color: bool,
    /// Per-module levels, e.g. `storetree::task = "debug"`
    pub modules: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            format: LogFormat::Text,
            output: LogOutput::File,
            file: None,
            color: true,
            modules: HashMap::new(),
        }
    }
}

impl LoggingConfig {
    /// Overlay `STORETREE_LOG_FORMAT`, `_OUTPUT`, `_FILE`, and `_MODULES`
    /// values from `lookup` onto this config.
    pub fn with_env_overrides<F>(&self, lookup: F) -> Result<Self, ApiError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = self.clone();
        if let Some(format) = lookup(ENV_FORMAT).filter(|v| !v.is_empty()) {
            config.format = format.parse()?;
        }
        if let Some(output) = lookup(ENV_OUTPUT).filter(|v| !v.is_empty()) {
            config.output = output.parse()?;
        }
        if let Some(file) = lookup(ENV_FILE).filter(|v| !v.is_empty()) {
            config.file = Some(PathBuf::from(file));
        }
        if let Some(modules) = lookup(ENV_MODULES) {
            for spec in modules.split(',').filter(|s| !s.trim().is_empty()) {
                let Some((module, level)) = spec.split_once('=') else {
                    return Err(ApiError::ConfigError(format!(
                        "Invalid module log spec '{}' (expected module=level)",
                        spec
                    )));
                };
                config
                    .modules
                    .insert(module.trim().to_string(), level.trim().to_string());
            }
        }
        Ok(config)
    }

    /// Filter built from level and module directives
    pub fn env_filter(&self) -> Result<EnvFilter, ApiError> {
        if self.level == "off" {
            return Ok(EnvFilter::new("off"));
        }
        let mut filter = EnvFilter::new(&self.level);
        let mut modules: Vec<_> = self.modules.iter().collect();
        modules.sort();
        for (module, level) in modules {
            let directive = format!("{}={}", module, level)
                .parse()
                .map_err(|e| ApiError::ConfigError(format!("Invalid log directive: {}", e)))?;
            filter = filter.add_directive(directive);
        }
        Ok(filter)
    }
}

/// Log file path: explicit path if given, otherwise `storetree.log` in the
/// platform state directory (local data directory where no state dir exists).
pub fn resolve_log_file_path(explicit: Option<&Path>) -> Result<PathBuf, ApiError> {
    if let Some(path) = explicit.filter(|p| !p.as_os_str().is_empty()) {
        return Ok(path.to_path_buf());
    }
    let dirs = directories::ProjectDirs::from("", "storetree", "storetree").ok_or_else(|| {
        ApiError::ConfigError("Could not determine platform directories for log file".to_string())
    })?;
    let base = dirs
        .state_dir()
        .unwrap_or_else(|| dirs.data_local_dir())
        .to_path_buf();
    Ok(base.join("storetree.log"))
}

fn open_log_file(path: &Path) -> Result<std::fs::File, ApiError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ApiError::ConfigError(format!("Failed to create log directory: {}", e)))?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ApiError::ConfigError(format!("Failed to open log file {:?}: {}", path, e)))
}

/// Install the global subscriber.
///
/// Precedence: `STORETREE_LOG` filter, other `STORETREE_LOG_*` variables,
/// then `config`.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ApiError> {
    let config = config.with_env_overrides(|key| std::env::var(key).ok())?;
    let installed = if !config.enabled {
        Registry::default()
            .with(EnvFilter::new("off"))
            .with(fmt::layer().with_writer(std::io::sink))
            .try_init()
    } else {
        let filter = match EnvFilter::try_from_env(ENV_FILTER) {
            Ok(filter) => filter,
            Err(_) => config.env_filter()?,
        };

        let writer = match config.output {
            LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
            LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
            LogOutput::Both => BoxMakeWriter::new(std::io::stdout.and(std::io::stderr)),
            LogOutput::File | LogOutput::FileAndStderr => {
                let path = resolve_log_file_path(config.file.as_deref())?;
                let file = open_log_file(&path)?;
                if config.output == LogOutput::File {
                    BoxMakeWriter::new(file)
                } else {
                    BoxMakeWriter::new(file.and(std::io::stderr))
                }
            }
        };

        let registry = Registry::default().with(filter);
        match config.format {
            LogFormat::Json => registry
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_writer(writer),
                )
                .try_init(),
            LogFormat::Text => registry
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_ansi(config.color && !config.output.writes_file())
                        .with_writer(writer),
                )
                .try_init(),
        }
    };

    installed.map_err(|e| ApiError::ConfigError(format!("Failed to install log subscriber: {}", e)))
}
