//! Configuration loading.
//!
//! [`ConfigLoader::load`] reads `config.toml` from the XDG configuration
//! directory of the application (`$XDG_CONFIG_HOME/dbus-notifier/config.toml`
//! on Linux). A missing file is not an error: the defaults are used instead.
//! Whatever the source, the result goes through validation, which normalises
//! log level and format and resolves a relative log file path against the
//! state directory.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use directories_next::ProjectDirs;

use super::types::NotifierConfig;
use crate::error::ConfigError;

const QUALIFIER: &str = "org";
const ORGANIZATION: &str = "dbus-notifier";
const APPLICATION: &str = "dbus-notifier";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Namespace for loading and validating [`NotifierConfig`].
pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the configuration from the default location.
    pub fn load() -> Result<NotifierConfig, ConfigError> {
        let path = Self::default_config_path()?;
        match fs::read_to_string(&path) {
            Ok(content) => {
                tracing::debug!("Loading notifier configuration from {}", path.display());
                Self::load_from_str(&content)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("No configuration at {}, using defaults", path.display());
                let mut config = NotifierConfig::default();
                Self::validate_config(&mut config)?;
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadError { path, source: e }),
        }
    }

    /// Loads the configuration from an explicit file. The file must exist.
    pub fn load_from_path(path: &Path) -> Result<NotifierConfig, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::load_from_str(&content)
    }

    /// Parses and validates TOML content. Empty content yields the defaults.
    pub fn load_from_str(content: &str) -> Result<NotifierConfig, ConfigError> {
        let mut config = if content.trim().is_empty() {
            NotifierConfig::default()
        } else {
            toml::from_str(content)?
        };
        Self::validate_config(&mut config)?;
        Ok(config)
    }

    /// `$XDG_CONFIG_HOME/dbus-notifier/config.toml`.
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        Ok(project_dirs("config")?.config_dir().join(CONFIG_FILE_NAME))
    }

    fn validate_config(config: &mut NotifierConfig) -> Result<(), ConfigError> {
        let level_lower = config.logging.level.to_lowercase();
        match level_lower.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {
                config.logging.level = level_lower;
            }
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: '{}'. Must be one of trace, debug, info, warn, error.",
                    config.logging.level
                )));
            }
        }

        let format_lower = config.logging.format.to_lowercase();
        match format_lower.as_str() {
            "text" | "json" => {
                config.logging.format = format_lower;
            }
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: '{}'. Must be one of text, json.",
                    config.logging.format
                )));
            }
        }

        if let Some(file_path) = &config.logging.file_path {
            if file_path.as_os_str().is_empty() {
                return Err(ConfigError::ValidationError(
                    "Log file path must not be empty".to_string(),
                ));
            }
            if file_path.is_relative() {
                config.logging.file_path = Some(state_dir()?.join(file_path));
            }
        }

        Ok(())
    }
}

/// `$XDG_STATE_HOME/dbus-notifier` on Linux, the local data directory
/// elsewhere.
fn state_dir() -> Result<PathBuf, ConfigError> {
    #[cfg(target_os = "linux")]
    {
        let base = directories_next::BaseDirs::new().ok_or_else(|| ConfigError::DirectoryUnavailable {
            dir_type: "state".to_string(),
        })?;
        let state_home = match std::env::var("XDG_STATE_HOME") {
            Ok(state_home) if !state_home.is_empty() => PathBuf::from(state_home),
            _ => base.home_dir().join(".local/state"),
        };
        Ok(state_home.join(APPLICATION))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Ok(project_dirs("state")?.data_local_dir().to_path_buf())
    }
}

fn project_dirs(dir_type: &str) -> Result<ProjectDirs, ConfigError> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION).ok_or_else(|| {
        ConfigError::DirectoryUnavailable {
            dir_type: dir_type.to_string(),
        }
    })
}
