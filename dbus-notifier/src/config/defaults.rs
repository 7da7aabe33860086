//! Default configuration values.
//!
//! Referenced from the `#[serde(default = "...")]` attributes in
//! [`super::types`] so that a partial `config.toml` fills in the rest.

use super::types::LoggingConfig;
use std::path::PathBuf;

pub(crate) fn default_logging_config() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
        file_path: default_log_file_path(),
        format: default_log_format(),
    }
}

pub(crate) fn default_log_level() -> String {
    "info".to_string()
}

pub(crate) fn default_log_file_path() -> Option<PathBuf> {
    None
}

pub(crate) fn default_log_format() -> String {
    "text".to_string()
}

/// The owned session is torn down once no notification is open.
pub(crate) fn default_auto_disconnect_session_bus() -> bool {
    true
}

pub(crate) fn default_close_replaced_notify() -> bool {
    false
}
