//! Configuration data structures.
//!
//! [`NotifierConfig`] is the root structure; it is normally deserialized from
//! TOML by [`super::ConfigLoader`]. Missing fields take the values from
//! [`super::defaults`], unknown fields are rejected.

use serde::Deserialize;
use std::path::PathBuf;

use super::defaults;

/// Logging subsystem settings consumed by [`crate::logging::init_logging`].
///
/// # Examples
///
/// ```
/// use dbus_notifier::config::LoggingConfig;
///
/// let log_config: LoggingConfig = toml::from_str(r#"
/// level = "debug"
/// format = "json"
/// "#).unwrap();
/// assert_eq!(log_config.level, "debug");
/// assert_eq!(log_config.file_path, None);
/// assert_eq!(log_config.format, "json");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// One of "trace", "debug", "info", "warn", "error" (case-insensitive).
    #[serde(default = "defaults::default_log_level")]
    pub level: String,
    /// Optional log file. Relative paths are resolved against the state directory.
    #[serde(default = "defaults::default_log_file_path")]
    pub file_path: Option<PathBuf>,
    /// "text" or "json".
    #[serde(default = "defaults::default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        defaults::default_logging_config()
    }
}

/// Root configuration of the notifier.
///
/// # Examples
///
/// ```
/// use dbus_notifier::config::NotifierConfig;
///
/// let config: NotifierConfig = toml::from_str(r#"
/// close_replaced_notify = true
///
/// [logging]
/// level = "warn"
/// "#).unwrap();
/// assert!(config.auto_disconnect_session_bus);
/// assert!(config.close_replaced_notify);
/// assert_eq!(config.logging.level, "warn");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotifierConfig {
    /// Disconnect the internally created session bus once no notification
    /// is open. Has no effect while an external session bus is installed.
    #[serde(default = "defaults::default_auto_disconnect_session_bus")]
    pub auto_disconnect_session_bus: bool,
    /// When a notification is shown with a non-zero `replaces_id`, deliver a
    /// local close (reason `Replaced`) to the notification it replaces.
    #[serde(default = "defaults::default_close_replaced_notify")]
    pub close_replaced_notify: bool,
    #[serde(default = "defaults::default_logging_config")]
    pub logging: LoggingConfig,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            auto_disconnect_session_bus: defaults::default_auto_disconnect_session_bus(),
            close_replaced_notify: defaults::default_close_replaced_notify(),
            logging: defaults::default_logging_config(),
        }
    }
}
