//! Configuration management.
//!
//! - [`types`]: [`NotifierConfig`] and [`LoggingConfig`].
//! - [`defaults`]: default values used by serde when fields are missing.
//! - [`loader`]: [`ConfigLoader`], which locates, parses and validates `config.toml`.
//!
//! ```rust,ignore
//! use dbus_notifier::config::ConfigLoader;
//!
//! let config = ConfigLoader::load()?;
//! dbus_notifier::logging::init_logging(&config.logging, false)?;
//! let context = dbus_notifier::NotifierContext::with_config(&config);
//! ```

pub mod defaults;
pub mod loader;
pub mod types;

pub use loader::ConfigLoader;
pub use types::{LoggingConfig, NotifierConfig};
