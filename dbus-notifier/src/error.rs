//! Error handling for the notifier.
//!
//! [`NotifierError`] is the error type returned by every fallible operation
//! of the crate. Configuration and logging setup have their own narrower
//! enums, [`ConfigError`] and [`LoggingError`], which convert into it.
//!
//! Transport failures are stored behind an `Arc` so that a single failed
//! interface acquisition can be handed to every caller that was waiting on it.

use std::error::Error as StdError;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Shared, cloneable source error coming from the transport layer.
pub type TransportSource = Arc<dyn StdError + Send + Sync + 'static>;

/// Error type for the notification session manager.
#[derive(Debug, Clone, Error)]
pub enum NotifierError {
    /// An action key was empty.
    #[error("Invalid action key: {0:?}")]
    InvalidActionKey(String),

    /// An action with the same key is already registered on the notification.
    #[error("'{key}' action already exists.")]
    DuplicateAction { key: String },

    /// Every generated action key is already taken on this notification.
    #[error("No free generated action key left on this notification")]
    ActionKeysExhausted,

    /// `show()` was called on a notification that was already sent.
    #[error("Notification was already shown (id {id})")]
    AlreadyShown { id: u32 },

    /// A hint value cannot be represented on the wire.
    #[error("Invalid hint '{hint}': {reason}")]
    InvalidHint { hint: &'static str, reason: String },

    /// Connection or remote call failure.
    #[error("D-Bus {operation} failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: TransportSource,
    },

    /// The owning context went away before the operation could complete.
    #[error("Notifier session was dropped before the operation completed")]
    SessionClosed,

    #[error("Configuration Error: {0}")]
    Config(Arc<ConfigError>),

    #[error("Logging Error: {0}")]
    Logging(Arc<LoggingError>),
}

impl NotifierError {
    /// Wraps a transport error raised while performing `operation`.
    pub fn transport<E>(operation: &'static str, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        NotifierError::Transport {
            operation,
            source: Arc::new(source),
        }
    }

    /// Returns `true` for connection and remote call failures.
    pub fn is_transport(&self) -> bool {
        matches!(self, NotifierError::Transport { .. } | NotifierError::SessionClosed)
    }
}

impl From<ConfigError> for NotifierError {
    fn from(err: ConfigError) -> Self {
        NotifierError::Config(Arc::new(err))
    }
}

impl From<LoggingError> for NotifierError {
    fn from(err: LoggingError) -> Self {
        NotifierError::Logging(Arc::new(err))
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, NotifierError>;

/// Error type for configuration-related operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file exists but could not be read.
    #[error("Failed to read configuration file from {path:?}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid TOML or does not match the schema.
    #[error("Failed to parse configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// The configuration parsed but carries unusable values.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// The XDG base directory could not be determined.
    #[error("Could not determine base directory for {dir_type}")]
    DirectoryUnavailable { dir_type: String },
}

/// Error type for logging setup.
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Failed to initialize logging: {0}")]
    InitializationFailure(String),

    #[error("Logging I/O error: {0}")]
    IoError(#[from] io::Error),
}
