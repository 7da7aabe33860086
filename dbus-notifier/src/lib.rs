//! # dbus-notifier
//!
//! `dbus-notifier` is a client for the freedesktop notification service
//! (`org.freedesktop.Notifications` on the D-Bus session bus). Many
//! notifications share one lazily established connection; the signals the
//! service emits (`ActionInvoked`, `NotificationReplied`,
//! `NotificationClosed`) are routed back to the notification that caused
//! them.
//!
//! ## Overview
//!
//! - **Context**: [`NotifierContext`] owns the session bus handle, the
//!   interface proxy and the signal routing. Every [`Notification`] is
//!   created against a context.
//! - **Notifications**: [`Notification`] carries the content, the actions
//!   and their callbacks. [`Notification::show`] resolves with a
//!   [`ClosedResult`] once the notification is closed.
//! - **Auto-disconnect**: when the last open notification closes, the
//!   self-created session is disconnected after a short grace period. A
//!   notification shown during that period keeps the session alive.
//! - **Transport seam**: the context only talks to the traits in
//!   [`transport`]; [`transport::dbus`] implements them with `zbus`.
//! - **Ambient**: [`config`] loads `config.toml`, [`logging`] sets up
//!   `tracing` subscribers, [`error`] defines [`NotifierError`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dbus_notifier::config::ConfigLoader;
//! use dbus_notifier::{logging, Notification, NotificationConfig, NotifierContext};
//!
//! #[tokio::main]
//! async fn main() -> dbus_notifier::Result<()> {
//!     let config = ConfigLoader::load()?;
//!     logging::init_logging(&config.logging, false)?;
//!
//!     let context = NotifierContext::with_config(&config);
//!     let mut notification = Notification::new(
//!         &context,
//!         NotificationConfig { summary: "Build finished".into(), timeout: 5000, ..Default::default() },
//!     );
//!     notification.add_action("Open log", || tracing::info!("Opening log"))?;
//!
//!     let closed = notification.show().await?;
//!     tracing::info!("Closed: {:?}", closed.reason);
//!     Ok(())
//! }
//! ```

pub mod binder;
pub mod config;
pub mod context;
pub mod counter;
pub mod error;
pub mod hints;
pub mod identifier;
pub mod logging;
pub mod notification;
pub mod routing;
pub mod session;
pub mod transport;

mod sync;

pub use config::{ConfigLoader, LoggingConfig, NotifierConfig};
pub use context::NotifierContext;
pub use error::{ConfigError, LoggingError, NotifierError, Result};
pub use hints::{Hints, ImageData, Urgency};
pub use notification::{
    CloseReason, ClosedResult, Notification, NotificationConfig, NotificationEvent, Status,
    DEFAULT_ACTION_KEY, INLINE_REPLY_ACTION_KEY,
};
pub use session::DISCONNECT_DELAY;
pub use transport::{NotificationsInterface, ServerInformation, SessionBus, SessionConnector};
