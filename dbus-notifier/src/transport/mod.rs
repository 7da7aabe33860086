//! The seam between the session manager and the message bus.
//!
//! The manager only talks to these traits. [`dbus`] implements them on top
//! of `zbus`; tests plug in in-memory fakes.
//!
//! - [`SessionConnector`] creates session handles. Creation is cheap and
//!   local, the connection itself is established on first use.
//! - [`SessionBus`] is one session handle. It resolves the notifications
//!   interface and can be disconnected.
//! - [`NotificationsInterface`] is the `org.freedesktop.Notifications`
//!   proxy: the remote methods plus signal subscription.

pub mod dbus;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::hints::HintValue;

/// Well-known bus name of the notification service.
pub const NOTIFICATIONS_BUS_NAME: &str = "org.freedesktop.Notifications";
/// Object path of the notification service.
pub const NOTIFICATIONS_OBJECT_PATH: &str = "/org/freedesktop/Notifications";
/// Interface implemented at [`NOTIFICATIONS_OBJECT_PATH`].
pub const NOTIFICATIONS_INTERFACE: &str = "org.freedesktop.Notifications";

/// Arguments of a `Notify` call, already flattened for the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyRequest {
    pub app_name: String,
    pub replaces_id: u32,
    pub app_icon: String,
    pub summary: String,
    pub body: String,
    /// `[key, text, key, text, ...]` in registration order.
    pub actions: Vec<String>,
    pub hints: BTreeMap<&'static str, HintValue>,
    /// Milliseconds; `-1` lets the server decide, `0` never expires.
    pub expire_timeout: i32,
}

/// Reply of `GetServerInformation`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInformation {
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub spec_version: String,
}

/// The three signal classes the manager listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    ActionInvoked,
    NotificationClosed,
    NotificationReplied,
}

/// A signal emitted by the notification service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationSignal {
    ActionInvoked { id: u32, action_key: String },
    NotificationClosed { id: u32, reason: u32 },
    NotificationReplied { id: u32, text: String },
}

impl NotificationSignal {
    pub fn id(&self) -> u32 {
        match self {
            NotificationSignal::ActionInvoked { id, .. }
            | NotificationSignal::NotificationClosed { id, .. }
            | NotificationSignal::NotificationReplied { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> SignalKind {
        match self {
            NotificationSignal::ActionInvoked { .. } => SignalKind::ActionInvoked,
            NotificationSignal::NotificationClosed { .. } => SignalKind::NotificationClosed,
            NotificationSignal::NotificationReplied { .. } => SignalKind::NotificationReplied,
        }
    }
}

/// Where an interface delivers the signals it receives.
///
/// Cloned into every signal listener of a subscription; sending never blocks.
#[derive(Debug, Clone)]
pub struct SignalSink {
    tx: mpsc::UnboundedSender<NotificationSignal>,
}

impl SignalSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<NotificationSignal>) -> Self {
        Self { tx }
    }

    /// Forwards a signal. Returns `false` once the receiving side is gone.
    pub fn deliver(&self, signal: NotificationSignal) -> bool {
        self.tx.send(signal).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Active signal subscription on an interface.
///
/// Unsubscribes when [`SignalSubscription::unsubscribe`] is called or the
/// value is dropped, whichever comes first.
pub struct SignalSubscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl SignalSubscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for SignalSubscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for SignalSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalSubscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Creates session handles.
#[cfg_attr(test, mockall::automock)]
pub trait SessionConnector: Send + Sync {
    /// Returns a new, not yet connected session handle.
    fn connect(&self) -> Arc<dyn SessionBus>;
}

/// One session bus handle.
#[async_trait]
pub trait SessionBus: Send + Sync {
    /// Resolves the proxy of `org.freedesktop.Notifications` at
    /// `/org/freedesktop/Notifications`, connecting first if needed.
    async fn get_interface(&self) -> Result<Arc<dyn NotificationsInterface>>;

    /// Closes the connection. Calling it twice is harmless.
    async fn disconnect(&self);
}

/// Proxy of the `org.freedesktop.Notifications` interface.
#[async_trait]
pub trait NotificationsInterface: Send + Sync {
    async fn notify(&self, request: &NotifyRequest) -> Result<u32>;

    async fn close_notification(&self, id: u32) -> Result<()>;

    async fn get_capabilities(&self) -> Result<Vec<String>>;

    async fn get_server_information(&self) -> Result<ServerInformation>;

    /// Starts forwarding `ActionInvoked`, `NotificationClosed` and
    /// `NotificationReplied` into `sink` until the returned subscription ends.
    async fn subscribe(&self, sink: SignalSink) -> Result<SignalSubscription>;
}
