//! # zbus transport
//!
//! Production implementation of the transport traits on the D-Bus session
//! bus. [`ZbusConnector`] hands out [`ZbusSession`] handles; a handle opens
//! its connection on the first [`SessionBus::get_interface`] call, so
//! creating one never touches the bus.
//!
//! Signals are received through the typed streams generated by
//! `#[dbus_proxy]` and forwarded into the [`SignalSink`] by one task per
//! signal class. Aborting those tasks is what unsubscribing means here.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use zbus::zvariant::Value;
use zbus::{dbus_proxy, Connection};

use super::{
    NotificationSignal, NotificationsInterface, NotifyRequest, ServerInformation, SessionBus,
    SessionConnector, SignalSink, SignalSubscription,
};
use crate::error::{NotifierError, Result};
use crate::hints::{HintValue, ImageData};

/// Proxy for `org.freedesktop.Notifications`.
#[dbus_proxy(
    interface = "org.freedesktop.Notifications",
    default_service = "org.freedesktop.Notifications",
    default_path = "/org/freedesktop/Notifications"
)]
trait Notifications {
    /// Sends a notification; returns the id assigned by the server.
    #[allow(clippy::too_many_arguments)]
    async fn notify(
        &self,
        app_name: &str,
        replaces_id: u32,
        app_icon: &str,
        summary: &str,
        body: &str,
        actions: &[&str],
        hints: HashMap<&str, Value<'_>>,
        expire_timeout: i32,
    ) -> zbus::Result<u32>;

    async fn close_notification(&self, id: u32) -> zbus::Result<()>;

    async fn get_capabilities(&self) -> zbus::Result<Vec<String>>;

    /// Returns `(name, vendor, version, spec_version)`.
    async fn get_server_information(&self) -> zbus::Result<(String, String, String, String)>;

    #[dbus_proxy(signal)]
    async fn action_invoked(&self, id: u32, action_key: String) -> zbus::Result<()>;

    /// Reasons: 1 expired, 2 dismissed by the user, 3 closed by `CloseNotification`, 4 undefined.
    #[dbus_proxy(signal)]
    async fn notification_closed(&self, id: u32, reason: u32) -> zbus::Result<()>;

    #[dbus_proxy(signal)]
    async fn notification_replied(&self, id: u32, text: String) -> zbus::Result<()>;
}

/// `image-data` in its `(iiibiiay)` wire layout.
#[derive(Debug, Clone, Value)]
struct WireImageData {
    width: i32,
    height: i32,
    rowstride: i32,
    has_alpha: bool,
    bits_per_sample: i32,
    channels: i32,
    data: Vec<u8>,
}

impl From<&ImageData> for WireImageData {
    fn from(image: &ImageData) -> Self {
        Self {
            width: image.width,
            height: image.height,
            // Hints::to_wire rejects images whose rowstride overflows.
            rowstride: image.rowstride().unwrap_or_default(),
            has_alpha: image.has_alpha,
            bits_per_sample: ImageData::BITS_PER_SAMPLE,
            channels: image.channels(),
            data: image.data.clone(),
        }
    }
}

fn hint_to_value(hint: &HintValue) -> Value<'_> {
    match hint {
        HintValue::Boolean(b) => Value::from(*b),
        HintValue::String(s) => Value::from(s.as_str()),
        HintValue::Int32(i) => Value::from(*i),
        HintValue::Byte(b) => Value::from(*b),
        HintValue::Image(image) => Value::from(WireImageData::from(image)),
    }
}

/// Creates lazily connecting session bus handles.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZbusConnector;

impl SessionConnector for ZbusConnector {
    fn connect(&self) -> Arc<dyn SessionBus> {
        Arc::new(ZbusSession::new())
    }
}

/// A session bus handle that connects on first use.
#[derive(Default)]
pub struct ZbusSession {
    connection: Mutex<Option<Connection>>,
}

impl ZbusSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an already established connection, e.g. one shared with other
    /// services of the application. Install it with
    /// [`crate::NotifierContext::set_session_bus`] so it is never closed here.
    pub fn from_connection(connection: Connection) -> Self {
        Self {
            connection: Mutex::new(Some(connection)),
        }
    }

    async fn connection(&self) -> Result<Connection> {
        let mut guard = self.connection.lock().await;
        if let Some(connection) = guard.as_ref() {
            return Ok(connection.clone());
        }
        tracing::debug!("Connecting to the D-Bus session bus...");
        let connection = Connection::session()
            .await
            .map_err(|e| NotifierError::transport("connect", e))?;
        tracing::info!(
            "Connected to D-Bus session bus. Unique name: {}",
            connection
                .unique_name()
                .map_or_else(|| "<unknown>".to_string(), |n| n.to_string())
        );
        *guard = Some(connection.clone());
        Ok(connection)
    }
}

#[async_trait]
impl SessionBus for ZbusSession {
    async fn get_interface(&self) -> Result<Arc<dyn NotificationsInterface>> {
        let connection = self.connection().await?;
        let proxy = NotificationsProxy::new(&connection)
            .await
            .map_err(|e| NotifierError::transport("proxy creation", e))?;
        tracing::debug!("Notifications proxy created.");
        Ok(Arc::new(ZbusNotifications { proxy }))
    }

    async fn disconnect(&self) {
        if self.connection.lock().await.take().is_some() {
            tracing::info!("D-Bus session connection released.");
        }
    }
}

/// [`NotificationsInterface`] backed by a [`NotificationsProxy`].
pub struct ZbusNotifications {
    proxy: NotificationsProxy<'static>,
}

#[async_trait]
impl NotificationsInterface for ZbusNotifications {
    async fn notify(&self, request: &NotifyRequest) -> Result<u32> {
        let actions: Vec<&str> = request.actions.iter().map(String::as_str).collect();
        let hints: HashMap<&str, Value<'_>> = request
            .hints
            .iter()
            .map(|(key, value)| (*key, hint_to_value(value)))
            .collect();

        self.proxy
            .notify(
                &request.app_name,
                request.replaces_id,
                &request.app_icon,
                &request.summary,
                &request.body,
                &actions,
                hints,
                request.expire_timeout,
            )
            .await
            .map_err(|e| NotifierError::transport("Notify", e))
    }

    async fn close_notification(&self, id: u32) -> Result<()> {
        self.proxy
            .close_notification(id)
            .await
            .map_err(|e| NotifierError::transport("CloseNotification", e))
    }

    async fn get_capabilities(&self) -> Result<Vec<String>> {
        self.proxy
            .get_capabilities()
            .await
            .map_err(|e| NotifierError::transport("GetCapabilities", e))
    }

    async fn get_server_information(&self) -> Result<ServerInformation> {
        let (name, vendor, version, spec_version) = self
            .proxy
            .get_server_information()
            .await
            .map_err(|e| NotifierError::transport("GetServerInformation", e))?;
        Ok(ServerInformation {
            name,
            vendor,
            version,
            spec_version,
        })
    }

    async fn subscribe(&self, sink: SignalSink) -> Result<SignalSubscription> {
        // Streams are created before returning so the match rules are in
        // place once the caller sees the subscription.
        let mut invoked = self
            .proxy
            .receive_action_invoked()
            .await
            .map_err(|e| NotifierError::transport("subscribe ActionInvoked", e))?;
        let mut closed = self
            .proxy
            .receive_notification_closed()
            .await
            .map_err(|e| NotifierError::transport("subscribe NotificationClosed", e))?;
        let mut replied = self
            .proxy
            .receive_notification_replied()
            .await
            .map_err(|e| NotifierError::transport("subscribe NotificationReplied", e))?;

        let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(3);

        let invoked_sink = sink.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(signal) = invoked.next().await {
                match signal.args() {
                    Ok(args) => {
                        let forwarded = invoked_sink.deliver(NotificationSignal::ActionInvoked {
                            id: args.id,
                            action_key: args.action_key.clone(),
                        });
                        if !forwarded {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("Error deserializing ActionInvoked signal body: {}", e),
                }
            }
        }));

        let closed_sink = sink.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(signal) = closed.next().await {
                match signal.args() {
                    Ok(args) => {
                        let forwarded = closed_sink.deliver(NotificationSignal::NotificationClosed {
                            id: args.id,
                            reason: args.reason,
                        });
                        if !forwarded {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("Error deserializing NotificationClosed signal body: {}", e),
                }
            }
        }));

        tasks.push(tokio::spawn(async move {
            while let Some(signal) = replied.next().await {
                match signal.args() {
                    Ok(args) => {
                        let forwarded = sink.deliver(NotificationSignal::NotificationReplied {
                            id: args.id,
                            text: args.text.clone(),
                        });
                        if !forwarded {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("Error deserializing NotificationReplied signal body: {}", e),
                }
            }
        }));

        tracing::debug!("Subscribed to notification signals.");
        Ok(SignalSubscription::new(move || {
            for task in tasks {
                task.abort();
            }
        }))
    }
}
