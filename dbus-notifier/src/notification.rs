//! The notification lifecycle object.
//!
//! A [`Notification`] goes through `Unopened → Opened → Closed`. It is
//! configured and given actions while unopened, sent with
//! [`Notification::show`], and closed either by the server (expiry, user
//! dismissal, [`Notification::close`]) or locally when a newer notification
//! replaces it.
//!
//! ```no_run
//! use dbus_notifier::{Notification, NotificationConfig, NotifierContext};
//!
//! # async fn run() -> dbus_notifier::Result<()> {
//! let context = NotifierContext::new();
//! let mut notification = Notification::new(
//!     &context,
//!     NotificationConfig {
//!         summary: "Build finished".to_string(),
//!         timeout: 5000,
//!         ..NotificationConfig::default()
//!     },
//! );
//! notification.set_default_action(|| println!("clicked"));
//! let closed = notification.show().await?;
//! println!("notification {} closed: {:?}", closed.id, closed.reason);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use serde::Deserialize;
use tokio::sync::{broadcast, oneshot};

use crate::context::{ContextInner, NotifierContext};
use crate::error::{NotifierError, Result};
use crate::hints::Hints;
use crate::identifier::CYCLE_LEN;
use crate::routing::{Handler, RouteKey};
use crate::sync::lock;
use crate::transport::{NotificationSignal, NotifyRequest, ServerInformation, SignalKind};

/// Key of the action invoked when the notification body is clicked.
pub const DEFAULT_ACTION_KEY: &str = "default";

/// Key of the inline-reply action.
pub const INLINE_REPLY_ACTION_KEY: &str = "inline-reply";

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Content of a notification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotificationConfig {
    pub app_name: String,
    /// Id of a notification this one replaces; `0` for none.
    pub replaces_id: u32,
    /// Icon name or `file://` URI.
    pub app_icon: String,
    pub summary: String,
    pub body: String,
    pub hints: Hints,
    /// Expiry in milliseconds. `-1` lets the server decide, `0` never expires.
    pub timeout: i32,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            app_name: String::new(),
            replaces_id: 0,
            app_icon: String::new(),
            summary: String::new(),
            body: String::new(),
            hints: Hints::default(),
            timeout: 0,
        }
    }
}

/// Lifecycle state. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Status {
    Unopened = 0,
    Opened = 1,
    Closed = 2,
}

/// Why a notification was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    Expired,
    DismissedByUser,
    /// Closed through `CloseNotification`.
    ClosedByCall,
    Undefined,
    /// Replaced by a newer notification; produced locally, never by a server.
    Replaced,
    /// Reserved or vendor specific code.
    Other(u32),
}

impl CloseReason {
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => CloseReason::Expired,
            2 => CloseReason::DismissedByUser,
            3 => CloseReason::ClosedByCall,
            4 => CloseReason::Undefined,
            101 => CloseReason::Replaced,
            other => CloseReason::Other(other),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            CloseReason::Expired => 1,
            CloseReason::DismissedByUser => 2,
            CloseReason::ClosedByCall => 3,
            CloseReason::Undefined => 4,
            CloseReason::Replaced => 101,
            CloseReason::Other(code) => code,
        }
    }
}

impl From<u32> for CloseReason {
    fn from(code: u32) -> Self {
        CloseReason::from_code(code)
    }
}

/// Outcome of a shown notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosedResult {
    pub id: u32,
    pub reason: CloseReason,
}

/// Lifecycle events published by a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    /// The server accepted the notification and assigned this id.
    Shown(u32),
    Closed(ClosedResult),
}

#[derive(Clone)]
enum ActionCallback {
    Plain(Arc<dyn Fn() + Send + Sync>),
    Reply(Arc<dyn Fn(&str) + Send + Sync>),
}

impl ActionCallback {
    fn call(&self, text: &str) {
        match self {
            ActionCallback::Plain(callback) => callback(),
            ActionCallback::Reply(callback) => callback(text),
        }
    }
}

struct Action {
    key: String,
    text: String,
    callback: ActionCallback,
}

struct Record {
    id: u32,
    status: Status,
    /// A `show()` is between its state check and its outcome.
    sending: bool,
    /// Insertion ordered; the wire format lists actions in this order.
    actions: Vec<Action>,
}

impl Record {
    fn position(&self, key: &str) -> Option<usize> {
        self.actions.iter().position(|action| action.key == key)
    }
}

/// State reachable from routes after `show()` returned.
struct Shared {
    record: Mutex<Record>,
    events: broadcast::Sender<NotificationEvent>,
}

impl Shared {
    fn invoke_action(&self, key: &str, text: &str) {
        let callback = {
            let record = lock(&self.record);
            record
                .actions
                .iter()
                .find(|action| action.key == key)
                .map(|action| action.callback.clone())
        };
        match callback {
            Some(callback) => callback.call(text),
            None => tracing::debug!(id = lock(&self.record).id, key, "No callback registered for action."),
        }
    }
}

/// A desktop notification.
pub struct Notification {
    context: NotifierContext,
    config: NotificationConfig,
    shared: Arc<Shared>,
    /// Owner serial of this notification's routes.
    owner: u64,
}

impl Notification {
    pub fn new(context: &NotifierContext, config: NotificationConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            context: context.clone(),
            config,
            shared: Arc::new(Shared {
                record: Mutex::new(Record {
                    id: 0,
                    status: Status::Unopened,
                    sending: false,
                    actions: Vec::new(),
                }),
                events,
            }),
            owner: context.inner.next_owner(),
        }
    }

    /// Id assigned by the server, `0` until shown.
    pub fn id(&self) -> u32 {
        lock(&self.shared.record).id
    }

    pub fn status(&self) -> Status {
        lock(&self.shared.record).status
    }

    pub fn config(&self) -> &NotificationConfig {
        &self.config
    }

    /// Receives the [`NotificationEvent`]s published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.shared.events.subscribe()
    }

    /// Capabilities of the notification server.
    pub async fn supported_capabilities(context: &NotifierContext) -> Result<Vec<String>> {
        context.supported_capabilities().await
    }

    pub async fn server_information(context: &NotifierContext) -> Result<ServerInformation> {
        context.server_information().await
    }

    /// Adds an action under a generated key.
    ///
    /// Keys come from the context's shared generator and are namespaced, so
    /// they never clash with `"default"` or `"inline-reply"`. A key already
    /// used on this notification is skipped.
    ///
    /// # Arguments
    ///
    /// * `text`: Label shown by the server.
    /// * `callback`: Runs on the dispatcher task each time the server reports
    ///   the action as invoked.
    ///
    /// # Errors
    ///
    /// Returns [`NotifierError::ActionKeysExhausted`] if a full cycle of the
    /// generator yields no free key.
    pub fn add_action<F>(&mut self, text: impl Into<String>, callback: F) -> Result<String>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let key = {
            let record = lock(&self.shared.record);
            std::iter::repeat_with(|| self.context.inner.next_action_key())
                .take(CYCLE_LEN)
                .find(|key| record.position(key).is_none())
                .ok_or(NotifierError::ActionKeysExhausted)?
        };
        self.insert_action(key, text.into(), ActionCallback::Plain(Arc::new(callback)))
    }

    /// Adds an action under an explicit key.
    ///
    /// Actions are sent in registration order.
    ///
    /// # Arguments
    ///
    /// * `text`: Label shown by the server.
    /// * `key`: Identifier reported back in `ActionInvoked`. Use
    ///   [`Notification::set_default_action`] for [`DEFAULT_ACTION_KEY`].
    /// * `callback`: Runs each time the action is invoked.
    ///
    /// # Errors
    ///
    /// Returns [`NotifierError::InvalidActionKey`] for an empty key and
    /// [`NotifierError::DuplicateAction`] if the key is already registered.
    pub fn add_action_with_key<F>(
        &mut self,
        text: impl Into<String>,
        key: impl Into<String>,
        callback: F,
    ) -> Result<String>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.insert_action(key.into(), text.into(), ActionCallback::Plain(Arc::new(callback)))
    }

    /// Adds the inline-reply action. `callback` receives the reply text.
    pub fn add_inline_reply<F>(&mut self, text: impl Into<String>, callback: F) -> Result<String>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.insert_action(
            INLINE_REPLY_ACTION_KEY.to_string(),
            text.into(),
            ActionCallback::Reply(Arc::new(callback)),
        )
    }

    /// Returns whether an action was registered under `key`.
    pub fn remove_action(&mut self, key: &str) -> bool {
        let mut record = lock(&self.shared.record);
        match record.position(key) {
            Some(index) => {
                record.actions.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn remove_default_action(&mut self) -> bool {
        self.remove_action(DEFAULT_ACTION_KEY)
    }

    /// Replaces the default action.
    pub fn set_default_action<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut record = lock(&self.shared.record);
        let action = Action {
            key: DEFAULT_ACTION_KEY.to_string(),
            text: String::new(),
            callback: ActionCallback::Plain(Arc::new(callback)),
        };
        match record.position(DEFAULT_ACTION_KEY) {
            Some(index) => {
                record.actions.remove(index);
                record.actions.push(action);
            }
            None => record.actions.push(action),
        }
        drop(record);
        self
    }

    /// Keys of the registered actions, in registration order.
    pub fn action_keys(&self) -> Vec<String> {
        lock(&self.shared.record)
            .actions
            .iter()
            .map(|action| action.key.clone())
            .collect()
    }

    fn insert_action(&mut self, key: String, text: String, callback: ActionCallback) -> Result<String> {
        if key.is_empty() {
            return Err(NotifierError::InvalidActionKey(key));
        }
        let mut record = lock(&self.shared.record);
        if record.position(&key).is_some() {
            return Err(NotifierError::DuplicateAction { key });
        }
        record.actions.push(Action {
            key: key.clone(),
            text,
            callback,
        });
        Ok(key)
    }

    /// Sends the notification and waits until it is closed.
    ///
    /// The interface is acquired first, binding it if needed. Once the server
    /// assigned an id the notification is `Opened`, a
    /// [`NotificationEvent::Shown`] is published and action callbacks start
    /// running. The returned future resolves with the close reason reported
    /// by the server.
    ///
    /// Dropping the future before the id is assigned leaves the notification
    /// `Unopened`, and `show()` may be called again. Dropping it afterwards
    /// keeps the notification open and routed.
    ///
    /// # Errors
    ///
    /// Returns [`NotifierError::AlreadyShown`] if the notification was shown
    /// or is being shown, [`NotifierError::InvalidHint`] for hints that
    /// cannot be encoded, and transport errors if the server cannot be
    /// reached. No state changes on error.
    pub async fn show(&self) -> Result<ClosedResult> {
        let closed = self.open().await?;
        closed.await.map_err(|_| NotifierError::SessionClosed)
    }

    /// Asks the server to close the notification. Does nothing before
    /// [`Notification::show`] assigned an id or after the notification
    /// closed; otherwise the state changes once the server reports the close.
    pub async fn close(&self) -> Result<()> {
        let (id, status) = {
            let record = lock(&self.shared.record);
            (record.id, record.status)
        };
        if id == 0 || status == Status::Closed {
            return Ok(());
        }
        let interface = self.context.inner.acquire_interface().await?;
        interface.close_notification(id).await
    }

    fn request(&self, actions: &[Action]) -> Result<NotifyRequest> {
        let config = &self.config;
        Ok(NotifyRequest {
            app_name: config.app_name.clone(),
            replaces_id: config.replaces_id,
            app_icon: config.app_icon.clone(),
            summary: config.summary.clone(),
            body: config.body.clone(),
            actions: actions
                .iter()
                .flat_map(|action| [action.key.clone(), action.text.clone()])
                .collect(),
            hints: config.hints.to_wire()?,
            expire_timeout: config.timeout,
        })
    }

    /// Sends the notification and installs its routes. The receiver
    /// resolves when the notification closes.
    async fn open(&self) -> Result<oneshot::Receiver<ClosedResult>> {
        let request = {
            let mut record = lock(&self.shared.record);
            if record.status != Status::Unopened || record.sending {
                return Err(NotifierError::AlreadyShown { id: record.id });
            }
            let request = self.request(&record.actions)?;
            record.sending = true;
            request
        };

        let _sending = Sending { shared: &self.shared };
        self.send(&request).await
    }

    async fn send(&self, request: &NotifyRequest) -> Result<oneshot::Receiver<ClosedResult>> {
        let inner = &self.context.inner;
        let _in_flight = inner.begin_show();
        let interface = inner.acquire_interface().await?;

        let _dispatch = inner.router.hold_dispatch().await;
        let id = interface.notify(request).await?;
        tracing::debug!(id, summary = %request.summary, "Notification shown.");

        {
            let mut record = lock(&self.shared.record);
            record.id = id;
            record.status = Status::Opened;
            record.sending = false;
        }
        inner.notification_opened();

        if inner.close_replaced() && request.replaces_id != 0 {
            inner.router.route(&NotificationSignal::NotificationClosed {
                id: request.replaces_id,
                reason: CloseReason::Replaced.code(),
            });
        }

        let closed = self.install_routes(inner, id);
        let _ = self.shared.events.send(NotificationEvent::Shown(id));
        Ok(closed)
    }

    fn install_routes(&self, inner: &Arc<ContextInner>, id: u32) -> oneshot::Receiver<ClosedResult> {
        let displaced_close = NotificationSignal::NotificationClosed {
            id,
            reason: CloseReason::Replaced.code(),
        };

        let shared = self.shared.clone();
        inner.router.install(
            RouteKey::new(id, SignalKind::ActionInvoked),
            self.owner,
            Handler::Persistent(Arc::new(move |signal: &NotificationSignal| {
                if let NotificationSignal::ActionInvoked { action_key, .. } = signal {
                    shared.invoke_action(action_key, "");
                }
            })),
            &displaced_close,
        );

        let shared = self.shared.clone();
        inner.router.install(
            RouteKey::new(id, SignalKind::NotificationReplied),
            self.owner,
            Handler::Persistent(Arc::new(move |signal: &NotificationSignal| {
                if let NotificationSignal::NotificationReplied { text, .. } = signal {
                    shared.invoke_action(INLINE_REPLY_ACTION_KEY, text);
                }
            })),
            &displaced_close,
        );

        let (tx, rx) = oneshot::channel();
        let shared = self.shared.clone();
        let context = Arc::downgrade(inner);
        let owner = self.owner;
        inner.router.install(
            RouteKey::new(id, SignalKind::NotificationClosed),
            owner,
            Handler::Once(Box::new(move |signal: &NotificationSignal| {
                if let NotificationSignal::NotificationClosed { id, reason } = signal {
                    finish(&shared, &context, owner, *id, CloseReason::from_code(*reason), tx);
                }
            })),
            &displaced_close,
        );
        rx
    }
}

/// Clears the `sending` mark of a record that did not reach `Opened`, whether
/// the send failed or its future was dropped.
struct Sending<'a> {
    shared: &'a Shared,
}

impl Drop for Sending<'_> {
    fn drop(&mut self) {
        let mut record = lock(&self.shared.record);
        if record.status == Status::Unopened {
            record.sending = false;
        }
    }
}

/// Runs the close transition of a shown notification.
fn finish(
    shared: &Shared,
    context: &Weak<ContextInner>,
    owner: u64,
    id: u32,
    reason: CloseReason,
    closed: oneshot::Sender<ClosedResult>,
) {
    lock(&shared.record).status = Status::Closed;
    let result = ClosedResult { id, reason };
    tracing::debug!(id, ?reason, "Notification closed.");

    if let Some(inner) = context.upgrade() {
        inner.router.remove_owned(RouteKey::new(id, SignalKind::ActionInvoked), owner);
        inner.router.remove_owned(RouteKey::new(id, SignalKind::NotificationReplied), owner);
        inner.notification_closed();
    }

    let _ = shared.events.send(NotificationEvent::Closed(result));
    let _ = closed.send(result);
}

impl fmt::Debug for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = lock(&self.shared.record);
        f.debug_struct("Notification")
            .field("id", &record.id)
            .field("status", &record.status)
            .field("actions", &record.actions.iter().map(|a| a.key.as_str()).collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}
