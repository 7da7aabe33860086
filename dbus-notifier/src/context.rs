//! The notifier context.
//!
//! [`NotifierContext`] owns everything that notifications share: the session
//! bus handle, the bound notifications interface, the signal router and the
//! open-notification counter. It is cheap to clone; clones share state.
//!
//! Lifecycle of the connection:
//!
//! 1. The first operation that needs the service acquires the interface.
//!    Concurrent callers share a single bind.
//! 2. Binding subscribes the context's signal sink once. A dispatcher task
//!    routes incoming signals to the notification that owns the id.
//! 3. When the last open notification closes and auto-disconnect is on, the
//!    interface is unbound and the owned session closed after
//!    [`DISCONNECT_DELAY`], unless a new notification shows up first.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::binder::{Acquire, InterfaceBinder};
use crate::config::NotifierConfig;
use crate::counter::ReferenceCounter;
use crate::error::{NotifierError, Result};
use crate::identifier::IdentifierGenerator;
use crate::routing::SignalRouter;
use crate::session::{SessionHolder, DISCONNECT_DELAY};
use crate::sync::lock;
use crate::transport::dbus::ZbusConnector;
use crate::transport::{
    NotificationsInterface, ServerInformation, SessionBus, SessionConnector, SignalSubscription,
};

pub(crate) struct ContextInner {
    pub(crate) session: SessionHolder,
    pub(crate) binder: InterfaceBinder,
    pub(crate) counter: ReferenceCounter,
    pub(crate) router: SignalRouter,
    keys: Mutex<IdentifierGenerator>,
    next_owner: AtomicU64,
    auto_disconnect: AtomicBool,
    close_replaced: AtomicBool,
}

/// Shared state of all notifications created against it.
#[derive(Clone)]
pub struct NotifierContext {
    pub(crate) inner: Arc<ContextInner>,
}

impl NotifierContext {
    /// A context on the D-Bus session bus with the default configuration.
    pub fn new() -> Self {
        Self::with_config(&NotifierConfig::default())
    }

    /// A context on the D-Bus session bus.
    pub fn with_config(config: &NotifierConfig) -> Self {
        Self::with_connector(Arc::new(ZbusConnector), config)
    }

    /// A context that creates its session handles through `connector`.
    pub fn with_connector(connector: Arc<dyn SessionConnector>, config: &NotifierConfig) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                session: SessionHolder::new(connector),
                binder: InterfaceBinder::new(),
                counter: ReferenceCounter::new(),
                router: SignalRouter::new(),
                keys: Mutex::new(IdentifierGenerator::new()),
                next_owner: AtomicU64::new(1),
                auto_disconnect: AtomicBool::new(config.auto_disconnect_session_bus),
                close_replaced: AtomicBool::new(config.close_replaced_notify),
            }),
        }
    }

    /// Capabilities announced by the notification server (`GetCapabilities`).
    pub async fn supported_capabilities(&self) -> Result<Vec<String>> {
        let interface = self.inner.acquire_interface().await?;
        interface.get_capabilities().await
    }

    /// Identity of the notification server (`GetServerInformation`).
    pub async fn server_information(&self) -> Result<ServerInformation> {
        let interface = self.inner.acquire_interface().await?;
        interface.get_server_information().await
    }

    /// Returns the bound notifications interface, binding it if needed.
    pub async fn interface(&self) -> Result<Arc<dyn NotificationsInterface>> {
        self.inner.acquire_interface().await
    }

    /// Uses `session` instead of a self-created one, or goes back to
    /// self-created sessions with `None`.
    ///
    /// An external session is never disconnected by the context, and
    /// auto-disconnect stays off while it is installed. The current interface
    /// is unbound; if notifications are still open a new one is acquired in
    /// the background so their signals keep arriving.
    pub fn set_session_bus(&self, session: Option<Arc<dyn SessionBus>>) {
        let inner = &self.inner;
        inner.binder.unbind();
        inner.session.set_external(session);
        if inner.counter.open_count() > 0 {
            inner.start_background_acquire();
        }
    }

    /// Replaces the bound interface.
    ///
    /// The current interface is unsubscribed and any owned session torn
    /// down. With `Some`, the given interface is subscribed and bound
    /// directly; with `None`, a fresh one is acquired in the background so
    /// open notifications keep receiving their signals.
    ///
    /// # Errors
    ///
    /// Returns the transport error if subscribing to the given interface's
    /// signals fails. Nothing is bound in that case.
    pub async fn set_interface(&self, interface: Option<Arc<dyn NotificationsInterface>>) -> Result<()> {
        let inner = &self.inner;
        inner.binder.unbind();
        inner.session.disconnect();
        match interface {
            Some(interface) => {
                let subscription = inner.subscribe(&interface).await?;
                inner.binder.bind(interface, subscription);
                tracing::info!("Notifications interface replaced.");
            }
            None => inner.start_background_acquire(),
        }
        Ok(())
    }

    /// Returns the session handle in use, connecting if none is held.
    ///
    /// This is the external handle while one is installed. A handle created
    /// here is owned by the context and closed by the next auto teardown or
    /// [`NotifierContext::disconnect_session_bus`].
    pub fn session_bus(&self) -> Arc<dyn SessionBus> {
        self.inner.session.get()
    }

    /// Releases the owned session bus and closes it after
    /// [`DISCONNECT_DELAY`].
    ///
    /// The interface derived from it is unbound. If notifications are still
    /// open, a new interface is acquired in the background so their signals
    /// keep arriving.
    ///
    /// # Returns
    ///
    /// `false` if no owned session existed.
    pub fn disconnect_session_bus(&self) -> bool {
        let inner = &self.inner;
        if !inner.session.has_owned() {
            return false;
        }
        inner.binder.unbind();
        let disconnected = inner.session.disconnect();
        if inner.counter.open_count() > 0 {
            inner.start_background_acquire();
        }
        disconnected
    }

    /// Whether the owned session is closed once no notification is open.
    ///
    /// Always `false` while an external session is installed.
    pub fn auto_disconnect_session_bus(&self) -> bool {
        self.inner.auto_disconnect_enabled()
    }

    pub fn set_auto_disconnect_session_bus(&self, enabled: bool) {
        self.inner.auto_disconnect.store(enabled, Ordering::SeqCst);
        if enabled && self.inner.counter.is_idle() {
            self.inner.schedule_teardown();
        }
    }

    /// Whether showing a notification with a `replaces_id` closes the
    /// replaced one locally with [`crate::CloseReason::Replaced`].
    pub fn close_replaced_notify(&self) -> bool {
        self.inner.close_replaced.load(Ordering::SeqCst)
    }

    pub fn set_close_replaced_notify(&self, enabled: bool) {
        self.inner.close_replaced.store(enabled, Ordering::SeqCst);
    }

    /// Number of notifications shown and not yet closed.
    pub fn open_count(&self) -> usize {
        self.inner.counter.open_count()
    }

    /// Whether a session handle, owned or external, is currently held.
    pub fn has_session(&self) -> bool {
        self.inner.session.has_owned() || self.inner.session.has_external()
    }

    /// Whether a notifications interface is currently bound.
    pub fn is_bound(&self) -> bool {
        self.inner.binder.is_bound()
    }
}

impl Default for NotifierContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NotifierContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifierContext")
            .field("binder", &self.inner.binder)
            .field("counter", &self.inner.counter)
            .field("routes", &self.inner.router.route_count())
            .field("auto_disconnect", &self.inner.auto_disconnect_enabled())
            .field("close_replaced", &self.close_replaced_notify())
            .finish()
    }
}

/// Marks a `show()` as in flight until dropped.
pub(crate) struct ShowInFlight {
    inner: Arc<ContextInner>,
}

impl Drop for ShowInFlight {
    fn drop(&mut self) {
        if self.inner.counter.end_show() {
            self.inner.schedule_teardown();
        }
    }
}

impl ContextInner {
    pub(crate) fn auto_disconnect_enabled(&self) -> bool {
        self.auto_disconnect.load(Ordering::SeqCst) && !self.session.has_external()
    }

    pub(crate) fn close_replaced(&self) -> bool {
        self.close_replaced.load(Ordering::SeqCst)
    }

    /// Serial identifying the routes of one notification.
    pub(crate) fn next_owner(&self) -> u64 {
        self.next_owner.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn next_action_key(&self) -> String {
        lock(&self.keys).next_key()
    }

    pub(crate) fn begin_show(self: &Arc<Self>) -> ShowInFlight {
        self.counter.begin_show();
        ShowInFlight { inner: self.clone() }
    }

    /// A notification reached `Opened`.
    pub(crate) fn notification_opened(&self) {
        let open = self.counter.increment();
        tracing::trace!(open, "Notification opened.");
    }

    /// A notification reached `Closed`.
    pub(crate) fn notification_closed(self: &Arc<Self>) {
        let open = self.counter.decrement();
        tracing::trace!(open, "Notification closed.");
        if open == 0 {
            self.schedule_teardown();
        }
    }

    pub(crate) async fn acquire_interface(self: &Arc<Self>) -> Result<Arc<dyn NotificationsInterface>> {
        let (outcome, start) = match self.binder.begin_acquire() {
            Acquire::Ready(interface) => return Ok(interface),
            Acquire::Wait { outcome, start } => (outcome, start),
        };
        if let Some(generation) = start {
            self.spawn_bind(generation);
        }
        outcome.await.unwrap_or(Err(NotifierError::SessionClosed))
    }

    fn start_background_acquire(self: &Arc<Self>) {
        if let Acquire::Wait { start: Some(generation), .. } = self.binder.begin_acquire() {
            self.spawn_bind(generation);
        }
    }

    /// Runs a bind on its own task so dropping the caller's future does not
    /// strand the other waiters.
    fn spawn_bind(self: &Arc<Self>, generation: u64) {
        let inner = self.clone();
        tokio::spawn(async move {
            let result = inner.bind_from_session().await;
            if let Err(e) = &result {
                tracing::warn!("Failed to acquire the notifications interface: {}", e);
                if inner.auto_disconnect_enabled() {
                    inner.session.disconnect();
                }
            }
            inner.binder.finish(generation, result);
        });
    }

    async fn bind_from_session(
        self: &Arc<Self>,
    ) -> Result<(Arc<dyn NotificationsInterface>, SignalSubscription)> {
        let session = self.session.get();
        tracing::debug!("Acquiring the notifications interface...");
        let interface = session.get_interface().await?;
        let subscription = self.subscribe(&interface).await?;
        tracing::info!("Notifications interface bound.");
        Ok((interface, subscription))
    }

    async fn subscribe(self: &Arc<Self>, interface: &Arc<dyn NotificationsInterface>) -> Result<SignalSubscription> {
        self.ensure_dispatcher();
        interface.subscribe(self.router.sink()).await
    }

    /// Starts the dispatcher task the first time a sink is handed out.
    fn ensure_dispatcher(self: &Arc<Self>) {
        let Some(mut signals) = self.router.take_receiver() else {
            return;
        };
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tracing::debug!("Signal dispatcher started.");
            while let Some(signal) = signals.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.router.dispatch(signal).await;
            }
            tracing::debug!("Signal dispatcher stopped.");
        });
    }

    /// Closes the owned session after [`DISCONNECT_DELAY`] if nothing was
    /// shown in the meantime.
    pub(crate) fn schedule_teardown(self: &Arc<Self>) {
        if !self.auto_disconnect_enabled() || !self.session.has_owned() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No async runtime available, session teardown skipped.");
            return;
        };
        let epoch = self.counter.epoch();
        let weak = Arc::downgrade(self);
        tracing::debug!("No open notifications left, session teardown in {:?}.", DISCONNECT_DELAY);
        handle.spawn(async move {
            tokio::time::sleep(DISCONNECT_DELAY).await;
            if let Some(inner) = weak.upgrade() {
                inner.teardown_if_idle(epoch).await;
            }
        });
    }

    async fn teardown_if_idle(&self, epoch: u64) {
        if !self.auto_disconnect_enabled() {
            tracing::debug!("Auto-disconnect turned off, session teardown cancelled.");
            return;
        }
        let released = self.counter.run_if_idle_since(epoch, || {
            self.binder.unbind();
            self.session.take_owned()
        });
        match released {
            Some(Some(session)) => {
                session.disconnect().await;
                tracing::info!("Session bus disconnected, no open notifications left.");
            }
            Some(None) => {}
            None => tracing::debug!("Notifications were shown meanwhile, session teardown cancelled."),
        }
    }
}
