//! Signal routing.
//!
//! Every open notification installs up to three routes, one per
//! [`SignalKind`], keyed by its server-assigned id. A single dispatcher task
//! drains the [`SignalSink`] channel and hands each signal to the route
//! registered for `(id, kind)`. Signals without a route are dropped.
//!
//! The dispatch gate orders dispatching against route installation: a
//! `show()` holds the shared side from before `Notify` until its routes are
//! in the table, while the dispatcher takes the exclusive side per signal.
//! A signal for a freshly assigned id therefore always finds its route.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, RwLock, RwLockReadGuard};

use crate::sync::lock;
use crate::transport::{NotificationSignal, SignalKind, SignalSink};

/// Address of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub id: u32,
    pub kind: SignalKind,
}

impl RouteKey {
    pub fn new(id: u32, kind: SignalKind) -> Self {
        Self { id, kind }
    }
}

impl From<&NotificationSignal> for RouteKey {
    fn from(signal: &NotificationSignal) -> Self {
        Self::new(signal.id(), signal.kind())
    }
}

pub(crate) type PersistentHandler = Arc<dyn Fn(&NotificationSignal) + Send + Sync>;
pub(crate) type OnceHandler = Box<dyn FnOnce(&NotificationSignal) + Send>;

/// What runs when a signal hits a route.
pub(crate) enum Handler {
    /// Stays installed until removed; used for actions and replies.
    Persistent(PersistentHandler),
    /// Removed by the signal that triggers it; used for closing.
    Once(OnceHandler),
}

impl Handler {
    fn invoke(self, signal: &NotificationSignal) {
        match self {
            Handler::Persistent(handler) => handler(signal),
            Handler::Once(handler) => handler(signal),
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Persistent(_) => f.write_str("Handler::Persistent"),
            Handler::Once(_) => f.write_str("Handler::Once"),
        }
    }
}

#[derive(Debug)]
struct Route {
    /// Serial of the notification that installed the route.
    owner: u64,
    handler: Handler,
}

/// At most one route per [`RouteKey`].
#[derive(Debug, Default)]
pub struct RoutingTable {
    routes: HashMap<RouteKey, Route>,
}

impl RoutingTable {
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn contains(&self, key: RouteKey) -> bool {
        self.routes.contains_key(&key)
    }

    /// Installs a route, returning the handler it displaced, if any.
    pub(crate) fn insert(&mut self, key: RouteKey, owner: u64, handler: Handler) -> Option<Handler> {
        self.routes
            .insert(key, Route { owner, handler })
            .map(|displaced| displaced.handler)
    }

    /// Removes the route at `key` if `owner` installed it.
    pub(crate) fn remove_owned(&mut self, key: RouteKey, owner: u64) -> bool {
        match self.routes.get(&key) {
            Some(route) if route.owner == owner => {
                self.routes.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// The handler to run for `key`. One-shot routes leave the table here.
    fn take_handler(&mut self, key: RouteKey) -> Option<Handler> {
        let persistent = match &self.routes.get(&key)?.handler {
            Handler::Persistent(handler) => Some(handler.clone()),
            Handler::Once(_) => None,
        };
        match persistent {
            Some(handler) => Some(Handler::Persistent(handler)),
            None => self.routes.remove(&key).map(|route| route.handler),
        }
    }
}

/// Routing table, signal channel and dispatch gate of one context.
pub(crate) struct SignalRouter {
    table: Mutex<RoutingTable>,
    gate: RwLock<()>,
    tx: mpsc::UnboundedSender<NotificationSignal>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<NotificationSignal>>>,
}

impl SignalRouter {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            table: Mutex::new(RoutingTable::default()),
            gate: RwLock::new(()),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    pub(crate) fn sink(&self) -> SignalSink {
        SignalSink::new(self.tx.clone())
    }

    /// Hands out the receiving end exactly once, to the dispatcher task.
    pub(crate) fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<NotificationSignal>> {
        lock(&self.rx).take()
    }

    /// Blocks dispatching until the returned guard is dropped.
    pub(crate) async fn hold_dispatch(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read().await
    }

    /// Routes one signal received from the bus.
    pub(crate) async fn dispatch(&self, signal: NotificationSignal) -> bool {
        let _exclusive = self.gate.write().await;
        self.route(&signal)
    }

    /// Routes a signal without waiting for the gate. For signals produced
    /// locally by a caller already holding [`SignalRouter::hold_dispatch`].
    pub(crate) fn route(&self, signal: &NotificationSignal) -> bool {
        let key = RouteKey::from(signal);
        let handler = lock(&self.table).take_handler(key);
        match handler {
            Some(handler) => {
                tracing::trace!(id = key.id, kind = ?key.kind, "Dispatching notification signal.");
                handler.invoke(signal);
                true
            }
            None => {
                tracing::trace!(id = key.id, kind = ?key.kind, "No route for notification signal, ignoring.");
                false
            }
        }
    }

    /// Installs a route. A one-shot route it displaces runs with
    /// `on_displaced`, so its owner still gets to finish.
    pub(crate) fn install(
        &self,
        key: RouteKey,
        owner: u64,
        handler: Handler,
        on_displaced: &NotificationSignal,
    ) {
        let displaced = lock(&self.table).insert(key, owner, handler);
        match displaced {
            Some(Handler::Once(handler)) => {
                tracing::debug!(id = key.id, kind = ?key.kind, "Route displaced by a newer notification.");
                handler(on_displaced);
            }
            Some(Handler::Persistent(_)) => {
                tracing::debug!(id = key.id, kind = ?key.kind, "Route displaced by a newer notification.");
            }
            None => {}
        }
    }

    pub(crate) fn remove_owned(&self, key: RouteKey, owner: u64) -> bool {
        lock(&self.table).remove_owned(key, owner)
    }

    pub(crate) fn route_count(&self) -> usize {
        lock(&self.table).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_persistent(count: &Arc<AtomicUsize>) -> Handler {
        let count = count.clone();
        Handler::Persistent(Arc::new(move |_: &NotificationSignal| {
            count.fetch_add(1, Ordering::SeqCst);
        }))
    }

    fn counting_once(count: &Arc<AtomicUsize>) -> Handler {
        let count = count.clone();
        Handler::Once(Box::new(move |_: &NotificationSignal| {
            count.fetch_add(1, Ordering::SeqCst);
        }))
    }

    fn invoked(id: u32) -> NotificationSignal {
        NotificationSignal::ActionInvoked { id, action_key: "default".to_string() }
    }

    fn closed(id: u32) -> NotificationSignal {
        NotificationSignal::NotificationClosed { id, reason: 2 }
    }

    #[test]
    fn test_persistent_route_survives_dispatch() {
        let router = SignalRouter::new();
        let count = Arc::new(AtomicUsize::new(0));
        router.install(RouteKey::new(5, SignalKind::ActionInvoked), 1, counting_persistent(&count), &closed(5));

        assert!(router.route(&invoked(5)));
        assert!(router.route(&invoked(5)));
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(router.route_count(), 1);
    }

    #[test]
    fn test_once_route_is_consumed() {
        let router = SignalRouter::new();
        let count = Arc::new(AtomicUsize::new(0));
        router.install(RouteKey::new(5, SignalKind::NotificationClosed), 1, counting_once(&count), &closed(5));

        assert!(router.route(&closed(5)));
        assert!(!router.route(&closed(5)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(router.route_count(), 0);
    }

    #[test]
    fn test_unknown_ids_and_kinds_are_ignored() {
        let router = SignalRouter::new();
        let count = Arc::new(AtomicUsize::new(0));
        router.install(RouteKey::new(5, SignalKind::NotificationClosed), 1, counting_once(&count), &closed(5));

        assert!(!router.route(&closed(6)));
        assert!(!router.route(&invoked(5)));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_displaced_once_route_runs() {
        let router = SignalRouter::new();
        let old = Arc::new(AtomicUsize::new(0));
        let new = Arc::new(AtomicUsize::new(0));
        let key = RouteKey::new(5, SignalKind::NotificationClosed);
        router.install(key, 1, counting_once(&old), &closed(5));
        router.install(key, 2, counting_once(&new), &closed(5));

        assert_eq!(old.load(Ordering::SeqCst), 1);
        assert_eq!(new.load(Ordering::SeqCst), 0);
        assert_eq!(router.route_count(), 1);
    }

    #[test]
    fn test_remove_only_own_routes() {
        let mut table = RoutingTable::default();
        let key = RouteKey::new(9, SignalKind::NotificationReplied);
        let count = Arc::new(AtomicUsize::new(0));
        table.insert(key, 1, counting_persistent(&count));

        assert!(!table.remove_owned(key, 2));
        assert!(table.contains(key));
        assert!(table.remove_owned(key, 1));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_waits_for_pending_installation() {
        let router = Arc::new(SignalRouter::new());
        let count = Arc::new(AtomicUsize::new(0));

        let hold = router.hold_dispatch().await;
        let dispatching = {
            let router = router.clone();
            tokio::spawn(async move { router.dispatch(invoked(3)).await })
        };
        tokio::task::yield_now().await;
        router.install(RouteKey::new(3, SignalKind::ActionInvoked), 1, counting_persistent(&count), &closed(3));
        drop(hold);

        assert!(dispatching.await.unwrap());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
