//! Single-flight binding of the notifications interface.
//!
//! The first caller that finds the binder empty starts a bind and every
//! caller arriving while it runs waits for the same outcome. A successful
//! bind is cached together with its signal subscription until it is
//! unbound.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::error::Result;
use crate::sync::lock;
use crate::transport::{NotificationsInterface, SignalSubscription};

pub(crate) type BindOutcome = Result<Arc<dyn NotificationsInterface>>;

/// What a caller of [`InterfaceBinder::begin_acquire`] has to do next.
pub(crate) enum Acquire {
    /// An interface is bound.
    Ready(Arc<dyn NotificationsInterface>),
    /// Wait for a bind in progress. When `start` is set, the caller has to
    /// run that bind and report it through [`InterfaceBinder::finish`].
    Wait {
        outcome: oneshot::Receiver<BindOutcome>,
        start: Option<u64>,
    },
}

struct Bound {
    interface: Arc<dyn NotificationsInterface>,
    subscription: SignalSubscription,
}

#[derive(Default)]
struct BinderState {
    bound: Option<Bound>,
    /// Generation of the bind in progress.
    pending: Option<u64>,
    waiters: Vec<(u64, oneshot::Sender<BindOutcome>)>,
    next_generation: u64,
}

#[derive(Default)]
pub struct InterfaceBinder {
    state: Mutex<BinderState>,
}

impl InterfaceBinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_bound(&self) -> bool {
        lock(&self.state).bound.is_some()
    }

    pub fn is_binding(&self) -> bool {
        lock(&self.state).pending.is_some()
    }

    pub fn current(&self) -> Option<Arc<dyn NotificationsInterface>> {
        lock(&self.state).bound.as_ref().map(|bound| bound.interface.clone())
    }

    pub(crate) fn begin_acquire(&self) -> Acquire {
        let mut state = lock(&self.state);
        if let Some(bound) = &state.bound {
            return Acquire::Ready(bound.interface.clone());
        }

        let (tx, outcome) = oneshot::channel();
        let (generation, start) = match state.pending {
            Some(generation) => (generation, None),
            None => {
                let generation = state.next_generation;
                state.next_generation += 1;
                state.pending = Some(generation);
                (generation, Some(generation))
            }
        };
        state.waiters.push((generation, tx));
        Acquire::Wait { outcome, start }
    }

    /// Completes the bind started as `generation` and wakes its waiters.
    ///
    /// The result is cached only if nothing cleared or replaced the binding
    /// while it ran; the waiters get it either way.
    pub(crate) fn finish(
        &self,
        generation: u64,
        result: Result<(Arc<dyn NotificationsInterface>, SignalSubscription)>,
    ) {
        let (waiters, outcome, stale_subscription) = {
            let mut state = lock(&self.state);
            let current = state.pending == Some(generation);
            if current {
                state.pending = None;
            }

            let (ours, others): (Vec<_>, Vec<_>) = std::mem::take(&mut state.waiters)
                .into_iter()
                .partition(|(waiter_generation, _)| *waiter_generation == generation);
            state.waiters = others;

            let mut stale_subscription = None;
            let outcome = match result {
                Ok((interface, subscription)) => {
                    if current && state.bound.is_none() {
                        state.bound = Some(Bound {
                            interface: interface.clone(),
                            subscription,
                        });
                    } else {
                        tracing::debug!("Binding was cleared while in progress; result not cached.");
                        stale_subscription = Some(subscription);
                    }
                    Ok(interface)
                }
                Err(e) => Err(e),
            };
            (ours, outcome, stale_subscription)
        };

        if let Some(subscription) = stale_subscription {
            subscription.unsubscribe();
        }
        for (_, waiter) in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    /// Installs an interface, replacing (and unsubscribing) the current one.
    pub(crate) fn bind(&self, interface: Arc<dyn NotificationsInterface>, subscription: SignalSubscription) {
        let previous = {
            let mut state = lock(&self.state);
            state.pending = None;
            state.bound.replace(Bound { interface, subscription })
        };
        if let Some(previous) = previous {
            previous.subscription.unsubscribe();
        }
    }

    /// Drops the cached interface and cancels its signal subscription.
    ///
    /// A bind still in progress is left to finish for its waiters, but its
    /// result will not be cached and its subscription is cancelled when it
    /// arrives.
    ///
    /// # Returns
    ///
    /// `true` if an interface was bound.
    pub fn unbind(&self) -> bool {
        let previous = {
            let mut state = lock(&self.state);
            state.pending = None;
            state.bound.take()
        };
        match previous {
            Some(previous) => {
                previous.subscription.unsubscribe();
                tracing::debug!("Notifications interface unbound.");
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for InterfaceBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("InterfaceBinder")
            .field("bound", &state.bound.is_some())
            .field("pending", &state.pending)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NotifierError;
    use crate::transport::{NotifyRequest, ServerInformation, SignalSink};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullInterface;

    #[async_trait]
    impl NotificationsInterface for NullInterface {
        async fn notify(&self, _request: &NotifyRequest) -> Result<u32> {
            Ok(1)
        }
        async fn close_notification(&self, _id: u32) -> Result<()> {
            Ok(())
        }
        async fn get_capabilities(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn get_server_information(&self) -> Result<ServerInformation> {
            Ok(ServerInformation::default())
        }
        async fn subscribe(&self, _sink: SignalSink) -> Result<SignalSubscription> {
            Ok(SignalSubscription::new(|| {}))
        }
    }

    fn counted_subscription(count: &Arc<AtomicUsize>) -> SignalSubscription {
        let count = count.clone();
        SignalSubscription::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn expect_wait(acquire: Acquire) -> (oneshot::Receiver<BindOutcome>, Option<u64>) {
        match acquire {
            Acquire::Wait { outcome, start } => (outcome, start),
            Acquire::Ready(_) => panic!("expected a pending bind"),
        }
    }

    #[tokio::test]
    async fn test_single_flight() {
        let binder = InterfaceBinder::new();
        let (first, start) = expect_wait(binder.begin_acquire());
        let generation = start.expect("first caller starts the bind");
        let (second, start) = expect_wait(binder.begin_acquire());
        assert!(start.is_none());
        assert!(binder.is_binding());

        let interface: Arc<dyn NotificationsInterface> = Arc::new(NullInterface);
        binder.finish(generation, Ok((interface.clone(), SignalSubscription::new(|| {}))));

        assert!(Arc::ptr_eq(&first.await.unwrap().unwrap(), &interface));
        assert!(Arc::ptr_eq(&second.await.unwrap().unwrap(), &interface));
        assert!(matches!(binder.begin_acquire(), Acquire::Ready(_)));
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter_and_is_not_cached() {
        let binder = InterfaceBinder::new();
        let (first, start) = expect_wait(binder.begin_acquire());
        let (second, _) = expect_wait(binder.begin_acquire());

        binder.finish(start.unwrap(), Err(NotifierError::SessionClosed));

        assert!(matches!(first.await.unwrap(), Err(NotifierError::SessionClosed)));
        assert!(matches!(second.await.unwrap(), Err(NotifierError::SessionClosed)));
        assert!(!binder.is_bound());
        let (_, start) = expect_wait(binder.begin_acquire());
        assert!(start.is_some());
    }

    #[tokio::test]
    async fn test_result_after_unbind_is_handed_out_but_not_cached() {
        let binder = InterfaceBinder::new();
        let unsubscribed = Arc::new(AtomicUsize::new(0));
        let (waiter, start) = expect_wait(binder.begin_acquire());
        binder.unbind();

        let interface: Arc<dyn NotificationsInterface> = Arc::new(NullInterface);
        binder.finish(start.unwrap(), Ok((interface, counted_subscription(&unsubscribed))));

        assert!(waiter.await.unwrap().is_ok());
        assert!(!binder.is_bound());
        assert_eq!(unsubscribed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bind_replaces_and_unsubscribes() {
        let binder = InterfaceBinder::new();
        let unsubscribed = Arc::new(AtomicUsize::new(0));
        binder.bind(Arc::new(NullInterface), counted_subscription(&unsubscribed));
        binder.bind(Arc::new(NullInterface), counted_subscription(&unsubscribed));
        assert_eq!(unsubscribed.load(Ordering::SeqCst), 1);

        assert!(binder.unbind());
        assert_eq!(unsubscribed.load(Ordering::SeqCst), 2);
        assert!(!binder.unbind());
    }
}
