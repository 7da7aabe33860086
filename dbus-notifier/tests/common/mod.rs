// dbus-notifier/tests/common/mod.rs

//! In-memory notification service used by the integration tests.
//!
//! [`FakeBus`] plays the session bus and the notification server at once.
//! It counts connections, interface lookups and disconnects, records every
//! `Notify` request, hands out ids and lets tests inject signals into
//! whatever sinks are currently subscribed.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dbus_notifier::error::{NotifierError, Result};
use dbus_notifier::transport::{
    NotificationSignal, NotificationsInterface, NotifyRequest, ServerInformation, SessionBus,
    SessionConnector, SignalSink, SignalSubscription,
};
use dbus_notifier::{
    Notification, NotificationConfig, NotificationEvent, NotifierConfig, NotifierContext,
};
use tokio::sync::broadcast;

/// Long enough for a deferred disconnect to have run.
pub const AFTER_GRACE: Duration = Duration::from_millis(350);

#[derive(Default)]
struct BusState {
    connects: usize,
    interface_requests: usize,
    disconnects: usize,
    subscriptions: usize,
    unsubscriptions: usize,
    requests: Vec<NotifyRequest>,
    close_calls: Vec<u32>,
    queued_ids: VecDeque<u32>,
    last_id: u32,
    fail_interface: bool,
    interface_delay: Duration,
    next_token: u64,
    sinks: Vec<(u64, SignalSink)>,
}

#[derive(Default)]
pub struct FakeBus {
    state: Mutex<BusState>,
}

impl FakeBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn SessionConnector> {
        Arc::new(FakeConnector { bus: self.clone() })
    }

    pub fn context(self: &Arc<Self>) -> NotifierContext {
        self.context_with(&NotifierConfig::default())
    }

    pub fn context_with(self: &Arc<Self>, config: &NotifierConfig) -> NotifierContext {
        NotifierContext::with_connector(self.connector(), config)
    }

    /// A session handle on this bus that was not created by a connector.
    pub fn session(self: &Arc<Self>) -> Arc<dyn SessionBus> {
        Arc::new(FakeSession { bus: self.clone() })
    }

    pub fn interface(self: &Arc<Self>) -> Arc<dyn NotificationsInterface> {
        Arc::new(FakeInterface { bus: self.clone() })
    }

    /// Ids returned by the next `Notify` calls, in order. Afterwards ids
    /// count up from the last one handed out.
    pub fn queue_ids(&self, ids: impl IntoIterator<Item = u32>) {
        self.state.lock().unwrap().queued_ids.extend(ids);
    }

    pub fn fail_interface(&self, fail: bool) {
        self.state.lock().unwrap().fail_interface = fail;
    }

    pub fn set_interface_delay(&self, delay: Duration) {
        self.state.lock().unwrap().interface_delay = delay;
    }

    /// Delivers `signal` to every active subscription. Returns how many
    /// received it.
    pub fn emit(&self, signal: NotificationSignal) -> usize {
        let state = self.state.lock().unwrap();
        state
            .sinks
            .iter()
            .filter(|(_, sink)| sink.deliver(signal.clone()))
            .count()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn interface_requests(&self) -> usize {
        self.state.lock().unwrap().interface_requests
    }

    pub fn disconnects(&self) -> usize {
        self.state.lock().unwrap().disconnects
    }

    pub fn subscriptions(&self) -> usize {
        self.state.lock().unwrap().subscriptions
    }

    pub fn unsubscriptions(&self) -> usize {
        self.state.lock().unwrap().unsubscriptions
    }

    pub fn active_subscriptions(&self) -> usize {
        self.state.lock().unwrap().sinks.len()
    }

    pub fn requests(&self) -> Vec<NotifyRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn close_calls(&self) -> Vec<u32> {
        self.state.lock().unwrap().close_calls.clone()
    }
}

struct FakeConnector {
    bus: Arc<FakeBus>,
}

impl SessionConnector for FakeConnector {
    fn connect(&self) -> Arc<dyn SessionBus> {
        self.bus.state.lock().unwrap().connects += 1;
        Arc::new(FakeSession { bus: self.bus.clone() })
    }
}

struct FakeSession {
    bus: Arc<FakeBus>,
}

#[async_trait]
impl SessionBus for FakeSession {
    async fn get_interface(&self) -> Result<Arc<dyn NotificationsInterface>> {
        let (delay, fail) = {
            let mut state = self.bus.state.lock().unwrap();
            state.interface_requests += 1;
            (state.interface_delay, state.fail_interface)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(NotifierError::transport(
                "proxy creation",
                io::Error::new(io::ErrorKind::ConnectionRefused, "no notification server"),
            ));
        }
        Ok(self.bus.interface())
    }

    async fn disconnect(&self) {
        self.bus.state.lock().unwrap().disconnects += 1;
    }
}

struct FakeInterface {
    bus: Arc<FakeBus>,
}

#[async_trait]
impl NotificationsInterface for FakeInterface {
    async fn notify(&self, request: &NotifyRequest) -> Result<u32> {
        let mut state = self.bus.state.lock().unwrap();
        state.requests.push(request.clone());
        let id = match state.queued_ids.pop_front() {
            Some(id) => id,
            None => state.last_id + 1,
        };
        state.last_id = id;
        Ok(id)
    }

    /// Behaves like a server: the close is confirmed with a signal.
    async fn close_notification(&self, id: u32) -> Result<()> {
        self.bus.state.lock().unwrap().close_calls.push(id);
        self.bus.emit(NotificationSignal::NotificationClosed { id, reason: 3 });
        Ok(())
    }

    async fn get_capabilities(&self) -> Result<Vec<String>> {
        Ok(vec!["actions".to_string(), "body".to_string(), "inline-reply".to_string()])
    }

    async fn get_server_information(&self) -> Result<ServerInformation> {
        Ok(ServerInformation {
            name: "fake".to_string(),
            vendor: "tests".to_string(),
            version: "0.1".to_string(),
            spec_version: "1.2".to_string(),
        })
    }

    async fn subscribe(&self, sink: SignalSink) -> Result<SignalSubscription> {
        let token = {
            let mut state = self.bus.state.lock().unwrap();
            state.subscriptions += 1;
            state.next_token += 1;
            let token = state.next_token;
            state.sinks.push((token, sink));
            token
        };
        let bus = self.bus.clone();
        Ok(SignalSubscription::new(move || {
            let mut state = bus.state.lock().unwrap();
            state.unsubscriptions += 1;
            state.sinks.retain(|(t, _)| *t != token);
        }))
    }
}

pub fn build_finished() -> NotificationConfig {
    NotificationConfig {
        summary: "Build finished".to_string(),
        timeout: 5000,
        ..NotificationConfig::default()
    }
}

/// Waits for the next `Shown` event and returns its id.
pub async fn wait_shown(events: &mut broadcast::Receiver<NotificationEvent>) -> u32 {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for Shown")
            .expect("event channel closed");
        if let NotificationEvent::Shown(id) = event {
            return id;
        }
    }
}

/// Shows `notification` on a separate task and returns once it is open.
pub async fn show_in_background(
    notification: Arc<Notification>,
) -> (u32, tokio::task::JoinHandle<Result<dbus_notifier::ClosedResult>>) {
    let mut events = notification.subscribe();
    let handle = tokio::spawn(async move { notification.show().await });
    let id = wait_shown(&mut events).await;
    (id, handle)
}

/// Gives the dispatcher task time to route pending signals.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
