//! Session bus ownership.
//!
//! [`SessionHolder`] owns at most one session handle created through its
//! [`SessionConnector`]. An external handle installed with
//! [`SessionHolder::set_external`] takes precedence and is never
//! disconnected from here.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::sync::lock;
use crate::transport::{SessionBus, SessionConnector};

/// Grace period between releasing an owned session and closing it.
///
/// Closing a connection right after a reply has been received can fail in
/// some bus implementations; the delay sidesteps that.
pub const DISCONNECT_DELAY: Duration = Duration::from_millis(100);

#[derive(Default)]
struct SessionState {
    owned: Option<Arc<dyn SessionBus>>,
    external: Option<Arc<dyn SessionBus>>,
}

pub struct SessionHolder {
    connector: Arc<dyn SessionConnector>,
    state: Mutex<SessionState>,
}

impl SessionHolder {
    pub fn new(connector: Arc<dyn SessionConnector>) -> Self {
        Self {
            connector,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Returns the session handle to use for the next bind.
    ///
    /// The external handle wins if one is installed. Otherwise the owned
    /// handle is returned, and created through the connector the first time
    /// it is needed. Creation does not perform I/O; connecting is left to the
    /// handle's first call.
    ///
    /// # Returns
    ///
    /// A shared handle. Clones stay valid after [`SessionHolder::disconnect`]
    /// but the context no longer tracks them.
    pub fn get(&self) -> Arc<dyn SessionBus> {
        let mut state = lock(&self.state);
        if let Some(external) = &state.external {
            return external.clone();
        }
        if let Some(owned) = &state.owned {
            return owned.clone();
        }
        tracing::debug!("Creating session bus handle.");
        let session = self.connector.connect();
        state.owned = Some(session.clone());
        session
    }

    pub fn has_owned(&self) -> bool {
        lock(&self.state).owned.is_some()
    }

    pub fn has_external(&self) -> bool {
        lock(&self.state).external.is_some()
    }

    /// Installs (or clears) the external handle. Any owned handle is
    /// released and disconnected after [`DISCONNECT_DELAY`].
    pub fn set_external(&self, session: Option<Arc<dyn SessionBus>>) {
        let released = {
            let mut state = lock(&self.state);
            state.external = session;
            state.owned.take()
        };
        if let Some(owned) = released {
            schedule_disconnect(owned);
        }
    }

    /// Releases the owned handle and closes it after [`DISCONNECT_DELAY`].
    ///
    /// Returns `false` if there was nothing to disconnect. Callers arriving
    /// after this point get a fresh handle from [`SessionHolder::get`].
    pub fn disconnect(&self) -> bool {
        match self.take_owned() {
            Some(owned) => {
                schedule_disconnect(owned);
                true
            }
            None => false,
        }
    }

    /// Releases the owned handle without closing it.
    pub(crate) fn take_owned(&self) -> Option<Arc<dyn SessionBus>> {
        lock(&self.state).owned.take()
    }
}

fn schedule_disconnect(session: Arc<dyn SessionBus>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            tracing::debug!("Session bus disconnect scheduled in {:?}.", DISCONNECT_DELAY);
            handle.spawn(async move {
                tokio::time::sleep(DISCONNECT_DELAY).await;
                session.disconnect().await;
                tracing::info!("Session bus disconnected.");
            });
        }
        Err(_) => {
            // Without a runtime the handle is just dropped, which closes it.
            tracing::debug!("No async runtime available, dropping session bus handle.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{NotifierError, Result};
    use crate::transport::{MockSessionConnector, NotificationsInterface};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSession {
        disconnects: AtomicUsize,
    }

    #[async_trait]
    impl SessionBus for CountingSession {
        async fn get_interface(&self) -> Result<Arc<dyn NotificationsInterface>> {
            Err(NotifierError::SessionClosed)
        }

        async fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_get_creates_owned_session_once() {
        let mut connector = MockSessionConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(|| Arc::new(CountingSession::default()) as Arc<dyn SessionBus>);
        let holder = SessionHolder::new(Arc::new(connector));

        let first = holder.get();
        let second = holder.get();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(holder.has_owned());
        assert!(!holder.has_external());
    }

    #[test]
    fn test_external_session_is_never_created_or_owned() {
        let mut connector = MockSessionConnector::new();
        connector.expect_connect().times(0);
        let holder = SessionHolder::new(Arc::new(connector));

        let external: Arc<dyn SessionBus> = Arc::new(CountingSession::default());
        holder.set_external(Some(external.clone()));

        assert!(Arc::ptr_eq(&holder.get(), &external));
        assert!(!holder.has_owned());
        assert!(!holder.disconnect());
    }

    #[test]
    fn test_disconnect_without_owned_session_is_noop() {
        let connector = MockSessionConnector::new();
        let holder = SessionHolder::new(Arc::new(connector));
        assert!(!holder.disconnect());
    }

    #[tokio::test]
    async fn test_disconnect_is_deferred() {
        let session = Arc::new(CountingSession::default());
        let handed_out = session.clone();
        let mut connector = MockSessionConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(move || handed_out.clone() as Arc<dyn SessionBus>);
        let holder = SessionHolder::new(Arc::new(connector));

        holder.get();
        assert!(holder.disconnect());
        assert!(!holder.has_owned());
        assert_eq!(session.disconnects.load(Ordering::SeqCst), 0);

        tokio::time::sleep(DISCONNECT_DELAY * 3).await;
        assert_eq!(session.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_set_external_releases_owned_session() {
        let session = Arc::new(CountingSession::default());
        let handed_out = session.clone();
        let mut connector = MockSessionConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(move || handed_out.clone() as Arc<dyn SessionBus>);
        let holder = SessionHolder::new(Arc::new(connector));
        holder.get();

        holder.set_external(Some(Arc::new(CountingSession::default())));
        assert!(holder.has_external());
        assert!(!holder.has_owned());

        tokio::time::sleep(DISCONNECT_DELAY * 3).await;
        assert_eq!(session.disconnects.load(Ordering::SeqCst), 1);
    }
}
