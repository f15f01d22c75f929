//! Connection lifecycle for one database node.
//!
//! ```text
//!            connect()                 ok
//!   Idle ──────────────> Connecting ─────────> Connected
//!                          ^     │
//!          retry delay     │     │ failure
//!                          │     v
//!                        Disconnected
//!
//!   any state ── shutdown() ──> Closed
//! ```
//!
//! Invariants:
//! - at most one connect attempt is in flight (the `Connecting` guard)
//! - a retry timer exists only while `Disconnected`
//! - a session handle exists only while `Connected`
//! - nothing transitions out of `Closed`; attempts that finish after shutdown are dropped

use crate::client::{ClusterConnector, SessionHandle};
use crate::config::{ConnectionConfig, DEFAULT_RETRY_DELAY};
use crate::error::{ConnectError, NodeError};
use crate::metrics::ConnectionMetrics;
use crate::status::{
    ErrorSink, NodeStatus, StatusObserver, TracingErrorSink, TracingStatusObserver,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    /// Terminal, entered by `shutdown()`
    Closed,
}

impl ConnectionState {
    fn code(&self) -> u8 {
        match self {
            ConnectionState::Idle => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Disconnected => 3,
            ConnectionState::Closed => 4,
        }
    }
}

struct Inner {
    state: ConnectionState,
    session: Option<SessionHandle>,
    retry: Option<JoinHandle<()>>,
}

/// Builder for [`ConnectionManager`]
pub struct ConnectionManagerBuilder {
    name: String,
    config: ConnectionConfig,
    connector: Arc<dyn ClusterConnector>,
    observer: Arc<dyn StatusObserver>,
    errors: Arc<dyn ErrorSink>,
    retry_delay: Duration,
}

impl ConnectionManagerBuilder {
    pub fn observer(mut self, observer: Arc<dyn StatusObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn error_sink(mut self, errors: Arc<dyn ErrorSink>) -> Self {
        self.errors = errors;
        self
    }

    /// Delay between a failed attempt and the next one (default 30s)
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn build(self) -> Arc<ConnectionManager> {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let metrics = ConnectionMetrics::new(self.name.clone());
        Arc::new_cyclic(|this| ConnectionManager {
            name: self.name,
            config: self.config,
            connector: self.connector,
            observer: self.observer,
            errors: self.errors,
            retry_delay: self.retry_delay,
            inner: Mutex::new(Inner {
                state: ConnectionState::Idle,
                session: None,
                retry: None,
            }),
            state_tx,
            metrics,
            this: this.clone(),
        })
    }
}

/// Owns the single logical connection of a database node.
///
/// Dispatchers share the manager through an `Arc` and borrow the session with
/// [`ConnectionManager::session`]; only the manager opens or closes it.
pub struct ConnectionManager {
    name: String,
    config: ConnectionConfig,
    connector: Arc<dyn ClusterConnector>,
    observer: Arc<dyn StatusObserver>,
    errors: Arc<dyn ErrorSink>,
    retry_delay: Duration,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
    metrics: ConnectionMetrics,
    this: Weak<ConnectionManager>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Start building a manager; status and errors go to tracing unless overridden
    pub fn builder(
        name: impl Into<String>,
        config: ConnectionConfig,
        connector: Arc<dyn ClusterConnector>,
    ) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder {
            name: name.into(),
            config,
            connector,
            observer: Arc::new(TracingStatusObserver),
            errors: Arc::new(TracingErrorSink),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// The active session, present only while connected
    pub fn session(&self) -> Option<SessionHandle> {
        self.lock().session.clone()
    }

    /// Start a connect attempt unless one is running, the node is connected, or it is closed.
    ///
    /// Returns immediately; the attempt runs on a spawned task.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn connect(&self) {
        let mut inner = self.lock();
        match inner.state {
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Closed => {
                debug!(node = %self.name, state = ?inner.state, "connect() ignored");
                return;
            }
            ConnectionState::Idle | ConnectionState::Disconnected => {}
        }

        if let Some(timer) = inner.retry.take() {
            timer.abort();
        }
        self.transition(&mut inner, ConnectionState::Connecting);
        drop(inner);

        self.observer.status(&self.name, NodeStatus::connecting());
        debug!(node = %self.name, hosts = ?self.config.hosts, "Connect attempt started");

        let manager = self.this.clone();
        let connector = self.connector.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            let result = connector.connect(&config).await;
            if let Some(manager) = manager.upgrade() {
                manager.finish_attempt(result);
            }
        });
    }

    /// Cancel any pending retry and close the session.
    ///
    /// Always completes: close failures go to the error sink. Later `connect()` calls
    /// are ignored.
    pub async fn shutdown(&self) {
        let (timer, session) = {
            let mut inner = self.lock();
            if inner.state == ConnectionState::Closed {
                return;
            }
            self.transition(&mut inner, ConnectionState::Closed);
            (inner.retry.take(), inner.session.take())
        };

        if let Some(timer) = timer {
            timer.abort();
            debug!(node = %self.name, "Pending reconnect cancelled");
        }

        if let Some(session) = session {
            if let Err(e) = session.shutdown().await {
                self.errors.report(&self.name, &NodeError::Shutdown(e), None);
            }
        }

        self.observer.status(&self.name, NodeStatus::closed());
        info!(node = %self.name, "Connection manager closed");
    }

    fn finish_attempt(&self, result: Result<SessionHandle, ConnectError>) {
        let mut inner = self.lock();

        if inner.state == ConnectionState::Closed {
            drop(inner);
            debug!(node = %self.name, "Connect attempt finished after shutdown, discarding");
            if let Ok(session) = result {
                let name = self.name.clone();
                tokio::spawn(async move {
                    if let Err(e) = session.shutdown().await {
                        warn!(node = %name, error = %e, "Failed to close orphaned session");
                    }
                });
            }
            return;
        }

        match result {
            Ok(session) => {
                inner.session = Some(session);
                self.transition(&mut inner, ConnectionState::Connected);
                drop(inner);

                self.metrics.connect_attempt(true);
                self.observer.status(&self.name, NodeStatus::connected());
                info!(node = %self.name, "Connected");
            }
            Err(e) => {
                inner.session = None;
                self.transition(&mut inner, ConnectionState::Disconnected);
                inner.retry = Some(self.schedule_retry());
                drop(inner);

                self.metrics.connect_attempt(false);
                self.observer.status(&self.name, NodeStatus::disconnected());
                self.errors.report(&self.name, &NodeError::Connect(e), None);
                warn!(
                    node = %self.name,
                    retry_in_secs = self.retry_delay.as_secs_f64(),
                    "Connect attempt failed, retry scheduled"
                );
            }
        }
    }

    fn schedule_retry(&self) -> JoinHandle<()> {
        let manager = self.this.clone();
        let delay = self.retry_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(manager) = manager.upgrade() {
                // the timer has fired; clear it so connect() does not abort this task
                manager.lock().retry.take();
                manager.connect();
            }
        })
    }

    fn transition(&self, inner: &mut Inner, next: ConnectionState) {
        debug!(node = %self.name, from = ?inner.state, to = ?next, "State transition");
        inner.state = next;
        self.state_tx.send_replace(next);
        self.metrics.state(next.code());
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClusterSession, MockClusterSession};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingConnector {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ClusterConnector for FailingConnector {
        async fn connect(&self, _: &ConnectionConfig) -> Result<SessionHandle, ConnectError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ConnectError::Session("connection refused".into()))
        }
    }

    struct MockConnector;

    #[async_trait]
    impl ClusterConnector for MockConnector {
        async fn connect(&self, _: &ConnectionConfig) -> Result<SessionHandle, ConnectError> {
            let mut session = MockClusterSession::new();
            session.expect_shutdown().returning(|| Ok(()));
            Ok(Arc::new(session) as Arc<dyn ClusterSession>)
        }
    }

    #[tokio::test]
    async fn test_connect_then_shutdown() {
        let config = ConnectionConfig::new("localhost");
        let manager = ConnectionManager::builder("db", config, Arc::new(MockConnector)).build();
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert!(manager.session().is_none());

        let mut state = manager.subscribe();
        manager.connect();
        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        assert!(manager.session().is_some());

        manager.shutdown().await;
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(manager.session().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_schedules_retry() {
        let connector = Arc::new(FailingConnector {
            calls: AtomicUsize::new(0),
        });
        let config = ConnectionConfig::new("localhost");
        let manager = ConnectionManager::builder("db", config, connector.clone()).build();

        let mut state = manager.subscribe();
        manager.connect();
        state
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();
        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
        assert!(manager.lock().retry.is_some());

        // retry pending: a second connect() starts at once and replaces the timer
        manager.connect();
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert!(manager.lock().retry.is_none());
    }
}
