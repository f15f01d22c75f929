//! Test doubles shared by the integration tests.
//!
//! - `ScriptedConnector` plays back a list of connect outcomes and records every attempt
//! - `FakeSession` records submitted statements and returns canned rows
//! - `RecordingObserver` / `RecordingSink` capture status badges and reported errors

#![allow(dead_code)]

use async_trait::async_trait;
use cql_node::{
    ClusterConnector, ClusterSession, ConnectError, ConnectionConfig, ConnectionManager,
    ConnectionState, ErrorSink, ExecutionError, Message, NodeError, NodeStatus, QueryOptions, Row,
    SessionHandle, ShutdownError, StatusObserver,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

// ============================================================================
// Session
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Execute {
        query: String,
        params: Vec<Value>,
        prepare: bool,
    },
    Batch {
        queries: Vec<String>,
        prepare: bool,
    },
}

/// How sessions handed out by the connector behave
#[derive(Debug, Clone, Default)]
pub struct SessionBehavior {
    pub rows: Vec<Row>,
    pub fail_queries: bool,
    pub fail_shutdown: bool,
}

pub struct FakeSession {
    behavior: SessionBehavior,
    calls: Mutex<Vec<Call>>,
    closed: AtomicBool,
}

impl FakeSession {
    pub fn new(behavior: SessionBehavior) -> Self {
        Self {
            behavior,
            calls: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn outcome(&self) -> Result<Vec<Row>, ExecutionError> {
        if self.behavior.fail_queries {
            Err(ExecutionError::Query("write timeout".into()))
        } else {
            Ok(self.behavior.rows.clone())
        }
    }
}

#[async_trait]
impl ClusterSession for FakeSession {
    async fn execute(
        &self,
        query: &str,
        params: Vec<Value>,
        options: QueryOptions,
    ) -> Result<Vec<Row>, ExecutionError> {
        self.calls.lock().unwrap().push(Call::Execute {
            query: query.to_string(),
            params,
            prepare: options.prepare,
        });
        self.outcome()
    }

    async fn batch(
        &self,
        queries: Vec<String>,
        options: QueryOptions,
    ) -> Result<Vec<Row>, ExecutionError> {
        self.calls.lock().unwrap().push(Call::Batch {
            queries,
            prepare: options.prepare,
        });
        self.outcome()
    }

    async fn shutdown(&self) -> Result<(), ShutdownError> {
        self.closed.store(true, Ordering::SeqCst);
        if self.behavior.fail_shutdown {
            Err(ShutdownError("socket already closed".into()))
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Connector
// ============================================================================

pub enum Step {
    Fail,
    Succeed,
    /// Wait for the notification, then succeed
    Gated(Arc<Notify>),
}

/// Plays back connect outcomes in order; fails once the script runs out
pub struct ScriptedConnector {
    script: Mutex<VecDeque<Step>>,
    behavior: SessionBehavior,
    attempts: Mutex<Vec<Instant>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    sessions: Mutex<Vec<Arc<FakeSession>>>,
}

impl ScriptedConnector {
    pub fn new(script: Vec<Step>) -> Arc<Self> {
        Self::with_behavior(script, SessionBehavior::default())
    }

    pub fn with_behavior(script: Vec<Step>, behavior: SessionBehavior) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            behavior,
            attempts: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            sessions: Mutex::new(Vec::new()),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> Vec<Arc<FakeSession>> {
        self.sessions.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterConnector for ScriptedConnector {
    async fn connect(&self, _config: &ConnectionConfig) -> Result<SessionHandle, ConnectError> {
        self.attempts.lock().unwrap().push(Instant::now());
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Fail);
        let result = match step {
            Step::Fail => Err(ConnectError::Session("connection refused".into())),
            Step::Succeed => Ok(()),
            Step::Gated(gate) => {
                gate.notified().await;
                Ok(())
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        result.map(|()| {
            let session = Arc::new(FakeSession::new(self.behavior.clone()));
            self.sessions.lock().unwrap().push(session.clone());
            session as SessionHandle
        })
    }
}

// ============================================================================
// Observers
// ============================================================================

#[derive(Default)]
pub struct RecordingObserver {
    statuses: Mutex<Vec<(String, NodeStatus)>>,
}

impl RecordingObserver {
    pub fn texts(&self) -> Vec<String> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .map(|(_, status)| status.text.clone())
            .collect()
    }
}

impl StatusObserver for RecordingObserver {
    fn status(&self, node: &str, status: NodeStatus) {
        self.statuses.lock().unwrap().push((node.to_string(), status));
    }
}

#[derive(Debug, Clone)]
pub struct Reported {
    pub node: String,
    pub error: NodeError,
    pub event: Option<Message>,
}

#[derive(Default)]
pub struct RecordingSink {
    reported: Mutex<Vec<Reported>>,
}

impl RecordingSink {
    pub fn reported(&self) -> Vec<Reported> {
        self.reported.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.reported
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.error.kind())
            .collect()
    }
}

impl ErrorSink for RecordingSink {
    fn report(&self, node: &str, error: &NodeError, event: Option<&Message>) {
        self.reported.lock().unwrap().push(Reported {
            node: node.to_string(),
            error: error.clone(),
            event: event.cloned(),
        });
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub struct Harness {
    pub connector: Arc<ScriptedConnector>,
    pub observer: Arc<RecordingObserver>,
    pub sink: Arc<RecordingSink>,
    pub manager: Arc<ConnectionManager>,
}

impl Harness {
    pub fn new(connector: Arc<ScriptedConnector>) -> Self {
        let observer = Arc::new(RecordingObserver::default());
        let sink = Arc::new(RecordingSink::default());
        let manager = ConnectionManager::builder(
            "cassandra",
            ConnectionConfig::new("127.0.0.1"),
            connector.clone(),
        )
        .observer(observer.clone())
        .error_sink(sink.clone())
        .build();

        Self {
            connector,
            observer,
            sink,
            manager,
        }
    }

    pub async fn wait_for_state(&self, target: ConnectionState) {
        let mut state = self.manager.subscribe();
        state.wait_for(|s| *s == target).await.unwrap();
    }
}

/// Poll `condition` until it holds; gives up after a few seconds of (possibly paused) time
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..5_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}
