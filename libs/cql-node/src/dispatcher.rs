//! Query node: turns flow messages into CQL executions on a shared connection.

use crate::client::{QueryOptions, Row};
use crate::error::{ConfigError, ExecutionError, NodeError};
use crate::manager::{ConnectionManager, ConnectionState};
use crate::message::{Message, QueryRequest};
use crate::metrics::QueryMetrics;
use crate::status::{
    ErrorSink, NodeStatus, StatusObserver, TracingErrorSink, TracingStatusObserver,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Builder for [`RequestDispatcher`]
pub struct RequestDispatcherBuilder {
    name: String,
    manager: Option<Arc<ConnectionManager>>,
    output: mpsc::Sender<Message>,
    observer: Arc<dyn StatusObserver>,
    errors: Arc<dyn ErrorSink>,
}

impl RequestDispatcherBuilder {
    pub fn observer(mut self, observer: Arc<dyn StatusObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn error_sink(mut self, errors: Arc<dyn ErrorSink>) -> Self {
        self.errors = errors;
        self
    }

    /// Finish construction.
    ///
    /// With a manager this triggers its `connect()` once. Without one the configuration
    /// error is reported here and the dispatcher drops every message it receives.
    pub fn build(self) -> Arc<RequestDispatcher> {
        match &self.manager {
            Some(manager) => manager.connect(),
            None => {
                self.observer.status(&self.name, NodeStatus::not_configured());
                self.errors.report(
                    &self.name,
                    &NodeError::Configuration(ConfigError::DatabaseNotConfigured),
                    None,
                );
            }
        }

        Arc::new(RequestDispatcher {
            metrics: QueryMetrics::new(self.name.clone()),
            name: self.name,
            manager: self.manager,
            output: self.output,
            observer: self.observer,
            errors: self.errors,
        })
    }
}

pub struct RequestDispatcher {
    name: String,
    manager: Option<Arc<ConnectionManager>>,
    output: mpsc::Sender<Message>,
    observer: Arc<dyn StatusObserver>,
    errors: Arc<dyn ErrorSink>,
    metrics: QueryMetrics,
}

impl std::fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl RequestDispatcher {
    /// Start building a dispatcher bound to `manager` (or to nothing, if it did not resolve).
    ///
    /// Results are sent on `output`.
    pub fn builder(
        name: impl Into<String>,
        manager: Option<Arc<ConnectionManager>>,
        output: mpsc::Sender<Message>,
    ) -> RequestDispatcherBuilder {
        RequestDispatcherBuilder {
            name: name.into(),
            manager,
            output,
            observer: Arc::new(TracingStatusObserver),
            errors: Arc::new(TracingErrorSink),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_configured(&self) -> bool {
        self.manager.is_some()
    }

    /// Accept one message and process it on a spawned task.
    ///
    /// Results go out in completion order, not arrival order.
    pub fn handle(self: &Arc<Self>, msg: Message) {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.process(msg).await });
    }

    /// Process one message to completion: either emit the result or report the error
    pub async fn process(&self, msg: Message) {
        if self.manager.is_none() {
            debug!(node = %self.name, "Database not configured, message dropped");
            return;
        }

        match self.dispatch(&msg).await {
            Ok(out) => {
                if self.output.send(out).await.is_err() {
                    warn!(node = %self.name, "Output channel closed, result dropped");
                }
            }
            Err(e) => self.errors.report(&self.name, &e, Some(&msg)),
        }
    }

    /// Validate and run the request carried by `msg`, returning the outgoing message
    pub async fn dispatch(&self, msg: &Message) -> Result<Message, NodeError> {
        let manager = self
            .manager
            .as_ref()
            .ok_or(ConfigError::DatabaseNotConfigured)?;

        let request = QueryRequest::from_message(msg).inspect_err(|_| self.metrics.rejected())?;
        let mode = request.mode();

        self.observer.status(&self.name, NodeStatus::executing());

        let started = Instant::now();
        let result = self.run(manager, request).await;
        self.metrics.completed(mode.as_str(), result.is_ok(), started.elapsed());

        let rows = result?;
        debug!(node = %self.name, mode = mode.as_str(), rows = rows.len(), "Query completed");
        Ok(msg.clone().with_rows(rows))
    }

    async fn run(
        &self,
        manager: &ConnectionManager,
        request: QueryRequest,
    ) -> Result<Vec<Row>, ExecutionError> {
        // wait out an in-flight connect attempt
        let mut state = manager.subscribe();
        let settled = state
            .wait_for(|s| *s != ConnectionState::Connecting)
            .await
            .is_ok();
        if !settled {
            return Err(ExecutionError::NotConnected);
        }

        let session = manager.session().ok_or(ExecutionError::NotConnected)?;

        match request {
            QueryRequest::Batch { queries } => {
                info!(node = %self.name, "Batching {} CQL queries", queries.len());
                session.batch(queries, QueryOptions::PREPARED).await
            }
            QueryRequest::Single { query, params } => {
                info!(node = %self.name, "Executing CQL query");
                session.execute(&query, params, QueryOptions::PREPARED).await
            }
        }
    }
}
