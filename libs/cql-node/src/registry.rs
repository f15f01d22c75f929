//! Host boundary: creates nodes by id and tears them down.

use crate::client::ClusterConnector;
use crate::config::{ConnectionConfig, DEFAULT_RETRY_DELAY, FlowConfig};
use crate::dispatcher::RequestDispatcher;
use crate::error::ConfigError;
use crate::manager::ConnectionManager;
use crate::message::Message;
use crate::status::{ErrorSink, StatusObserver, TracingErrorSink, TracingStatusObserver};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

pub struct NodeRegistry {
    connector: Arc<dyn ClusterConnector>,
    observer: Arc<dyn StatusObserver>,
    errors: Arc<dyn ErrorSink>,
    retry_delay: Duration,
    managers: HashMap<String, Arc<ConnectionManager>>,
}

impl NodeRegistry {
    pub fn new(connector: Arc<dyn ClusterConnector>) -> Self {
        Self {
            connector,
            observer: Arc::new(TracingStatusObserver),
            errors: Arc::new(TracingErrorSink),
            retry_delay: DEFAULT_RETRY_DELAY,
            managers: HashMap::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn StatusObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_error_sink(mut self, errors: Arc<dyn ErrorSink>) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Register a database node. The connection is opened lazily, by the first query node.
    pub fn create_database(
        &mut self,
        id: &str,
        config: ConnectionConfig,
    ) -> Result<Arc<ConnectionManager>, ConfigError> {
        if self.managers.contains_key(id) {
            return Err(ConfigError::DuplicateNode(id.to_string()));
        }

        let manager = ConnectionManager::builder(id, config, self.connector.clone())
            .observer(self.observer.clone())
            .error_sink(self.errors.clone())
            .retry_delay(self.retry_delay)
            .build();
        self.managers.insert(id.to_string(), manager.clone());
        Ok(manager)
    }

    pub fn database(&self, id: &str) -> Option<Arc<ConnectionManager>> {
        self.managers.get(id).cloned()
    }

    /// Create a query node bound to the database `mydb`.
    ///
    /// An unknown or missing id still yields a dispatcher, one that reports the
    /// configuration error and ignores its input.
    pub fn create_query_node(
        &self,
        id: &str,
        mydb: Option<&str>,
        output: mpsc::Sender<Message>,
    ) -> Arc<RequestDispatcher> {
        let manager = mydb.and_then(|db| self.database(db));
        RequestDispatcher::builder(id, manager, output)
            .observer(self.observer.clone())
            .error_sink(self.errors.clone())
            .build()
    }

    /// Create every node of a flow; query nodes are returned by id
    pub fn load_flow(
        &mut self,
        flow: &FlowConfig,
        output: mpsc::Sender<Message>,
    ) -> Result<HashMap<String, Arc<RequestDispatcher>>, ConfigError> {
        for db in &flow.databases {
            self.create_database(&db.id, db.connection_config()?)?;
        }

        let mut dispatchers = HashMap::new();
        for query in &flow.queries {
            if dispatchers.contains_key(&query.id) {
                return Err(ConfigError::DuplicateNode(query.id.clone()));
            }
            let dispatcher =
                self.create_query_node(&query.id, query.mydb.as_deref(), output.clone());
            dispatchers.insert(query.id.clone(), dispatcher);
        }

        info!(
            databases = flow.databases.len(),
            queries = dispatchers.len(),
            "Flow loaded"
        );
        Ok(dispatchers)
    }

    /// Shut down every database node; returns once all sessions are released
    pub async fn teardown(&mut self) {
        for (id, manager) in self.managers.drain() {
            manager.shutdown().await;
            info!(node = %id, "Database node torn down");
        }
    }
}
