//! Cluster client capability consumed by the manager and the dispatcher.
//!
//! The driver is opaque to the rest of the crate: a [`ClusterConnector`] opens a
//! session from a [`ConnectionConfig`], and a [`ClusterSession`] runs statements and
//! closes itself. [`crate::driver`] provides the production implementation.

use crate::config::ConnectionConfig;
use crate::error::{ConnectError, ExecutionError, ShutdownError};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

/// One result row, keyed by column name
pub type Row = Map<String, Value>;

/// Execution options passed with every statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// Prepare (and cache) statements before executing them
    pub prepare: bool,
}

impl QueryOptions {
    pub const PREPARED: Self = Self { prepare: true };
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::PREPARED
    }
}

/// An open session against the cluster
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterSession: Send + Sync {
    /// Run one statement with positional parameters
    async fn execute(
        &self,
        query: &str,
        params: Vec<Value>,
        options: QueryOptions,
    ) -> Result<Vec<Row>, ExecutionError>;

    /// Run the statements as a single batch, in order, without parameters
    async fn batch(
        &self,
        queries: Vec<String>,
        options: QueryOptions,
    ) -> Result<Vec<Row>, ExecutionError>;

    /// Release the session
    async fn shutdown(&self) -> Result<(), ShutdownError>;
}

/// Shared handle to an open session
pub type SessionHandle = Arc<dyn ClusterSession>;

/// Opens sessions
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self, config: &ConnectionConfig) -> Result<SessionHandle, ConnectError>;
}
