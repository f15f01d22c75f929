//! Error taxonomy for the connection manager and the query dispatcher.
//!
//! None of these errors travel up the event-delivery path. They are handed to an
//! [`ErrorSink`](crate::status::ErrorSink) and the host keeps running:
//!
//! | error                | raised by                        | effect                                  |
//! |----------------------|----------------------------------|-----------------------------------------|
//! | `Configuration`      | dispatcher without a database    | dispatcher refuses all input            |
//! | `Validation`         | malformed `msg.topic`            | event dropped, nothing emitted          |
//! | `Connect`            | failed (re)connect attempt       | retry scheduled after the backoff delay |
//! | `Execution`          | failed query or batch            | event dropped, connection kept          |
//! | `Shutdown`           | failed close on teardown         | teardown still completes                |

use thiserror::Error;

/// Failure to build configuration or to resolve a database node
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse '{key}': {details}")]
    ParseError { key: String, details: String },

    #[error("No contact points configured")]
    NoHosts,

    #[error("Cassandra database not configured")]
    DatabaseNotConfigured,

    #[error("Node id '{0}' is already in use")]
    DuplicateNode(String),

    #[error("Failed to read flow file '{path}': {details}")]
    FlowFile { path: String, details: String },
}

/// Failure of a single connect attempt
#[derive(Debug, Clone, Error)]
pub enum ConnectError {
    #[error("Failed to open session: {0}")]
    Session(String),

    #[error("Connection verification failed: {0}")]
    Verification(String),
}

/// Failure of a submitted query or batch
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error("No active connection")]
    NotConnected,

    #[error("Failed to prepare statement: {0}")]
    Prepare(String),

    #[error("Query execution failed: {0}")]
    Query(String),

    #[error("Cannot bind parameter {index}: {details}")]
    Bind { index: usize, details: String },

    #[error("Failed to decode result rows: {0}")]
    Decode(String),
}

/// Failure while closing the underlying session
#[derive(Debug, Clone, Error)]
#[error("Failed to close session: {0}")]
pub struct ShutdownError(pub String);

/// Errors reported to the error sink
#[derive(Debug, Clone, Error)]
pub enum NodeError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("{field} : {message}")]
    Validation { field: &'static str, message: String },

    #[error("Connect error: {0}")]
    Connect(#[from] ConnectError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Shutdown error: {0}")]
    Shutdown(#[from] ShutdownError),
}

impl NodeError {
    /// Create a validation error for an input field
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        NodeError::Validation {
            field,
            message: message.into(),
        }
    }

    /// Short label used for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            NodeError::Configuration(_) => "configuration",
            NodeError::Validation { .. } => "validation",
            NodeError::Connect(_) => "connect",
            NodeError::Execution(_) => "execution",
            NodeError::Shutdown(_) => "shutdown",
        }
    }
}

impl From<scylla::errors::NewSessionError> for ConnectError {
    fn from(err: scylla::errors::NewSessionError) -> Self {
        ConnectError::Session(err.to_string())
    }
}

impl From<scylla::errors::PrepareError> for ExecutionError {
    fn from(err: scylla::errors::PrepareError) -> Self {
        ExecutionError::Prepare(err.to_string())
    }
}

impl From<scylla::errors::ExecutionError> for ExecutionError {
    fn from(err: scylla::errors::ExecutionError) -> Self {
        ExecutionError::Query(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_names_field() {
        let err = NodeError::validation(
            "msg.topic",
            "the query is not defined as a string or as an array of queries",
        );
        assert_eq!(err.kind(), "validation");
        assert!(err.to_string().starts_with("msg.topic : "));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            NodeError::from(ConfigError::DatabaseNotConfigured).kind(),
            "configuration"
        );
        assert_eq!(
            NodeError::from(ConnectError::Session("refused".into())).kind(),
            "connect"
        );
        assert_eq!(NodeError::from(ExecutionError::NotConnected).kind(), "execution");
        assert_eq!(
            NodeError::from(ShutdownError("broken pipe".into())).kind(),
            "shutdown"
        );
    }

    #[test]
    fn test_configuration_error_display() {
        let err = NodeError::from(ConfigError::DatabaseNotConfigured);
        assert_eq!(err.to_string(), "Cassandra database not configured");
    }
}
