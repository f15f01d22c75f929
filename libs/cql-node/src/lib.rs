//! Managed Cassandra/ScyllaDB connection and flow-style query dispatch.
//!
//! A database node owns one [`ConnectionManager`]: it connects on demand, retries a
//! failed attempt every 30 seconds, and releases the session on shutdown. Query nodes
//! ([`RequestDispatcher`]) share that manager, validate incoming [`Message`]s, and run
//! them as a single prepared statement or as a prepared batch.
//!
//! # Example
//!
//! ```ignore
//! use cql_node::{ConnectionConfig, Message, NodeRegistry, ScyllaConnector};
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! let mut registry = NodeRegistry::new(Arc::new(ScyllaConnector));
//! registry.create_database("db", ConnectionConfig::new("127.0.0.1").with_keyspace("ks"))?;
//!
//! let (tx, mut rx) = mpsc::channel(64);
//! let query = registry.create_query_node("q", Some("db"), tx);
//! query.handle(Message::new("SELECT * FROM users", None));
//!
//! let out = rx.recv().await;
//! registry.teardown().await;
//! ```
//!
//! # Environment variables
//!
//! `ConnectionConfig::from_env()` reads:
//! - `CASSANDRA_HOSTS` (required, comma-separated)
//! - `CASSANDRA_PORT` (default 9042)
//! - `CASSANDRA_KEYSPACE`
//! - `CASSANDRA_USERNAME` / `CASSANDRA_PASSWORD`
//! - `CASSANDRA_CONNECT_TIMEOUT_SECS` (default 10)

mod bind;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod driver;
pub mod env;
pub mod error;
pub mod manager;
pub mod message;
pub mod metrics;
pub mod registry;
pub mod status;
pub mod telemetry;

pub use client::{ClusterConnector, ClusterSession, QueryOptions, Row, SessionHandle};
pub use config::{ConnectionConfig, Credentials, DEFAULT_PORT, DEFAULT_RETRY_DELAY, FlowConfig};
pub use dispatcher::RequestDispatcher;
pub use driver::{ScyllaConnector, ScyllaSession};
pub use env::{Environment, FromEnv};
pub use error::{ConfigError, ConnectError, ExecutionError, NodeError, ShutdownError};
pub use manager::{ConnectionManager, ConnectionState};
pub use message::{Message, QueryMode, QueryRequest};
pub use registry::NodeRegistry;
pub use status::{ErrorSink, Fill, NodeStatus, Shape, StatusObserver};
