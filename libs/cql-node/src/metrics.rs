//! Metrics for connection lifecycle and query dispatch.
//!
//! Recorded through the `metrics` facade; the host decides whether and how to export them.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Connection metrics for one database node
#[derive(Clone)]
pub struct ConnectionMetrics {
    node: String,
}

impl ConnectionMetrics {
    pub fn new(node: impl Into<String>) -> Self {
        Self { node: node.into() }
    }

    /// Record the outcome of one connect attempt
    pub fn connect_attempt(&self, success: bool) {
        counter!(
            "cassandra_connect_attempts_total",
            "node" => self.node.clone(),
            "result" => if success { "success" } else { "failure" }
        )
        .increment(1);
    }

    /// Record the current state as its numeric code
    pub fn state(&self, code: u8) {
        gauge!("cassandra_connection_state", "node" => self.node.clone()).set(f64::from(code));
    }
}

/// Query metrics for one dispatcher node
#[derive(Clone)]
pub struct QueryMetrics {
    node: String,
}

impl QueryMetrics {
    pub fn new(node: impl Into<String>) -> Self {
        Self { node: node.into() }
    }

    pub fn rejected(&self) {
        counter!(
            "cassandra_queries_total",
            "node" => self.node.clone(),
            "mode" => "invalid",
            "status" => "rejected"
        )
        .increment(1);
    }

    pub fn completed(&self, mode: &'static str, success: bool, duration: Duration) {
        counter!(
            "cassandra_queries_total",
            "node" => self.node.clone(),
            "mode" => mode,
            "status" => if success { "success" } else { "failed" }
        )
        .increment(1);

        histogram!(
            "cassandra_query_duration_seconds",
            "node" => self.node.clone(),
            "mode" => mode
        )
        .record(duration.as_secs_f64());
    }
}
