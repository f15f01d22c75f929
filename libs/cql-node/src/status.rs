//! Status side-channel and error sink.
//!
//! Both are observational: nothing in the manager or dispatcher reads back what it
//! reported here.

use crate::error::NodeError;
use crate::message::Message;
use serde::Serialize;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Fill {
    Red,
    Green,
    Yellow,
    Grey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    Dot,
    Ring,
}

/// A status badge as shown by the host's editor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub fill: Fill,
    pub shape: Shape,
    pub text: String,
}

impl NodeStatus {
    fn new(fill: Fill, shape: Shape, text: &str) -> Self {
        Self {
            fill,
            shape,
            text: text.to_string(),
        }
    }

    pub fn connecting() -> Self {
        Self::new(Fill::Yellow, Shape::Ring, "connecting")
    }

    pub fn connected() -> Self {
        Self::new(Fill::Green, Shape::Dot, "connected")
    }

    pub fn disconnected() -> Self {
        Self::new(Fill::Red, Shape::Ring, "disconnected")
    }

    pub fn executing() -> Self {
        Self::new(Fill::Green, Shape::Dot, "executing...")
    }

    pub fn closed() -> Self {
        Self::new(Fill::Grey, Shape::Ring, "closed")
    }

    pub fn not_configured() -> Self {
        Self::new(Fill::Red, Shape::Ring, "not configured")
    }
}

/// Receives status badges for a node
pub trait StatusObserver: Send + Sync {
    fn status(&self, node: &str, status: NodeStatus);
}

/// Receives every error a node reports, with the triggering event when there is one
pub trait ErrorSink: Send + Sync {
    fn report(&self, node: &str, error: &NodeError, event: Option<&Message>);
}

/// Logs status changes at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatusObserver;

impl StatusObserver for TracingStatusObserver {
    fn status(&self, node: &str, status: NodeStatus) {
        info!(node = %node, fill = ?status.fill, shape = ?status.shape, "{}", status.text);
    }
}

/// Logs errors at error level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, node: &str, error: &NodeError, event: Option<&Message>) {
        match event {
            Some(msg) => error!(node = %node, kind = error.kind(), topic = %msg.topic, "{}", error),
            None => error!(node = %node, kind = error.kind(), "{}", error),
        }
    }
}
