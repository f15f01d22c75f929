use crate::client::Row;
use crate::error::NodeError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A flow message.
///
/// `topic` carries the CQL query (or an array of queries for a batch) and `payload`
/// the positional parameters. Any other fields ride along untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub topic: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn new(topic: impl Into<Value>, payload: Option<Value>) -> Self {
        Self {
            topic: topic.into(),
            payload,
            extra: Map::new(),
        }
    }

    /// The same message with `payload` replaced by result rows
    pub fn with_rows(mut self, rows: Vec<Row>) -> Self {
        self.payload = Some(Value::Array(rows.into_iter().map(Value::Object).collect()));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    Single,
    Batch,
}

impl QueryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMode::Single => "single",
            QueryMode::Batch => "batch",
        }
    }
}

/// A validated request extracted from a [`Message`]
#[derive(Debug, Clone, PartialEq)]
pub enum QueryRequest {
    Single { query: String, params: Vec<Value> },
    Batch { queries: Vec<String> },
}

impl QueryRequest {
    /// Validate `msg.topic` (and `msg.payload` for single queries)
    pub fn from_message(msg: &Message) -> Result<Self, NodeError> {
        match &msg.topic {
            Value::String(query) => Ok(QueryRequest::Single {
                query: query.clone(),
                params: params_of(msg)?,
            }),
            Value::Array(items) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .map(|queries| QueryRequest::Batch { queries })
                .ok_or_else(invalid_topic),
            _ => Err(invalid_topic()),
        }
    }

    pub fn mode(&self) -> QueryMode {
        match self {
            QueryRequest::Single { .. } => QueryMode::Single,
            QueryRequest::Batch { .. } => QueryMode::Batch,
        }
    }
}

fn invalid_topic() -> NodeError {
    NodeError::validation(
        "msg.topic",
        "the query is not defined as a string or as an array of queries",
    )
}

/// Falsy payloads (`null`, `false`, `0`, `""`) mean "no parameters"; any other
/// non-array payload is rejected.
fn params_of(msg: &Message) -> Result<Vec<Value>, NodeError> {
    match &msg.payload {
        Some(Value::Array(params)) => Ok(params.clone()),
        None => Ok(Vec::new()),
        Some(payload) if is_falsy(payload) => Ok(Vec::new()),
        Some(_) => Err(NodeError::validation(
            "msg.payload",
            "query parameters must be an array",
        )),
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => true,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
