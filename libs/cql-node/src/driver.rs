//! Cassandra/ScyllaDB implementation of the cluster client capability.
//!
//! Uses the `scylla` driver, which speaks CQL to both Apache Cassandra and ScyllaDB.
//!
//! - Parameters arrive as JSON; prepared statements convert each one to the type of
//!   its bind marker, unprepared ones use a fixed mapping (see `bind`)
//! - Result rows come back as JSON objects keyed by column name
//! - Statements that return no rows (INSERT, UPDATE, batches) yield an empty row list

use crate::bind::{bind_typed, bind_untyped};
use crate::client::{ClusterConnector, ClusterSession, QueryOptions, Row, SessionHandle};
use crate::config::ConnectionConfig;
use crate::error::{ConnectError, ExecutionError, ShutdownError};
use async_trait::async_trait;
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use scylla::cluster::metadata::ColumnType;
use scylla::response::query_result::QueryResult;
use scylla::statement::batch::{Batch, BatchType};
use scylla::statement::prepared::PreparedStatement;
use scylla::value::{CqlValue, Row as CqlRow};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

const VERIFY_QUERY: &str = "SELECT release_version FROM system.local";

/// Opens `scylla` sessions from a [`ConnectionConfig`]
#[derive(Debug, Default, Clone, Copy)]
pub struct ScyllaConnector;

#[async_trait]
impl ClusterConnector for ScyllaConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<SessionHandle, ConnectError> {
        let points = config.contact_points();
        info!(contact_points = ?points, keyspace = ?config.keyspace, "Connecting to Cassandra");

        let mut builder = SessionBuilder::new()
            .known_nodes(&points)
            .connection_timeout(config.connect_timeout());

        if let Some(credentials) = &config.credentials {
            builder = builder.user(&credentials.username, &credentials.password);
        }

        if let Some(keyspace) = &config.keyspace {
            builder = builder.use_keyspace(keyspace, true);
        }

        let session = builder.build().await?;

        session
            .query_unpaged(VERIFY_QUERY, ())
            .await
            .map_err(|e| ConnectError::Verification(e.to_string()))?;

        info!(contact_points = ?points, "Connected to Cassandra");
        Ok(Arc::new(ScyllaSession::new(session)))
    }
}

/// A live `scylla` session with a prepared-statement cache
pub struct ScyllaSession {
    session: Session,
    prepared: Mutex<HashMap<String, PreparedStatement>>,
    closed: AtomicBool,
}

impl ScyllaSession {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            prepared: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), ExecutionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ExecutionError::NotConnected);
        }
        Ok(())
    }

    async fn prepare(&self, query: &str) -> Result<PreparedStatement, ExecutionError> {
        let cached = self
            .prepared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(query)
            .cloned();
        if let Some(statement) = cached {
            return Ok(statement);
        }

        debug!(query = %query, "Preparing statement");
        let statement = self.session.prepare(query).await?;
        self.prepared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(query.to_string(), statement.clone());
        Ok(statement)
    }
}

#[async_trait]
impl ClusterSession for ScyllaSession {
    async fn execute(
        &self,
        query: &str,
        params: Vec<Value>,
        options: QueryOptions,
    ) -> Result<Vec<Row>, ExecutionError> {
        self.ensure_open()?;

        let result = if options.prepare {
            let statement = self.prepare(query).await?;
            let values = {
                let specs = statement.get_variable_col_specs();
                let types: Vec<&ColumnType<'_>> = specs.iter().map(|spec| spec.typ()).collect();
                bind_typed(&types, &params)?
            };
            self.session.execute_unpaged(&statement, values).await?
        } else {
            let values = bind_untyped(&params)?;
            self.session.query_unpaged(query, values).await?
        };

        rows_to_json(result)
    }

    async fn batch(
        &self,
        queries: Vec<String>,
        options: QueryOptions,
    ) -> Result<Vec<Row>, ExecutionError> {
        self.ensure_open()?;
        let mut batch = Batch::new(BatchType::Logged);
        for query in &queries {
            batch.append_statement(query.as_str());
        }
        let values = vec![(); queries.len()];

        let result = if options.prepare {
            let prepared = self.session.prepare_batch(&batch).await?;
            self.session.batch(&prepared, values).await?
        } else {
            self.session.batch(&batch, values).await?
        };

        rows_to_json(result)
    }

    /// The driver closes its connections when the last handle is dropped; this stops
    /// new statements from being accepted in the meantime.
    async fn shutdown(&self) -> Result<(), ShutdownError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(ShutdownError("session already closed".to_string()));
        }
        self.prepared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}

fn rows_to_json(result: QueryResult) -> Result<Vec<Row>, ExecutionError> {
    if !result.is_rows() {
        return Ok(Vec::new());
    }

    let rows_result = result
        .into_rows_result()
        .map_err(|e| ExecutionError::Decode(e.to_string()))?;
    let columns: Vec<String> = rows_result
        .column_specs()
        .iter()
        .map(|spec| spec.name().to_string())
        .collect();

    rows_result
        .rows::<CqlRow>()
        .map_err(|e| ExecutionError::Decode(e.to_string()))?
        .map(|row| {
            let row = row.map_err(|e| ExecutionError::Decode(e.to_string()))?;
            Ok(columns
                .iter()
                .cloned()
                .zip(row.columns.into_iter().map(|v| v.map_or(Value::Null, cql_to_json)))
                .collect())
        })
        .collect()
}

pub(crate) fn cql_to_json(value: CqlValue) -> Value {
    match value {
        CqlValue::Ascii(s) | CqlValue::Text(s) => Value::String(s),
        CqlValue::Boolean(b) => Value::Bool(b),
        CqlValue::TinyInt(i) => Value::from(i),
        CqlValue::SmallInt(i) => Value::from(i),
        CqlValue::Int(i) => Value::from(i),
        CqlValue::BigInt(i) => Value::from(i),
        CqlValue::Counter(c) => Value::from(c.0),
        CqlValue::Timestamp(ts) => Value::from(ts.0),
        CqlValue::Float(f) => float_to_json(f64::from(f)),
        CqlValue::Double(f) => float_to_json(f),
        CqlValue::Uuid(id) => Value::String(id.to_string()),
        CqlValue::Inet(addr) => Value::String(addr.to_string()),
        CqlValue::Blob(bytes) => Value::String(const_hex::encode_prefixed(bytes)),
        CqlValue::List(items) | CqlValue::Set(items) => {
            Value::Array(items.into_iter().map(cql_to_json).collect())
        }
        CqlValue::Tuple(items) => Value::Array(
            items
                .into_iter()
                .map(|v| v.map_or(Value::Null, cql_to_json))
                .collect(),
        ),
        CqlValue::Map(entries) => Value::Object(
            entries
                .into_iter()
                .map(|(k, v)| (map_key(k), cql_to_json(v)))
                .collect::<Map<String, Value>>(),
        ),
        CqlValue::UserDefinedType { fields, .. } => Value::Object(
            fields
                .into_iter()
                .map(|(name, v)| (name, v.map_or(Value::Null, cql_to_json)))
                .collect(),
        ),
        CqlValue::Empty => Value::Null,
        other => Value::String(format!("{:?}", other)),
    }
}

fn float_to_json(f: f64) -> Value {
    Number::from_f64(f).map_or(Value::Null, Value::Number)
}

fn map_key(key: CqlValue) -> String {
    match cql_to_json(key) {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cql_to_json() {
        assert_eq!(cql_to_json(CqlValue::Int(7)), json!(7));
        assert_eq!(cql_to_json(CqlValue::Double(f64::NAN)), Value::Null);
        assert_eq!(cql_to_json(CqlValue::Blob(vec![0xca, 0xfe])), json!("0xcafe"));
        assert_eq!(
            cql_to_json(CqlValue::Map(vec![(CqlValue::Int(1), CqlValue::Text("a".into()))])),
            json!({ "1": "a" })
        );
        assert_eq!(
            cql_to_json(CqlValue::Tuple(vec![Some(CqlValue::Boolean(false)), None])),
            json!([false, null])
        );
    }

    #[tokio::test]
    #[ignore] // Requires actual Cassandra
    async fn test_connect_and_query() {
        let hosts = std::env::var("CASSANDRA_HOSTS").unwrap_or_else(|_| "127.0.0.1".to_string());
        let config = ConnectionConfig::new(&hosts);
        let session = ScyllaConnector.connect(&config).await.unwrap();

        let rows = session
            .execute(VERIFY_QUERY, vec![], QueryOptions::PREPARED)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].contains_key("release_version"));

        session.shutdown().await.unwrap();
        assert!(matches!(
            session.execute(VERIFY_QUERY, vec![], QueryOptions::PREPARED).await,
            Err(ExecutionError::NotConnected)
        ));
    }
}
