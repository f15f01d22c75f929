//! cql-runner
//!
//! Hosts a flow of Cassandra database and query nodes outside of any editor.
//!
//! ## Architecture
//!
//! ```text
//! stdin (one JSON event per line, routed by "node")
//!   ↓
//! RequestDispatcher (per query node)
//!   ↓ (shared ConnectionManager per database node)
//! Cassandra / ScyllaDB
//!   ↓
//! stdout (one JSON event per line, payload = result rows)
//! ```
//!
//! Logs go to stderr. The runner stops on end of input (after in-flight queries
//! finish) or on Ctrl+C / SIGTERM, then closes every connection.

use clap::Parser;
use cql_node::telemetry::{init_tracing, install_color_eyre};
use cql_node::{Environment, FlowConfig, Message, NodeRegistry, RequestDispatcher, ScyllaConnector};
use eyre::{Result, WrapErr};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

const OUTPUT_BUFFER: usize = 256;

#[derive(Parser, Debug)]
#[command(name = "cql-runner")]
#[command(about = "Run CQL queries from JSON events through a managed Cassandra connection")]
pub struct Cli {
    /// Flow description (JSON) listing database and query nodes
    #[arg(short, long)]
    pub flow: PathBuf,

    /// Seconds between reconnect attempts
    #[arg(long, default_value_t = 30)]
    pub retry_delay_secs: u64,

    /// Seconds to wait for in-flight queries once input ends
    #[arg(long, default_value_t = 10)]
    pub drain_timeout_secs: u64,
}

type Dispatchers = HashMap<String, Arc<RequestDispatcher>>;

/// Run the flow until input ends or a shutdown signal arrives
///
/// # Errors
///
/// Returns an error if:
/// - The flow file cannot be read or is invalid
/// - stdin cannot be read or stdout cannot be written
/// - Signal handlers cannot be installed
pub async fn run() -> Result<()> {
    install_color_eyre();
    let cli = Cli::parse();

    let environment = Environment::from_env();
    init_tracing(&environment);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        flow = %cli.flow.display(),
        "Starting cql-runner"
    );

    let flow = FlowConfig::from_file(&cli.flow).wrap_err("Failed to load flow")?;

    let mut registry = NodeRegistry::new(Arc::new(ScyllaConnector))
        .with_retry_delay(Duration::from_secs(cli.retry_delay_secs));
    let (tx, rx) = mpsc::channel(OUTPUT_BUFFER);
    let dispatchers = registry.load_flow(&flow, tx).wrap_err("Invalid flow")?;

    let writer = tokio::spawn(write_output(rx));
    let mut in_flight = JoinSet::new();

    let input_closed = tokio::select! {
        result = read_input(&dispatchers, &mut in_flight) => {
            result?;
            true
        }
        result = shutdown_signal() => {
            result?;
            false
        }
    };

    if input_closed {
        let drain = async {
            while let Some(result) = in_flight.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "Query task failed");
                }
            }
        };
        if tokio::time::timeout(Duration::from_secs(cli.drain_timeout_secs), drain)
            .await
            .is_err()
        {
            warn!(pending = in_flight.len(), "Drain timeout reached, aborting queries");
        }
    }
    in_flight.shutdown().await;

    registry.teardown().await;
    drop(dispatchers);

    writer.await.wrap_err("Output writer panicked")??;
    info!("cql-runner stopped");
    Ok(())
}

/// Read events from stdin and hand each to its query node
async fn read_input(dispatchers: &Dispatchers, in_flight: &mut JoinSet<()>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.wrap_err("Failed to read stdin")? {
        while in_flight.try_join_next().is_some() {}

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let msg: Message = match serde_json::from_str(line) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "Skipping malformed input line");
                continue;
            }
        };

        if let Some(dispatcher) = route(&msg, dispatchers) {
            let dispatcher = dispatcher.clone();
            in_flight.spawn(async move { dispatcher.process(msg).await });
        }
    }

    info!("Input closed");
    Ok(())
}

/// Pick the query node named by the event's `node` field.
///
/// Events without one go to the only query node, if there is exactly one.
pub fn route<'a>(
    msg: &Message,
    dispatchers: &'a Dispatchers,
) -> Option<&'a Arc<RequestDispatcher>> {
    match msg.extra.get("node") {
        Some(Value::String(node)) => {
            let dispatcher = dispatchers.get(node);
            if dispatcher.is_none() {
                warn!(node = %node, "No query node with this id, event dropped");
            }
            dispatcher
        }
        Some(other) => {
            warn!(node = %other, "Event 'node' must be a string, event dropped");
            None
        }
        None if dispatchers.len() == 1 => dispatchers.values().next(),
        None => {
            warn!(
                query_nodes = dispatchers.len(),
                "Event has no 'node' field, event dropped"
            );
            None
        }
    }
}

/// Write emitted events to stdout, one JSON document per line
async fn write_output(mut rx: mpsc::Receiver<Message>) -> Result<()> {
    let mut stdout = tokio::io::stdout();

    while let Some(msg) = rx.recv().await {
        let mut line = serde_json::to_vec(&msg).wrap_err("Failed to encode event")?;
        line.push(b'\n');
        stdout
            .write_all(&line)
            .await
            .wrap_err("Failed to write to stdout")?;
        stdout.flush().await.wrap_err("Failed to flush stdout")?;
    }

    debug!("Output closed");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .wrap_err("Failed to install Ctrl+C handler")
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install signal handler")?
            .recv()
            .await;
        Ok::<(), eyre::Report>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating shutdown...");
        },
        result = terminate => {
            result?;
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cql_node::{ClusterConnector, ConnectionConfig, ConnectError, SessionHandle};
    use serde_json::json;

    struct Unreachable;

    #[async_trait::async_trait]
    impl ClusterConnector for Unreachable {
        async fn connect(&self, _: &ConnectionConfig) -> Result<SessionHandle, ConnectError> {
            Err(ConnectError::Session("unreachable".into()))
        }
    }

    fn dispatchers(ids: &[&str]) -> Dispatchers {
        let registry = NodeRegistry::new(Arc::new(Unreachable));
        let (tx, _rx) = mpsc::channel(1);
        ids.iter()
            .map(|id| (id.to_string(), registry.create_query_node(id, None, tx.clone())))
            .collect()
    }

    fn event(value: Value) -> Message {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_route_by_node_field() {
        let nodes = dispatchers(&["reader", "writer"]);

        let msg = event(json!({ "node": "writer", "topic": "INSERT" }));
        assert_eq!(route(&msg, &nodes).unwrap().name(), "writer");

        let msg = event(json!({ "node": "nobody", "topic": "INSERT" }));
        assert!(route(&msg, &nodes).is_none());

        let msg = event(json!({ "node": 7, "topic": "INSERT" }));
        assert!(route(&msg, &nodes).is_none());
    }

    #[tokio::test]
    async fn test_route_without_node_field() {
        let msg = event(json!({ "topic": "SELECT 1" }));

        let single = dispatchers(&["only"]);
        assert_eq!(route(&msg, &single).unwrap().name(), "only");

        let several = dispatchers(&["a", "b"]);
        assert!(route(&msg, &several).is_none());
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["cql-runner", "--flow", "flow.json"]);
        assert_eq!(cli.flow, PathBuf::from("flow.json"));
        assert_eq!(cli.retry_delay_secs, 30);
        assert_eq!(cli.drain_timeout_secs, 10);
    }
}
