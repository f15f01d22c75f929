//! cql-runner - Entry Point
//!
//! Feeds newline-delimited JSON events from stdin through a Cassandra query flow.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    cql_runner::run().await
}
