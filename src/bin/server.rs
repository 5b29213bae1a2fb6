//! charla-server: TCP chat server with SQLite message history.
//!
//! Accepts concurrent client connections, persists every non-empty message
//! with its timestamp and the peer's IP, and acknowledges each one. Runs
//! until interrupted; store or bind failures at startup abort the process.

use charla::config::Config;
use charla::server::Server;
use charla::store::MessageStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        db_path = %config.db_path.display(),
        backlog = config.backlog,
        "Starting charla server"
    );

    let store = MessageStore::open(&config.db_path).await?;
    let server = Server::bind(&config, store)?;

    server.run().await?;

    Ok(())
}
