//! charla-client: interactive client for the chat server.
//!
//! Reads lines from the operator, sends each one as a single payload, and
//! prints the server's acknowledgment. Ends after the sentinel word "éxito",
//! on end-of-input, or when the connection is lost.

use charla::client::Client;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the chat client
#[derive(Parser, Debug)]
#[command(name = "charla-client")]
#[command(version = "0.1.0")]
#[command(about = "Interactive client for the charla chat server", long_about = None)]
struct CliArgs {
    /// Server address to connect to
    #[arg(short = 'c', long, default_value = "127.0.0.1:5000")]
    connect: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let client = match Client::connect(&args.connect).await {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Connection failed");
            return;
        }
    };

    if let Err(e) = client.run().await {
        error!(error = %e, "Session ended with an error");
    }
}
