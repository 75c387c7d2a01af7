//! reverse-tcp: block reversal server and client
//!
//! - `reverse-tcp server [port]` accepts connections and reverses every
//!   block it is sent
//! - `reverse-tcp client <ip> <port> <file> <min_len> <max_len>` sends a
//!   text file and saves the reversed result next to it
//!
//! Configuration via CLI arguments or TOML file.

use reverse_tcp::client;
use reverse_tcp::config::{ClientConfig, Config, Mode, ServerConfig};
use reverse_tcp::server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match config.mode {
        Mode::Server(server) => run_server(server),
        Mode::Client(client) => run_client(client),
    }
}

/// Run the acceptor on a multi-threaded runtime
fn run_server(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        address = %config.listen_addr(),
        workers = ?config.workers,
        "Starting reverse-tcp server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.enable_all().build()?;

    runtime.block_on(async {
        let server = Server::bind(config).await?;
        server.run().await
    })?;
    Ok(())
}

/// Run one client session on a single-threaded runtime
fn run_client(config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        server = %config.server_addr(),
        source = %config.source.display(),
        "Starting reverse-tcp client"
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(client::run(&config))?;
    Ok(())
}
