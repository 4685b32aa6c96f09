//! Pairpad server binary.
//!
//! # Usage
//!
//! ```bash
//! # Default bind on port 8080
//! pairpad-server
//!
//! # Custom bind and verbose logging
//! pairpad-server --bind 127.0.0.1:9000 --log-level debug
//! ```

use std::time::Duration;

use clap::Parser;
use pairpad_server::{Server, ServerConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Pairpad collaborative editing server
#[derive(Parser, Debug)]
#[command(name = "pairpad-server")]
#[command(about = "Collaborative editing room server")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Outbound queue capacity per connection
    #[arg(long, default_value = "64")]
    queue_capacity: usize,

    /// Seconds an empty room survives before eviction
    #[arg(long, default_value = "30")]
    evict_grace_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Pairpad server starting");

    let config = ServerConfig {
        bind_address: args.bind,
        max_connections: args.max_connections,
        queue_capacity: args.queue_capacity,
        evict_grace: Duration::from_secs(args.evict_grace_secs),
    };

    let server = Server::bind(config).await?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    server.run().await?;

    Ok(())
}
