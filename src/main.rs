//! scatterbench: a synthetic TCP echo benchmark
//!
//! A client streams fixed-size 8-segment messages at an echo server over
//! concurrent connections for a bounded duration, under one of three
//! transmission strategies:
//! - Buffered: pack into one contiguous buffer, copy on receive
//! - Vectored: scatter/gather I/O directly over the segments
//! - Zero-copy: vectored send with MSG_ZEROCOPY (Linux)
//!
//! Both ends must be configured with the same message size; the wire
//! carries raw payload bytes with no framing.

mod client;
mod config;
mod error;
mod message;
mod server;
mod strategy;

use config::{Config, Role};
use server::Server;
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

    match config.role {
        Role::Server(server_config) => {
            info!(
                listen = %server_config.listen,
                message_size = server_config.message_size,
                strategy = ?server_config.strategy,
                "Starting scatterbench server"
            );
            Server::bind(&server_config)?.run()?;
        }
        Role::Client(client_config) => {
            info!(
                host = %client_config.host,
                port = client_config.port,
                connections = client_config.connections,
                message_size = client_config.message_size,
                duration_secs = client_config.duration,
                strategy = ?client_config.strategy,
                "Starting scatterbench client"
            );
            client::run(&client_config)?;
        }
    }

    Ok(())
}
