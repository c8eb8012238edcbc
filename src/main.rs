//! solo-echo: a single-client TCP echo server
//!
//! Built for small devices on a wireless link:
//! - One client at a time; a second peer is refused, not queued
//! - Every received segment is echoed back with no framing
//! - Fixed 2048-byte buffers; longer payloads are truncated
//! - Bounded network association retries at startup
//! - Configuration via CLI arguments or TOML file

mod config;
mod error;
mod link;
mod runtime;
mod server;
mod transport;

use config::Config;
use link::HostLink;
use server::BUFFER_CAPACITY;
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

    info!(
        host = %config.host,
        port = config.port,
        buffer_capacity = BUFFER_CAPACITY,
        link_attempts = config.association.attempts,
        "Starting solo-echo server"
    );

    let mut iface = HostLink::new(config.host);
    link::associate(&mut iface, &config.credentials, &config.association)?;

    runtime::run(&config, &iface)
}
