//! List NymphCast receivers on the local network.
//!
//! Usage: cargo run --bin discover [config.toml]
//!
//! Prints one JSON object per receiver found.

use nymphcast::{ClientConfig, resolve};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };

    info!(
        service = %config.discovery.service,
        scan_time_secs = config.discovery.scan_time_secs,
        "Scanning for receivers"
    );
    let servers = resolve(&config.discovery).await?;

    for server in &servers {
        println!("{}", serde_json::to_string(server)?);
    }
    Ok(())
}
