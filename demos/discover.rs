//! Scan a subnet for StormAudio processors.
//!
//! ```text
//! cargo run --example discover -- 192.168.1.0/24 [port]
//! ```

use std::time::Duration;
use stormaudio::{Discovery, DEFAULT_PORT};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stormaudio=info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let subnet = args.next().unwrap_or_else(|| "192.168.1.0/24".to_string());
    let port = match args.next() {
        Some(port) => port.parse()?,
        None => DEFAULT_PORT,
    };

    let found = Discovery::new()
        .with_port(port)
        .with_probe_timeout(Duration::from_secs(2))
        .scan(&subnet)
        .await?;

    if found.is_empty() {
        println!("No StormAudio processors found in {}", subnet);
        return Ok(());
    }

    println!("Found {} processor(s) in {}:", found.len(), subnet);
    for device in &found {
        println!("  {:<16} {}", device.ip, device.name);
    }

    Ok(())
}
