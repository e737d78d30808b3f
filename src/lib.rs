//! Rust library for controlling StormAudio immersive sound processors
//!
//! StormAudio processors expose a line-oriented control protocol on TCP port
//! 23. This library provides an async client for it:
//!
//! - Power, volume, mute and input control
//! - A status snapshot kept current by a background poller
//! - Fast boot tracking after power-on
//! - Status change subscriptions
//! - Subnet scanning for processors
//!
//! # Quick Start
//!
//! ```no_run
//! use stormaudio::{DeviceConfig, StormAudioClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DeviceConfig::new("192.168.1.50").with_name("Theater");
//!     let client = StormAudioClient::connect(config).await?;
//!
//!     client.set_power(true).await?;
//!     client.select_input("appletv").await?;
//!     client.set_volume(-40.0).await?;
//!
//!     let mut updates = client.subscribe();
//!     while let Ok(status) = updates.recv().await {
//!         println!("{:?}: {:?} dB", status.player_state(), status.volume_db);
//!         if status.is_ready() {
//!             break;
//!         }
//!     }
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Discovery
//!
//! ```no_run
//! use stormaudio::StormAudioClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     for device in StormAudioClient::discover("192.168.1.0/24").await? {
//!         println!("Found {} at {}", device.name, device.ip);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Client**: public API, command confirmation and optimistic updates
//! - **Poller**: steady and boot-tracking status cadence
//! - **Processor**: serialized request/response exchanges and status bursts
//! - **State**: status snapshot with change notification
//! - **Connection**: TCP line transport with reconnect
//! - **Protocol**: `ssp.` command encoding and response decoding
//! - **Discovery**: concurrent subnet probing

mod client;
mod config;
mod connection;
mod discovery;
mod error;
mod poller;
mod processor;
mod protocol;
mod state;
mod subscription;
mod types;

// Public exports
pub use client::{Service, StormAudioClient};
pub use config::{ConnectionOptions, DeviceConfig, PollerConfig, DEFAULT_NAME, DEFAULT_PORT};
pub use connection::Connection;
pub use discovery::{
    scan, subnet_hosts, Discovery, DEFAULT_PROBE_TIMEOUT, MAX_CONCURRENT_PROBES, MIN_PREFIX_LEN,
};
pub use error::{DecodeError, Result, StormError};
pub use poller::{Poller, PollingMode, Schedule, Transition};
pub use processor::{PollOutcome, Processor};
pub use protocol::{decode, is_status_line, parameter_of, Command, Field, Parameter};
pub use state::DeviceState;
pub use subscription::StatusReceiver;
pub use types::{
    clamp_volume, DeviceStatus, DiscoveredDevice, Input, PlayerState, Power, Step, VolumeDb,
    PROCESSOR_INITIALIZING, PROCESSOR_READY, PROCESSOR_STANDBY, VOLUME_MAX_DB, VOLUME_MIN_DB,
};
