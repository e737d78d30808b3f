use crate::error::{Result, StormError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default Telnet port of StormAudio processors
pub const DEFAULT_PORT: u16 = 23;

/// Default name for a configured processor
pub const DEFAULT_NAME: &str = "StormAudio";

/// Persisted settings for one processor, as stored by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_name")]
    pub name: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

impl DeviceConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            name: DEFAULT_NAME.to_string(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Parse and validate a persisted config entry
    pub fn from_json(json: &str) -> Result<Self> {
        let config: DeviceConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that can never produce a connection
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(StormError::Config("host must not be empty".to_string()));
        }
        if self.host.chars().any(char::is_whitespace) {
            return Err(StormError::Config(format!(
                "host {:?} contains whitespace",
                self.host
            )));
        }
        if self.port == 0 {
            return Err(StormError::Config("port must be between 1 and 65535".to_string()));
        }
        Ok(())
    }

    /// Stable identifier for the host's entity registry
    pub fn unique_id(&self) -> String {
        format!("stormaudio_{}_{}", self.host, self.port)
    }

    /// `host:port` address for dialing
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Timing of the TCP transport
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Budget for establishing the TCP session
    pub connect_timeout: Duration,

    /// Budget for the reply to a status query
    pub response_timeout: Duration,

    /// Budget for the status line that confirms a command
    pub confirm_timeout: Duration,

    /// Longest time spent draining the status dump sent after connecting
    pub settle_window: Duration,

    /// Silence that ends the drain early
    pub settle_quiet: Duration,

    /// Connection attempts made by an automatic reconnect
    pub reconnect_attempts: u32,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_secs(3),
            confirm_timeout: Duration::from_secs(1),
            settle_window: Duration::from_secs(2),
            settle_quiet: Duration::from_millis(100),
            reconnect_attempts: 1,
        }
    }
}

/// Cadence of the status poller
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Interval between full status bursts
    pub steady_interval: Duration,

    /// Interval between processor state checks while booting
    pub boot_interval: Duration,

    /// Longest time spent in boot tracking
    pub boot_budget: Duration,

    /// Consecutive failed ticks before the device is marked unavailable
    pub failure_threshold: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            steady_interval: Duration::from_secs(10),
            boot_interval: Duration::from_secs(2),
            boot_budget: Duration::from_secs(30),
            failure_threshold: 3,
        }
    }
}
