use crate::config::{ConnectionOptions, DEFAULT_NAME, DEFAULT_PORT};
use crate::connection::Connection;
use crate::error::{Result, StormError};
use crate::protocol::{self, Command, Parameter};
use crate::types::DiscoveredDevice;
use futures_util::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::time::{timeout, Instant};

/// Budget for one probe, connect and identification included
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Probes allowed in flight at once
pub const MAX_CONCURRENT_PROBES: usize = 64;

/// Widest subnet accepted for a scan
pub const MIN_PREFIX_LEN: u8 = 16;

/// Subnet scanner for StormAudio processors
///
/// Every host address in the subnet is dialed on the control port and asked
/// for its power state. Hosts that answer with a status line are reported;
/// hosts that refuse, time out or answer with anything else are skipped.
///
/// # Example
///
/// ```no_run
/// use stormaudio::Discovery;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let found = Discovery::new()
///         .with_probe_timeout(Duration::from_secs(2))
///         .scan("192.168.1.0/24")
///         .await?;
///
///     for device in &found {
///         println!("Found {} at {}", device.name, device.ip);
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Discovery {
    port: u16,
    probe_timeout: Duration,
    max_concurrent_probes: usize,
}

impl Discovery {
    pub fn new() -> Self {
        Self {
            port: DEFAULT_PORT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            max_concurrent_probes: MAX_CONCURRENT_PROBES,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn with_max_concurrent_probes(mut self, max_concurrent_probes: usize) -> Self {
        self.max_concurrent_probes = max_concurrent_probes.max(1);
        self
    }

    /// Probe every host in `subnet` (CIDR such as `192.168.1.0/24`, or a single address)
    ///
    /// An empty set is a normal result. Only an unparseable subnet is an error.
    pub async fn scan(&self, subnet: &str) -> Result<BTreeSet<DiscoveredDevice>> {
        let hosts = subnet_hosts(subnet)?;
        let started = Instant::now();

        tracing::info!(
            "Scanning {} host(s) in {} on port {}",
            hosts.len(),
            subnet,
            self.port
        );

        let found: BTreeSet<DiscoveredDevice> = stream::iter(hosts)
            .map(|ip| probe(ip, self.port, self.probe_timeout))
            .buffer_unordered(self.max_concurrent_probes)
            .filter_map(|device| async move { device })
            .collect()
            .await;

        tracing::info!(
            "Discovery of {} finished in {:?}: {} processor(s) found",
            subnet,
            started.elapsed(),
            found.len()
        );

        Ok(found)
    }
}

impl Default for Discovery {
    fn default() -> Self {
        Self::new()
    }
}

/// Scan `subnet` with a custom port and probe timeout
pub async fn scan(
    subnet: &str,
    port: u16,
    probe_timeout: Duration,
) -> Result<BTreeSet<DiscoveredDevice>> {
    Discovery::new()
        .with_port(port)
        .with_probe_timeout(probe_timeout)
        .scan(subnet)
        .await
}

/// Probe a single host; `None` for anything that is not a processor
async fn probe(ip: Ipv4Addr, port: u16, probe_timeout: Duration) -> Option<DiscoveredDevice> {
    match timeout(probe_timeout, identify(ip, port, probe_timeout)).await {
        Ok(Ok(true)) => {
            tracing::info!("Found StormAudio processor at {}", ip);
            Some(DiscoveredDevice {
                ip,
                name: format!("{DEFAULT_NAME} ({ip})"),
            })
        }
        Ok(Ok(false)) => {
            tracing::debug!("{} answered but is not a StormAudio processor", ip);
            None
        }
        Ok(Err(e)) => {
            tracing::trace!("No processor at {}: {}", ip, e);
            None
        }
        Err(_) => {
            tracing::trace!("Probe of {} timed out", ip);
            None
        }
    }
}

async fn identify(ip: Ipv4Addr, port: u16, probe_timeout: Duration) -> Result<bool> {
    let options = ConnectionOptions {
        connect_timeout: probe_timeout,
        settle_window: Duration::ZERO,
        reconnect_attempts: 1,
        ..ConnectionOptions::default()
    };
    let mut conn = Connection::new(ip.to_string(), port, options);
    conn.connect().await?;
    conn.send_line(&Command::Query(Parameter::Power).encode()).await?;

    // Either the reply or the unsolicited status dump gives the processor away.
    let identified = loop {
        match conn.read_line(probe_timeout).await {
            Ok(line) if protocol::is_status_line(&line) => break true,
            Ok(line) => tracing::trace!("{} sent non-status line {:?}", ip, line),
            Err(StormError::Decode(_)) => continue,
            Err(StormError::ConnectionClosed) => break false,
            Err(e) => {
                conn.disconnect().await;
                return Err(e);
            }
        }
    };

    conn.disconnect().await;
    Ok(identified)
}

/// Host addresses of a subnet
///
/// Network and broadcast addresses are left out except for /31 and /32,
/// which have none.
pub fn subnet_hosts(subnet: &str) -> Result<Vec<Ipv4Addr>> {
    let subnet = subnet.trim();
    let (addr, prefix_len) = match subnet.split_once('/') {
        Some((addr, prefix)) => {
            let prefix_len = prefix
                .parse::<u8>()
                .map_err(|_| StormError::Config(format!("invalid prefix length in {subnet:?}")))?;
            (addr, prefix_len)
        }
        None => (subnet, 32),
    };

    let addr: Ipv4Addr = addr
        .parse()
        .map_err(|_| StormError::Config(format!("invalid subnet address in {subnet:?}")))?;

    if prefix_len > 32 {
        return Err(StormError::Config(format!(
            "prefix length {prefix_len} is out of range"
        )));
    }
    if prefix_len < MIN_PREFIX_LEN {
        return Err(StormError::Config(format!(
            "subnet {subnet} is too large to scan (smallest prefix is /{MIN_PREFIX_LEN})"
        )));
    }

    let mask = u32::MAX << (32 - u32::from(prefix_len));
    let network = u32::from(addr) & mask;
    let broadcast = network | !mask;

    let hosts: Vec<Ipv4Addr> = if prefix_len >= 31 {
        (network..=broadcast).map(Ipv4Addr::from).collect()
    } else {
        (network + 1..broadcast).map(Ipv4Addr::from).collect()
    };

    Ok(hosts)
}
