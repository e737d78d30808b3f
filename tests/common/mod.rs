//! In-process mock StormAudio processor for integration tests.
//!
//! Speaks the `ssp.` line protocol over a real TCP listener on 127.0.0.1.
//! Each request is logged with its arrival time and the time its reply went
//! out, so tests can check that exchanges never overlap.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stormaudio::{ConnectionOptions, DeviceConfig, PollerConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

/// Install a test log writer once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("stormaudio=debug")
        .try_init();
}

/// Transport timing short enough for tests.
pub fn fast_options() -> ConnectionOptions {
    ConnectionOptions {
        connect_timeout: Duration::from_secs(1),
        response_timeout: Duration::from_millis(300),
        confirm_timeout: Duration::from_millis(300),
        settle_window: Duration::from_millis(100),
        settle_quiet: Duration::from_millis(20),
        reconnect_attempts: 1,
    }
}

/// A poller that never ticks during a test.
pub fn idle_poller() -> PollerConfig {
    PollerConfig {
        steady_interval: Duration::from_secs(600),
        ..PollerConfig::default()
    }
}

/// Poll `check` until it holds or `limit` passes.
pub async fn wait_until(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// A port with nothing listening on it.
pub async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Simulated device state.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceModel {
    pub power_on: bool,
    pub processor_state: u8,
    pub volume: i32,
    pub muted: bool,
    /// Input id, 1..=3
    pub input: u8,
    /// Processor state queries needed after power-on to reach ready; `None` never boots.
    pub boot_queries: Option<u32>,
    /// Queries remaining in the boot currently in progress.
    pub boot_queries_left: Option<u32>,
}

impl DeviceModel {
    /// A processor that is on and fully operational.
    pub fn ready() -> Self {
        Self {
            power_on: true,
            processor_state: 2,
            volume: -40,
            muted: false,
            input: 1,
            boot_queries: Some(1),
            boot_queries_left: None,
        }
    }

    /// A processor in standby.
    pub fn standby() -> Self {
        Self {
            power_on: false,
            processor_state: 0,
            ..Self::ready()
        }
    }

    fn apply(&mut self, parameter: &str, value: Option<&str>) {
        match (parameter, value) {
            ("power", Some("on")) => {
                self.power_on = true;
                if self.processor_state != 2 {
                    self.processor_state = 1;
                    self.boot_queries_left = self.boot_queries;
                }
            }
            ("power", Some("off")) => {
                self.power_on = false;
                self.processor_state = 0;
            }
            ("procstate", None) if self.processor_state == 1 => {
                if let Some(left) = self.boot_queries_left.as_mut() {
                    *left = left.saturating_sub(1);
                    if *left == 0 {
                        self.processor_state = 2;
                    }
                }
            }
            ("vol", Some("up")) => self.volume = (self.volume + 1).min(0),
            ("vol", Some("down")) => self.volume = (self.volume - 1).max(-100),
            ("vol", Some(value)) => {
                if let Ok(volume) = value.parse::<i32>() {
                    self.volume = volume;
                }
            }
            ("mute", Some("on")) => self.muted = true,
            ("mute", Some("off")) => self.muted = false,
            ("mute", Some("toggle")) => self.muted = !self.muted,
            ("input", Some("next")) => self.input = self.input % 3 + 1,
            ("input", Some("prev")) => self.input = (self.input + 1) % 3 + 1,
            ("input", Some(token)) => {
                self.input = match token {
                    "appletv" | "1" => 1,
                    "videogame" | "2" => 2,
                    "hdmi3" | "3" => 3,
                    _ => self.input,
                }
            }
            _ => {}
        }
    }

    fn report(&self, parameter: &str) -> Option<String> {
        let on_off = |on: bool| if on { "on" } else { "off" };
        match parameter {
            "power" => Some(format!("ssp.power.{}", on_off(self.power_on))),
            "procstate" => Some(format!("ssp.procstate.[{}]", self.processor_state)),
            "vol" => Some(format!("ssp.vol.[{}]", self.volume)),
            "mute" => Some(format!("ssp.mute.{}", on_off(self.muted))),
            "input" => Some(format!("ssp.input.[{}]", self.input)),
            _ => None,
        }
    }
}

/// One request as seen by the mock.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub request: String,
    pub arrived: Instant,
    pub replied: Option<Instant>,
}

/// Configuration for the mock processor.
#[derive(Debug, Clone)]
pub struct MockProcessorConfig {
    pub model: DeviceModel,
    /// Lines written as soon as a client connects.
    pub greeting: Vec<String>,
    /// Delay before each reply.
    pub reply_delay: Duration,
}

impl Default for MockProcessorConfig {
    fn default() -> Self {
        Self {
            model: DeviceModel::ready(),
            greeting: Vec::new(),
            reply_delay: Duration::ZERO,
        }
    }
}

struct ServerState {
    model: DeviceModel,
    /// Parameters that never get a reply.
    silent: HashSet<String>,
    /// Raw replies used instead of the model's report.
    overrides: HashMap<String, String>,
    exchanges: Vec<Exchange>,
    connections: usize,
}

impl ServerState {
    fn respond(&mut self, line: &str) -> Option<String> {
        let mut parts = line.trim().splitn(3, '.');
        let (Some("ssp"), Some(parameter)) = (parts.next(), parts.next()) else {
            return None;
        };
        let value = parts.next();

        self.model.apply(parameter, value);

        if self.silent.contains(parameter) {
            return None;
        }
        if let Some(reply) = self.overrides.get(parameter) {
            return Some(reply.clone());
        }
        self.model.report(parameter)
    }
}

/// A mock processor listening on an ephemeral port.
pub struct MockProcessor {
    state: Arc<Mutex<ServerState>>,
    address: SocketAddr,
    kick_tx: broadcast::Sender<()>,
    shutdown: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl MockProcessor {
    /// Start a ready processor.
    pub async fn start() -> Self {
        Self::start_with(MockProcessorConfig::default()).await
    }

    pub async fn start_with(config: MockProcessorConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let state = Arc::new(Mutex::new(ServerState {
            model: config.model.clone(),
            silent: HashSet::new(),
            overrides: HashMap::new(),
            exchanges: Vec::new(),
            connections: 0,
        }));
        let (kick_tx, _) = broadcast::channel(4);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        let task_state = state.clone();
        let task_kick = kick_tx.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        task_state.lock().unwrap().connections += 1;
                        tokio::spawn(serve(
                            stream,
                            task_state.clone(),
                            task_kick.subscribe(),
                            config.clone(),
                        ));
                    }
                }
            }
        });

        Self {
            state,
            address,
            kick_tx,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }

    pub fn device_config(&self) -> DeviceConfig {
        DeviceConfig::new("127.0.0.1")
            .with_port(self.port())
            .with_name("Mock ISP")
    }

    pub fn model(&self) -> DeviceModel {
        self.state.lock().unwrap().model.clone()
    }

    pub fn update(&self, change: impl FnOnce(&mut DeviceModel)) {
        change(&mut self.state.lock().unwrap().model);
    }

    /// Stop answering `parameter` (commands are still applied).
    pub fn set_silent(&self, parameter: &str, silent: bool) {
        let mut state = self.state.lock().unwrap();
        if silent {
            state.silent.insert(parameter.to_string());
        } else {
            state.silent.remove(parameter);
        }
    }

    /// Reply to `parameter` with raw text; embedded newlines send several lines.
    pub fn set_override(&self, parameter: &str, reply: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        match reply {
            Some(reply) => state.overrides.insert(parameter.to_string(), reply.to_string()),
            None => state.overrides.remove(parameter),
        };
    }

    /// Requests received so far.
    pub fn received(&self) -> Vec<String> {
        self.exchanges().into_iter().map(|e| e.request).collect()
    }

    pub fn exchanges(&self) -> Vec<Exchange> {
        self.state.lock().unwrap().exchanges.clone()
    }

    pub fn clear_received(&self) {
        self.state.lock().unwrap().exchanges.clear();
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.state.lock().unwrap().connections
    }

    /// Close every open client session; the listener stays up.
    pub fn kick_clients(&self) {
        let _ = self.kick_tx.send(());
    }

    /// Close the listener and every session.
    pub async fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(()).await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.kick_clients();
    }
}

impl Drop for MockProcessor {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.kick_clients();
    }
}

async fn serve(
    stream: TcpStream,
    state: Arc<Mutex<ServerState>>,
    mut kick_rx: broadcast::Receiver<()>,
    config: MockProcessorConfig,
) {
    let (read, mut write) = stream.into_split();

    for line in &config.greeting {
        if write.write_all(format!("{line}\n").as_bytes()).await.is_err() {
            return;
        }
    }

    // Requests are timestamped on arrival by a separate reader so overlapping
    // requests show up even while a reply is delayed.
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<(usize, String)>();
    let reader_state = state.clone();
    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let index = {
                let mut state = reader_state.lock().unwrap();
                state.exchanges.push(Exchange {
                    request: line.clone(),
                    arrived: Instant::now(),
                    replied: None,
                });
                state.exchanges.len() - 1
            };
            if line_tx.send((index, line)).is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = kick_rx.recv() => break,
            next = line_rx.recv() => {
                let Some((index, line)) = next else { break };

                let reply = state.lock().unwrap().respond(&line);
                let Some(reply) = reply else { continue };

                if !config.reply_delay.is_zero() {
                    sleep(config.reply_delay).await;
                }
                if write.write_all(format!("{reply}\n").as_bytes()).await.is_err() {
                    break;
                }

                let mut state = state.lock().unwrap();
                if let Some(exchange) = state.exchanges.get_mut(index) {
                    exchange.replied = Some(Instant::now());
                }
            }
        }
    }

    reader.abort();
    let _ = write.shutdown().await;
}
