use crate::config::{ConnectionOptions, DeviceConfig, PollerConfig};
use crate::discovery::Discovery;
use crate::error::{Result, StormError};
use crate::poller::{Poller, PollingMode};
use crate::processor::Processor;
use crate::protocol::{Command, Field};
use crate::subscription::StatusReceiver;
use crate::types::{
    clamp_volume, DeviceStatus, DiscoveredDevice, Input, Power, Step, PROCESSOR_INITIALIZING,
    PROCESSOR_STANDBY, VOLUME_MAX_DB, VOLUME_MIN_DB,
};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;

/// Services a host can invoke by name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// Run a full status burst right away
    RefreshStatus,
}

impl Service {
    pub fn name(&self) -> &'static str {
        match self {
            Service::RefreshStatus => "refresh_status",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Service {
    type Err = StormError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "refresh_status" => Ok(Service::RefreshStatus),
            other => Err(StormError::UnknownService(other.to_string())),
        }
    }
}

/// Client for one StormAudio processor
///
/// Owns the TCP session and a background poller that keeps the status
/// snapshot current. Commands and poll queries share the session one
/// exchange at a time.
pub struct StormAudioClient {
    processor: Arc<Processor>,
    poller: Poller,
}

impl StormAudioClient {
    /// Connect with default timing and start polling
    ///
    /// # Example
    ///
    /// ```no_run
    /// use stormaudio::{DeviceConfig, StormAudioClient};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let client = StormAudioClient::connect(DeviceConfig::new("192.168.1.50")).await?;
    ///     client.set_volume(-35.0).await?;
    ///     println!("{:?}", client.get_status());
    ///     client.shutdown().await;
    ///     Ok(())
    /// }
    /// ```
    pub async fn connect(config: DeviceConfig) -> Result<Self> {
        Self::connect_with(config, ConnectionOptions::default(), PollerConfig::default()).await
    }

    /// Connect with custom transport and poller timing
    ///
    /// The config is validated before any network activity. One full status
    /// burst runs before this returns, so `get_status` is populated right away.
    pub async fn connect_with(
        config: DeviceConfig,
        options: ConnectionOptions,
        poller_config: PollerConfig,
    ) -> Result<Self> {
        config.validate()?;

        let processor = Arc::new(Processor::new(
            config,
            options,
            poller_config.failure_threshold,
        ));
        processor.connect().await?;

        let outcome = processor.poll_status().await;
        tracing::info!(
            "Initial status for {}: {} of {} fields read",
            processor.config().name,
            outcome.succeeded,
            outcome.succeeded + outcome.failed
        );

        let poller = Poller::start(processor.clone(), poller_config);

        Ok(Self { processor, poller })
    }

    pub fn config(&self) -> &DeviceConfig {
        self.processor.config()
    }

    pub fn unique_id(&self) -> String {
        self.processor.config().unique_id()
    }

    /// Latest known status
    pub fn get_status(&self) -> DeviceStatus {
        self.processor.state().snapshot()
    }

    /// Receive a snapshot whenever the status changes
    ///
    /// # Example
    ///
    /// ```no_run
    /// use stormaudio::{DeviceConfig, StormAudioClient};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let client = StormAudioClient::connect(DeviceConfig::new("192.168.1.50")).await?;
    ///     let mut updates = client.subscribe();
    ///
    ///     while let Ok(status) = updates.recv().await {
    ///         println!("{:?} at {:?} dB", status.player_state(), status.volume_db);
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub fn subscribe(&self) -> StatusReceiver {
        self.processor.state().subscribe()
    }

    pub fn polling_mode(&self) -> PollingMode {
        self.poller.mode()
    }

    /// Observe poller mode changes
    pub fn watch_polling_mode(&self) -> watch::Receiver<PollingMode> {
        self.poller.watch_mode()
    }

    /// Power the processor on or off
    ///
    /// Power-on is not reported until the processor finishes booting; the
    /// poller switches to boot tracking to catch that moment. Power-off ends
    /// any boot tracking in progress.
    pub async fn set_power(&self, on: bool) -> Result<()> {
        let before = self.get_status();
        let command = if on { Command::PowerOn } else { Command::PowerOff };
        let confirmed = self.processor.execute(&command).await?;

        let power = match confirmed {
            Some(Field::Power(power)) => power,
            _ if on => Power::On,
            _ => Power::Off,
        };

        // The last polled processor state no longer holds once power changes.
        let processor_state = if !on {
            Some(PROCESSOR_STANDBY)
        } else if before.power == Power::On && before.is_ready() {
            None
        } else {
            Some(PROCESSOR_INITIALIZING)
        };
        if let Some(code) = processor_state {
            self.processor.state().apply(Field::ProcessorState(code));
        }

        // Recorded as Unknown until the processor reports ready.
        self.processor.apply_power(power);

        if on {
            self.poller.track_boot();
        } else {
            self.poller.end_boot();
        }
        Ok(())
    }

    /// Set the absolute volume in dB, clamped to [-100, 0]
    pub async fn set_volume(&self, db: f64) -> Result<()> {
        let db = clamp_volume(db).round();
        let confirmed = self.processor.execute(&Command::SetVolume(db)).await?;
        self.settle(confirmed, Some(Field::Volume(db)));
        Ok(())
    }

    /// Set the volume from a 0..1 level
    pub async fn set_volume_level(&self, level: f64) -> Result<()> {
        let level = level.clamp(0.0, 1.0);
        self.set_volume(VOLUME_MIN_DB + level * (VOLUME_MAX_DB - VOLUME_MIN_DB))
            .await
    }

    /// Move the volume one step up or down
    pub async fn step_volume(&self, step: Step) -> Result<()> {
        let confirmed = self.processor.execute(&Command::StepVolume(step)).await?;
        let delta = match step {
            Step::Up => 1.0,
            Step::Down => -1.0,
        };
        let expected = self
            .get_status()
            .volume_db
            .map(|db| Field::Volume(clamp_volume(db + delta)));
        self.settle(confirmed, expected);
        Ok(())
    }

    pub async fn set_mute(&self, muted: bool) -> Result<()> {
        let confirmed = self.processor.execute(&Command::Mute(muted)).await?;
        self.settle(confirmed, Some(Field::Mute(muted)));
        Ok(())
    }

    pub async fn toggle_mute(&self) -> Result<()> {
        let confirmed = self.processor.execute(&Command::ToggleMute).await?;
        let expected = self.get_status().muted.map(|muted| Field::Mute(!muted));
        self.settle(confirmed, expected);
        Ok(())
    }

    /// Select an input by token, display name or id
    ///
    /// Names outside the catalog fail with `UnknownInput` before anything is sent.
    pub async fn select_input(&self, name: &str) -> Result<()> {
        let input: Input = name.parse()?;
        let confirmed = self.processor.execute(&Command::SelectInput(input)).await?;
        self.settle(confirmed, Some(Field::Input(input)));
        Ok(())
    }

    /// Move to the next or previous input
    pub async fn step_input(&self, step: Step) -> Result<()> {
        let confirmed = self.processor.execute(&Command::StepInput(step)).await?;
        let expected = self
            .get_status()
            .input
            .map(|input| Field::Input(input.stepped(step)));
        self.settle(confirmed, expected);
        Ok(())
    }

    /// Run one full status burst now and return the result
    ///
    /// The poller's schedule is left as it is.
    pub async fn refresh_now(&self) -> DeviceStatus {
        tracing::info!("Force refreshing status of {}", self.processor.config().name);
        self.processor.poll_status().await;
        self.get_status()
    }

    pub async fn call_service(&self, service: Service) -> Result<()> {
        tracing::debug!("Calling service {}", service);
        match service {
            Service::RefreshStatus => {
                self.refresh_now().await;
            }
        }
        Ok(())
    }

    /// Scan a subnet for processors with default discovery settings
    pub async fn discover(subnet: &str) -> Result<BTreeSet<DiscoveredDevice>> {
        Discovery::new().scan(subnet).await
    }

    /// Stop polling and close the connection
    pub async fn shutdown(mut self) {
        tracing::info!("Shutting down {}", self.processor.config().name);
        self.poller.stop().await;
        self.processor.disconnect().await;
    }

    /// Record the confirmed value, or the expected one when no confirmation came back
    fn settle(&self, confirmed: Option<Field>, expected: Option<Field>) {
        match (confirmed, expected) {
            (Some(Field::Power(power)), _) => self.processor.apply_power(power),
            (Some(field), _) => {
                self.processor.state().apply(field);
            }
            (None, Some(field)) => {
                tracing::debug!("No confirmation, assuming {:?}", field);
                self.processor.state().apply(field);
            }
            (None, None) => {}
        }
    }
}
