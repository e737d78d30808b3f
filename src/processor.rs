use crate::config::{ConnectionOptions, DeviceConfig};
use crate::connection::Connection;
use crate::error::{Result, StormError};
use crate::protocol::{self, Command, Field, Parameter};
use crate::state::DeviceState;
use crate::types::{Power, PROCESSOR_READY};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Result of one status burst
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
    pub succeeded: usize,
    pub failed: usize,
    /// The connection could not be re-established during the burst
    pub unreachable: bool,
}

impl PollOutcome {
    fn record<T>(&mut self, parameter: Parameter, result: &Result<T>) {
        match result {
            Ok(_) => self.succeeded += 1,
            Err(e) => {
                self.failed += 1;
                log_query_failure(parameter, e);
            }
        }
    }
}

/// Connection to one processor plus its status model
///
/// The connection sits behind a single async mutex that is held across each
/// full send/receive pair, so poll queries and user commands never interleave
/// on the wire.
pub struct Processor {
    config: DeviceConfig,
    connection: Mutex<Connection>,
    state: DeviceState,
    response_timeout: Duration,
    confirm_timeout: Duration,
    failure_threshold: u32,
    consecutive_failures: AtomicU32,
}

impl Processor {
    pub fn new(config: DeviceConfig, options: ConnectionOptions, failure_threshold: u32) -> Self {
        let response_timeout = options.response_timeout;
        let confirm_timeout = options.confirm_timeout;
        let connection = Connection::new(config.host.clone(), config.port, options);

        Self {
            config,
            connection: Mutex::new(connection),
            state: DeviceState::new(),
            response_timeout,
            confirm_timeout,
            failure_threshold: failure_threshold.max(1),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Open the connection
    pub async fn connect(&self) -> Result<()> {
        self.connection.lock().await.connect().await
    }

    /// Close the connection
    pub async fn disconnect(&self) {
        self.connection.lock().await.disconnect().await;
    }

    /// Ask for one parameter and wait for its status line
    pub async fn query(&self, parameter: Parameter) -> Result<Field> {
        let mut conn = self.connection.lock().await;
        write_line(&mut conn, &Command::Query(parameter).encode()).await?;
        await_field(&mut conn, parameter, self.response_timeout).await
    }

    /// Send a command and return the status line that confirms it, if any
    ///
    /// A connection failure before the line is written triggers one reconnect
    /// and retry. Once written, the command is never resent; a missing or
    /// unreadable confirmation yields `Ok(None)`.
    pub async fn execute(&self, command: &Command) -> Result<Option<Field>> {
        let line = command.encode();
        let mut conn = self.connection.lock().await;

        if let Err(e) = write_line(&mut conn, &line).await {
            if !e.is_connection_failure() {
                return Err(e);
            }
            tracing::warn!("Command {} failed ({}), reconnecting and retrying once", line, e);
            conn.disconnect().await;
            write_line(&mut conn, &line).await?;
        }

        tracing::info!("Sent command: {}", line);

        match await_field(&mut conn, command.parameter(), self.confirm_timeout).await {
            Ok(field) => Ok(Some(field)),
            Err(StormError::Timeout) => {
                tracing::debug!("No confirmation for {}", line);
                Ok(None)
            }
            Err(e) => {
                tracing::warn!("Could not read confirmation for {}: {}", line, e);
                Ok(None)
            }
        }
    }

    /// Record a reported power state
    ///
    /// A processor that says it is on but has not reached the ready state is
    /// recorded as `Unknown` so hosts never see `On` mid-boot.
    pub fn apply_power(&self, power: Power) {
        let power = match power {
            Power::On if self.state.processor_state() != Some(PROCESSOR_READY) => {
                tracing::debug!(
                    "Power on reported before processor is ready (state {:?})",
                    self.state.processor_state()
                );
                Power::Unknown
            }
            other => other,
        };
        self.state.apply(Field::Power(power));
    }

    /// Query power, processor state, volume, mute and input in turn
    ///
    /// Each query stands alone: a timeout or malformed reply is logged and the
    /// burst moves on. Only an unreachable processor cuts the burst short.
    pub async fn poll_status(&self) -> PollOutcome {
        let mut outcome = PollOutcome::default();

        let power = self.burst_query(Parameter::Power, &mut outcome).await;

        if let Some(field) = self.burst_query(Parameter::ProcessorState, &mut outcome).await {
            self.state.apply(field);
        }

        // Gated on the processor state applied just above.
        if let Some(Field::Power(power)) = power {
            self.apply_power(power);
        }

        for parameter in [Parameter::Volume, Parameter::Mute, Parameter::Input] {
            if let Some(field) = self.burst_query(parameter, &mut outcome).await {
                self.state.apply(field);
            }
        }

        self.record_tick(outcome.succeeded > 0);
        tracing::debug!(
            "Status burst for {}: {} ok, {} failed",
            self.config.name,
            outcome.succeeded,
            outcome.failed
        );
        outcome
    }

    async fn burst_query(&self, parameter: Parameter, outcome: &mut PollOutcome) -> Option<Field> {
        if outcome.unreachable {
            outcome.failed += 1;
            return None;
        }

        let result = self.query(parameter).await;
        outcome.record(parameter, &result);

        match result {
            Ok(field) => Some(field),
            Err(StormError::Connection { .. }) => {
                outcome.unreachable = true;
                None
            }
            Err(_) => None,
        }
    }

    /// Query only the processor state, as done while tracking a boot
    pub async fn poll_processor_state(&self) -> Option<u8> {
        let result = self.query(Parameter::ProcessorState).await;
        let mut outcome = PollOutcome::default();
        outcome.record(Parameter::ProcessorState, &result);
        self.record_tick(outcome.succeeded > 0);

        match result {
            Ok(field @ Field::ProcessorState(code)) => {
                self.state.apply(field);
                Some(code)
            }
            _ => None,
        }
    }

    /// Track consecutive failed ticks and flip availability at the threshold
    fn record_tick(&self, succeeded: bool) {
        if succeeded {
            let previous = self.consecutive_failures.swap(0, Ordering::SeqCst);
            if previous >= self.failure_threshold {
                tracing::info!("{} is reachable again", self.config.name);
                self.state.set_available(true);
            }
            return;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures == self.failure_threshold {
            tracing::warn!(
                "{} failed {} consecutive polls, marking unavailable",
                self.config.name,
                failures
            );
            self.state.set_available(false);
        }
    }
}

/// Drop stale lines, reconnect if needed, then write
async fn write_line(conn: &mut Connection, line: &str) -> Result<()> {
    let stale = conn.discard_pending();
    if stale > 0 {
        tracing::debug!("Discarded {} stale line(s) before {}", stale, line);
    }
    conn.ensure_connected().await?;
    conn.send_line(line).await
}

/// Read lines until one for `parameter` arrives or the budget runs out
///
/// The processor also pushes unsolicited status lines; anything for another
/// parameter is skipped.
async fn await_field(conn: &mut Connection, parameter: Parameter, budget: Duration) -> Result<Field> {
    let deadline = Instant::now() + budget;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(StormError::Timeout);
        }

        let line = match conn.read_line(remaining).await {
            Ok(line) => line,
            Err(StormError::Decode(e)) => {
                tracing::debug!("Skipping unreadable line: {}", e);
                continue;
            }
            Err(e) => return Err(e),
        };

        match protocol::decode(&line) {
            Ok(field) if field.parameter() == parameter => return Ok(field),
            Ok(_) => {
                tracing::debug!("Ignoring unrelated response: {} (looking for {})", line, parameter)
            }
            Err(e) if protocol::parameter_of(&line) == Some(parameter) => return Err(e.into()),
            Err(e) => tracing::debug!("Ignoring unrecognized line {:?}: {}", line, e),
        }
    }
}

fn log_query_failure(parameter: Parameter, error: &StormError) {
    match error {
        StormError::Decode(e) => {
            tracing::warn!("Discarding malformed {} response: {}", parameter, e)
        }
        StormError::Timeout => tracing::warn!("No matching response for {} query", parameter),
        other => tracing::warn!("Query for {} failed: {}", parameter, other),
    }
}
