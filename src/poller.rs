//! Status polling with two cadences
//!
//! A steady cadence (10 s by default) catches changes made outside the host,
//! such as the front panel or a remote. After a power-on command the poller
//! switches to boot tracking (2 s by default), checking only the processor
//! state until it reports ready or the boot budget runs out, then returns to
//! the steady cadence.

use crate::config::PollerConfig;
use crate::processor::Processor;
use crate::types::PROCESSOR_READY;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};

/// Grace period for the poll task to finish after a stop request
const STOP_GRACE: Duration = Duration::from_millis(500);

/// Current cadence of the poller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingMode {
    Steady,
    BootTracking,
    Stopped,
}

/// How boot tracking ended after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Still tracking, or not tracking at all
    Continue,
    /// Processor reported ready
    Ready { after: Duration },
    /// Boot budget ran out first
    Expired { after: Duration },
}

/// Mode transitions of the poller, free of any I/O
#[derive(Debug, Clone)]
pub struct Schedule {
    config: PollerConfig,
    mode: PollingMode,
    boot_started: Option<Instant>,
}

impl Schedule {
    pub fn new(config: PollerConfig) -> Self {
        Self {
            config,
            mode: PollingMode::Steady,
            boot_started: None,
        }
    }

    pub fn mode(&self) -> PollingMode {
        self.mode
    }

    /// Wait before the next tick in the current mode
    pub fn interval(&self) -> Duration {
        match self.mode {
            PollingMode::BootTracking => self.config.boot_interval,
            PollingMode::Steady | PollingMode::Stopped => self.config.steady_interval,
        }
    }

    /// Enter boot tracking; a repeated power-on restarts the budget
    pub fn begin_boot(&mut self, now: Instant) {
        if self.mode == PollingMode::Stopped {
            return;
        }
        self.mode = PollingMode::BootTracking;
        self.boot_started = Some(now);
    }

    /// Feed the processor state seen by a boot tick
    pub fn observe(&mut self, processor_state: Option<u8>, now: Instant) -> Transition {
        let started = match (self.mode, self.boot_started) {
            (PollingMode::BootTracking, Some(started)) => started,
            _ => return Transition::Continue,
        };
        let after = now.saturating_duration_since(started);

        if processor_state == Some(PROCESSOR_READY) {
            self.end_boot();
            Transition::Ready { after }
        } else if after >= self.config.boot_budget {
            self.end_boot();
            Transition::Expired { after }
        } else {
            Transition::Continue
        }
    }

    /// Leave boot tracking early, as after a power-off
    ///
    /// Returns whether a boot was being tracked.
    pub fn cancel_boot(&mut self) -> bool {
        if self.mode != PollingMode::BootTracking {
            return false;
        }
        self.end_boot();
        true
    }

    pub fn stop(&mut self) {
        self.mode = PollingMode::Stopped;
        self.boot_started = None;
    }

    fn end_boot(&mut self) {
        self.mode = PollingMode::Steady;
        self.boot_started = None;
    }
}

enum Control {
    TrackBoot,
    EndBoot,
    Stop,
}

/// Background poll task for one processor
pub struct Poller {
    control_tx: mpsc::UnboundedSender<Control>,
    mode_rx: watch::Receiver<PollingMode>,
    task_handle: Option<JoinHandle<()>>,
}

impl Poller {
    /// Spawn the poll task in steady mode
    pub fn start(processor: Arc<Processor>, config: PollerConfig) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (mode_tx, mode_rx) = watch::channel(PollingMode::Steady);

        let task_handle = tokio::spawn(poll_loop(processor, Schedule::new(config), control_rx, mode_tx));

        Self {
            control_tx,
            mode_rx,
            task_handle: Some(task_handle),
        }
    }

    pub fn mode(&self) -> PollingMode {
        *self.mode_rx.borrow()
    }

    /// Receiver that observes every mode change
    pub fn watch_mode(&self) -> watch::Receiver<PollingMode> {
        self.mode_rx.clone()
    }

    /// Switch to boot tracking, preempting the pending steady tick
    pub fn track_boot(&self) {
        if self.control_tx.send(Control::TrackBoot).is_err() {
            tracing::debug!("Poller already stopped, ignoring boot tracking request");
        }
    }

    /// Return to the steady cadence if a boot is being tracked
    pub fn end_boot(&self) {
        if self.control_tx.send(Control::EndBoot).is_err() {
            tracing::debug!("Poller already stopped, ignoring end of boot tracking");
        }
    }

    /// Stop polling and wait for the task to finish
    ///
    /// A tick already talking to the processor gets `STOP_GRACE` to finish
    /// its exchange before the task is aborted.
    pub async fn stop(&mut self) {
        let _ = self.control_tx.send(Control::Stop);

        if let Some(mut handle) = self.task_handle.take() {
            if timeout(STOP_GRACE, &mut handle).await.is_err() {
                tracing::warn!("Poll task did not stop in time, aborting");
                handle.abort();
            }
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

async fn poll_loop(
    processor: Arc<Processor>,
    mut schedule: Schedule,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
    mode_tx: watch::Sender<PollingMode>,
) {
    let name = processor.config().name.clone();
    tracing::info!("Starting status polling for {} (interval: {:?})", name, schedule.interval());

    let mut next_tick = Instant::now() + schedule.interval();

    loop {
        tokio::select! {
            biased;

            control = control_rx.recv() => match control {
                Some(Control::TrackBoot) => {
                    let now = Instant::now();
                    schedule.begin_boot(now);
                    next_tick = now + schedule.interval();
                    mode_tx.send_replace(schedule.mode());
                    tracing::info!("Power-on command sent, polling {} every {:?}", name, schedule.interval());
                }
                Some(Control::EndBoot) => {
                    if schedule.cancel_boot() {
                        next_tick = Instant::now() + schedule.interval();
                        mode_tx.send_replace(schedule.mode());
                        tracing::info!("Power-off command sent, ending boot tracking for {}", name);
                    }
                }
                Some(Control::Stop) | None => break,
            },

            _ = sleep_until(next_tick) => {
                match schedule.mode() {
                    PollingMode::BootTracking => {
                        let processor_state = processor.poll_processor_state().await;
                        tracing::debug!("Boot tracking {}: processor state {:?}", name, processor_state);

                        match schedule.observe(processor_state, Instant::now()) {
                            Transition::Ready { after } => {
                                tracing::info!("{} fully powered on after {:?}", name, after);
                                mode_tx.send_replace(schedule.mode());
                                processor.poll_status().await;
                            }
                            Transition::Expired { after } => {
                                tracing::warn!("{} may not have fully powered on after {:?}", name, after);
                                mode_tx.send_replace(schedule.mode());
                            }
                            Transition::Continue => {}
                        }
                    }
                    PollingMode::Steady | PollingMode::Stopped => {
                        processor.poll_status().await;
                    }
                }
                next_tick = Instant::now() + schedule.interval();
            }
        }
    }

    schedule.stop();
    mode_tx.send_replace(schedule.mode());
    tracing::info!("Status polling stopped for {}", name);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PollerConfig {
        PollerConfig {
            steady_interval: Duration::from_secs(10),
            boot_interval: Duration::from_secs(2),
            boot_budget: Duration::from_secs(30),
            failure_threshold: 3,
        }
    }

    #[test]
    fn starts_steady() {
        let schedule = Schedule::new(config());
        assert_eq!(schedule.mode(), PollingMode::Steady);
        assert_eq!(schedule.interval(), Duration::from_secs(10));
    }

    #[test]
    fn power_on_switches_to_fast_cadence() {
        let mut schedule = Schedule::new(config());
        schedule.begin_boot(Instant::now());
        assert_eq!(schedule.mode(), PollingMode::BootTracking);
        assert_eq!(schedule.interval(), Duration::from_secs(2));
    }

    #[test]
    fn ready_state_ends_boot_tracking() {
        let start = Instant::now();
        let mut schedule = Schedule::new(config());
        schedule.begin_boot(start);

        assert_eq!(
            schedule.observe(Some(1), start + Duration::from_secs(2)),
            Transition::Continue
        );
        assert_eq!(
            schedule.observe(Some(PROCESSOR_READY), start + Duration::from_secs(14)),
            Transition::Ready { after: Duration::from_secs(14) }
        );
        assert_eq!(schedule.mode(), PollingMode::Steady);
        assert_eq!(schedule.interval(), Duration::from_secs(10));
    }

    #[test]
    fn budget_bounds_boot_tracking() {
        let start = Instant::now();
        let mut schedule = Schedule::new(config());
        schedule.begin_boot(start);

        let mut tick = start;
        let mut ticks = 0;
        let transition = loop {
            tick += schedule.interval();
            ticks += 1;
            match schedule.observe(None, tick) {
                Transition::Continue => continue,
                other => break other,
            }
        };

        assert_eq!(ticks, 15);
        assert_eq!(transition, Transition::Expired { after: Duration::from_secs(30) });
        assert_eq!(schedule.mode(), PollingMode::Steady);

        // Late observations no longer change anything.
        assert_eq!(schedule.observe(Some(PROCESSOR_READY), tick), Transition::Continue);
    }

    #[test]
    fn repeated_power_on_restarts_budget() {
        let start = Instant::now();
        let mut schedule = Schedule::new(config());
        schedule.begin_boot(start);
        schedule.begin_boot(start + Duration::from_secs(20));

        assert_eq!(
            schedule.observe(Some(0), start + Duration::from_secs(40)),
            Transition::Continue
        );
        assert!(matches!(
            schedule.observe(Some(0), start + Duration::from_secs(50)),
            Transition::Expired { .. }
        ));
    }

    #[test]
    fn power_off_cancels_boot_tracking() {
        let mut schedule = Schedule::new(config());
        assert!(!schedule.cancel_boot());

        schedule.begin_boot(Instant::now());
        assert!(schedule.cancel_boot());
        assert_eq!(schedule.mode(), PollingMode::Steady);
        assert_eq!(schedule.interval(), Duration::from_secs(10));
        assert_eq!(schedule.observe(Some(PROCESSOR_READY), Instant::now()), Transition::Continue);
    }

    #[test]
    fn stopped_schedule_ignores_power_on() {
        let mut schedule = Schedule::new(config());
        schedule.stop();
        schedule.begin_boot(Instant::now());
        assert_eq!(schedule.mode(), PollingMode::Stopped);
    }
}
