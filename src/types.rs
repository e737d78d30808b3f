use crate::error::StormError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

/// Volume in decibels
pub type VolumeDb = f64;

/// Processor state code reported once the processor is fully operational
pub const PROCESSOR_READY: u8 = 2;

/// Processor state code reported while the processor is booting
pub const PROCESSOR_INITIALIZING: u8 = 1;

/// Processor state code reported in standby
pub const PROCESSOR_STANDBY: u8 = 0;

/// Lowest volume the processor accepts
pub const VOLUME_MIN_DB: VolumeDb = -100.0;

/// Highest volume the processor accepts
pub const VOLUME_MAX_DB: VolumeDb = 0.0;

/// Clamp a volume into the processor's domain.
///
/// NaN maps to the quietest setting.
pub fn clamp_volume(db: VolumeDb) -> VolumeDb {
    if db.is_nan() {
        VOLUME_MIN_DB
    } else {
        db.clamp(VOLUME_MIN_DB, VOLUME_MAX_DB)
    }
}

/// Power state as reported to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Power {
    On,
    Off,
    #[default]
    Unknown,
}

impl fmt::Display for Power {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Power::On => f.write_str("on"),
            Power::Off => f.write_str("off"),
            Power::Unknown => f.write_str("unknown"),
        }
    }
}

/// Direction for volume and input stepping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Up,
    Down,
}

/// Inputs exposed by the processor
///
/// The catalog is static; the processor's own input list is not queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Input {
    AppleTv,
    VideoGame,
    Hdmi3,
}

impl Input {
    /// Every input, in processor id order
    pub const ALL: [Input; 3] = [Input::AppleTv, Input::VideoGame, Input::Hdmi3];

    /// Wire token used in `ssp.input.<token>`
    pub fn token(&self) -> &'static str {
        match self {
            Input::AppleTv => "appletv",
            Input::VideoGame => "videogame",
            Input::Hdmi3 => "hdmi3",
        }
    }

    /// Name shown to users
    pub fn display_name(&self) -> &'static str {
        match self {
            Input::AppleTv => "Apple TV",
            Input::VideoGame => "Video Game",
            Input::Hdmi3 => "HDMI 3",
        }
    }

    /// Numeric input id used by the processor firmware
    pub fn id(&self) -> u8 {
        match self {
            Input::AppleTv => 1,
            Input::VideoGame => 2,
            Input::Hdmi3 => 3,
        }
    }

    /// Display names of every input, for a host source list
    pub fn source_list() -> Vec<&'static str> {
        Self::ALL.iter().map(Input::display_name).collect()
    }

    /// Neighbouring input in catalog order, wrapping around
    pub fn stepped(&self, step: Step) -> Input {
        let idx = Self::ALL.iter().position(|i| i == self).unwrap_or(0);
        let len = Self::ALL.len();
        let next = match step {
            Step::Up => (idx + 1) % len,
            Step::Down => (idx + len - 1) % len,
        };
        Self::ALL[next]
    }
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for Input {
    type Err = StormError;

    /// Accepts the wire token, the display name, or the numeric id
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|input| {
                input.token().eq_ignore_ascii_case(needle)
                    || input.display_name().eq_ignore_ascii_case(needle)
                    || needle.parse::<u8>().ok() == Some(input.id())
            })
            .ok_or_else(|| StormError::UnknownInput(s.to_string()))
    }
}

/// Media-player style state derived from power and processor state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    Off,
    Booting,
    On,
    Unknown,
    Unavailable,
}

/// Canonical status snapshot handed to the host
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct DeviceStatus {
    pub power: Power,

    /// Vendor boot code; `PROCESSOR_READY` once fully operational
    pub processor_state: Option<u8>,

    /// Volume in dB, always inside [-100, 0]
    pub volume_db: Option<VolumeDb>,

    pub muted: Option<bool>,

    pub input: Option<Input>,

    /// False after repeated poll failures
    pub available: bool,

    pub last_updated: Option<SystemTime>,
}

impl DeviceStatus {
    /// Fresh status for a processor that has not been polled yet
    pub fn new() -> Self {
        Self {
            available: true,
            ..Self::default()
        }
    }

    /// Compare every field except the update timestamp
    pub fn same_state(&self, other: &DeviceStatus) -> bool {
        self.power == other.power
            && self.processor_state == other.processor_state
            && self.volume_db == other.volume_db
            && self.muted == other.muted
            && self.input == other.input
            && self.available == other.available
    }

    /// Whether the processor reported it is fully operational
    pub fn is_ready(&self) -> bool {
        self.processor_state == Some(PROCESSOR_READY)
    }

    /// Volume mapped onto 0..1 for hosts that work with levels
    pub fn volume_level(&self) -> Option<f64> {
        self.volume_db
            .map(|db| ((db - VOLUME_MIN_DB) / (VOLUME_MAX_DB - VOLUME_MIN_DB)).clamp(0.0, 1.0))
    }

    pub fn player_state(&self) -> PlayerState {
        if !self.available {
            return PlayerState::Unavailable;
        }
        match (self.power, self.processor_state) {
            (Power::Off, _) => PlayerState::Off,
            (_, Some(PROCESSOR_INITIALIZING)) => PlayerState::Booting,
            (Power::On, _) | (_, Some(PROCESSOR_READY)) => PlayerState::On,
            (Power::Unknown, None) => PlayerState::Unknown,
            _ => PlayerState::Off,
        }
    }

    /// True when nothing has been recorded within `max_age`
    pub fn is_stale(&self, max_age: Duration) -> bool {
        match self.last_updated {
            // A clock step backwards reads as fresh.
            Some(at) => at.elapsed().map(|age| age > max_age).unwrap_or(false),
            None => true,
        }
    }
}

/// A processor found by a subnet scan
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct DiscoveredDevice {
    pub ip: Ipv4Addr,
    pub name: String,
}
