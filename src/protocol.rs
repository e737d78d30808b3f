//! Line codec for the StormAudio TCP/IP protocol
//!
//! Every command and response is a single ASCII line of the form
//! `ssp.<parameter>[.<value>]`. The processor wraps most values in brackets
//! (`ssp.vol.[-40]`); both the bracketed and the bare form are accepted when
//! decoding.

use crate::error::DecodeError;
use crate::types::{clamp_volume, Input, Power, Step, VolumeDb};
use std::fmt;

/// Prefix shared by every command and response
pub const PREFIX: &str = "ssp";

/// Status parameters the core understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parameter {
    Power,
    Volume,
    Mute,
    Input,
    ProcessorState,
}

impl Parameter {
    /// Name used on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Parameter::Power => "power",
            Parameter::Volume => "vol",
            Parameter::Mute => "mute",
            Parameter::Input => "input",
            Parameter::ProcessorState => "procstate",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "power" => Some(Parameter::Power),
            "vol" => Some(Parameter::Volume),
            "mute" => Some(Parameter::Mute),
            "input" => Some(Parameter::Input),
            "procstate" => Some(Parameter::ProcessorState),
            _ => None,
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Commands the core can send
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    PowerOn,
    PowerOff,
    /// Absolute volume, clamped when encoded
    SetVolume(VolumeDb),
    StepVolume(Step),
    Mute(bool),
    ToggleMute,
    SelectInput(Input),
    StepInput(Step),
    Query(Parameter),
}

impl Command {
    /// Parameter whose status line confirms this command
    pub fn parameter(&self) -> Parameter {
        match self {
            Command::PowerOn | Command::PowerOff => Parameter::Power,
            Command::SetVolume(_) | Command::StepVolume(_) => Parameter::Volume,
            Command::Mute(_) | Command::ToggleMute => Parameter::Mute,
            Command::SelectInput(_) | Command::StepInput(_) => Parameter::Input,
            Command::Query(parameter) => *parameter,
        }
    }

    /// Wire representation without the line terminator
    pub fn encode(&self) -> String {
        let parameter = self.parameter();
        match self {
            Command::PowerOn => format!("{PREFIX}.{parameter}.on"),
            Command::PowerOff => format!("{PREFIX}.{parameter}.off"),
            Command::SetVolume(db) => {
                // Clamp before rounding so 0.4 cannot round past the ceiling.
                let db = clamp_volume(*db).round() as i32;
                format!("{PREFIX}.{parameter}.{db}")
            }
            Command::StepVolume(Step::Up) => format!("{PREFIX}.{parameter}.up"),
            Command::StepVolume(Step::Down) => format!("{PREFIX}.{parameter}.down"),
            Command::Mute(true) => format!("{PREFIX}.{parameter}.on"),
            Command::Mute(false) => format!("{PREFIX}.{parameter}.off"),
            Command::ToggleMute => format!("{PREFIX}.{parameter}.toggle"),
            Command::SelectInput(input) => format!("{PREFIX}.{parameter}.{}", input.token()),
            Command::StepInput(Step::Up) => format!("{PREFIX}.{parameter}.next"),
            Command::StepInput(Step::Down) => format!("{PREFIX}.{parameter}.prev"),
            Command::Query(_) => format!("{PREFIX}.{parameter}"),
        }
    }
}

/// A single decoded status field
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Field {
    Power(Power),
    Volume(VolumeDb),
    Mute(bool),
    Input(Input),
    ProcessorState(u8),
}

impl Field {
    pub fn parameter(&self) -> Parameter {
        match self {
            Field::Power(_) => Parameter::Power,
            Field::Volume(_) => Parameter::Volume,
            Field::Mute(_) => Parameter::Mute,
            Field::Input(_) => Parameter::Input,
            Field::ProcessorState(_) => Parameter::ProcessorState,
        }
    }
}

/// Split a status line into its parameter name and raw value
fn split_line(line: &str) -> Result<(&str, &str), DecodeError> {
    let mut parts = line.trim().splitn(3, '.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(PREFIX), Some(name), Some(value)) if !name.is_empty() && !value.is_empty() => {
            Ok((name, value))
        }
        _ => Err(DecodeError::Malformed(line.to_string())),
    }
}

/// Strip the optional `[...]` wrapper the firmware puts around values
fn unwrap_value(value: &str) -> &str {
    value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .unwrap_or(value)
        .trim()
}

/// Parameter a line refers to, if it is a well-formed status line for a known parameter
pub fn parameter_of(line: &str) -> Option<Parameter> {
    split_line(line)
        .ok()
        .and_then(|(name, _)| Parameter::from_name(name))
}

/// Whether the line looks like anything a StormAudio processor would emit
pub fn is_status_line(line: &str) -> bool {
    split_line(line).is_ok()
}

fn on_off(parameter: Parameter, value: &str) -> Result<bool, DecodeError> {
    match value {
        "on" => Ok(true),
        "off" => Ok(false),
        _ => Err(invalid(parameter, value)),
    }
}

fn invalid(parameter: Parameter, value: &str) -> DecodeError {
    DecodeError::InvalidValue {
        parameter: parameter.name(),
        value: value.to_string(),
    }
}

/// Decode a response line into a typed field
///
/// Only one field is ever produced per line; a failure leaves the caller free
/// to skip the line without touching any state.
pub fn decode(line: &str) -> Result<Field, DecodeError> {
    let (name, raw) = split_line(line)?;
    let parameter =
        Parameter::from_name(name).ok_or_else(|| DecodeError::UnknownParameter(name.to_string()))?;
    let value = unwrap_value(raw);

    match parameter {
        Parameter::Power => on_off(parameter, value).map(|on| {
            Field::Power(if on { Power::On } else { Power::Off })
        }),
        Parameter::Mute => on_off(parameter, value).map(Field::Mute),
        Parameter::Volume => value
            .parse::<VolumeDb>()
            .ok()
            .filter(|db| db.is_finite())
            .map(|db| Field::Volume(clamp_volume(db)))
            .ok_or_else(|| invalid(parameter, value)),
        Parameter::ProcessorState => value
            .parse::<u8>()
            .map(Field::ProcessorState)
            .map_err(|_| invalid(parameter, value)),
        Parameter::Input => value
            .trim_matches('"')
            .parse::<Input>()
            .map(Field::Input)
            .map_err(|_| invalid(parameter, value)),
    }
}
