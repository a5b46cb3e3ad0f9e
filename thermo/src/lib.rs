//! Zone regulation: the PID law, heater envelopes and the zone controller
//! binding one supply channel to one thermocouple input.

mod heater;
mod pid;
mod zone;

pub use heater::{Envelope, Heater};
pub use pid::{
    PidError, PidLaw, DEFAULT_KD, DEFAULT_KI, DEFAULT_KP, DEFAULT_SAMPLE_TIME_S,
    MAX_SAMPLE_TIME_S,
};
pub use zone::{Tick, Zone, ZoneState};

use std::{error::Error as ErrorT, fmt::Display};

use daq::DaqError;
use supply::SupplyError;

#[derive(Debug, Clone, PartialEq)]
pub enum ZoneError {
    Supply(SupplyError),
    Sensor(DaqError),
    Pid(PidError),
    /// A request would leave the zone's safety envelope
    LimitExceeded {
        what: &'static str,
        value: f32,
        ceiling: f32,
    },
    /// The zone tripped at `temp_c` and has not been readied since
    SafetyTrip { temp_c: f32, t_max: f32 },
    /// Regulation was requested before the zone was readied
    NotArmed,
}

impl ZoneError {
    /// Name of the error kind as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Supply(e) => e.kind(),
            Self::Sensor(e) => e.kind(),
            Self::Pid(_) | Self::LimitExceeded { .. } => "LimitExceeded",
            Self::SafetyTrip { .. } => "SafetyTrip",
            Self::NotArmed => "NotArmed",
        }
    }
}

impl Display for ZoneError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Supply(e) => e.fmt(f),
            Self::Sensor(e) => e.fmt(f),
            Self::Pid(e) => e.fmt(f),
            Self::LimitExceeded {
                what,
                value,
                ceiling,
            } => write!(f, "{} {} exceeds zone maximum {}", what, value, ceiling),
            Self::SafetyTrip { temp_c, t_max } => write!(
                f,
                "tripped at {:.2} (limit {:.2}), ready the zone to re-arm",
                temp_c, t_max
            ),
            Self::NotArmed => write!(f, "zone must be readied before regulating"),
        }
    }
}

impl ErrorT for ZoneError {}

impl From<SupplyError> for ZoneError {
    fn from(value: SupplyError) -> Self {
        Self::Supply(value)
    }
}

impl From<DaqError> for ZoneError {
    fn from(value: DaqError) -> Self {
        Self::Sensor(value)
    }
}

impl From<PidError> for ZoneError {
    fn from(value: PidError) -> Self {
        Self::Pid(value)
    }
}

/// Something a zone noticed on its own, outside of any request
#[derive(Debug, Clone, PartialEq)]
pub enum ZoneEvent {
    SafetyTrip {
        key: String,
        temp_c: f32,
        t_max: f32,
    },
    SupplyIo {
        key: String,
        error: SupplyError,
    },
    /// The supply channel was switched off by something other than the zone
    OutputLost {
        key: String,
        cause: String,
    },
}

impl ZoneEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SafetyTrip { .. } => "SafetyTrip",
            Self::SupplyIo { .. } | Self::OutputLost { .. } => "SupplyIOError",
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::SafetyTrip { key, .. }
            | Self::SupplyIo { key, .. }
            | Self::OutputLost { key, .. } => key,
        }
    }
}

impl Display for ZoneEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SafetyTrip { key, temp_c, t_max } => write!(
                f,
                "{}: temperature {:.2} exceeded limit {:.2}, output off",
                key, temp_c, t_max
            ),
            Self::SupplyIo { key, error } => write!(f, "{}: {}", key, error),
            Self::OutputLost { key, cause } => {
                write!(f, "{}: output off ({}), regulation halted", key, cause)
            }
        }
    }
}
