//! Power supply capability used as the actuator of a heating zone.
//!
//! A supply exposes one or more channels. Every channel carries hardware
//! maxima `(Vmax_hw, Imax_hw)`, soft limits `(Vlim, Ilim)` and setpoints
//! `(Vset, Iset)`, ordered `0 <= set <= lim <= max_hw`. Drivers never clamp
//! silently; a request outside the envelope is answered with
//! [`SupplyError::LimitExceeded`].

mod sim;

pub use sim::SimSupply;

use std::{
    error::Error as ErrorT,
    fmt::Display,
    sync::{Arc, Mutex},
    time::Duration,
};

/// A supply shared by every zone wired to one of its channels. The mutex keeps
/// two zones from interleaving commands on the same physical link.
pub type SharedSupply = Arc<Mutex<dyn Supply + Send>>;

#[derive(Debug, Clone, PartialEq)]
pub enum SupplyError {
    BadChannel(usize),
    LimitExceeded {
        what: &'static str,
        value: f32,
        floor: f32,
        ceiling: f32,
    },
    Timeout(Duration),
    Io(String),
}

impl SupplyError {
    /// Name of the error kind as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadChannel(_) => "BadChannel",
            Self::LimitExceeded { .. } => "LimitExceeded",
            Self::Timeout(_) | Self::Io(_) => "SupplyIOError",
        }
    }
}

impl Display for SupplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadChannel(ch) => write!(f, "no such supply channel {}", ch),
            Self::LimitExceeded {
                what,
                value,
                floor,
                ceiling,
            } => write!(
                f,
                "{} {} outside of [{}, {}]",
                what, value, floor, ceiling
            ),
            Self::Timeout(dur) => write!(f, "supply timed out after {}ms", dur.as_millis()),
            Self::Io(msg) => write!(f, "supply i/o failed: {}", msg),
        }
    }
}

impl ErrorT for SupplyError {}

impl From<std::io::Error> for SupplyError {
    fn from(value: std::io::Error) -> Self {
        match value.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                Self::Timeout(Duration::ZERO)
            }
            _ => Self::Io(value.to_string()),
        }
    }
}

/// Check a setpoint against its soft limit, `0 <= value <= limit`.
pub fn check_setpoint(what: &'static str, value: f32, limit: f32) -> Result<(), SupplyError> {
    if !(0.0..=limit).contains(&value) {
        return Err(SupplyError::LimitExceeded {
            what,
            value,
            floor: 0.0,
            ceiling: limit,
        });
    }

    Ok(())
}

/// Check a soft limit against the arbitration rule: it may drop to the
/// setpoint (and must stay positive) and rise to the hardware maximum.
pub fn check_limit(
    what: &'static str,
    value: f32,
    setpoint: f32,
    max_hw: f32,
) -> Result<(), SupplyError> {
    if value <= 0.0 || value < setpoint.max(0.0) || value > max_hw {
        return Err(SupplyError::LimitExceeded {
            what,
            value,
            floor: setpoint.max(0.0),
            ceiling: max_hw,
        });
    }

    Ok(())
}

/// Capability of one programmable DC power supply.
///
/// Every per-channel operation fails with [`SupplyError::BadChannel`] when the
/// channel is not in `0..channels()`.
pub trait Supply {
    /// Identity string of the instrument
    fn idn(&mut self) -> Result<String, SupplyError>;

    fn channels(&self) -> usize;

    /// Hardware voltage ceiling shared by all channels
    fn max_voltage(&self) -> f32;

    /// Hardware current ceiling shared by all channels
    fn max_current(&self) -> f32;

    fn get_state(&mut self, channel: usize) -> Result<bool, SupplyError>;
    fn set_state(&mut self, channel: usize, on: bool) -> Result<(), SupplyError>;

    fn get_setpoint_voltage(&mut self, channel: usize) -> Result<f32, SupplyError>;
    fn set_voltage(&mut self, channel: usize, volts: f32) -> Result<(), SupplyError>;

    fn get_setpoint_current(&mut self, channel: usize) -> Result<f32, SupplyError>;
    fn set_current(&mut self, channel: usize, amps: f32) -> Result<(), SupplyError>;

    /// Measured output voltage
    fn get_actual_voltage(&mut self, channel: usize) -> Result<f32, SupplyError>;
    /// Measured output current
    fn get_actual_current(&mut self, channel: usize) -> Result<f32, SupplyError>;

    fn get_voltage_limit(&mut self, channel: usize) -> Result<f32, SupplyError>;
    fn set_voltage_limit(&mut self, channel: usize, volts: f32) -> Result<(), SupplyError>;

    fn get_current_limit(&mut self, channel: usize) -> Result<f32, SupplyError>;
    fn set_current_limit(&mut self, channel: usize, amps: f32) -> Result<(), SupplyError>;

    /// Zero the setpoints of, and switch off, every channel.
    fn zero_all_channels(&mut self) -> Result<(), SupplyError> {
        for channel in 0..self.channels() {
            self.set_voltage(channel, 0.0)?;
            self.set_current(channel, 0.0)?;
            self.set_state(channel, false)?;
        }

        Ok(())
    }
}
