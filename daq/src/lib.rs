//! Thermocouple data-acquisition capability used as the sensor of a heating zone

mod sim;
mod units;

pub use sim::{Probe, SimDaq, FILTER_SAMPLES};
pub use units::{convert_c, TcType, Unit, RAW_CONV_C};

use std::{
    error::Error as ErrorT,
    fmt::Display,
    sync::{Arc, Mutex},
    time::Duration,
};

/// A DAQ shared by every zone wired to one of its inputs
pub type SharedSensor = Arc<Mutex<dyn Sensor + Send>>;

#[derive(Debug, Clone, PartialEq)]
pub enum DaqError {
    BadChannel(usize),
    BadUnit(String),
    BadTcType(String),
    /// Nothing readable on the channel, e.g. an open thermocouple
    Open(usize),
    Timeout(Duration),
}

impl DaqError {
    /// Name of the error kind as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadChannel(_) => "BadChannel",
            Self::BadUnit(_) => "BadUnit",
            Self::BadTcType(_) => "BadTcType",
            Self::Open(_) | Self::Timeout(_) => "SensorReadError",
        }
    }
}

impl Display for DaqError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadChannel(ch) => write!(f, "no such sensor channel {}", ch),
            Self::BadUnit(unit) => write!(f, "unknown unit {:?}", unit),
            Self::BadTcType(tc) => write!(f, "unknown thermocouple type {:?}", tc),
            Self::Open(ch) => write!(f, "channel {} is open or unconfigured", ch),
            Self::Timeout(dur) => write!(f, "sensor timed out after {}ms", dur.as_millis()),
        }
    }
}

impl ErrorT for DaqError {}

/// Capability of a multi-channel thermocouple reader.
pub trait Sensor {
    /// Identity string of the instrument
    fn idn(&mut self) -> Result<String, DaqError>;

    fn channels(&self) -> usize;

    /// Read a channel in `unit`, or the default unit when `None`. With
    /// `averaged` the filtered value is returned instead of a single shot.
    fn get_temperature(
        &mut self,
        channel: usize,
        unit: Option<Unit>,
        averaged: bool,
    ) -> Result<f32, DaqError>;

    fn get_thermocouple_type(&mut self, channel: usize) -> Result<TcType, DaqError>;
    fn set_thermocouple_type(&mut self, channel: usize, tc: TcType) -> Result<(), DaqError>;

    fn default_units(&self) -> Unit;
    fn set_default_units(&mut self, unit: Unit);
}
