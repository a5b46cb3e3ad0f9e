//! In-memory thermocouple reader used for simulation and tests

use std::{collections::VecDeque, thread::sleep, time::Duration};

use num_traits::FromPrimitive;
use shared::SENSOR_TIMEOUT_MS;
use tracing::trace;

use crate::{convert_c, DaqError, Sensor, TcType, Unit};

/// Default number of samples the running mean settles over
pub const FILTER_SAMPLES: u32 = 4;

/// Source of hot-junction temperatures for one simulated input
pub trait Probe: Send {
    /// Temperature in celcius, `None` when nothing is connected
    fn sample_c(&mut self) -> Option<f32>;
}

impl<F> Probe for F
where
    F: FnMut() -> Option<f32> + Send,
{
    fn sample_c(&mut self) -> Option<f32> {
        self()
    }
}

struct Channel {
    /// Sensor config register, thermocouple type in bits 6:4
    sensor_cfg: u8,
    probe: Option<Box<dyn Probe>>,
    /// One-shot readings served before the probe is consulted
    injected: VecDeque<Option<f32>>,
    mean_c: f32,
    samples: u32,
}

impl Channel {
    fn new(tc: TcType) -> Self {
        Self {
            sensor_cfg: (tc as u8) << 4,
            probe: None,
            injected: VecDeque::new(),
            mean_c: 0.0,
            samples: 0,
        }
    }

    fn tc_type(&self) -> TcType {
        TcType::from_u8((self.sensor_cfg >> 4) & 0b111).unwrap_or(TcType::K)
    }
}

/// A multi-channel thermocouple reader held entirely in memory.
pub struct SimDaq {
    model: String,
    channels: Vec<Channel>,
    unit: Unit,
    filter_samples: u32,
    latency: Duration,
    timeout: Duration,
}

impl SimDaq {
    pub fn new(model: &str, channels: usize, tc: TcType) -> Self {
        Self {
            model: model.to_owned(),
            channels: (0..channels).map(|_| Channel::new(tc)).collect(),
            unit: Unit::Celsius,
            filter_samples: FILTER_SAMPLES,
            latency: Duration::ZERO,
            timeout: Duration::from_millis(SENSOR_TIMEOUT_MS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_filter_samples(mut self, samples: u32) -> Self {
        self.filter_samples = samples.max(1);
        self
    }

    pub fn set_latency(&mut self, latency: Duration) {
        self.latency = latency;
    }

    /// Wire a temperature source to a channel
    pub fn attach(&mut self, channel: usize, probe: Box<dyn Probe>) -> Result<(), DaqError> {
        self.channel_mut(channel)?.probe = Some(probe);
        Ok(())
    }

    /// Leave the channel open, reads will fail until a probe is attached
    pub fn detach(&mut self, channel: usize) -> Result<(), DaqError> {
        self.channel_mut(channel)?.probe = None;
        Ok(())
    }

    /// Queue a one-shot reading; `None` simulates a single failed read
    pub fn inject(&mut self, channel: usize, temp_c: Option<f32>) -> Result<(), DaqError> {
        self.channel_mut(channel)?.injected.push_back(temp_c);
        Ok(())
    }

    fn io(&self) -> Result<(), DaqError> {
        if self.latency > self.timeout {
            sleep(self.timeout);
            return Err(DaqError::Timeout(self.timeout));
        }

        if !self.latency.is_zero() {
            sleep(self.latency);
        }

        Ok(())
    }

    fn channel_mut(&mut self, channel: usize) -> Result<&mut Channel, DaqError> {
        self.channels
            .get_mut(channel)
            .ok_or(DaqError::BadChannel(channel))
    }
}

impl Sensor for SimDaq {
    fn idn(&mut self) -> Result<String, DaqError> {
        self.io()?;
        Ok(format!("SIM,{},{}ch", self.model, self.channels.len()))
    }

    fn channels(&self) -> usize {
        self.channels.len()
    }

    fn get_temperature(
        &mut self,
        channel: usize,
        unit: Option<Unit>,
        averaged: bool,
    ) -> Result<f32, DaqError> {
        self.io()?;

        let unit = unit.unwrap_or(self.unit);
        let window = self.filter_samples;
        let ch = self.channel_mut(channel)?;

        let sample_c = match ch.injected.pop_front() {
            Some(injected) => injected,
            None => ch.probe.as_mut().and_then(|probe| probe.sample_c()),
        }
        .filter(|temp_c| temp_c.is_finite())
        .ok_or(DaqError::Open(channel))?;

        // Running mean that turns into an exponential filter once the
        // window is full
        ch.samples = (ch.samples + 1).min(window);
        let weight = 1.0 / ch.samples as f32;
        ch.mean_c = sample_c * weight + ch.mean_c * (1.0 - weight);

        let temp_c = match averaged {
            true => ch.mean_c,
            false => sample_c,
        };

        trace!(channel, temp_c, averaged, "thermocouple read");

        Ok(convert_c(temp_c, unit, ch.tc_type()))
    }

    fn get_thermocouple_type(&mut self, channel: usize) -> Result<TcType, DaqError> {
        self.io()?;
        Ok(self.channel_mut(channel)?.tc_type())
    }

    fn set_thermocouple_type(&mut self, channel: usize, tc: TcType) -> Result<(), DaqError> {
        self.io()?;
        let ch = self.channel_mut(channel)?;
        ch.sensor_cfg = (ch.sensor_cfg & 0b1000_1111) | ((tc as u8) << 4);
        Ok(())
    }

    fn default_units(&self) -> Unit {
        self.unit
    }

    fn set_default_units(&mut self, unit: Unit) {
        self.unit = unit;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn daq() -> SimDaq {
        let mut daq = SimDaq::new("TC-08", 2, TcType::K);
        daq.attach(0, Box::new(|| Some(25.0))).unwrap();
        daq
    }

    #[test]
    fn reads_in_requested_unit() {
        let mut daq = daq();

        assert_eq!(daq.get_temperature(0, None, false).unwrap(), 25.0);
        assert_eq!(
            daq.get_temperature(0, Some(Unit::Kelvin), false).unwrap(),
            298.15
        );

        daq.set_default_units(Unit::Fahrenheit);
        assert_eq!(daq.get_temperature(0, None, false).unwrap(), 77.0);
    }

    #[test]
    fn open_channel_is_an_error() {
        let mut daq = daq();

        assert_eq!(daq.get_temperature(1, None, false), Err(DaqError::Open(1)));
        assert_eq!(
            daq.get_temperature(2, None, false),
            Err(DaqError::BadChannel(2))
        );
    }

    #[test]
    fn injected_values_are_one_shot() {
        let mut daq = daq();

        daq.inject(0, Some(95.0)).unwrap();
        daq.inject(0, None).unwrap();

        assert_eq!(daq.get_temperature(0, None, false).unwrap(), 95.0);
        assert_eq!(daq.get_temperature(0, None, false), Err(DaqError::Open(0)));
        assert_eq!(daq.get_temperature(0, None, false).unwrap(), 25.0);
    }

    #[test]
    fn averaged_reading_settles() {
        let mut daq = SimDaq::new("TC-08", 1, TcType::J).with_filter_samples(2);
        let mut next = 0.0;
        daq.attach(
            0,
            Box::new(move || {
                next += 10.0;
                Some(next)
            }),
        )
        .unwrap();

        // 10 -> mean 10, 20 -> mean 15, 30 -> mean 22.5
        assert_eq!(daq.get_temperature(0, None, true).unwrap(), 10.0);
        assert_eq!(daq.get_temperature(0, None, true).unwrap(), 15.0);
        assert_eq!(daq.get_temperature(0, None, true).unwrap(), 22.5);
        assert_eq!(daq.get_temperature(0, None, false).unwrap(), 40.0);
    }

    #[test]
    fn thermocouple_type_is_kept_per_channel() {
        let mut daq = daq();

        daq.set_thermocouple_type(1, TcType::E).unwrap();

        assert_eq!(daq.get_thermocouple_type(0).unwrap(), TcType::K);
        assert_eq!(daq.get_thermocouple_type(1).unwrap(), TcType::E);
    }

    #[test]
    fn slow_read_times_out() {
        let mut daq = daq().with_timeout(Duration::from_millis(20));
        daq.set_latency(Duration::from_secs(5));

        let start = Instant::now();

        assert_eq!(
            daq.get_temperature(0, None, false),
            Err(DaqError::Timeout(Duration::from_millis(20)))
        );
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
