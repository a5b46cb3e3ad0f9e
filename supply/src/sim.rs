//! In-memory supply used for simulation and tests

use std::{thread::sleep, time::Duration};

use shared::SUPPLY_TIMEOUT_MS;
use tracing::trace;

use crate::{check_limit, check_setpoint, Supply, SupplyError};

#[derive(Debug, Clone, Default)]
struct Channel {
    on: bool,
    vset: f32,
    iset: f32,
    vlim: f32,
    ilim: f32,
    /// Resistance of whatever is wired to the output, if known
    load_ohms: Option<f32>,
}

/// A multi-channel bench supply held entirely in memory.
///
/// Each command costs `latency`; when the latency is longer than the timeout
/// the command gives up after the timeout with [`SupplyError::Timeout`].
pub struct SimSupply {
    model: String,
    v_max: f32,
    i_max: f32,
    channels: Vec<Channel>,
    latency: Duration,
    timeout: Duration,
    fail_io: bool,
}

impl SimSupply {
    /// Create a supply whose soft limits start at the hardware maxima.
    pub fn new(model: &str, channels: usize, v_max: f32, i_max: f32) -> Self {
        let channel = Channel {
            vlim: v_max,
            ilim: i_max,
            ..Default::default()
        };

        Self {
            model: model.to_owned(),
            v_max,
            i_max,
            channels: vec![channel; channels],
            latency: Duration::ZERO,
            timeout: Duration::from_millis(SUPPLY_TIMEOUT_MS),
            fail_io: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn set_latency(&mut self, latency: Duration) {
        self.latency = latency;
    }

    /// Make every following command fail with an i/o error until cleared
    pub fn set_fail_io(&mut self, fail: bool) {
        self.fail_io = fail;
    }

    /// Attach a resistive load so actual current can be computed
    pub fn set_load(&mut self, channel: usize, ohms: Option<f32>) -> Result<(), SupplyError> {
        self.channel_mut(channel)?.load_ohms = ohms;
        Ok(())
    }

    fn io(&self) -> Result<(), SupplyError> {
        if self.latency > self.timeout {
            sleep(self.timeout);
            return Err(SupplyError::Timeout(self.timeout));
        }

        if !self.latency.is_zero() {
            sleep(self.latency);
        }

        if self.fail_io {
            return Err(SupplyError::Io("link down".to_owned()));
        }

        Ok(())
    }

    fn channel(&self, channel: usize) -> Result<&Channel, SupplyError> {
        self.channels
            .get(channel)
            .ok_or(SupplyError::BadChannel(channel))
    }

    fn channel_mut(&mut self, channel: usize) -> Result<&mut Channel, SupplyError> {
        self.channels
            .get_mut(channel)
            .ok_or(SupplyError::BadChannel(channel))
    }

    /// Output voltage and current actually delivered, accounting for the
    /// current limit when a load is attached
    fn output(&self, channel: usize) -> Result<(f32, f32), SupplyError> {
        let ch = self.channel(channel)?;

        if !ch.on {
            return Ok((0.0, 0.0));
        }

        Ok(match ch.load_ohms {
            Some(ohms) if ohms > 0.0 => {
                let amps = ch.vset / ohms;

                // Constant-current mode once the load wants more than iset
                if amps > ch.iset {
                    (ch.iset * ohms, ch.iset)
                } else {
                    (ch.vset, amps)
                }
            }
            _ => (ch.vset, 0.0),
        })
    }
}

impl Supply for SimSupply {
    fn idn(&mut self) -> Result<String, SupplyError> {
        self.io()?;
        Ok(format!("SIM,{},{}ch", self.model, self.channels.len()))
    }

    fn channels(&self) -> usize {
        self.channels.len()
    }

    fn max_voltage(&self) -> f32 {
        self.v_max
    }

    fn max_current(&self) -> f32 {
        self.i_max
    }

    fn get_state(&mut self, channel: usize) -> Result<bool, SupplyError> {
        self.io()?;
        Ok(self.channel(channel)?.on)
    }

    fn set_state(&mut self, channel: usize, on: bool) -> Result<(), SupplyError> {
        self.io()?;
        self.channel_mut(channel)?.on = on;
        trace!(channel, on, "supply state");
        Ok(())
    }

    fn get_setpoint_voltage(&mut self, channel: usize) -> Result<f32, SupplyError> {
        self.io()?;
        Ok(self.channel(channel)?.vset)
    }

    fn set_voltage(&mut self, channel: usize, volts: f32) -> Result<(), SupplyError> {
        self.io()?;
        let ch = self.channel_mut(channel)?;
        check_setpoint("voltage", volts, ch.vlim)?;
        ch.vset = volts;
        Ok(())
    }

    fn get_setpoint_current(&mut self, channel: usize) -> Result<f32, SupplyError> {
        self.io()?;
        Ok(self.channel(channel)?.iset)
    }

    fn set_current(&mut self, channel: usize, amps: f32) -> Result<(), SupplyError> {
        self.io()?;
        let ch = self.channel_mut(channel)?;
        check_setpoint("current", amps, ch.ilim)?;
        ch.iset = amps;
        Ok(())
    }

    fn get_actual_voltage(&mut self, channel: usize) -> Result<f32, SupplyError> {
        self.io()?;
        Ok(self.output(channel)?.0)
    }

    fn get_actual_current(&mut self, channel: usize) -> Result<f32, SupplyError> {
        self.io()?;
        Ok(self.output(channel)?.1)
    }

    fn get_voltage_limit(&mut self, channel: usize) -> Result<f32, SupplyError> {
        self.io()?;
        Ok(self.channel(channel)?.vlim)
    }

    fn set_voltage_limit(&mut self, channel: usize, volts: f32) -> Result<(), SupplyError> {
        self.io()?;
        let v_max = self.v_max;
        let ch = self.channel_mut(channel)?;
        check_limit("voltage limit", volts, ch.vset, v_max)?;
        ch.vlim = volts;
        Ok(())
    }

    fn get_current_limit(&mut self, channel: usize) -> Result<f32, SupplyError> {
        self.io()?;
        Ok(self.channel(channel)?.ilim)
    }

    fn set_current_limit(&mut self, channel: usize, amps: f32) -> Result<(), SupplyError> {
        self.io()?;
        let i_max = self.i_max;
        let ch = self.channel_mut(channel)?;
        check_limit("current limit", amps, ch.iset, i_max)?;
        ch.ilim = amps;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn supply() -> SimSupply {
        SimSupply::new("PS-3005", 2, 30.0, 5.0)
    }

    #[test]
    fn voltage_round_trip() {
        let mut ps = supply();

        for v in [0.0, 1.5, 12.25, 30.0] {
            ps.set_voltage(0, v).unwrap();
            assert_eq!(ps.get_setpoint_voltage(0).unwrap(), v);
        }
    }

    #[test]
    fn limit_arbitration() {
        let mut ps = supply();

        ps.set_voltage(0, 5.0).unwrap();

        match ps.set_voltage_limit(0, 3.0) {
            Err(SupplyError::LimitExceeded { .. }) => {}
            other => panic!("expected LimitExceeded, got {:?}", other),
        }

        ps.set_voltage(0, 4.0).unwrap();
        ps.set_voltage_limit(0, 4.0).unwrap();
        ps.set_voltage(0, 4.5).unwrap_err();
        ps.set_voltage_limit(0, 31.0).unwrap_err();

        // The failed calls left everything untouched
        assert_eq!(ps.get_voltage_limit(0).unwrap(), 4.0);
        assert_eq!(ps.get_setpoint_voltage(0).unwrap(), 4.0);
    }

    #[test]
    fn bad_channel() {
        let mut ps = supply();

        assert_eq!(ps.set_state(2, true), Err(SupplyError::BadChannel(2)));
        assert_eq!(ps.get_voltage_limit(7), Err(SupplyError::BadChannel(7)));
    }

    #[test]
    fn zero_all_channels() {
        let mut ps = supply();

        for ch in 0..2 {
            ps.set_voltage(ch, 10.0).unwrap();
            ps.set_current(ch, 1.0).unwrap();
            ps.set_state(ch, true).unwrap();
        }

        ps.zero_all_channels().unwrap();

        for ch in 0..2 {
            assert!(!ps.get_state(ch).unwrap());
            assert_eq!(ps.get_setpoint_voltage(ch).unwrap(), 0.0);
            assert_eq!(ps.get_setpoint_current(ch).unwrap(), 0.0);
        }
    }

    #[test]
    fn actual_output_follows_load() {
        let mut ps = supply();

        ps.set_load(0, Some(10.0)).unwrap();
        ps.set_voltage(0, 20.0).unwrap();
        ps.set_current(0, 5.0).unwrap();

        assert_eq!(ps.get_actual_voltage(0).unwrap(), 0.0);

        ps.set_state(0, true).unwrap();
        assert_eq!(ps.get_actual_voltage(0).unwrap(), 20.0);
        assert_eq!(ps.get_actual_current(0).unwrap(), 2.0);

        // Current limited, voltage sags
        ps.set_current(0, 1.0).unwrap();
        assert_eq!(ps.get_actual_current(0).unwrap(), 1.0);
        assert_eq!(ps.get_actual_voltage(0).unwrap(), 10.0);
    }

    #[test]
    fn slow_link_times_out() {
        let mut ps = supply().with_timeout(Duration::from_millis(20));
        ps.set_latency(Duration::from_secs(5));

        let start = Instant::now();
        let err = ps.set_voltage(0, 1.0).unwrap_err();

        assert_eq!(err.kind(), "SupplyIOError");
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
