//! Zone controller, one supply channel driven by one thermocouple through a
//! PID law inside a safety envelope.
//!
//! ```text
//!         created ──ready──▶ armed ──start──▶ regulating ──halt/stop──▶ armed
//!            ▲                 │                     │
//!            └─────reset───────┴─────────────────────┘
//! ```
//!
//! A zone that trips stays armed with its output off and refuses to regulate
//! until it is readied again.

use std::{
    fmt::Display,
    sync::{mpsc::Sender, Arc},
    time::Instant,
};

use daq::{DaqError, SharedSensor, TcType, Unit};
use shared::lock;
use supply::{SharedSupply, SupplyError};
use tracing::{debug, error, info, warn};

use crate::{Envelope, Heater, PidLaw, ZoneError, ZoneEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneState {
    Created,
    Armed,
    Regulating,
}

/// Outcome of one control tick
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// Not regulating, nothing was touched
    Idle,
    /// The sensor could not be read, the supply was left alone
    Skipped(DaqError),
    /// Temperature exceeded the envelope, the output was forced off
    Tripped(f32),
    /// The new output voltage was written
    Output(f32),
    /// The output could not be written, next tick retries
    WriteFailed(SupplyError),
}

#[inline]
fn round2(x: f32) -> f32 {
    (x * 100.0).round() / 100.0
}

fn default_pid(envelope: &Envelope, v_limit: f32) -> Result<PidLaw, ZoneError> {
    Ok(PidLaw::default().with_output_limits(0.0, envelope.v_max.min(v_limit))?)
}

pub struct Zone {
    key: String,
    heater: Heater,
    envelope: Envelope,

    supply: SharedSupply,
    supply_channel: usize,
    sensor: SharedSensor,
    sensor_channel: usize,

    pid: PidLaw,
    state: ZoneState,
    /// Temperature of the last safety trip, latched until the next ready
    trip: Option<f32>,

    ticks: u64,
    read_errors: u64,
    last_temp_c: Option<f32>,

    events: Option<Sender<ZoneEvent>>,
}

impl Zone {
    pub fn new(
        key: &str,
        heater: Heater,
        supply: SharedSupply,
        supply_channel: usize,
        sensor: SharedSensor,
        sensor_channel: usize,
    ) -> Result<Self, ZoneError> {
        let (envelope, v_limit) = {
            let mut ps = lock(&supply);

            if supply_channel >= ps.channels() {
                return Err(SupplyError::BadChannel(supply_channel).into());
            }

            let envelope = Envelope::between(&heater, &*ps);

            (envelope, ps.get_voltage_limit(supply_channel)?)
        };

        if sensor_channel >= lock(&sensor).channels() {
            return Err(DaqError::BadChannel(sensor_channel).into());
        }

        let pid = default_pid(&envelope, v_limit)?;

        Ok(Self {
            key: key.to_owned(),
            heater,
            envelope,
            supply,
            supply_channel,
            sensor,
            sensor_channel,
            pid,
            state: ZoneState::Created,
            trip: None,
            ticks: 0,
            read_errors: 0,
            last_temp_c: None,
            events: None,
        })
    }

    /// Send safety trips and supply failures to `events`
    pub fn set_events(&mut self, events: Sender<ZoneEvent>) {
        self.events = Some(events);
    }

    fn emit(&self, event: ZoneEvent) {
        if let Some(events) = &self.events {
            events.send(event).unwrap_or_default();
        }
    }

    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[inline]
    pub fn heater(&self) -> &Heater {
        &self.heater
    }

    #[inline]
    pub fn envelope(&self) -> Envelope {
        self.envelope
    }

    #[inline]
    pub fn state(&self) -> ZoneState {
        self.state
    }

    #[inline]
    pub fn trip(&self) -> Option<f32> {
        self.trip
    }

    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    #[inline]
    pub fn read_errors(&self) -> u64 {
        self.read_errors
    }

    #[inline]
    pub fn last_temperature(&self) -> Option<f32> {
        self.last_temp_c
    }

    /// Identifies the supply device, equal for zones sharing one supply
    pub fn supply_device_id(&self) -> usize {
        Arc::as_ptr(&self.supply) as *const () as usize
    }

    /// Identifies the sensor device, equal for zones sharing one DAQ
    pub fn sensor_device_id(&self) -> usize {
        Arc::as_ptr(&self.sensor) as *const () as usize
    }

    #[inline]
    pub fn pid(&self) -> &PidLaw {
        &self.pid
    }

    /// Lifecycle state as reported on the wire
    pub fn status(&self) -> &'static str {
        match (self.state, self.trip) {
            (ZoneState::Armed, Some(_)) => "tripped",
            (ZoneState::Created, _) => "created",
            (ZoneState::Armed, None) => "armed",
            (ZoneState::Regulating, _) => "regulating",
        }
    }

    // # Lifecycle

    /// Zero the outputs, pull the channel limits inside the envelope, raise
    /// the current setpoint to its limit and switch the channel on.
    pub fn ready(&mut self) -> Result<(), ZoneError> {
        let ch = self.supply_channel;
        let envelope = self.envelope;

        let v_limit = {
            let mut ps = lock(&self.supply);

            ps.set_voltage(ch, 0.0)?;
            ps.set_current(ch, 0.0)?;

            if ps.get_voltage_limit(ch)? > envelope.v_max {
                ps.set_voltage_limit(ch, envelope.v_max)?;
            }
            if ps.get_current_limit(ch)? > envelope.i_max {
                ps.set_current_limit(ch, envelope.i_max)?;
            }

            let i_limit = ps.get_current_limit(ch)?;
            ps.set_current(ch, i_limit)?;
            ps.set_state(ch, true)?;

            ps.get_voltage_limit(ch)?
        };

        let (lo, _) = self.pid.output_limits();
        self.pid
            .set_output_limits(lo, envelope.v_max.min(v_limit))?;

        self.trip = None;
        self.state = ZoneState::Armed;

        info!(zone = %self.key, "armed");

        Ok(())
    }

    /// Begin regulating. Only an armed, untripped zone may regulate.
    pub fn start(&mut self) -> Result<(), ZoneError> {
        if let Some(temp_c) = self.trip {
            return Err(ZoneError::SafetyTrip {
                temp_c,
                t_max: self.envelope.t_max,
            });
        }

        match self.state {
            ZoneState::Created => Err(ZoneError::NotArmed),
            ZoneState::Regulating => Ok(()),
            ZoneState::Armed => {
                let ch = self.supply_channel;

                // A stopped channel comes back the way ready left it
                {
                    let mut ps = lock(&self.supply);

                    if !ps.get_state(ch)? {
                        let i_limit = ps.get_current_limit(ch)?;
                        ps.set_current(ch, i_limit)?;
                        ps.set_state(ch, true)?;
                    }
                }

                self.pid.forget_clock();
                self.state = ZoneState::Regulating;

                info!(zone = %self.key, setpoint = self.pid.setpoint(), "regulating");

                Ok(())
            }
        }
    }

    /// Leave regulation with the channel on at zero output.
    pub fn halt(&mut self) -> Result<(), ZoneError> {
        if self.state != ZoneState::Regulating {
            return Ok(());
        }

        self.state = ZoneState::Armed;

        info!(zone = %self.key, "regulation halted");

        lock(&self.supply).set_voltage(self.supply_channel, 0.0)?;

        Ok(())
    }

    /// Switch the output off and zero the channel setpoints, leaving
    /// regulation. The PID keeps its accumulators.
    pub fn stop_supply(&mut self) -> Result<(), ZoneError> {
        let ch = self.supply_channel;

        // Every step is attempted even if an earlier one fails
        let result = {
            let mut ps = lock(&self.supply);

            let off = ps.set_state(ch, false);
            let volts = ps.set_voltage(ch, 0.0);
            let amps = ps.set_current(ch, 0.0);

            off.and(volts).and(amps)
        };

        if self.state == ZoneState::Regulating {
            self.state = ZoneState::Armed;
        }

        result.map_err(ZoneError::from)
    }

    /// Output off, setpoints zeroed and the PID setpoint back to zero.
    pub fn stop(&mut self) -> Result<(), ZoneError> {
        let result = self.stop_supply();

        self.pid.set_setpoint(0.0)?;

        info!(zone = %self.key, "stopped");

        result
    }

    /// Restore the channel limits to the zone envelope with the output off.
    pub fn reset_supply(&mut self) -> Result<(), ZoneError> {
        let stopped = self.stop_supply();

        let ch = self.supply_channel;
        let envelope = self.envelope;

        {
            let mut ps = lock(&self.supply);

            ps.set_voltage_limit(ch, envelope.v_max)?;
            ps.set_current_limit(ch, envelope.i_max)?;
        }

        let (lo, _) = self.pid.output_limits();
        self.pid.set_output_limits(lo, envelope.v_max)?;

        self.state = ZoneState::Created;

        stopped
    }

    /// Stop, then restore the default PID and the default channel limits.
    pub fn reset(&mut self) -> Result<(), ZoneError> {
        let stopped = self.stop();

        self.reset_supply()?;
        self.pid = default_pid(&self.envelope, self.envelope.v_max)?;
        self.trip = None;

        info!(zone = %self.key, "reset");

        stopped
    }

    // # Control

    /// Run one control step if regulating: read, check, evaluate, write.
    ///
    /// `now` is the instant the step was scheduled for, which keeps the PID
    /// sample period check immune to wake-up jitter.
    pub fn tick(&mut self, now: Instant) -> Tick {
        if self.state != ZoneState::Regulating {
            return Tick::Idle;
        }

        self.ticks += 1;

        // ## 1: Read the hot junction
        let read = lock(&self.sensor).get_temperature(
            self.sensor_channel,
            Some(Unit::Celsius),
            false,
        );

        let temp_c = match read {
            Ok(temp_c) => temp_c,
            Err(e) => {
                self.read_errors += 1;
                warn!(zone = %self.key, error = %e, "skipping tick");
                return Tick::Skipped(e);
            }
        };

        self.last_temp_c = Some(temp_c);

        // ## 2: Trip if outside of the envelope
        if temp_c > self.envelope.t_max {
            self.safety_trip(temp_c);
            return Tick::Tripped(temp_c);
        }

        // ## 3: Evaluate the law
        let output = self.pid.update_at(round2(temp_c), now);

        // ## 4: Write the output
        let written = lock(&self.supply).set_voltage(self.supply_channel, output);

        match written {
            Ok(()) => {
                debug!(zone = %self.key, temp_c, output, "tick");
                Tick::Output(output)
            }
            Err(e) => {
                warn!(zone = %self.key, error = %e, "output write failed");
                self.emit(ZoneEvent::SupplyIo {
                    key: self.key.clone(),
                    error: e.clone(),
                });
                Tick::WriteFailed(e)
            }
        }
    }

    fn safety_trip(&mut self, temp_c: f32) {
        let ch = self.supply_channel;

        {
            let mut ps = lock(&self.supply);

            for result in [
                ps.set_state(ch, false),
                ps.set_voltage(ch, 0.0),
                ps.set_current(ch, 0.0),
            ] {
                if let Err(e) = result {
                    error!(zone = %self.key, error = %e, "unable to zero output after trip");
                }
            }
        }

        self.state = ZoneState::Armed;
        self.trip = Some(temp_c);

        error!(
            zone = %self.key,
            temp_c,
            t_max = self.envelope.t_max,
            "*FAULT* safety trip, output off"
        );

        self.emit(ZoneEvent::SafetyTrip {
            key: self.key.clone(),
            temp_c,
            t_max: self.envelope.t_max,
        });
    }

    // # Supply

    pub fn supply_idn(&self) -> Result<String, ZoneError> {
        Ok(lock(&self.supply).idn()?)
    }

    #[inline]
    pub fn supply_channel(&self) -> usize {
        self.supply_channel
    }

    /// Move the zone to another channel of its supply. The whole supply is
    /// zeroed first and the zone has to be readied again.
    pub fn set_supply_channel(&mut self, channel: usize) -> Result<(), ZoneError> {
        if channel >= lock(&self.supply).channels() {
            return Err(SupplyError::BadChannel(channel).into());
        }

        self.stop()?;
        lock(&self.supply).zero_all_channels()?;

        self.supply_channel = channel;
        self.state = ZoneState::Created;

        info!(zone = %self.key, channel, "supply channel changed");

        Ok(())
    }

    /// The shared supply was zeroed underneath this zone. A regulating zone
    /// drops back to armed and reports it; starting again turns the channel
    /// back on.
    pub fn output_lost(&mut self, cause: &str) {
        if self.state != ZoneState::Regulating {
            return;
        }

        self.state = ZoneState::Armed;

        warn!(zone = %self.key, cause, "output switched off underneath, regulation halted");

        self.emit(ZoneEvent::OutputLost {
            key: self.key.clone(),
            cause: cause.to_owned(),
        });
    }

    pub fn output_enabled(&self) -> Result<bool, ZoneError> {
        Ok(lock(&self.supply).get_state(self.supply_channel)?)
    }

    pub fn set_output_enabled(&mut self, on: bool) -> Result<(), ZoneError> {
        Ok(lock(&self.supply).set_state(self.supply_channel, on)?)
    }

    pub fn setpoint_voltage(&self) -> Result<f32, ZoneError> {
        Ok(lock(&self.supply).get_setpoint_voltage(self.supply_channel)?)
    }

    pub fn set_voltage(&mut self, volts: f32) -> Result<(), ZoneError> {
        if volts > self.envelope.v_max {
            return Err(ZoneError::LimitExceeded {
                what: "voltage",
                value: volts,
                ceiling: self.envelope.v_max,
            });
        }

        Ok(lock(&self.supply).set_voltage(self.supply_channel, volts)?)
    }

    pub fn setpoint_current(&self) -> Result<f32, ZoneError> {
        Ok(lock(&self.supply).get_setpoint_current(self.supply_channel)?)
    }

    pub fn set_current(&mut self, amps: f32) -> Result<(), ZoneError> {
        if amps > self.envelope.i_max {
            return Err(ZoneError::LimitExceeded {
                what: "current",
                value: amps,
                ceiling: self.envelope.i_max,
            });
        }

        Ok(lock(&self.supply).set_current(self.supply_channel, amps)?)
    }

    pub fn actual_voltage(&self) -> Result<f32, ZoneError> {
        Ok(lock(&self.supply).get_actual_voltage(self.supply_channel)?)
    }

    pub fn actual_current(&self) -> Result<f32, ZoneError> {
        Ok(lock(&self.supply).get_actual_current(self.supply_channel)?)
    }

    pub fn voltage_limit(&self) -> Result<f32, ZoneError> {
        Ok(lock(&self.supply).get_voltage_limit(self.supply_channel)?)
    }

    /// Anything above the envelope is brought down to it, anything below the
    /// live setpoint is refused by the supply.
    pub fn set_voltage_limit(&mut self, volts: f32) -> Result<(), ZoneError> {
        let volts = volts.min(self.envelope.v_max);

        lock(&self.supply).set_voltage_limit(self.supply_channel, volts)?;

        let (lo, _) = self.pid.output_limits();
        self.pid.set_output_limits(lo, volts.max(lo))?;

        Ok(())
    }

    pub fn current_limit(&self) -> Result<f32, ZoneError> {
        Ok(lock(&self.supply).get_current_limit(self.supply_channel)?)
    }

    /// Same arbitration as [`Zone::set_voltage_limit`]
    pub fn set_current_limit(&mut self, amps: f32) -> Result<(), ZoneError> {
        let amps = amps.min(self.envelope.i_max);

        Ok(lock(&self.supply).set_current_limit(self.supply_channel, amps)?)
    }

    // # Sensor

    pub fn sensor_idn(&self) -> Result<String, ZoneError> {
        Ok(lock(&self.sensor).idn()?)
    }

    #[inline]
    pub fn sensor_channel(&self) -> usize {
        self.sensor_channel
    }

    pub fn set_sensor_channel(&mut self, channel: usize) -> Result<(), ZoneError> {
        if channel >= lock(&self.sensor).channels() {
            return Err(DaqError::BadChannel(channel).into());
        }

        self.sensor_channel = channel;

        info!(zone = %self.key, channel, "sensor channel changed");

        Ok(())
    }

    /// Single-shot reading in the sensor's default unit
    pub fn temperature(&self) -> Result<f32, ZoneError> {
        self.temperature_in(None, false)
    }

    pub fn temperature_in(&self, unit: Option<Unit>, averaged: bool) -> Result<f32, ZoneError> {
        Ok(lock(&self.sensor).get_temperature(self.sensor_channel, unit, averaged)?)
    }

    pub fn tc_type(&self) -> Result<TcType, ZoneError> {
        Ok(lock(&self.sensor).get_thermocouple_type(self.sensor_channel)?)
    }

    pub fn set_tc_type(&mut self, tc: TcType) -> Result<(), ZoneError> {
        Ok(lock(&self.sensor).set_thermocouple_type(self.sensor_channel, tc)?)
    }

    pub fn unit(&self) -> Unit {
        lock(&self.sensor).default_units()
    }

    /// Only changes how readings are reported, regulation always works in
    /// celcius.
    pub fn set_unit(&mut self, unit: Unit) {
        lock(&self.sensor).set_default_units(unit);
    }

    // # PID

    pub fn pid_identity(&self) -> String {
        self.pid.to_string()
    }

    /// Default gains and setpoint, cleared accumulators, limits kept in
    /// line with the live supply limit.
    pub fn reset_pid(&mut self) -> Result<(), ZoneError> {
        let v_limit = self.voltage_limit().unwrap_or(self.envelope.v_max);

        self.pid = default_pid(&self.envelope, v_limit)?;

        Ok(())
    }

    /// Output limits back to `(0, min(Vmax_zone, Vlim))`
    pub fn reset_pid_limits(&mut self) -> Result<(), ZoneError> {
        let v_limit = self.voltage_limit()?;

        self.pid
            .set_output_limits(0.0, self.envelope.v_max.min(v_limit))?;

        Ok(())
    }

    #[inline]
    pub fn kp(&self) -> f32 {
        self.pid.kp()
    }

    pub fn set_kp(&mut self, kp: f32) -> Result<(), ZoneError> {
        Ok(self.pid.set_kp(kp)?)
    }

    #[inline]
    pub fn ki(&self) -> f32 {
        self.pid.ki()
    }

    pub fn set_ki(&mut self, ki: f32) -> Result<(), ZoneError> {
        Ok(self.pid.set_ki(ki)?)
    }

    #[inline]
    pub fn kd(&self) -> f32 {
        self.pid.kd()
    }

    pub fn set_kd(&mut self, kd: f32) -> Result<(), ZoneError> {
        Ok(self.pid.set_kd(kd)?)
    }

    #[inline]
    pub fn setpoint(&self) -> f32 {
        self.pid.setpoint()
    }

    /// Refused, leaving the setpoint as it was, when above the zone's
    /// temperature ceiling
    pub fn set_setpoint(&mut self, temp_c: f32) -> Result<(), ZoneError> {
        if temp_c > self.envelope.t_max {
            return Err(ZoneError::LimitExceeded {
                what: "setpoint",
                value: temp_c,
                ceiling: self.envelope.t_max,
            });
        }

        Ok(self.pid.set_setpoint(temp_c)?)
    }

    #[inline]
    pub fn sample_time(&self) -> f32 {
        self.pid.sample_time()
    }

    pub fn set_sample_time(&mut self, sample_time_s: f32) -> Result<(), ZoneError> {
        Ok(self.pid.set_sample_time(sample_time_s)?)
    }

    #[inline]
    pub fn regulating(&self) -> bool {
        self.state == ZoneState::Regulating
    }

    pub fn set_regulating(&mut self, regulating: bool) -> Result<(), ZoneError> {
        match regulating {
            true => self.start(),
            false => self.halt(),
        }
    }
}

impl Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] supply ch{} sensor ch{}",
            self.key,
            self.status(),
            self.supply_channel,
            self.sensor_channel
        )
    }
}
