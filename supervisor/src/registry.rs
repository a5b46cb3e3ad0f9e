//! Zone registry and the verb dispatch table

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use daq::{DaqError, TcType, Unit};
use proto::{
    fmt_bool, fmt_f32, parse_bool, parse_f32, parse_usize, Arg, ProtoError, Request, Subject,
    Verb,
};
use shared::lock;
use supply::SupplyError;
use thermo::Zone;

use crate::Error;

pub type SharedZone = Arc<Mutex<Zone>>;

/// One registered zone
pub struct Slot {
    pub key: String,
    pub zone: SharedZone,
    supply_id: usize,
    sensor_id: usize,
}

/// Zones by key, kept in the order they were registered.
pub struct Registry {
    slots: Vec<Slot>,
    /// Set once the supervisor shuts down, no request is carried out after
    closed: RwLock<bool>,
}

impl Registry {
    /// Register `zones`, refusing duplicate keys and two zones on the same
    /// channel of the same device.
    pub fn new(zones: Vec<Zone>) -> Result<Self, Error> {
        let mut slots: Vec<Slot> = Vec::with_capacity(zones.len());

        for zone in zones {
            let key = zone.key().to_owned();

            if key.is_empty() || key.chars().any(char::is_whitespace) {
                return Err(Error::BadConfig(format!("zone key {:?} is not a word", key)));
            }

            for slot in &slots {
                if slot.key == key {
                    return Err(Error::BadConfig(format!("zone {:?} defined twice", key)));
                }

                let other = lock(&slot.zone);

                if other.supply_device_id() == zone.supply_device_id()
                    && other.supply_channel() == zone.supply_channel()
                {
                    return Err(Error::BadConfig(format!(
                        "zones {:?} and {:?} share supply channel {}",
                        slot.key,
                        key,
                        zone.supply_channel()
                    )));
                }

                if other.sensor_device_id() == zone.sensor_device_id()
                    && other.sensor_channel() == zone.sensor_channel()
                {
                    return Err(Error::BadConfig(format!(
                        "zones {:?} and {:?} share sensor channel {}",
                        slot.key,
                        key,
                        zone.sensor_channel()
                    )));
                }
            }

            slots.push(Slot {
                supply_id: zone.supply_device_id(),
                sensor_id: zone.sensor_device_id(),
                key,
                zone: Arc::new(Mutex::new(zone)),
            });
        }

        Ok(Self {
            slots,
            closed: RwLock::new(false),
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Keys in registration order
    pub fn keys(&self) -> Vec<&str> {
        self.slots.iter().map(|slot| slot.key.as_str()).collect()
    }

    pub fn get(&self, key: &str) -> Result<&Slot, Error> {
        self.slots
            .iter()
            .find(|slot| slot.key == key)
            .ok_or_else(|| Error::BadKey(key.to_owned()))
    }

    /// Refuse every further request. Waits for the one in progress.
    pub fn close(&self) {
        *self.closed.write().unwrap_or_else(PoisonError::into_inner) = true;
    }

    /// Carry out one request, returning the reply line for queries.
    pub fn dispatch(&self, request: &Request) -> Result<Option<String>, Error> {
        // Held until the request is done so `close` cannot overtake it
        let closed = self.closed.read().unwrap_or_else(PoisonError::into_inner);

        if *closed {
            return Err(Error::Closed);
        }

        // The registry listing answers for any key
        if (request.subject, request.verb) == (Subject::AM, Verb::LIST) {
            return Ok(Some(self.keys().join(",")));
        }

        let slot = self.get(&request.key)?;

        match &request.arg {
            Arg::Query => query(&lock(&slot.zone), request.subject, request.verb).map(Some),
            Arg::None => {
                command(&mut lock(&slot.zone), request.subject, request.verb)?;
                Ok(None)
            }
            Arg::Value(value) => {
                self.set(slot, request.subject, request.verb, value)?;
                Ok(None)
            }
        }
    }

    /// Refuse `channel` when another zone on the same device already uses it
    fn check_channel_free(&self, slot: &Slot, subject: Subject, channel: usize) -> Result<(), Error> {
        for other in self.slots.iter().filter(|other| other.key != slot.key) {
            let taken = match subject {
                Subject::PS => {
                    other.supply_id == slot.supply_id
                        && lock(&other.zone).supply_channel() == channel
                }
                _ => {
                    other.sensor_id == slot.sensor_id
                        && lock(&other.zone).sensor_channel() == channel
                }
            };

            if taken {
                return Err(match subject {
                    Subject::PS => SupplyError::BadChannel(channel).into(),
                    _ => DaqError::BadChannel(channel).into(),
                });
            }
        }

        Ok(())
    }

    /// A channel move zeroed the whole supply, so every other zone on it
    /// has lost its output.
    fn supply_zeroed_by(&self, slot: &Slot, channel: usize) {
        let cause = format!("supply zeroed by {} moving to channel {}", slot.key, channel);

        for other in self
            .slots
            .iter()
            .filter(|other| other.key != slot.key && other.supply_id == slot.supply_id)
        {
            lock(&other.zone).output_lost(&cause);
        }
    }

    fn set(&self, slot: &Slot, subject: Subject, verb: Verb, value: &str) -> Result<(), Error> {
        // Channel moves look at the other zones before touching this one
        match (subject, verb) {
            (Subject::PS, Verb::CHAN) | (Subject::DQ, Verb::CHAN) => {
                let channel = parse_usize(value)?;
                self.check_channel_free(slot, subject, channel)?;

                match subject {
                    Subject::PS => {
                        lock(&slot.zone).set_supply_channel(channel)?;
                        self.supply_zeroed_by(slot, channel);
                    }
                    _ => lock(&slot.zone).set_sensor_channel(channel)?,
                }

                return Ok(());
            }
            _ => {}
        }

        let mut zone = lock(&slot.zone);

        match (subject, verb) {
            (Subject::PS, Verb::VSET) => zone.set_voltage(parse_f32(value)?)?,
            (Subject::PS, Verb::ASET) => zone.set_current(parse_f32(value)?)?,
            (Subject::PS, Verb::VLIM) => zone.set_voltage_limit(parse_f32(value)?)?,
            (Subject::PS, Verb::ALIM) => zone.set_current_limit(parse_f32(value)?)?,
            (Subject::PS, Verb::CHIO) => zone.set_output_enabled(parse_bool(value)?)?,

            (Subject::DQ, Verb::TCTY) => zone.set_tc_type(value.parse::<TcType>()?)?,
            (Subject::DQ, Verb::UNIT) => zone.set_unit(value.parse::<Unit>()?),

            (Subject::PD, Verb::KPRO) => zone.set_kp(parse_f32(value)?)?,
            (Subject::PD, Verb::KINT) => zone.set_ki(parse_f32(value)?)?,
            (Subject::PD, Verb::KDER) => zone.set_kd(parse_f32(value)?)?,
            (Subject::PD, Verb::SETP) => zone.set_setpoint(parse_f32(value)?)?,
            (Subject::PD, Verb::SAMP) => zone.set_sample_time(parse_f32(value)?)?,
            (Subject::PD, Verb::REGT) => zone.set_regulating(parse_bool(value)?)?,

            _ => return Err(unsupported(subject, verb)),
        }

        Ok(())
    }
}

fn unsupported(subject: Subject, verb: Verb) -> Error {
    Error::Proto(ProtoError::UnknownVerb(format!("{}:{}", subject, verb)))
}

fn query(zone: &Zone, subject: Subject, verb: Verb) -> Result<String, Error> {
    Ok(match (subject, verb) {
        (Subject::PS, Verb::IDN) => zone.supply_idn()?,
        (Subject::PS, Verb::VOLT) => fmt_f32(zone.actual_voltage()?),
        (Subject::PS, Verb::AMPS) => fmt_f32(zone.actual_current()?),
        (Subject::PS, Verb::VSET) => fmt_f32(zone.setpoint_voltage()?),
        (Subject::PS, Verb::ASET) => fmt_f32(zone.setpoint_current()?),
        (Subject::PS, Verb::VLIM) => fmt_f32(zone.voltage_limit()?),
        (Subject::PS, Verb::ALIM) => fmt_f32(zone.current_limit()?),
        (Subject::PS, Verb::CHIO) => fmt_bool(zone.output_enabled()?),
        (Subject::PS, Verb::CHAN) => zone.supply_channel().to_string(),

        (Subject::DQ, Verb::IDN) => zone.sensor_idn()?,
        (Subject::DQ, Verb::TEMP) => fmt_f32(zone.temperature()?),
        (Subject::DQ, Verb::CHAN) => zone.sensor_channel().to_string(),
        (Subject::DQ, Verb::TCTY) => zone.tc_type()?.to_string(),
        (Subject::DQ, Verb::UNIT) => zone.unit().to_string(),

        (Subject::PD, Verb::IDN) => zone.pid_identity(),
        (Subject::PD, Verb::KPRO) => fmt_f32(zone.kp()),
        (Subject::PD, Verb::KINT) => fmt_f32(zone.ki()),
        (Subject::PD, Verb::KDER) => fmt_f32(zone.kd()),
        (Subject::PD, Verb::SETP) => fmt_f32(zone.setpoint()),
        (Subject::PD, Verb::SAMP) => fmt_f32(zone.sample_time()),
        (Subject::PD, Verb::REGT) => fmt_bool(zone.regulating()),

        (Subject::AM, Verb::STAT) => zone.status().to_owned(),
        (Subject::AM, Verb::TICK) => zone.ticks().to_string(),
        (Subject::AM, Verb::RERR) => zone.read_errors().to_string(),

        _ => return Err(unsupported(subject, verb)),
    })
}

fn command(zone: &mut Zone, subject: Subject, verb: Verb) -> Result<(), Error> {
    match (subject, verb) {
        (Subject::PS, Verb::RSET) => zone.reset_supply()?,
        (Subject::PS, Verb::STOP) => zone.stop_supply()?,
        (Subject::PS, Verb::REDY) | (Subject::AM, Verb::REDY) => zone.ready()?,

        (Subject::PD, Verb::RSET) => zone.reset_pid()?,
        (Subject::PD, Verb::RLIM) => zone.reset_pid_limits()?,

        (Subject::AM, Verb::STOP) => zone.stop()?,
        (Subject::AM, Verb::RSET) => zone.reset()?,

        _ => return Err(unsupported(subject, verb)),
    }

    Ok(())
}
