//! Lumped thermal model of a heated zone, used to close the loop when the
//! supervisor runs on simulated drivers.

use std::time::Instant;

use daq::Probe;
use serde::{Deserialize, Serialize};
use shared::lock;
use supply::SharedSupply;

/// Thermal constants of one zone
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThermalModel {
    /// Current temperature in celcius
    pub temp_c: f32,
    /// Temperature of the surroundings in celcius
    pub ambient_c: f32,
    /// Heat needed to raise the zone by one degree, in J/C
    pub capacity_j_per_c: f32,
    /// Heat lost to the surroundings per degree above ambient, in W/C
    pub loss_w_per_c: f32,
}

impl ThermalModel {
    /// Advance the model by `dt_s` seconds with `power_w` going into the
    /// heater.
    pub fn update(&mut self, power_w: f32, dt_s: f32) {
        let heat_added = power_w * dt_s;
        let heat_lost = self.loss_w_per_c * (self.temp_c - self.ambient_c) * dt_s;

        self.temp_c += (heat_added - heat_lost) / self.capacity_j_per_c;
    }

    /// Temperature the model settles at under a constant `power_w`
    pub fn steady_state_c(&self, power_w: f32) -> f32 {
        self.ambient_c + power_w / self.loss_w_per_c
    }
}

/// A thermocouple glued to a resistive heater fed by one supply channel.
///
/// Every sample advances the model by the wall-clock time since the last
/// sample, heating with `V^2 / R` at the voltage the supply actually
/// delivers.
pub struct HeaterProbe {
    model: ThermalModel,
    ohms: f32,
    supply: SharedSupply,
    channel: usize,
    last: Option<Instant>,
}

impl HeaterProbe {
    pub fn new(model: ThermalModel, ohms: f32, supply: SharedSupply, channel: usize) -> Self {
        Self {
            model,
            ohms,
            supply,
            channel,
            last: None,
        }
    }

    fn power_w(&self) -> f32 {
        // An unreachable supply heats nothing
        let volts = lock(&self.supply)
            .get_actual_voltage(self.channel)
            .unwrap_or(0.0);

        volts * volts / self.ohms
    }
}

impl Probe for HeaterProbe {
    fn sample_c(&mut self) -> Option<f32> {
        let now = Instant::now();

        if let Some(last) = self.last {
            let power_w = self.power_w();
            self.model
                .update(power_w, now.saturating_duration_since(last).as_secs_f32());
        }

        self.last = Some(now);

        Some(self.model.temp_c)
    }
}
