//! Oven description: which supplies and DAQs exist and how zones are wired
//! to them. Loaded from JSON, or the built-in three zone oven.

use std::{
    collections::{HashMap, HashSet},
    fs::File,
    io::BufReader,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use daq::{Sensor, SharedSensor, SimDaq, TcType, Unit, FILTER_SAMPLES};
use serde::{Deserialize, Serialize};
use shared::{lock, SENSOR_TIMEOUT_MS, SUPPLY_TIMEOUT_MS};
use supply::{SharedSupply, SimSupply};
use thermo::{Heater, Zone};
use tracing::info;

use crate::{plant::HeaterProbe, plant::ThermalModel, Error};

fn supply_timeout_ms() -> u64 {
    SUPPLY_TIMEOUT_MS
}

fn sensor_timeout_ms() -> u64 {
    SENSOR_TIMEOUT_MS
}

fn filter_samples() -> u32 {
    FILTER_SAMPLES
}

fn tc_k() -> TcType {
    TcType::K
}

fn celsius() -> Unit {
    Unit::Celsius
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplyConfig {
    pub name: String,
    pub model: String,
    pub channels: usize,
    /// Hardware voltage maximum of every channel
    pub v_max: f32,
    /// Hardware current maximum of every channel
    pub i_max: f32,
    #[serde(default = "supply_timeout_ms")]
    pub timeout_ms: u64,
    /// Simulated time every command takes
    #[serde(default)]
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub name: String,
    pub model: String,
    pub channels: usize,
    #[serde(default = "tc_k")]
    pub tc_type: TcType,
    #[serde(default = "celsius")]
    pub unit: Unit,
    #[serde(default = "sensor_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default = "filter_samples")]
    pub filter_samples: u32,
}

/// Physical side of a zone, the heater's resistance and how the zone
/// gains and loses heat
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlantConfig {
    pub ohms: f32,
    pub capacity_j_per_c: f32,
    pub loss_w_per_c: f32,
    pub ambient_c: f32,
}

impl Default for PlantConfig {
    fn default() -> Self {
        Self {
            ohms: 8.0,
            capacity_j_per_c: 400.0,
            loss_w_per_c: 0.6,
            ambient_c: 25.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub key: String,
    /// Name of a configured supply
    pub supply: String,
    pub supply_channel: usize,
    /// Name of a configured sensor
    pub sensor: String,
    pub sensor_channel: usize,
    pub heater: Heater,
    #[serde(default)]
    pub plant: PlantConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub supplies: Vec<SupplyConfig>,
    pub sensors: Vec<SensorConfig>,
    /// Zones in the order they are registered
    pub zones: Vec<ZoneConfig>,
}

impl Default for Config {
    /// One three channel supply and one four channel DAQ driving the top,
    /// middle and bottom zones of a small oven.
    fn default() -> Self {
        let zone = |key: &str, ch: usize| ZoneConfig {
            key: key.to_owned(),
            supply: "psu".to_owned(),
            supply_channel: ch,
            sensor: "daq".to_owned(),
            sensor_channel: ch,
            heater: Heater {
                name: format!("{} band heater", key),
                v_max: 24.0,
                i_max: 3.0,
                t_max: 250.0,
            },
            plant: PlantConfig::default(),
        };

        Self {
            supplies: vec![SupplyConfig {
                name: "psu".to_owned(),
                model: "PS-3005".to_owned(),
                channels: 3,
                v_max: 30.0,
                i_max: 5.0,
                timeout_ms: SUPPLY_TIMEOUT_MS,
                latency_ms: 0,
            }],
            sensors: vec![SensorConfig {
                name: "daq".to_owned(),
                model: "TC-08".to_owned(),
                channels: 4,
                tc_type: TcType::K,
                unit: Unit::Celsius,
                timeout_ms: SENSOR_TIMEOUT_MS,
                latency_ms: 0,
                filter_samples: FILTER_SAMPLES,
            }],
            zones: vec![zone("top", 0), zone("mid", 1), zone("bot", 2)],
        }
    }
}

fn bad(why: String) -> Error {
    Error::BadConfig(why)
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let config: Self = serde_json::from_reader(BufReader::new(File::open(path)?))?;

        info!(path = %path.display(), zones = config.zones.len(), "configuration loaded");

        Ok(config)
    }

    /// Check names, channel ranges and that no channel is used twice.
    pub fn validate(&self) -> Result<(), Error> {
        let mut names = HashSet::new();

        for supply in &self.supplies {
            if !names.insert(("supply", supply.name.as_str())) {
                return Err(bad(format!("supply {:?} defined twice", supply.name)));
            }
            if supply.channels == 0 || !(supply.v_max > 0.0) || !(supply.i_max > 0.0) {
                return Err(bad(format!("supply {:?} has no usable channel", supply.name)));
            }
        }

        for sensor in &self.sensors {
            if !names.insert(("sensor", sensor.name.as_str())) {
                return Err(bad(format!("sensor {:?} defined twice", sensor.name)));
            }
            if sensor.channels == 0 {
                return Err(bad(format!("sensor {:?} has no channel", sensor.name)));
            }
        }

        let mut keys = HashSet::new();
        let mut bound = HashSet::new();

        for zone in &self.zones {
            if !keys.insert(zone.key.as_str()) {
                return Err(bad(format!("zone {:?} defined twice", zone.key)));
            }

            let supply = self
                .supplies
                .iter()
                .find(|s| s.name == zone.supply)
                .ok_or_else(|| bad(format!("zone {:?}: no supply {:?}", zone.key, zone.supply)))?;

            let sensor = self
                .sensors
                .iter()
                .find(|s| s.name == zone.sensor)
                .ok_or_else(|| bad(format!("zone {:?}: no sensor {:?}", zone.key, zone.sensor)))?;

            if zone.supply_channel >= supply.channels {
                return Err(bad(format!(
                    "zone {:?}: supply {:?} has no channel {}",
                    zone.key, zone.supply, zone.supply_channel
                )));
            }

            if zone.sensor_channel >= sensor.channels {
                return Err(bad(format!(
                    "zone {:?}: sensor {:?} has no channel {}",
                    zone.key, zone.sensor, zone.sensor_channel
                )));
            }

            if !bound.insert(("supply", zone.supply.as_str(), zone.supply_channel)) {
                return Err(bad(format!(
                    "zone {:?}: supply {:?} channel {} already in use",
                    zone.key, zone.supply, zone.supply_channel
                )));
            }

            if !bound.insert(("sensor", zone.sensor.as_str(), zone.sensor_channel)) {
                return Err(bad(format!(
                    "zone {:?}: sensor {:?} channel {} already in use",
                    zone.key, zone.sensor, zone.sensor_channel
                )));
            }

            let heater = &zone.heater;
            if !(heater.v_max > 0.0 && heater.i_max > 0.0 && heater.t_max.is_finite()) {
                return Err(bad(format!("zone {:?}: heater ratings must be positive", zone.key)));
            }

            let plant = &zone.plant;
            if !(plant.ohms > 0.0 && plant.capacity_j_per_c > 0.0 && plant.loss_w_per_c > 0.0) {
                return Err(bad(format!("zone {:?}: plant constants must be positive", zone.key)));
            }
        }

        Ok(())
    }

    /// Create the simulated instruments and the zones wired to them.
    pub fn build(&self) -> Result<Vec<Zone>, Error> {
        self.validate()?;

        let supplies: HashMap<&str, Arc<Mutex<SimSupply>>> = self
            .supplies
            .iter()
            .map(|cfg| {
                let mut ps = SimSupply::new(&cfg.model, cfg.channels, cfg.v_max, cfg.i_max)
                    .with_timeout(Duration::from_millis(cfg.timeout_ms));
                ps.set_latency(Duration::from_millis(cfg.latency_ms));

                (cfg.name.as_str(), Arc::new(Mutex::new(ps)))
            })
            .collect();

        let sensors: HashMap<&str, Arc<Mutex<SimDaq>>> = self
            .sensors
            .iter()
            .map(|cfg| {
                let mut tc = SimDaq::new(&cfg.model, cfg.channels, cfg.tc_type)
                    .with_timeout(Duration::from_millis(cfg.timeout_ms))
                    .with_filter_samples(cfg.filter_samples);
                tc.set_latency(Duration::from_millis(cfg.latency_ms));
                tc.set_default_units(cfg.unit);

                (cfg.name.as_str(), Arc::new(Mutex::new(tc)))
            })
            .collect();

        let mut zones = Vec::with_capacity(self.zones.len());

        for cfg in &self.zones {
            let ps = supplies
                .get(cfg.supply.as_str())
                .ok_or_else(|| bad(format!("no supply {:?}", cfg.supply)))?;
            let tc = sensors
                .get(cfg.sensor.as_str())
                .ok_or_else(|| bad(format!("no sensor {:?}", cfg.sensor)))?;

            lock(ps).set_load(cfg.supply_channel, Some(cfg.plant.ohms))?;

            let shared_ps: SharedSupply = ps.clone();
            let shared_tc: SharedSensor = tc.clone();

            let model = ThermalModel {
                temp_c: cfg.plant.ambient_c,
                ambient_c: cfg.plant.ambient_c,
                capacity_j_per_c: cfg.plant.capacity_j_per_c,
                loss_w_per_c: cfg.plant.loss_w_per_c,
            };

            let probe = HeaterProbe::new(model, cfg.plant.ohms, shared_ps.clone(), cfg.supply_channel);
            lock(tc).attach(cfg.sensor_channel, Box::new(probe))?;

            zones.push(Zone::new(
                &cfg.key,
                cfg.heater.clone(),
                shared_ps,
                cfg.supply_channel,
                shared_tc,
                cfg.sensor_channel,
            )?);
        }

        Ok(zones)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_oven_builds() {
        let zones = Config::default().build().unwrap();

        let keys: Vec<&str> = zones.iter().map(|zone| zone.key()).collect();
        assert_eq!(keys, ["top", "mid", "bot"]);

        for zone in &zones {
            assert_eq!(zone.envelope().v_max, 24.0);
            assert_eq!(zone.temperature().unwrap(), 25.0);
        }
    }

    #[test]
    fn parses_minimal_json() {
        let json = r#"{
            "supplies": [{"name": "ps", "model": "X", "channels": 1, "v_max": 12, "i_max": 2}],
            "sensors": [{"name": "tc", "model": "Y", "channels": 1, "tc_type": "J"}],
            "zones": [{
                "key": "lid", "supply": "ps", "supply_channel": 0,
                "sensor": "tc", "sensor_channel": 0,
                "heater": {"name": "mat", "v_max": 24, "i_max": 1, "t_max": 90}
            }]
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.supplies[0].timeout_ms, SUPPLY_TIMEOUT_MS);
        assert_eq!(config.sensors[0].tc_type, TcType::J);
        assert_eq!(config.sensors[0].unit, Unit::Celsius);
        assert_eq!(config.sensors[0].filter_samples, FILTER_SAMPLES);
        assert_eq!(config.zones[0].plant, PlantConfig::default());

        let zones = config.build().unwrap();
        assert_eq!(zones[0].envelope().v_max, 12.0);
        assert_eq!(zones[0].envelope().i_max, 1.0);
    }

    #[test]
    fn rejects_bad_wiring() {
        let mut config = Config::default();
        config.zones[1].supply_channel = 0;
        assert!(matches!(config.validate(), Err(Error::BadConfig(_))));

        let mut config = Config::default();
        config.zones[2].key = "top".to_owned();
        assert!(matches!(config.validate(), Err(Error::BadConfig(_))));

        let mut config = Config::default();
        config.zones[0].sensor = "nowhere".to_owned();
        assert!(matches!(config.validate(), Err(Error::BadConfig(_))));

        let mut config = Config::default();
        config.zones[0].supply_channel = 3;
        assert!(matches!(config.validate(), Err(Error::BadConfig(_))));
    }

    #[test]
    fn round_trips_through_json() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();

        assert_eq!(serde_json::from_str::<Config>(&json).unwrap(), config);
    }
}
