//! Heating elements and the safety envelope of a zone

use serde::{Deserialize, Serialize};
use supply::Supply;

/// Hardware ratings of a heating element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heater {
    pub name: String,
    /// Highest voltage the element may see
    pub v_max: f32,
    /// Highest current the element may carry
    pub i_max: f32,
    /// Highest temperature the zone may reach, in celcius
    pub t_max: f32,
}

/// `(Vmax_zone, Imax_zone, Tmax_zone)`, the tighter of the heater's and the
/// supply's ratings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub v_max: f32,
    pub i_max: f32,
    pub t_max: f32,
}

impl Envelope {
    pub fn between(heater: &Heater, supply: &dyn Supply) -> Self {
        Self {
            v_max: heater.v_max.min(supply.max_voltage()),
            i_max: heater.i_max.min(supply.max_current()),
            t_max: heater.t_max,
        }
    }
}

#[cfg(test)]
mod tests {
    use supply::SimSupply;

    use super::*;

    #[test]
    fn envelope_takes_the_minimum() {
        let heater = Heater {
            name: "band".to_owned(),
            v_max: 48.0,
            i_max: 2.0,
            t_max: 250.0,
        };
        let supply = SimSupply::new("PS-3005", 1, 30.0, 5.0);

        assert_eq!(
            Envelope::between(&heater, &supply),
            Envelope {
                v_max: 30.0,
                i_max: 2.0,
                t_max: 250.0
            }
        );
    }
}
