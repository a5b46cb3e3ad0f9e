//! Temperature scales and thermocouple types, parsed once at the boundary

use std::{collections::HashMap, fmt::Display, str::FromStr};

use enum_primitive_derive::Primitive;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::DaqError;

/// Conversion rate between a raw converter count and degrees celcius
pub const RAW_CONV_C: f32 = 0.0625;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    Celsius,
    Fahrenheit,
    Kelvin,
    Volts,
    Raw,
}

lazy_static! {
    static ref UNIT_ALIASES: HashMap<&'static str, Unit> = HashMap::from([
        ("celsius", Unit::Celsius),
        ("c", Unit::Celsius),
        ("fahrenheit", Unit::Fahrenheit),
        ("f", Unit::Fahrenheit),
        ("kelvin", Unit::Kelvin),
        ("k", Unit::Kelvin),
        ("volts", Unit::Volts),
        ("volt", Unit::Volts),
        ("voltage", Unit::Volts),
        ("v", Unit::Volts),
        ("raw", Unit::Raw),
        ("none", Unit::Raw),
        ("noscale", Unit::Raw),
        ("r", Unit::Raw),
    ]);
}

impl FromStr for Unit {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UNIT_ALIASES
            .get(s.trim().to_ascii_lowercase().as_str())
            .copied()
            .ok_or_else(|| DaqError::BadUnit(s.to_owned()))
    }
}

impl Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Celsius => "C",
            Self::Fahrenheit => "F",
            Self::Kelvin => "K",
            Self::Volts => "V",
            Self::Raw => "Raw",
        })
    }
}

/// Thermocouple types, numbered the way the MCP9600 sensor config register
/// numbers them (bits 6:4).
#[repr(u8)]
#[derive(Primitive, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TcType {
    K = 0,
    J = 1,
    T = 2,
    N = 3,
    S = 4,
    E = 5,
    B = 6,
    R = 7,
}

impl TcType {
    /// Approximate Seebeck coefficient near room temperature in V/C
    pub fn seebeck_v_per_c(&self) -> f32 {
        match self {
            Self::K => 41.0e-6,
            Self::J => 52.0e-6,
            Self::T => 43.0e-6,
            Self::N => 27.0e-6,
            Self::S => 6.5e-6,
            Self::E => 68.0e-6,
            Self::B => 1.0e-6,
            Self::R => 6.5e-6,
        }
    }
}

impl FromStr for TcType {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "J" => Ok(Self::J),
            "K" => Ok(Self::K),
            "T" => Ok(Self::T),
            "E" => Ok(Self::E),
            "R" => Ok(Self::R),
            "S" => Ok(Self::S),
            "B" => Ok(Self::B),
            "N" => Ok(Self::N),
            _ => Err(DaqError::BadTcType(s.to_owned())),
        }
    }
}

impl Display for TcType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Convert a hot-junction temperature in celcius into the requested scale.
pub fn convert_c(temp_c: f32, unit: Unit, tc: TcType) -> f32 {
    match unit {
        Unit::Celsius => temp_c,
        Unit::Fahrenheit => temp_c * 9.0 / 5.0 + 32.0,
        Unit::Kelvin => temp_c + 273.15,
        Unit::Volts => temp_c * tc.seebeck_v_per_c(),
        Unit::Raw => (temp_c / RAW_CONV_C).round(),
    }
}

#[cfg(test)]
mod tests {
    use num_traits::FromPrimitive;

    use super::*;

    #[test]
    fn unit_aliases() {
        assert_eq!("celsius".parse::<Unit>().unwrap(), Unit::Celsius);
        assert_eq!("C".parse::<Unit>().unwrap(), Unit::Celsius);
        assert_eq!("Fahrenheit".parse::<Unit>().unwrap(), Unit::Fahrenheit);
        assert_eq!("k".parse::<Unit>().unwrap(), Unit::Kelvin);
        assert_eq!("VOLTAGE".parse::<Unit>().unwrap(), Unit::Volts);
        assert_eq!("volt".parse::<Unit>().unwrap(), Unit::Volts);
        assert_eq!("noscale".parse::<Unit>().unwrap(), Unit::Raw);
        assert_eq!("None".parse::<Unit>().unwrap(), Unit::Raw);

        match "rankine".parse::<Unit>() {
            Err(DaqError::BadUnit(alias)) => assert_eq!(alias, "rankine"),
            other => panic!("expected BadUnit, got {:?}", other),
        }
    }

    #[test]
    fn unit_display_parses_back() {
        for unit in [
            Unit::Celsius,
            Unit::Fahrenheit,
            Unit::Kelvin,
            Unit::Volts,
            Unit::Raw,
        ] {
            assert_eq!(unit.to_string().parse::<Unit>().unwrap(), unit);
        }
    }

    #[test]
    fn tc_types() {
        assert_eq!("j".parse::<TcType>().unwrap(), TcType::J);
        assert_eq!("N".parse::<TcType>().unwrap(), TcType::N);
        "X".parse::<TcType>().unwrap_err();
        "KK".parse::<TcType>().unwrap_err();

        assert_eq!(TcType::from_u8(1), Some(TcType::J));
        assert_eq!(TcType::from_u8(8), None);
    }

    #[test]
    fn conversions() {
        assert_eq!(convert_c(100.0, Unit::Fahrenheit, TcType::K), 212.0);
        assert_eq!(convert_c(0.0, Unit::Kelvin, TcType::K), 273.15);
        assert_eq!(convert_c(25.0, Unit::Raw, TcType::K), 400.0);
        assert!((convert_c(100.0, Unit::Volts, TcType::K) - 4.1e-3).abs() < 1e-6);
    }
}
