//! Unit systems, unit groups and conversion between them.
//!
//! Every observation belongs to a unit group (temperature, speed, ...). Each
//! unit system fixes one standard unit per group, so converting a packet
//! between systems is a per-field conversion between two standard units.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RtdError, RtdResult};

/// A consistent set of measurement units, tagged the way station drivers
/// tag their packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum UnitSystem {
    /// US customary (code 1)
    Us,
    /// Metric with km/h wind and cm rain (code 16)
    Metric,
    /// Metric with m/s wind and mm rain (code 17)
    MetricWx,
}

impl UnitSystem {
    pub fn code(self) -> i64 {
        match self {
            UnitSystem::Us => 1,
            UnitSystem::Metric => 16,
            UnitSystem::MetricWx => 17,
        }
    }

    pub fn from_code(code: i64) -> RtdResult<Self> {
        match code {
            1 => Ok(UnitSystem::Us),
            16 => Ok(UnitSystem::Metric),
            17 => Ok(UnitSystem::MetricWx),
            other => Err(RtdError::UnknownUnitSystem(other)),
        }
    }

    /// Standard unit used by this system for a unit group.
    pub fn unit_for(self, group: UnitGroup) -> Unit {
        use UnitSystem::*;
        match group {
            UnitGroup::Temperature => match self {
                Us => Unit::DegreeF,
                Metric | MetricWx => Unit::DegreeC,
            },
            UnitGroup::Pressure => match self {
                Us => Unit::InHg,
                Metric | MetricWx => Unit::Mbar,
            },
            UnitGroup::Speed => match self {
                Us => Unit::MilePerHour,
                Metric => Unit::KmPerHour,
                MetricWx => Unit::MeterPerSecond,
            },
            UnitGroup::Distance => match self {
                Us => Unit::Mile,
                Metric | MetricWx => Unit::Km,
            },
            UnitGroup::Rain => match self {
                Us => Unit::Inch,
                Metric => Unit::Cm,
                MetricWx => Unit::Mm,
            },
            UnitGroup::RainRate => match self {
                Us => Unit::InchPerHour,
                Metric => Unit::CmPerHour,
                MetricWx => Unit::MmPerHour,
            },
            UnitGroup::Altitude => match self {
                Us => Unit::Foot,
                Metric | MetricWx => Unit::Meter,
            },
            UnitGroup::Percent => Unit::Percent,
            UnitGroup::Direction => Unit::DegreeCompass,
            UnitGroup::Uv => Unit::UvIndex,
            UnitGroup::Radiation => Unit::WattPerMeterSquared,
            UnitGroup::Count => Unit::Count,
        }
    }
}

impl TryFrom<i64> for UnitSystem {
    type Error = RtdError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        UnitSystem::from_code(code)
    }
}

impl From<UnitSystem> for i64 {
    fn from(system: UnitSystem) -> Self {
        system.code()
    }
}

/// Groups of observations that share a physical dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UnitGroup {
    #[serde(rename = "group_temperature")]
    Temperature,
    #[serde(rename = "group_pressure")]
    Pressure,
    #[serde(rename = "group_speed")]
    Speed,
    #[serde(rename = "group_distance")]
    Distance,
    #[serde(rename = "group_rain")]
    Rain,
    #[serde(rename = "group_rainrate")]
    RainRate,
    #[serde(rename = "group_altitude")]
    Altitude,
    #[serde(rename = "group_percent")]
    Percent,
    #[serde(rename = "group_direction")]
    Direction,
    #[serde(rename = "group_uv")]
    Uv,
    #[serde(rename = "group_radiation")]
    Radiation,
    /// Anything without a physical unit.
    #[serde(rename = "group_count")]
    Count,
}

impl UnitGroup {
    /// Unit group of a named observation, `None` for observations that are
    /// carried through conversion untouched.
    pub fn for_observation(name: &str) -> Option<Self> {
        let group = match name {
            "outTemp" | "inTemp" | "appTemp" | "dewpoint" | "heatindex" | "humidex"
            | "windchill" | "extraTemp1" | "extraTemp2" | "soilTemp1" => UnitGroup::Temperature,
            "barometer" | "pressure" | "altimeter" => UnitGroup::Pressure,
            "windSpeed" | "windGust" | "wind" | "windSpeed10" => UnitGroup::Speed,
            "windrun" => UnitGroup::Distance,
            "rain" | "hail" => UnitGroup::Rain,
            "rainRate" | "hailRate" => UnitGroup::RainRate,
            "cloudbase" | "altitude" => UnitGroup::Altitude,
            "outHumidity" | "inHumidity" | "extraHumid1" | "extraHumid2" => UnitGroup::Percent,
            "windDir" | "windGustDir" | "windvec" => UnitGroup::Direction,
            "UV" => UnitGroup::Uv,
            "radiation" | "maxSolarRad" => UnitGroup::Radiation,
            _ => return None,
        };
        Some(group)
    }
}

/// Physical dimension a unit measures. Units convert only within one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Temperature,
    Pressure,
    Speed,
    Length,
    LengthRate,
    Percent,
    Angle,
    Uv,
    Irradiance,
    Count,
}

/// Measurement units, named as station configuration files name them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "degree_F")]
    DegreeF,
    #[serde(rename = "degree_C")]
    DegreeC,
    #[serde(rename = "inHg")]
    InHg,
    #[serde(rename = "mbar")]
    Mbar,
    #[serde(rename = "hPa")]
    HPa,
    #[serde(rename = "kPa")]
    KPa,
    #[serde(rename = "mmHg")]
    MmHg,
    #[serde(rename = "mile_per_hour")]
    MilePerHour,
    #[serde(rename = "km_per_hour")]
    KmPerHour,
    #[serde(rename = "meter_per_second")]
    MeterPerSecond,
    #[serde(rename = "knot")]
    Knot,
    #[serde(rename = "mile")]
    Mile,
    #[serde(rename = "km")]
    Km,
    #[serde(rename = "meter")]
    Meter,
    #[serde(rename = "foot")]
    Foot,
    #[serde(rename = "inch")]
    Inch,
    #[serde(rename = "cm")]
    Cm,
    #[serde(rename = "mm")]
    Mm,
    #[serde(rename = "inch_per_hour")]
    InchPerHour,
    #[serde(rename = "cm_per_hour")]
    CmPerHour,
    #[serde(rename = "mm_per_hour")]
    MmPerHour,
    #[serde(rename = "percent")]
    Percent,
    #[serde(rename = "degree_compass")]
    DegreeCompass,
    #[serde(rename = "uv_index")]
    UvIndex,
    #[serde(rename = "watt_per_meter_squared")]
    WattPerMeterSquared,
    #[serde(rename = "count")]
    Count,
}

impl Unit {
    const ALL: [Unit; 26] = [
        Unit::DegreeF,
        Unit::DegreeC,
        Unit::InHg,
        Unit::Mbar,
        Unit::HPa,
        Unit::KPa,
        Unit::MmHg,
        Unit::MilePerHour,
        Unit::KmPerHour,
        Unit::MeterPerSecond,
        Unit::Knot,
        Unit::Mile,
        Unit::Km,
        Unit::Meter,
        Unit::Foot,
        Unit::Inch,
        Unit::Cm,
        Unit::Mm,
        Unit::InchPerHour,
        Unit::CmPerHour,
        Unit::MmPerHour,
        Unit::Percent,
        Unit::DegreeCompass,
        Unit::UvIndex,
        Unit::WattPerMeterSquared,
        Unit::Count,
    ];

    /// Configuration name of the unit.
    pub fn name(self) -> &'static str {
        match self {
            Unit::DegreeF => "degree_F",
            Unit::DegreeC => "degree_C",
            Unit::InHg => "inHg",
            Unit::Mbar => "mbar",
            Unit::HPa => "hPa",
            Unit::KPa => "kPa",
            Unit::MmHg => "mmHg",
            Unit::MilePerHour => "mile_per_hour",
            Unit::KmPerHour => "km_per_hour",
            Unit::MeterPerSecond => "meter_per_second",
            Unit::Knot => "knot",
            Unit::Mile => "mile",
            Unit::Km => "km",
            Unit::Meter => "meter",
            Unit::Foot => "foot",
            Unit::Inch => "inch",
            Unit::Cm => "cm",
            Unit::Mm => "mm",
            Unit::InchPerHour => "inch_per_hour",
            Unit::CmPerHour => "cm_per_hour",
            Unit::MmPerHour => "mm_per_hour",
            Unit::Percent => "percent",
            Unit::DegreeCompass => "degree_compass",
            Unit::UvIndex => "uv_index",
            Unit::WattPerMeterSquared => "watt_per_meter_squared",
            Unit::Count => "count",
        }
    }

    /// Short label suitable for display.
    pub fn label(self) -> &'static str {
        match self {
            Unit::DegreeF => "F",
            Unit::DegreeC => "C",
            Unit::InHg => "in",
            Unit::Mbar => "mb",
            Unit::HPa => "hPa",
            Unit::KPa => "kPa",
            Unit::MmHg => "mmHg",
            Unit::MilePerHour => "mph",
            Unit::KmPerHour => "km/h",
            Unit::MeterPerSecond => "m/s",
            Unit::Knot => "kts",
            Unit::Mile => "miles",
            Unit::Km => "km",
            Unit::Meter => "m",
            Unit::Foot => "ft",
            Unit::Inch => "in",
            Unit::Cm => "cm",
            Unit::Mm => "mm",
            Unit::InchPerHour => "in/h",
            Unit::CmPerHour => "cm/h",
            Unit::MmPerHour => "mm/h",
            Unit::Percent => "%",
            Unit::DegreeCompass => "deg",
            Unit::UvIndex => "",
            Unit::WattPerMeterSquared => "W/m2",
            Unit::Count => "",
        }
    }

    fn dimension(self) -> Dimension {
        match self {
            Unit::DegreeF | Unit::DegreeC => Dimension::Temperature,
            Unit::InHg | Unit::Mbar | Unit::HPa | Unit::KPa | Unit::MmHg => Dimension::Pressure,
            Unit::MilePerHour | Unit::KmPerHour | Unit::MeterPerSecond | Unit::Knot => {
                Dimension::Speed
            }
            Unit::Mile | Unit::Km | Unit::Meter | Unit::Foot | Unit::Inch | Unit::Cm | Unit::Mm => {
                Dimension::Length
            }
            Unit::InchPerHour | Unit::CmPerHour | Unit::MmPerHour => Dimension::LengthRate,
            Unit::Percent => Dimension::Percent,
            Unit::DegreeCompass => Dimension::Angle,
            Unit::UvIndex => Dimension::Uv,
            Unit::WattPerMeterSquared => Dimension::Irradiance,
            Unit::Count => Dimension::Count,
        }
    }

    /// Multiplier to the dimension's base unit (hPa, m/s, metre, metre/hour).
    /// Temperature is affine and handled separately.
    fn base_factor(self) -> f64 {
        match self {
            Unit::InHg => 33.863_886_666_7,
            Unit::Mbar | Unit::HPa => 1.0,
            Unit::KPa => 10.0,
            Unit::MmHg => 1.333_223_874,
            Unit::MilePerHour => 0.447_04,
            Unit::KmPerHour => 1.0 / 3.6,
            Unit::MeterPerSecond => 1.0,
            Unit::Knot => 0.514_444_444_4,
            Unit::Mile => 1609.344,
            Unit::Km => 1000.0,
            Unit::Meter => 1.0,
            Unit::Foot => 0.3048,
            Unit::Inch | Unit::InchPerHour => 0.0254,
            Unit::Cm | Unit::CmPerHour => 0.01,
            Unit::Mm | Unit::MmPerHour => 0.001,
            Unit::DegreeF
            | Unit::DegreeC
            | Unit::Percent
            | Unit::DegreeCompass
            | Unit::UvIndex
            | Unit::WattPerMeterSquared
            | Unit::Count => 1.0,
        }
    }

    /// Convert a raw number from this unit to `target`.
    pub fn convert(self, value: f64, target: Unit) -> RtdResult<f64> {
        if self == target {
            return Ok(value);
        }
        if self.dimension() != target.dimension() {
            return Err(RtdError::IncompatibleUnits {
                from: self,
                to: target,
            });
        }
        let converted = match (self, target) {
            (Unit::DegreeF, Unit::DegreeC) => (value - 32.0) * 5.0 / 9.0,
            (Unit::DegreeC, Unit::DegreeF) => value * 9.0 / 5.0 + 32.0,
            _ => value * self.base_factor() / target.base_factor(),
        };
        Ok(converted)
    }

    /// Convert a difference between two readings. Unlike `convert` this
    /// ignores the temperature offset, which is what trends need.
    pub fn convert_delta(self, delta: f64, target: Unit) -> RtdResult<f64> {
        if self.dimension() != target.dimension() {
            return Err(RtdError::IncompatibleUnits {
                from: self,
                to: target,
            });
        }
        let converted = match (self, target) {
            (Unit::DegreeF, Unit::DegreeC) => delta * 5.0 / 9.0,
            (Unit::DegreeC, Unit::DegreeF) => delta * 9.0 / 5.0,
            _ => delta * self.base_factor() / target.base_factor(),
        };
        Ok(converted)
    }

    /// Whether `self` can express values of `group`.
    pub fn measures(self, group: UnitGroup) -> bool {
        let expected = match group {
            UnitGroup::Temperature => Dimension::Temperature,
            UnitGroup::Pressure => Dimension::Pressure,
            UnitGroup::Speed => Dimension::Speed,
            UnitGroup::Distance | UnitGroup::Rain | UnitGroup::Altitude => Dimension::Length,
            UnitGroup::RainRate => Dimension::LengthRate,
            UnitGroup::Percent => Dimension::Percent,
            UnitGroup::Direction => Dimension::Angle,
            UnitGroup::Uv => Dimension::Uv,
            UnitGroup::Radiation => Dimension::Irradiance,
            UnitGroup::Count => Dimension::Count,
        };
        self.dimension() == expected
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Unit {
    type Err = RtdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Unit::ALL
            .iter()
            .copied()
            .find(|unit| unit.name() == s)
            .ok_or_else(|| RtdError::UnknownUnit(s.to_string()))
    }
}

/// A scalar value tagged with its unit and unit group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitValue {
    pub value: Option<f64>,
    pub unit: Unit,
    pub group: UnitGroup,
}

impl UnitValue {
    pub fn new(value: Option<f64>, unit: Unit, group: UnitGroup) -> Self {
        Self { value, unit, group }
    }

    /// Value of a named observation expressed in the standard unit of
    /// `system`. `None` when the observation has no known unit group.
    pub fn for_observation(system: UnitSystem, name: &str, value: Option<f64>) -> Option<Self> {
        let group = UnitGroup::for_observation(name)?;
        Some(Self::new(value, system.unit_for(group), group))
    }

    /// Convert to another unit of the same group. `None` values stay `None`.
    pub fn convert(&self, target: Unit) -> RtdResult<UnitValue> {
        StandardUnits.convert(self, target)
    }

    /// Convert to the standard unit of `system` for this value's group.
    pub fn to_system(&self, system: UnitSystem) -> RtdResult<UnitValue> {
        self.convert(system.unit_for(self.group))
    }
}

/// Conversion service used by the buffer, cache and generators.
///
/// Implementations must be pure: no I/O, same answer for the same input.
pub trait UnitConversion: Send + Sync {
    /// Convert a value to `target`, which must measure the value's group.
    fn convert(&self, value: &UnitValue, target: Unit) -> RtdResult<UnitValue>;

    /// Unit and group used for `observation` by `system`.
    fn standard_unit_for(&self, system: UnitSystem, observation: &str) -> Option<(Unit, UnitGroup)>;
}

/// Table-driven conversion covering US, METRIC and METRICWX.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardUnits;

impl UnitConversion for StandardUnits {
    fn convert(&self, value: &UnitValue, target: Unit) -> RtdResult<UnitValue> {
        if !target.measures(value.group) {
            return Err(RtdError::IncompatibleUnits {
                from: value.unit,
                to: target,
            });
        }
        let converted = match value.value {
            Some(v) => Some(value.unit.convert(v, target)?),
            None => None,
        };
        Ok(UnitValue::new(converted, target, value.group))
    }

    fn standard_unit_for(&self, system: UnitSystem, observation: &str) -> Option<(Unit, UnitGroup)> {
        let group = UnitGroup::for_observation(observation)?;
        Some((system.unit_for(group), group))
    }
}

/// A magnitude and a compass direction (degrees, 0-360).
///
/// A `None` direction means "no direction", which is not the same as north.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VectorValue {
    pub magnitude: Option<f64>,
    pub direction: Option<f64>,
}

impl VectorValue {
    pub fn new(magnitude: Option<f64>, direction: Option<f64>) -> Self {
        Self {
            magnitude,
            direction,
        }
    }

    /// Cartesian projection (x east, y north) using the `90 - bearing`
    /// convention. Needs both magnitude and direction.
    pub fn xy(&self) -> Option<(f64, f64)> {
        let magnitude = self.magnitude?;
        let angle = (90.0 - self.direction?).to_radians();
        Some((magnitude * angle.cos(), magnitude * angle.sin()))
    }

    /// Compass bearing of the vector `(x, y)`, normalized to `[0, 360)`.
    pub fn bearing_of(x: f64, y: f64) -> f64 {
        normalize_bearing(90.0 - y.atan2(x).to_degrees())
    }
}

/// Wrap any angle in degrees into `[0, 360)`.
pub fn normalize_bearing(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

const COMPASS_POINTS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

/// Nearest of the 16 compass points for a bearing in degrees.
pub fn degree_to_compass(degrees: f64) -> &'static str {
    let idx = ((normalize_bearing(degrees) + 11.25) / 22.5) as usize % COMPASS_POINTS.len();
    COMPASS_POINTS[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_system_codes() {
        assert_eq!(UnitSystem::from_code(1).unwrap(), UnitSystem::Us);
        assert_eq!(UnitSystem::from_code(16).unwrap(), UnitSystem::Metric);
        assert_eq!(UnitSystem::from_code(17).unwrap(), UnitSystem::MetricWx);
        assert!(UnitSystem::from_code(2).is_err());
        assert_eq!(UnitSystem::MetricWx.code(), 17);
    }

    #[test]
    fn test_temperature_conversion() {
        let c = Unit::DegreeF.convert(212.0, Unit::DegreeC).unwrap();
        assert!((c - 100.0).abs() < 1e-9);
        let f = Unit::DegreeC.convert(-40.0, Unit::DegreeF).unwrap();
        assert!((f + 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_temperature_delta_ignores_offset() {
        let delta = Unit::DegreeC.convert_delta(10.0, Unit::DegreeF).unwrap();
        assert!((delta - 18.0).abs() < 1e-9);
    }

    #[test]
    fn test_incompatible_units() {
        let err = Unit::DegreeC.convert(1.0, Unit::Km).unwrap_err();
        assert!(matches!(err, RtdError::IncompatibleUnits { .. }));
    }

    #[test]
    fn test_unit_from_str() {
        assert_eq!("km_per_hour".parse::<Unit>().unwrap(), Unit::KmPerHour);
        assert!("furlong".parse::<Unit>().is_err());
    }

    #[test]
    fn test_vector_projection() {
        let east = VectorValue::new(Some(5.0), Some(90.0)).xy().unwrap();
        assert!((east.0 - 5.0).abs() < 1e-9);
        assert!(east.1.abs() < 1e-9);

        let south = VectorValue::new(Some(10.0), Some(180.0)).xy().unwrap();
        assert!(south.0.abs() < 1e-9);
        assert!((south.1 + 10.0).abs() < 1e-9);

        assert!(VectorValue::new(Some(3.0), None).xy().is_none());
    }

    #[test]
    fn test_bearing_of() {
        assert!((VectorValue::bearing_of(0.0, 1.0) - 0.0).abs() < 1e-9);
        assert!((VectorValue::bearing_of(1.0, 0.0) - 90.0).abs() < 1e-9);
        assert!((VectorValue::bearing_of(0.0, -1.0) - 180.0).abs() < 1e-9);
        assert!((VectorValue::bearing_of(-1.0, 0.0) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_degree_to_compass() {
        assert_eq!(degree_to_compass(0.0), "N");
        assert_eq!(degree_to_compass(11.0), "N");
        assert_eq!(degree_to_compass(12.0), "NNE");
        assert_eq!(degree_to_compass(180.0), "S");
        assert_eq!(degree_to_compass(350.0), "N");
    }
}
