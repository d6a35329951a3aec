//! Loop packets, archive records and synthesized snapshots.
//!
//! All three share the station-driver JSON shape:
//! `{"dateTime": 1700000000, "usUnits": 1, "outTemp": 51.2, "rain": null}`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{RtdError, RtdResult};
use crate::units::{UnitConversion, UnitSystem, UnitValue};

/// Seconds since the Unix epoch.
pub type Timestamp = i64;

/// Observation name to value. `None` means the field was present but null.
pub type Observations = BTreeMap<String, Option<f64>>;

/// Field names that describe a packet rather than measure anything.
pub const METADATA_FIELDS: [&str; 3] = ["dateTime", "usUnits", "interval"];

/// Whether `name` is a metadata field.
pub fn is_metadata(name: &str) -> bool {
    METADATA_FIELDS.contains(&name)
}

/// A single, possibly partial, real-time sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopPacket {
    #[serde(rename = "dateTime")]
    pub date_time: Timestamp,

    #[serde(rename = "usUnits")]
    pub unit_system: UnitSystem,

    #[serde(flatten)]
    pub observations: Observations,
}

impl LoopPacket {
    pub fn new(date_time: Timestamp, unit_system: UnitSystem) -> Self {
        Self {
            date_time,
            unit_system,
            observations: Observations::new(),
        }
    }

    /// Builder-style setter.
    pub fn with(mut self, name: &str, value: Option<f64>) -> Self {
        self.observations.insert(name.to_string(), value);
        self
    }

    /// Value of a field, `None` when absent or null.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.observations.get(name).copied().flatten()
    }

    /// Whether the packet carries the field at all, null or not.
    pub fn contains(&self, name: &str) -> bool {
        self.observations.contains_key(name)
    }

    pub fn from_json(json: &str) -> RtdResult<Self> {
        let packet: LoopPacket = serde_json::from_str(json)?;
        packet.validate()?;
        Ok(packet)
    }

    pub fn validate(&self) -> RtdResult<()> {
        validate_timestamp(self.date_time)
    }

    /// Copy of the packet with every known observation expressed in `target`.
    pub fn to_unit_system(
        &self,
        target: UnitSystem,
        units: &dyn UnitConversion,
    ) -> RtdResult<LoopPacket> {
        Ok(LoopPacket {
            date_time: self.date_time,
            unit_system: target,
            observations: convert_observations(&self.observations, self.unit_system, target, units)?,
        })
    }
}

/// A completed-period aggregate record from the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    #[serde(rename = "dateTime")]
    pub date_time: Timestamp,

    #[serde(rename = "usUnits")]
    pub unit_system: UnitSystem,

    /// Archive period length in minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<i64>,

    #[serde(flatten)]
    pub observations: Observations,
}

impl ArchiveRecord {
    pub fn new(date_time: Timestamp, unit_system: UnitSystem) -> Self {
        Self {
            date_time,
            unit_system,
            interval: None,
            observations: Observations::new(),
        }
    }

    pub fn with(mut self, name: &str, value: Option<f64>) -> Self {
        self.observations.insert(name.to_string(), value);
        self
    }

    pub fn with_interval(mut self, minutes: i64) -> Self {
        self.interval = Some(minutes);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.observations.get(name).copied().flatten()
    }

    pub fn validate(&self) -> RtdResult<()> {
        validate_timestamp(self.date_time)?;
        if let Some(interval) = self.interval {
            if interval <= 0 {
                return Err(RtdError::InvalidPacket(format!(
                    "archive interval must be positive, got {}",
                    interval
                )));
            }
        }
        Ok(())
    }

    pub fn to_unit_system(
        &self,
        target: UnitSystem,
        units: &dyn UnitConversion,
    ) -> RtdResult<ArchiveRecord> {
        Ok(ArchiveRecord {
            date_time: self.date_time,
            unit_system: target,
            interval: self.interval,
            observations: convert_observations(&self.observations, self.unit_system, target, units)?,
        })
    }

    /// View the record as a loop packet, e.g. for priming a cache.
    pub fn as_loop_packet(&self) -> LoopPacket {
        LoopPacket {
            date_time: self.date_time,
            unit_system: self.unit_system,
            observations: self.observations.clone(),
        }
    }
}

/// Field-complete, point-in-time packet handed to generators.
///
/// Every manifest field is present; stale or never-seen fields are null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "dateTime")]
    pub date_time: Timestamp,

    /// `None` until the first packet has been seen.
    #[serde(rename = "usUnits")]
    pub unit_system: Option<UnitSystem>,

    #[serde(flatten)]
    pub observations: Observations,
}

impl Snapshot {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.observations.get(name).copied().flatten()
    }

    pub fn to_json(&self) -> RtdResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn validate_timestamp(ts: Timestamp) -> RtdResult<()> {
    // anything before 1990 or past 2100 is a driver bug, not weather
    const MIN_TS: Timestamp = 631_152_000;
    const MAX_TS: Timestamp = 4_102_444_800;
    if !(MIN_TS..MAX_TS).contains(&ts) {
        return Err(RtdError::InvalidTimestamp(ts));
    }
    Ok(())
}

fn convert_observations(
    observations: &Observations,
    from: UnitSystem,
    to: UnitSystem,
    units: &dyn UnitConversion,
) -> RtdResult<Observations> {
    if from == to {
        return Ok(observations.clone());
    }
    let mut converted = Observations::new();
    for (name, value) in observations {
        let new_value = match units.standard_unit_for(from, name) {
            Some((unit, group)) => {
                let target = to.unit_for(group);
                units.convert(&UnitValue::new(*value, unit, group), target)?.value
            }
            None => *value,
        };
        converted.insert(name.clone(), new_value);
    }
    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::StandardUnits;

    #[test]
    fn test_parse_loop_packet() {
        let json = r#"{"dateTime": 1700000000, "usUnits": 1, "outTemp": 50.0, "rain": null}"#;
        let packet = LoopPacket::from_json(json).unwrap();
        assert_eq!(packet.date_time, 1_700_000_000);
        assert_eq!(packet.unit_system, UnitSystem::Us);
        assert_eq!(packet.get("outTemp"), Some(50.0));
        assert!(packet.contains("rain"));
        assert_eq!(packet.get("rain"), None);
        assert!(!packet.contains("windSpeed"));
    }

    #[test]
    fn test_rejects_bad_unit_system() {
        let json = r#"{"dateTime": 1700000000, "usUnits": 3, "outTemp": 50.0}"#;
        assert!(LoopPacket::from_json(json).is_err());
    }

    #[test]
    fn test_rejects_bad_timestamp() {
        let json = r#"{"dateTime": 12, "usUnits": 1}"#;
        assert!(matches!(
            LoopPacket::from_json(json),
            Err(RtdError::InvalidTimestamp(12))
        ));
    }

    #[test]
    fn test_convert_keeps_unknown_fields() {
        let packet = LoopPacket::new(1_700_000_000, UnitSystem::Us)
            .with("outTemp", Some(32.0))
            .with("leafWet1", Some(3.0))
            .with("windSpeed", None);
        let metric = packet
            .to_unit_system(UnitSystem::Metric, &StandardUnits)
            .unwrap();
        assert_eq!(metric.unit_system, UnitSystem::Metric);
        assert!(metric.get("outTemp").unwrap().abs() < 1e-9);
        assert_eq!(metric.get("leafWet1"), Some(3.0));
        assert!(metric.contains("windSpeed"));
    }

    #[test]
    fn test_archive_record_interval() {
        let json = r#"{"dateTime": 1700000100, "usUnits": 17, "interval": 5, "rain": 0.2}"#;
        let record: ArchiveRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.interval, Some(5));
        assert_eq!(record.get("rain"), Some(0.2));
        assert!(!record.observations.contains_key("interval"));
    }

    #[test]
    fn test_snapshot_serializes_nulls() {
        let mut observations = Observations::new();
        observations.insert("outTemp".to_string(), None);
        let snapshot = Snapshot {
            date_time: 1_700_000_000,
            unit_system: Some(UnitSystem::Us),
            observations,
        };
        let json = snapshot.to_json().unwrap();
        assert!(json.contains("\"outTemp\":null"));
        assert!(json.contains("\"usUnits\":1"));
    }
}
