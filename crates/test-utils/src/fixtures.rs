//! Common test fixtures for realtime data tests.
//!
//! This module provides pre-defined packets and timestamps that represent
//! common station scenarios.

use rtd_common::{ArchiveRecord, LoopPacket, Timestamp, UnitSystem};

/// Well-known instants, all UTC.
pub mod ts {
    use rtd_common::Timestamp;

    /// 2024-01-15T00:00:00Z
    pub const DAY_START: Timestamp = 1_705_276_800;

    /// 2024-01-15T12:00:00Z
    pub const NOON: Timestamp = DAY_START + 12 * 3600;

    /// 2024-01-16T00:00:00Z, the last instant of the 15th's report day
    pub const DAY_END: Timestamp = DAY_START + 86_400;

    /// 2024-01-16T12:00:00Z
    pub const NEXT_NOON: Timestamp = DAY_END + 12 * 3600;
}

/// US-unit loop packet with the given fields.
pub fn loop_packet(date_time: Timestamp, fields: &[(&str, Option<f64>)]) -> LoopPacket {
    packet_in(UnitSystem::Us, date_time, fields)
}

/// Loop packet in an explicit unit system.
pub fn packet_in(
    unit_system: UnitSystem,
    date_time: Timestamp,
    fields: &[(&str, Option<f64>)],
) -> LoopPacket {
    fields
        .iter()
        .fold(LoopPacket::new(date_time, unit_system), |packet, (name, value)| {
            packet.with(name, *value)
        })
}

/// Packet carrying only wind speed and direction.
pub fn wind_packet(date_time: Timestamp, speed: Option<f64>, dir: Option<f64>) -> LoopPacket {
    loop_packet(date_time, &[("windSpeed", speed), ("windDir", dir)])
}

/// A typical fully-populated US packet from a Davis-style station.
pub fn full_us_packet(date_time: Timestamp) -> LoopPacket {
    loop_packet(
        date_time,
        &[
            ("outTemp", Some(51.3)),
            ("inTemp", Some(68.0)),
            ("outHumidity", Some(72.0)),
            ("inHumidity", Some(40.0)),
            ("barometer", Some(30.02)),
            ("windSpeed", Some(6.0)),
            ("windDir", Some(225.0)),
            ("windGust", Some(9.0)),
            ("windGustDir", Some(230.0)),
            ("rain", Some(0.0)),
            ("rainRate", Some(0.0)),
            ("dewpoint", Some(42.6)),
            ("windchill", Some(50.1)),
            ("heatindex", Some(51.3)),
            ("humidex", Some(51.3)),
            ("appTemp", Some(48.9)),
            ("UV", Some(1.2)),
            ("radiation", Some(180.0)),
        ],
    )
}

/// US archive record with the given fields and a 5 minute interval.
pub fn archive_record(date_time: Timestamp, fields: &[(&str, Option<f64>)]) -> ArchiveRecord {
    fields.iter().fold(
        ArchiveRecord::new(date_time, UnitSystem::Us).with_interval(5),
        |record, (name, value)| record.with(name, *value),
    )
}

/// Fresh temporary directory for sinks and databases.
pub fn temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_constants_are_midnight() {
        assert_eq!(ts::DAY_START % 86_400, 0);
        assert_eq!(ts::DAY_END - ts::DAY_START, 86_400);
    }

    #[test]
    fn test_loop_packet_builder() {
        let packet = loop_packet(ts::NOON, &[("outTemp", Some(50.0)), ("rain", None)]);
        assert_eq!(packet.unit_system, UnitSystem::Us);
        assert_eq!(packet.get("outTemp"), Some(50.0));
        assert!(packet.contains("rain"));
        packet.validate().unwrap();
    }

    #[test]
    fn test_archive_record_builder() {
        let record = archive_record(ts::NOON, &[("rain", Some(0.01))]);
        assert_eq!(record.interval, Some(5));
        record.validate().unwrap();
    }
}
