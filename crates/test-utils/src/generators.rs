//! Synthetic packet streams.
//!
//! These generators create predictable, verifiable sequences that can be
//! used across the test suite.

use rtd_common::{ArchiveRecord, LoopPacket, Timestamp};

use crate::fixtures::{archive_record, loop_packet, wind_packet};

/// Loop packets for a single observation, one per `step` seconds.
///
/// # Example
///
/// ```
/// use test_utils::observation_stream;
///
/// let packets = observation_stream(1_705_276_800, 60, "outTemp", &[1.0, 2.0]);
/// assert_eq!(packets.len(), 2);
/// assert_eq!(packets[1].date_time, 1_705_276_860);
/// ```
pub fn observation_stream(
    start: Timestamp,
    step: i64,
    name: &str,
    values: &[f64],
) -> Vec<LoopPacket> {
    values
        .iter()
        .enumerate()
        .map(|(i, value)| loop_packet(start + step * i as i64, &[(name, Some(*value))]))
        .collect()
}

/// Constant wind from one direction, one packet per `step` seconds.
pub fn steady_wind(
    start: Timestamp,
    step: i64,
    count: usize,
    speed: f64,
    dir: f64,
) -> Vec<LoopPacket> {
    (0..count)
        .map(|i| wind_packet(start + step * i as i64, Some(speed), Some(dir)))
        .collect()
}

/// Archive records every `interval_secs`, with fields computed from the index.
pub fn archive_series<F>(
    start: Timestamp,
    interval_secs: i64,
    count: usize,
    fields: F,
) -> Vec<ArchiveRecord>
where
    F: Fn(usize) -> Vec<(&'static str, Option<f64>)>,
{
    (0..count)
        .map(|i| {
            let mut record = archive_record(start + interval_secs * i as i64, &fields(i));
            record.interval = Some(interval_secs / 60);
            record
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steady_wind() {
        let packets = steady_wind(1_705_276_800, 2, 3, 5.0, 90.0);
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[2].date_time, 1_705_276_804);
        assert_eq!(packets[2].get("windDir"), Some(90.0));
    }

    #[test]
    fn test_archive_series() {
        let records = archive_series(1_705_276_800, 300, 4, |i| vec![("rain", Some(i as f64))]);
        assert_eq!(records.len(), 4);
        assert_eq!(records[3].date_time, 1_705_277_700);
        assert_eq!(records[3].get("rain"), Some(3.0));
        assert_eq!(records[0].interval, Some(5));
    }
}
