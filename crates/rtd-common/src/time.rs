//! Report-day arithmetic for archive timestamps.
//!
//! Archive timestamps mark the *end* of a period, so a span owns its stop
//! instant but not its start: midnight belongs to the day that just ended.

use chrono::{
    Datelike, FixedOffset, Local, LocalResult, NaiveDate, Offset, TimeDelta, TimeZone, Utc,
};
use serde::{Deserialize, Serialize};

use crate::error::{RtdError, RtdResult};
use crate::packet::Timestamp;

/// Half-open interval `(start, stop]` in epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSpan {
    pub start: Timestamp,
    pub stop: Timestamp,
}

impl TimeSpan {
    pub fn new(start: Timestamp, stop: Timestamp) -> Self {
        Self { start, stop }
    }

    /// `start < ts <= stop`
    pub fn includes_archive_time(&self, ts: Timestamp) -> bool {
        self.start < ts && ts <= self.stop
    }

    pub fn length(&self) -> i64 {
        self.stop - self.start
    }

    /// The span ending at `stop` and reaching back `seconds`.
    pub fn ending_at(stop: Timestamp, seconds: i64) -> Self {
        Self::new(stop - seconds, stop)
    }
}

impl std::fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let utc = DayZone::utc();
        write!(
            f,
            "[{} -> {}]",
            format_iso(self.start, utc),
            format_iso(self.stop, utc)
        )
    }
}

/// Zone whose local midnight starts each report day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayZone {
    /// An explicit offset from UTC that never changes.
    Fixed(FixedOffset),
    /// The host's zone, daylight saving included.
    Local,
}

impl DayZone {
    pub fn utc() -> Self {
        DayZone::Fixed(Utc.fix())
    }

    /// Fixed zone from minutes east of UTC, or the host zone when unset.
    pub fn from_minutes(minutes: Option<i32>) -> RtdResult<Self> {
        match minutes {
            Some(m) => FixedOffset::east_opt(m * 60).map(DayZone::Fixed).ok_or_else(|| {
                RtdError::InvalidPacket(format!("UTC offset out of range: {} min", m))
            }),
            None => Ok(DayZone::Local),
        }
    }

    /// UTC offset in force at `ts`.
    pub fn offset_at(&self, ts: Timestamp) -> RtdResult<FixedOffset> {
        match self {
            DayZone::Fixed(offset) => Ok(*offset),
            DayZone::Local => Local
                .timestamp_opt(ts, 0)
                .single()
                .map(|dt| dt.offset().fix())
                .ok_or(RtdError::InvalidTimestamp(ts)),
        }
    }

    fn date_of(&self, ts: Timestamp) -> RtdResult<NaiveDate> {
        match self {
            DayZone::Fixed(offset) => date_in(offset, ts),
            DayZone::Local => date_in(&Local, ts),
        }
    }

    fn midnight(&self, date: NaiveDate) -> RtdResult<Timestamp> {
        match self {
            DayZone::Fixed(offset) => midnight_in(offset, date),
            DayZone::Local => midnight_in(&Local, date),
        }
    }
}

fn date_in<Tz: TimeZone>(tz: &Tz, ts: Timestamp) -> RtdResult<NaiveDate> {
    tz.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.date_naive())
        .ok_or(RtdError::InvalidTimestamp(ts))
}

/// First instant of `date` in `tz`.
fn midnight_in<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> RtdResult<Timestamp> {
    let naive = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| RtdError::InvalidPacket(format!("no midnight on {}", date)))?;
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => Ok(dt.timestamp()),
        LocalResult::None => {
            // midnight skipped by a forward jump: the day starts where the gap ends
            let before = tz
                .offset_from_utc_datetime(&(naive - TimeDelta::days(1)))
                .fix();
            Ok(naive.and_utc().timestamp() - i64::from(before.local_minus_utc()))
        }
    }
}

/// Span of the calendar day `date` in `zone`. Days that cross a daylight
/// saving change are 23 or 25 hours long.
pub fn day_span(date: NaiveDate, zone: DayZone) -> RtdResult<TimeSpan> {
    let next = date
        .succ_opt()
        .ok_or_else(|| RtdError::InvalidPacket(format!("no day after {}", date)))?;
    Ok(TimeSpan::new(zone.midnight(date)?, zone.midnight(next)?))
}

/// Report day that owns the archive timestamp `ts`.
pub fn archive_day_span(ts: Timestamp, zone: DayZone) -> RtdResult<TimeSpan> {
    day_span(zone.date_of(ts - 1)?, zone)
}

/// Calendar month that owns the archive timestamp `ts`.
pub fn archive_month_span(ts: Timestamp, zone: DayZone) -> RtdResult<TimeSpan> {
    let date = zone.date_of(ts - 1)?;
    let first = first_of_month(date.year(), date.month())?;
    let next = if date.month() == 12 {
        first_of_month(date.year() + 1, 1)?
    } else {
        first_of_month(date.year(), date.month() + 1)?
    };
    Ok(TimeSpan::new(zone.midnight(first)?, zone.midnight(next)?))
}

/// Calendar year that owns the archive timestamp `ts`.
pub fn archive_year_span(ts: Timestamp, zone: DayZone) -> RtdResult<TimeSpan> {
    let date = zone.date_of(ts - 1)?;
    Ok(TimeSpan::new(
        zone.midnight(first_of_month(date.year(), 1)?)?,
        zone.midnight(first_of_month(date.year() + 1, 1)?)?,
    ))
}

fn first_of_month(year: i32, month: u32) -> RtdResult<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| RtdError::InvalidPacket(format!("invalid month {}-{}", year, month)))
}

/// ISO 8601 rendering of `ts` in `zone`, e.g. `2024-01-15T12:00:00+01:00`.
pub fn format_iso(ts: Timestamp, zone: DayZone) -> String {
    format_local(ts, zone, "%Y-%m-%dT%H:%M:%S%:z")
}

/// Render `ts` with a strftime pattern in `zone`.
pub fn format_local(ts: Timestamp, zone: DayZone, pattern: &str) -> String {
    let local = zone
        .offset_at(ts)
        .ok()
        .and_then(|offset| offset.timestamp_opt(ts, 0).single());
    match local {
        Some(dt) => dt.format(pattern).to_string(),
        None => ts.to_string(),
    }
}
