//! Archive-derived aggregates recomputed on archive boundaries.
//!
//! Everything here is a bulk archive query. None of it runs per packet and
//! none of it touches the statistics buffer.

use serde::Serialize;
use tracing::{debug, instrument, warn};

use rtd_common::time::{archive_day_span, archive_month_span, archive_year_span};
use rtd_common::{DayZone, Timestamp, TimeSpan, Unit, UnitConversion, UnitValue};

use crate::archive::{ArchiveStore, Bucketing, Reducer};
use crate::config::CoreConfig;
use crate::error::CoreResult;

/// Aggregates shipped to generators with every `Stats` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PeriodicStats {
    /// Archive time the stats were computed for.
    pub computed_at: Timestamp,
    /// Summed wind speed per compass sector, clockwise from north.
    pub windrose: Vec<f64>,
    pub last_rain_ts: Option<Timestamp>,
    pub barometer_min: Option<UnitValue>,
    pub barometer_max: Option<UnitValue>,
    /// Rain since the start of the month, up to the start of today.
    pub month_rain: Option<UnitValue>,
    /// Rain since the start of the year, up to the start of today.
    pub year_rain: Option<UnitValue>,
    /// Average wind speed of the latest archive period.
    pub archive_wind_speed: Option<UnitValue>,
}

/// Windrose over the `period` seconds ending at `now`.
///
/// Bucket `points` is north approached from the west and folds into bucket 0.
/// Values are rounded to one decimal.
pub async fn calc_windrose(
    archive: &dyn ArchiveStore,
    now: Timestamp,
    period: i64,
    points: usize,
) -> CoreResult<Vec<f64>> {
    let mut rose = vec![0.0; points];
    let rows = archive
        .query_histogram(TimeSpan::ending_at(now, period), &Bucketing::compass(points))
        .await?;
    for (bucket, sum) in rows {
        let idx = if bucket == points as i64 { 0 } else { bucket };
        match usize::try_from(idx).ok().filter(|i| *i < points) {
            Some(i) => rose[i] += sum,
            None => warn!(bucket, "Windrose bucket out of range"),
        }
    }
    Ok(rose.into_iter().map(|v| (v * 10.0).round() / 10.0).collect())
}

/// Change in `observation` between the archive record nearest `then_ts` and
/// `now`, in `target` units. `None` when either end is missing.
pub async fn calc_trend(
    archive: &dyn ArchiveStore,
    units: &dyn UnitConversion,
    observation: &str,
    now: &UnitValue,
    target: Unit,
    then_ts: Timestamp,
    grace: i64,
) -> CoreResult<Option<f64>> {
    if now.value.is_none() {
        return Ok(None);
    }
    let Some(record) = archive.record_near(then_ts, grace).await? else {
        return Ok(None);
    };
    let Some(then) = record.get(observation) else {
        return Ok(None);
    };
    let then = UnitValue::for_observation(record.unit_system, observation, Some(then))
        .unwrap_or_else(|| UnitValue::new(Some(then), now.unit, now.group));
    let now = units.convert(now, target)?.value;
    let then = units.convert(&then, target)?.value;
    Ok(now.zip(then).map(|(now, then)| now - then))
}

/// Rain summed over `span`, or `None` for an empty span.
async fn rain_over(archive: &dyn ArchiveStore, span: TimeSpan) -> CoreResult<Option<UnitValue>> {
    if span.stop <= span.start {
        return Ok(None);
    }
    Ok(Some(archive.query_aggregate(span, "rain", Reducer::Sum).await?))
}

/// Recompute every periodic aggregate for archive time `now`.
#[instrument(skip(archive, config))]
pub async fn compute_periodic_stats(
    archive: &dyn ArchiveStore,
    config: &CoreConfig,
    zone: DayZone,
    now: Timestamp,
) -> CoreResult<PeriodicStats> {
    let windrose = calc_windrose(
        archive,
        now,
        config.windrose_period_secs,
        config.windrose_points,
    )
    .await?;
    let last_rain_ts = archive.last_rain_timestamp().await?;
    let (barometer_min, barometer_max) = archive.all_time_range("barometer").await?;

    let today = archive_day_span(now, zone)?;
    let month = archive_month_span(now, zone)?;
    let year = archive_year_span(now, zone)?;
    let month_rain = rain_over(archive, TimeSpan::new(month.start, today.start)).await?;
    let year_rain = rain_over(archive, TimeSpan::new(year.start, today.start)).await?;

    let archive_wind_speed = archive
        .latest_record()
        .await?
        .and_then(|r| UnitValue::for_observation(r.unit_system, "windSpeed", r.get("windSpeed")));

    debug!(
        last_rain_ts = ?last_rain_ts,
        rose_total = windrose.iter().sum::<f64>(),
        "Computed periodic stats"
    );

    Ok(PeriodicStats {
        computed_at: now,
        windrose,
        last_rain_ts,
        barometer_min: barometer_min.value.map(|_| barometer_min),
        barometer_max: barometer_max.value.map(|_| barometer_max),
        month_rain,
        year_rain,
        archive_wind_speed,
    })
}
