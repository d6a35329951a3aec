//! Archive store interface and an in-memory implementation.
//!
//! The archive is the append-only record store the engine seeds from at
//! startup and queries on archive boundaries. Queries are bulk operations and
//! must never run while the statistics buffer is locked.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use rtd_common::packet::is_metadata;
use rtd_common::time::archive_day_span;
use rtd_common::{
    ArchiveRecord, DayZone, RtdResult, StandardUnits, Timestamp, TimeSpan, Unit, UnitGroup,
    UnitSystem, UnitValue, VectorValue,
};

use crate::buffer::windrun;
use crate::error::CoreResult;

/// Reduction applied by [`ArchiveStore::query_aggregate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    Min,
    Max,
    Sum,
    Avg,
    Count,
    First,
    Last,
}

/// How archive rows are grouped for a histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucketing {
    /// Field whose value selects the bucket, `ROUND(field / width)`.
    pub bucket_field: String,
    pub bucket_width: f64,
    /// Field summed within each bucket.
    pub sum_field: String,
}

impl Bucketing {
    /// Wind speed summed by compass sector.
    pub fn compass(points: usize) -> Self {
        Self {
            bucket_field: "windDir".to_string(),
            bucket_width: 360.0 / points as f64,
            sum_field: "windSpeed".to_string(),
        }
    }

    pub fn bucket_of(&self, value: f64) -> i64 {
        (value / self.bucket_width).round() as i64
    }
}

/// Day totals for one observation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationSummary {
    pub min: Option<f64>,
    pub min_time: Option<Timestamp>,
    pub max: Option<f64>,
    pub max_time: Option<Timestamp>,
    pub sum: f64,
    pub count: u64,
    #[serde(default)]
    pub max_dir: Option<f64>,
    #[serde(default)]
    pub xsum: f64,
    #[serde(default)]
    pub ysum: f64,
    /// Seconds covered by the vector sums.
    #[serde(default)]
    pub sumtime: f64,
}

impl ObservationSummary {
    /// Fold one sample in, with the same tie rules as the live accumulators.
    pub fn add(&mut self, value: f64, ts: Timestamp) {
        if self.min.map_or(true, |min| value < min) {
            self.min = Some(value);
            self.min_time = Some(ts);
        }
        if self.max.map_or(true, |max| value > max) {
            self.max = Some(value);
            self.max_time = Some(ts);
        }
        self.sum += value;
        self.count += 1;
    }

    /// Re-express the summary in another unit of the same group.
    pub fn converted(&self, from: Unit, to: Unit) -> RtdResult<Self> {
        if from == to {
            return Ok(self.clone());
        }
        let convert = |v: Option<f64>| v.map(|v| from.convert(v, to)).transpose();
        // sums of temperatures are not affine-safe; go through the mean
        let sum = if self.count > 0 {
            from.convert(self.sum / self.count as f64, to)? * self.count as f64
        } else {
            0.0
        };
        Ok(Self {
            min: convert(self.min)?,
            max: convert(self.max)?,
            sum,
            xsum: from.convert_delta(self.xsum, to)?,
            ysum: from.convert_delta(self.ysum, to)?,
            ..self.clone()
        })
    }
}

/// Pre-aggregated statistics for one report day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub span: TimeSpan,
    pub unit_system: UnitSystem,
    pub observations: BTreeMap<String, ObservationSummary>,
    /// Time of the last record with a wind speed.
    #[serde(default)]
    pub last_wind_speed_ts: Option<Timestamp>,
}

impl DailySummary {
    pub fn new(span: TimeSpan, unit_system: UnitSystem) -> Self {
        Self {
            span,
            unit_system,
            observations: BTreeMap::new(),
            last_wind_speed_ts: None,
        }
    }

    /// Summarize the records that fall inside `span`, in the unit system of
    /// the earliest such record. The `wind` vector is derived from
    /// `windSpeed`/`windDir`, weighted by the archive interval. Records
    /// without a `windrun` get one from the wind speed and the time since the
    /// previous wind speed, as live packets do.
    pub fn from_records<'a, I>(span: TimeSpan, records: I) -> RtdResult<Option<Self>>
    where
        I: IntoIterator<Item = &'a ArchiveRecord>,
    {
        let mut in_span: Vec<&ArchiveRecord> = records
            .into_iter()
            .filter(|r| span.includes_archive_time(r.date_time))
            .collect();
        in_span.sort_by_key(|r| r.date_time);

        let mut summary: Option<DailySummary> = None;
        for record in in_span {
            let summary =
                summary.get_or_insert_with(|| DailySummary::new(span, record.unit_system));
            let record = record.to_unit_system(summary.unit_system, &StandardUnits)?;
            summary.add_record(&record)?;
        }
        Ok(summary)
    }

    fn add_record(&mut self, record: &ArchiveRecord) -> RtdResult<()> {
        for (name, value) in &record.observations {
            if is_metadata(name) {
                continue;
            }
            if let Some(value) = value {
                self.observations
                    .entry(name.clone())
                    .or_default()
                    .add(*value, record.date_time);
            }
        }
        if let Some(speed) = record.get("windSpeed") {
            let wind = self.observations.entry("wind".to_string()).or_default();
            let direction = record.get("windDir");
            if wind.max.map_or(true, |max| speed > max) {
                wind.max_dir = direction;
            }
            wind.add(speed, record.date_time);
            if let Some((x, y)) = VectorValue::new(Some(speed), direction).xy() {
                wind.xsum += x;
                wind.ysum += y;
            }
            wind.sumtime += (record.interval.unwrap_or(5) * 60) as f64;

            if !record.observations.contains_key("windrun") {
                if let Some(last) = self.last_wind_speed_ts {
                    let elapsed = record.date_time - last;
                    if elapsed > 0 {
                        let run = windrun(&StandardUnits, speed, elapsed, self.unit_system)?;
                        self.observations
                            .entry("windrun".to_string())
                            .or_default()
                            .add(run, record.date_time);
                    }
                }
            }
            self.last_wind_speed_ts = Some(record.date_time);
        }
        Ok(())
    }

    pub fn get(&self, observation: &str) -> Option<&ObservationSummary> {
        self.observations.get(observation)
    }
}

/// Historical record store consulted at startup and on archive boundaries.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Summary of the report day `day`, `None` when the day has no records.
    async fn daily_summary(&self, day: TimeSpan) -> CoreResult<Option<DailySummary>>;

    /// Reduce one observation over `span`. The value is `None` when no
    /// non-null samples exist.
    async fn query_aggregate(
        &self,
        span: TimeSpan,
        observation: &str,
        reducer: Reducer,
    ) -> CoreResult<UnitValue>;

    /// `(bucket, sum)` pairs over `span`, ordered by bucket.
    async fn query_histogram(
        &self,
        span: TimeSpan,
        bucketing: &Bucketing,
    ) -> CoreResult<Vec<(i64, f64)>>;

    /// Record closest to `ts` within `grace` seconds either side.
    async fn record_near(&self, ts: Timestamp, grace: i64) -> CoreResult<Option<ArchiveRecord>>;

    async fn latest_record(&self) -> CoreResult<Option<ArchiveRecord>>;

    /// Timestamp of the most recent record with non-zero rain.
    async fn last_rain_timestamp(&self) -> CoreResult<Option<Timestamp>>;

    /// All-time `(min, max)` of an observation.
    async fn all_time_range(&self, observation: &str) -> CoreResult<(UnitValue, UnitValue)>;

    async fn store_record(&self, record: &ArchiveRecord) -> CoreResult<()>;
}

/// Tag a raw archive value with the standard unit of `system`.
pub fn archive_value(system: Option<UnitSystem>, observation: &str, value: Option<f64>) -> UnitValue {
    let system = system.unwrap_or(UnitSystem::Us);
    UnitValue::for_observation(system, observation, value)
        .unwrap_or_else(|| UnitValue::new(value, Unit::Count, UnitGroup::Count))
}

#[derive(Debug, Default)]
struct MemoryArchiveInner {
    unit_system: Option<UnitSystem>,
    records: BTreeMap<Timestamp, ArchiveRecord>,
}

impl MemoryArchiveInner {
    /// Records with `span.start < ts <= span.stop`.
    fn in_span(&self, span: TimeSpan) -> impl Iterator<Item = &ArchiveRecord> {
        let range = (span.stop > span.start).then(|| self.records.range(span.start + 1..=span.stop));
        range.into_iter().flatten().map(|(_, r)| r)
    }

    fn values_in<'a>(&'a self, span: TimeSpan, observation: &'a str) -> impl Iterator<Item = f64> + 'a {
        self.in_span(span).filter_map(move |r| r.get(observation))
    }
}

/// Archive held entirely in memory, used by tests and embedders.
#[derive(Debug)]
pub struct MemoryArchive {
    zone: DayZone,
    inner: RwLock<MemoryArchiveInner>,
}

impl MemoryArchive {
    pub fn new(zone: DayZone) -> Self {
        Self {
            zone,
            inner: RwLock::new(MemoryArchiveInner::default()),
        }
    }

    pub async fn with_records(
        zone: DayZone,
        records: impl IntoIterator<Item = ArchiveRecord>,
    ) -> CoreResult<Self> {
        let archive = Self::new(zone);
        for record in records {
            archive.store_record(&record).await?;
        }
        Ok(archive)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.records.is_empty()
    }

    /// Report day containing `ts` in this archive's zone.
    pub fn day_of(&self, ts: Timestamp) -> CoreResult<TimeSpan> {
        Ok(archive_day_span(ts, self.zone)?)
    }
}

#[async_trait]
impl ArchiveStore for MemoryArchive {
    async fn daily_summary(&self, day: TimeSpan) -> CoreResult<Option<DailySummary>> {
        let inner = self.inner.read().await;
        Ok(DailySummary::from_records(day, inner.in_span(day))?)
    }

    async fn query_aggregate(
        &self,
        span: TimeSpan,
        observation: &str,
        reducer: Reducer,
    ) -> CoreResult<UnitValue> {
        let inner = self.inner.read().await;
        let mut values = inner.values_in(span, observation);
        let result = match reducer {
            Reducer::Min => values.reduce(f64::min),
            Reducer::Max => values.reduce(f64::max),
            Reducer::Sum => values.reduce(|a, b| a + b),
            Reducer::Avg => {
                let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
                (n > 0).then(|| sum / n as f64)
            }
            Reducer::Count => {
                let n = values.count() as f64;
                return Ok(UnitValue::new(Some(n), Unit::Count, UnitGroup::Count));
            }
            Reducer::First => values.next(),
            Reducer::Last => values.last(),
        };
        Ok(archive_value(inner.unit_system, observation, result))
    }

    async fn query_histogram(
        &self,
        span: TimeSpan,
        bucketing: &Bucketing,
    ) -> CoreResult<Vec<(i64, f64)>> {
        let inner = self.inner.read().await;
        let mut buckets: BTreeMap<i64, f64> = BTreeMap::new();
        for record in inner.in_span(span) {
            if let (Some(key), Some(value)) = (
                record.get(&bucketing.bucket_field),
                record.get(&bucketing.sum_field),
            ) {
                *buckets.entry(bucketing.bucket_of(key)).or_insert(0.0) += value;
            }
        }
        Ok(buckets.into_iter().collect())
    }

    async fn record_near(&self, ts: Timestamp, grace: i64) -> CoreResult<Option<ArchiveRecord>> {
        let inner = self.inner.read().await;
        let nearest = inner
            .records
            .range(ts - grace.max(0)..=ts + grace.max(0))
            .min_by_key(|(t, _)| (*t - ts).abs())
            .map(|(_, r)| r.clone());
        Ok(nearest)
    }

    async fn latest_record(&self) -> CoreResult<Option<ArchiveRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.records.values().next_back().cloned())
    }

    async fn last_rain_timestamp(&self) -> CoreResult<Option<Timestamp>> {
        let inner = self.inner.read().await;
        Ok(inner
            .records
            .iter()
            .rev()
            .find(|(_, r)| r.get("rain").map_or(false, |rain| rain > 0.0))
            .map(|(ts, _)| *ts))
    }

    async fn all_time_range(&self, observation: &str) -> CoreResult<(UnitValue, UnitValue)> {
        let inner = self.inner.read().await;
        let (min, max) = inner
            .records
            .values()
            .filter_map(|r| r.get(observation))
            .fold((None, None), |(lo, hi): (Option<f64>, Option<f64>), v| {
                (
                    Some(lo.map_or(v, |lo| lo.min(v))),
                    Some(hi.map_or(v, |hi| hi.max(v))),
                )
            });
        Ok((
            archive_value(inner.unit_system, observation, min),
            archive_value(inner.unit_system, observation, max),
        ))
    }

    async fn store_record(&self, record: &ArchiveRecord) -> CoreResult<()> {
        record.validate()?;
        let mut inner = self.inner.write().await;
        let system = *inner.unit_system.get_or_insert(record.unit_system);
        let record = record.to_unit_system(system, &StandardUnits)?;
        inner.records.insert(record.date_time, record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: Timestamp = 1_705_276_800;

    fn utc() -> DayZone {
        DayZone::utc()
    }

    fn record(ts: Timestamp, fields: &[(&str, f64)]) -> ArchiveRecord {
        fields.iter().fold(
            ArchiveRecord::new(ts, UnitSystem::Us).with_interval(5),
            |r, (n, v)| r.with(n, Some(*v)),
        )
    }

    #[test]
    fn test_summary_from_records() {
        let span = TimeSpan::new(T0, T0 + 86_400);
        let records = vec![
            record(T0, &[("outTemp", 99.0)]),
            record(T0 + 300, &[("outTemp", 40.0)]),
            record(T0 + 600, &[("outTemp", 50.0)]),
        ];
        let summary = DailySummary::from_records(span, &records).unwrap().unwrap();
        let temp = summary.get("outTemp").unwrap();
        assert_eq!(temp.min, Some(40.0));
        assert_eq!(temp.max, Some(50.0));
        assert_eq!(temp.count, 2);
        assert_eq!(temp.sum, 90.0);
    }

    #[test]
    fn test_summary_derives_windrun_in_time_order() {
        let span = TimeSpan::new(T0, T0 + 86_400);
        let wx = |ts: Timestamp, fields: &[(&str, f64)]| {
            fields.iter().fold(
                ArchiveRecord::new(ts, UnitSystem::MetricWx).with_interval(5),
                |r, (n, v)| r.with(n, Some(*v)),
            )
        };
        let records = vec![
            wx(T0 + 900, &[("windSpeed", 2.0), ("windrun", 5.0)]),
            wx(T0 + 600, &[("windSpeed", 10.0)]),
            wx(T0 + 300, &[("windSpeed", 10.0)]),
        ];
        let summary = DailySummary::from_records(span, &records).unwrap().unwrap();

        // 10 m/s for 300 s is 3 km; the stored windrun is kept as is
        let run = summary.get("windrun").unwrap();
        assert_eq!(run.count, 2);
        assert!((run.sum - 8.0).abs() < 1e-9);
        assert!((run.min.unwrap() - 3.0).abs() < 1e-9);
        assert_eq!(run.min_time, Some(T0 + 600));
        assert_eq!(summary.last_wind_speed_ts, Some(T0 + 900));
        assert_eq!(summary.get("wind").unwrap().count, 3);
    }

    #[test]
    fn test_summary_conversion_via_mean() {
        let mut summary = ObservationSummary::default();
        summary.add(32.0, 1);
        summary.add(212.0, 2);
        let c = summary.converted(Unit::DegreeF, Unit::DegreeC).unwrap();
        assert!((c.sum - 100.0).abs() < 1e-9);
        assert!((c.max.unwrap() - 100.0).abs() < 1e-9);
        assert_eq!(c.count, 2);
    }

    #[test]
    fn test_compass_bucketing() {
        let rose = Bucketing::compass(16);
        assert_eq!(rose.bucket_of(0.0), 0);
        assert_eq!(rose.bucket_of(11.0), 0);
        assert_eq!(rose.bucket_of(12.0), 1);
        assert_eq!(rose.bucket_of(355.0), 16);
    }

    #[tokio::test]
    async fn test_memory_archive_queries() {
        let archive = MemoryArchive::with_records(
            utc(),
            vec![
                record(T0 + 300, &[("outTemp", 40.0), ("rain", 0.0)]),
                record(T0 + 600, &[("outTemp", 45.0), ("rain", 0.02)]),
                record(T0 + 900, &[("outTemp", 43.0), ("rain", 0.0)]),
            ],
        )
        .await
        .unwrap();

        let span = TimeSpan::new(T0, T0 + 86_400);
        let max = archive.query_aggregate(span, "outTemp", Reducer::Max).await.unwrap();
        assert_eq!(max.value, Some(45.0));
        assert_eq!(max.unit, Unit::DegreeF);

        let rain = archive.query_aggregate(span, "rain", Reducer::Sum).await.unwrap();
        assert_eq!(rain.value, Some(0.02));

        let none = archive
            .query_aggregate(TimeSpan::new(0, 10), "outTemp", Reducer::Avg)
            .await
            .unwrap();
        assert_eq!(none.value, None);

        assert_eq!(archive.last_rain_timestamp().await.unwrap(), Some(T0 + 600));
        assert_eq!(
            archive.latest_record().await.unwrap().unwrap().date_time,
            T0 + 900
        );
    }

    #[tokio::test]
    async fn test_record_near_respects_grace() {
        let archive =
            MemoryArchive::with_records(utc(), vec![record(T0 + 300, &[("outTemp", 40.0)])])
                .await
                .unwrap();
        assert!(archive.record_near(T0 + 290, 0).await.unwrap().is_none());
        assert!(archive.record_near(T0 + 290, 10).await.unwrap().is_some());
        assert!(archive.record_near(T0 + 300, 0).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_store_converts_to_first_unit_system() {
        let archive = MemoryArchive::new(utc());
        archive
            .store_record(&record(T0 + 300, &[("outTemp", 50.0)]))
            .await
            .unwrap();
        let metric = ArchiveRecord::new(T0 + 600, UnitSystem::MetricWx).with("outTemp", Some(0.0));
        archive.store_record(&metric).await.unwrap();
        let (min, _) = archive.all_time_range("outTemp").await.unwrap();
        assert!((min.value.unwrap() - 32.0).abs() < 1e-9);
        assert_eq!(archive.day_of(T0 + 600).unwrap().start, T0);
    }
}
