//! Gauge data generator.
//!
//! Renders each snapshot into the flat, string-valued JSON document the
//! dashboard gauges poll. A fixed set of computed fields comes first; the
//! field map is applied last so it can override any of them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use rtd_common::time::format_local;
use rtd_common::{
    degree_to_compass, ArchiveRecord, DayZone, Snapshot, StandardUnits, Timestamp, Unit, UnitGroup,
    UnitValue,
};
use rtd_core::{
    calc_trend, Accumulator, ArchiveStore, Artifact, CoreError, CoreResult, Generator,
    ObservationStats, PeriodicStats, SharedBuffer,
};

use crate::config::{
    Aggregate, ContactCheck, ContactSource, FieldSpec, GeneratorConfig, OutputGroups,
};

/// Gauge data format version.
const GAUGE_DATA_VERSION: &str = "14";

/// Window for the short-term wind figures.
const TEN_MINUTES: i64 = 600;

const DEFAULT_PRESS_LOW_HPA: f64 = 850.0;
const DEFAULT_PRESS_HIGH_HPA: f64 = 1100.0;
const NO_RAIN_YET: &str = "1/1/1900 00:00";

fn fmt(value: f64, decimals: usize) -> String {
    format!("{:.*}", decimals, value)
}

fn convert_or(value: Option<f64>, from: Unit, to: Unit, default: f64) -> f64 {
    value
        .and_then(|v| from.convert(v, to).ok())
        .unwrap_or(default)
}

/// Everything the document needs from the buffer, copied out under one
/// read lock.
#[derive(Debug)]
struct BufferView {
    zone: DayZone,
    day_start: Timestamp,
    stats: BTreeMap<String, ObservationStats>,
    speed_unit: Option<Unit>,
    avg_speed: Option<f64>,
    max_gust: Option<f64>,
    avg_bearing: Option<f64>,
    bearing_range: Option<(f64, f64)>,
    dominant_dir: Option<f64>,
}

impl BufferView {
    async fn capture(buffer: &SharedBuffer, ts: Timestamp) -> Self {
        let buf = buffer.read().await;
        let speed = buf.get("windSpeed");
        let gust = buf
            .get("windGust")
            .and_then(|acc| acc.history_max(ts, TEN_MINUTES))
            .or_else(|| speed.and_then(|acc| acc.history_max(ts, TEN_MINUTES)));
        let wind = buf.get("wind").and_then(Accumulator::as_vector);

        Self {
            zone: buf.zone(),
            day_start: buf.active_day_span().start,
            stats: buf.all_stats(),
            speed_unit: buf.contains("windSpeed").then(|| buf.unit_for("windSpeed").0),
            avg_speed: speed
                .and_then(Accumulator::as_scalar)
                .and_then(|acc| acc.history_average(ts, TEN_MINUTES)),
            max_gust: gust.map(|(value, _)| value),
            avg_bearing: wind
                .and_then(|acc| acc.history_average(ts, TEN_MINUTES))
                .and_then(|avg| avg.direction),
            bearing_range: wind.and_then(|acc| acc.history_bearing_range(ts, TEN_MINUTES)),
            dominant_dir: wind.and_then(|acc| acc.day_vector_average().direction),
        }
    }
}

/// Field-map driven gauge data generator.
pub struct GaugeDataGenerator {
    name: String,
    file_name: String,
    min_interval: Option<Duration>,
    groups: OutputGroups,
    date_format: String,
    mtd_rain: bool,
    ytd_rain: bool,
    field_map: BTreeMap<String, FieldSpec>,
    archive: Arc<dyn ArchiveStore>,
    stats: Option<PeriodicStats>,
    last_dir: f64,
    contact: Option<ContactCheck>,
    lost_contact: bool,
}

impl GaugeDataGenerator {
    pub fn new(config: &GeneratorConfig, archive: Arc<dyn ArchiveStore>) -> Self {
        Self {
            name: config.name.clone(),
            file_name: config.file_name(),
            min_interval: config.min_interval_secs.map(Duration::from_secs),
            groups: config.groups.normalized(),
            date_format: config.date_format.clone(),
            mtd_rain: config.mtd_rain,
            ytd_rain: config.ytd_rain,
            field_map: config.effective_field_map(),
            archive,
            stats: None,
            last_dir: 0.0,
            contact: config.contact_check(),
            lost_contact: false,
        }
    }

    /// Update the lost contact flag from input of kind `source`, if that is
    /// where this station reports it.
    fn check_contact(&mut self, source: ContactSource, value_of: impl Fn(&str) -> Option<f64>) {
        let Some(check) = self.contact.filter(|c| c.source == source) else {
            return;
        };
        let lost = check.is_lost(value_of(check.field));
        if lost != self.lost_contact {
            if lost {
                warn!(generator = %self.name, field = check.field, "Station lost contact with its sensors");
            } else {
                debug!(generator = %self.name, "Sensor contact restored");
            }
        }
        self.lost_contact = lost;
    }

    fn group_of(spec: &FieldSpec) -> UnitGroup {
        spec.group
            .or_else(|| UnitGroup::for_observation(&spec.source))
            .unwrap_or(UnitGroup::Count)
    }

    /// Trend values for every trend field, in output units.
    async fn trends(&self, snapshot: &Snapshot) -> BTreeMap<String, Option<f64>> {
        let mut trends = BTreeMap::new();
        let Some(system) = snapshot.unit_system else {
            return trends;
        };
        for (field, spec) in &self.field_map {
            if spec.aggregate != Some(Aggregate::Trend) {
                continue;
            }
            let group = Self::group_of(spec);
            let now = UnitValue::new(snapshot.get(&spec.source), system.unit_for(group), group);
            let result = calc_trend(
                self.archive.as_ref(),
                &StandardUnits,
                &spec.source,
                &now,
                self.groups.unit_for(group),
                snapshot.date_time - spec.period_secs,
                spec.grace_secs,
            )
            .await;
            let trend = match result {
                Ok(trend) => trend,
                Err(e) => {
                    warn!(generator = %self.name, field = %field, error = %e, "Trend unavailable");
                    None
                }
            };
            trends.insert(field.clone(), trend);
        }
        trends
    }

    fn field_value(
        &self,
        spec: &FieldSpec,
        snapshot: &Snapshot,
        view: &BufferView,
        trend: Option<f64>,
    ) -> String {
        let group = Self::group_of(spec);
        let target = self.groups.unit_for(group);
        let stats = view.stats.get(&spec.source);

        let value = match spec.aggregate {
            None => match snapshot.unit_system {
                Some(system) => convert_or(
                    snapshot.get(&spec.source),
                    system.unit_for(group),
                    target,
                    spec.default,
                ),
                None => spec.default,
            },
            Some(Aggregate::Trend) => trend.unwrap_or(spec.default),
            Some(Aggregate::MaxDir) => stats.and_then(|s| s.max_dir).unwrap_or(spec.default),
            Some(time) if time.is_time() => {
                let at = stats.and_then(|s| match time {
                    Aggregate::Mintime => s.min_time,
                    Aggregate::Maxtime => s.max_time,
                    _ => s.last_time,
                });
                return format_local(at.unwrap_or(view.day_start), view.zone, &spec.time_format);
            }
            Some(aggregate) => match stats {
                Some(s) => {
                    let raw = match aggregate {
                        Aggregate::Min => s.min,
                        Aggregate::Max => s.max,
                        Aggregate::Sum => (s.count > 0).then_some(s.sum),
                        _ => s.last,
                    };
                    convert_or(raw, s.unit, target, spec.default)
                }
                None => spec.default,
            },
        };
        fmt(value, spec.decimals)
    }

    /// Buffer rain sum plus an archive rain total, in output rain units.
    fn rain_to_date(&self, archived: Option<&UnitValue>, view: &BufferView) -> f64 {
        let target = self.groups.rain;
        let Some(archived) = archived.and_then(|r| r.convert(target).ok()).and_then(|r| r.value)
        else {
            return 0.0;
        };
        let today = view
            .stats
            .get("rain")
            .map(|s| convert_or((s.count > 0).then_some(s.sum), s.unit, target, 0.0))
            .unwrap_or(0.0);
        archived + today
    }

    fn render(
        &mut self,
        snapshot: &Snapshot,
        view: &BufferView,
        trends: &BTreeMap<String, Option<f64>>,
    ) -> Map<String, Value> {
        let ts = snapshot.date_time;
        let zone = view.zone;
        let groups = self.groups;
        let mut data = Map::new();
        let mut put = |key: &str, value: String| {
            data.insert(key.to_string(), Value::String(value));
        };

        put("timeUTC", format_local(ts, DayZone::utc(), "%Y,%m,%d,%H,%M,%S"));
        put("date", format_local(ts, zone, &self.date_format));
        put("dateFormat", self.date_format.replace('%', ""));
        put("SensorContactLost", (if self.lost_contact { "1" } else { "0" }).to_string());
        put("tempunit", groups.temperature.label().to_string());
        put("windunit", groups.speed.label().to_string());
        put("pressunit", groups.pressure.label().to_string());
        put("rainunit", groups.rain.label().to_string());
        put("cloudbaseunit", groups.altitude.label().to_string());

        let press = |value: Option<&UnitValue>, fallback_hpa: f64| {
            value
                .and_then(|v| v.convert(groups.pressure).ok())
                .and_then(|v| v.value)
                .unwrap_or_else(|| convert_or(Some(fallback_hpa), Unit::HPa, groups.pressure, fallback_hpa))
        };
        let stats = self.stats.as_ref();
        put(
            "pressL",
            fmt(press(stats.and_then(|s| s.barometer_min.as_ref()), DEFAULT_PRESS_LOW_HPA), 1),
        );
        put(
            "pressH",
            fmt(press(stats.and_then(|s| s.barometer_max.as_ref()), DEFAULT_PRESS_HIGH_HPA), 1),
        );

        put(
            "domwinddir",
            degree_to_compass(view.dominant_dir.unwrap_or(0.0)).to_string(),
        );
        put(
            "LastRainTipISO",
            match stats.and_then(|s| s.last_rain_ts) {
                Some(t) => format_local(t, zone, &self.date_format),
                None => NO_RAIN_YET.to_string(),
            },
        );

        let speed_unit = view.speed_unit.unwrap_or(groups.speed);
        put("wspeed", fmt(convert_or(view.avg_speed, speed_unit, groups.speed, 0.0), 1));
        put("wgust", fmt(convert_or(view.max_gust, speed_unit, groups.speed, 0.0), 1));

        // the needle stays on the last known direction rather than north
        let bearing = snapshot.get("windDir").unwrap_or(self.last_dir);
        self.last_dir = bearing;
        put("bearing", fmt(bearing, 1));
        put("avgbearing", fmt(view.avg_bearing.unwrap_or(0.0), 1));
        let (from, to) = view.bearing_range.unwrap_or((0.0, 0.0));
        put("BearingRangeFrom10", fmt(from, 1));
        put("BearingRangeTo10", fmt(to, 1));

        put("ver", GAUGE_DATA_VERSION.to_string());
        put("version", env!("CARGO_PKG_VERSION").to_string());
        put("build", String::new());

        if self.mtd_rain {
            let rain = self.rain_to_date(stats.and_then(|s| s.month_rain.as_ref()), view);
            put("mrfall", fmt(rain, 1));
        }
        if self.ytd_rain {
            let rain = self.rain_to_date(stats.and_then(|s| s.year_rain.as_ref()), view);
            put("yrfall", fmt(rain, 1));
        }

        let rose: Vec<Value> = stats
            .map(|s| s.windrose.iter().map(|v| Value::from(*v)).collect())
            .unwrap_or_default();
        data.insert("WindRoseData".to_string(), Value::Array(rose));

        for (field, spec) in &self.field_map {
            let trend = trends.get(field).copied().flatten();
            let value = self.field_value(spec, snapshot, view, trend);
            data.insert(field.clone(), Value::String(value));
        }
        data
    }
}

#[async_trait]
impl Generator for GaugeDataGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_interval(&self) -> Option<Duration> {
        self.min_interval
    }

    fn apply_stats(&mut self, stats: &PeriodicStats) {
        self.stats = Some(stats.clone());
    }

    fn on_archive(&mut self, record: &ArchiveRecord) {
        self.check_contact(ContactSource::Archive, |field| record.get(field));
    }

    async fn generate(
        &mut self,
        snapshot: &Snapshot,
        buffer: &SharedBuffer,
    ) -> CoreResult<Option<Artifact>> {
        self.check_contact(ContactSource::Loop, |field| snapshot.get(field));
        let view = BufferView::capture(buffer, snapshot.date_time).await;
        // archive queries only after the buffer lock is released
        let trends = self.trends(snapshot).await;
        let data = self.render(snapshot, &view, &trends);
        let body =
            serde_json::to_string(&data).map_err(|e| CoreError::generation(&self.name, e))?;
        debug!(generator = %self.name, fields = data.len(), "Rendered gauge data");
        Ok(Some(Artifact::json(self.file_name.clone(), body, snapshot.date_time)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtd_common::UnitSystem;
    use rtd_core::{CoreConfig, MemoryArchive, StatisticsBuffer};
    use test_utils::{archive_record, loop_packet, ts};

    fn utc() -> DayZone {
        DayZone::utc()
    }

    async fn buffer_with_weather() -> SharedBuffer {
        let mut buf = StatisticsBuffer::new(&CoreConfig::utc(), ts::NOON).unwrap();
        buf.add_packet(&loop_packet(
            ts::NOON,
            &[
                ("outTemp", Some(50.0)),
                ("windSpeed", Some(5.0)),
                ("windDir", Some(90.0)),
                ("windGust", Some(7.0)),
                ("rain", Some(0.1)),
            ],
        ))
        .unwrap();
        buf.add_packet(&loop_packet(
            ts::NOON + 60,
            &[
                ("outTemp", Some(68.0)),
                ("windSpeed", Some(10.0)),
                ("windDir", Some(180.0)),
                ("windGust", Some(12.0)),
                ("barometer", Some(30.0)),
            ],
        ))
        .unwrap();
        SharedBuffer::new(buf)
    }

    fn snapshot(ts: Timestamp, fields: &[(&str, Option<f64>)]) -> Snapshot {
        Snapshot {
            date_time: ts,
            unit_system: Some(UnitSystem::Us),
            observations: fields.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    async fn generator(config: &GeneratorConfig) -> GaugeDataGenerator {
        let archive = MemoryArchive::with_records(
            utc(),
            vec![archive_record(ts::NOON - 3600, &[("outTemp", Some(59.0))])],
        )
        .await
        .unwrap();
        GaugeDataGenerator::new(config, Arc::new(archive))
    }

    async fn render(gen: &mut GaugeDataGenerator, snap: &Snapshot, buffer: &SharedBuffer) -> Value {
        let artifact = gen.generate(snap, buffer).await.unwrap().unwrap();
        assert_eq!(artifact.name, "gauge-data.txt");
        serde_json::from_slice(&artifact.body).unwrap()
    }

    #[tokio::test]
    async fn test_gauge_data_fields() {
        let buffer = buffer_with_weather().await;
        let config = GeneratorConfig::gauge_data("gauges", "/tmp/www/gauge-data.txt");
        let mut gen = generator(&config).await;
        let snap = snapshot(
            ts::NOON + 60,
            &[
                ("outTemp", Some(68.0)),
                ("windDir", Some(180.0)),
                ("barometer", Some(30.0)),
                ("cloudbase", None),
            ],
        );

        let data = render(&mut gen, &snap, &buffer).await;
        assert_eq!(data["timeUTC"], "2024,01,15,12,01,00");
        assert_eq!(data["date"], "2024-01-15 12:01");
        assert_eq!(data["dateFormat"], "Y-m-d H:M");
        assert_eq!(data["tempunit"], "C");
        assert_eq!(data["windunit"], "km/h");
        assert_eq!(data["pressunit"], "hPa");
        assert_eq!(data["rainunit"], "mm");
        assert_eq!(data["cloudbaseunit"], "m");
        assert_eq!(data["SensorContactLost"], "0");
        assert_eq!(data["ver"], "14");

        // field map values
        assert_eq!(data["temp"], "20.0");
        assert_eq!(data["tempTL"], "10.0");
        assert_eq!(data["tempTH"], "20.0");
        assert_eq!(data["TtempTL"], "12:00");
        assert_eq!(data["TtempTH"], "12:01");
        assert_eq!(data["temptrend"], "5.0");
        assert_eq!(data["press"], "1015.9");
        assert_eq!(data["rfall"], "2.5");
        assert_eq!(data["cloudbasevalue"], "0.0");

        // wind over the last ten minutes
        assert_eq!(data["wspeed"], "12.1");
        assert_eq!(data["wgust"], "19.3");
        assert_eq!(data["bearing"], "180.0");
        assert_eq!(data["avgbearing"], "153.4");
        assert_eq!(data["BearingRangeFrom10"], "90.0");
        assert_eq!(data["BearingRangeTo10"], "180.0");

        // no periodic stats yet
        assert_eq!(data["pressL"], "850.0");
        assert_eq!(data["pressH"], "1100.0");
        assert_eq!(data["LastRainTipISO"], "1/1/1900 00:00");
        assert_eq!(data["WindRoseData"], serde_json::json!([]));
        assert!(data.get("mrfall").is_none());
    }

    #[tokio::test]
    async fn test_periodic_stats_and_rain_to_date() {
        let buffer = buffer_with_weather().await;
        let mut config = GeneratorConfig::gauge_data("gauges", "gauge-data.txt");
        config.mtd_rain = true;
        config.groups.pressure = Unit::InHg;
        let mut gen = generator(&config).await;

        gen.apply_stats(&PeriodicStats {
            computed_at: ts::NOON,
            windrose: vec![1.5, 0.0, 2.0],
            last_rain_ts: Some(ts::NOON - 600),
            barometer_min: Some(UnitValue::new(Some(29.1), Unit::InHg, UnitGroup::Pressure)),
            barometer_max: None,
            month_rain: Some(UnitValue::new(Some(1.0), Unit::Inch, UnitGroup::Rain)),
            year_rain: None,
            archive_wind_speed: None,
        });
        let data = render(&mut gen, &snapshot(ts::NOON + 60, &[]), &buffer).await;

        assert_eq!(data["pressunit"], "in");
        assert_eq!(data["pressL"], "29.1");
        assert_eq!(data["pressH"], "32.5");
        assert_eq!(data["LastRainTipISO"], "2024-01-15 11:50");
        assert_eq!(data["WindRoseData"], serde_json::json!([1.5, 0.0, 2.0]));
        // 1.0 in from the archive plus 0.1 in today
        assert_eq!(data["mrfall"], "27.9");
        assert!(data.get("yrfall").is_none());
    }

    #[tokio::test]
    async fn test_bearing_holds_last_direction() {
        let buffer = buffer_with_weather().await;
        let config = GeneratorConfig::gauge_data("gauges", "gauge-data.txt");
        let mut gen = generator(&config).await;

        let data = render(&mut gen, &snapshot(ts::NOON + 60, &[("windDir", Some(225.0))]), &buffer).await;
        assert_eq!(data["bearing"], "225.0");
        let data = render(&mut gen, &snapshot(ts::NOON + 62, &[("windDir", None)]), &buffer).await;
        assert_eq!(data["bearing"], "225.0");
    }

    #[tokio::test]
    async fn test_field_map_overrides_and_defaults() {
        let buffer = buffer_with_weather().await;
        let mut config = GeneratorConfig::gauge_data("gauges", "gauge-data.txt");
        let mut wspeed = FieldSpec::new("windSpeed", None);
        wspeed.decimals = 2;
        let mut soil = FieldSpec::new("soilTemp1", Some(Aggregate::Max));
        soil.default = -99.0;
        soil.decimals = 0;
        let mut sunrise = FieldSpec::new("radiation", Some(Aggregate::Maxtime));
        sunrise.time_format = "%H:%M:%S".into();
        config.field_map = Some(
            [
                ("wspeed".to_string(), wspeed),
                ("soilTH".to_string(), soil),
                ("TSolarTM".to_string(), sunrise),
            ]
            .into_iter()
            .collect(),
        );
        let mut gen = generator(&config).await;

        let snap = snapshot(ts::NOON + 60, &[("windSpeed", Some(10.0))]);
        let data = render(&mut gen, &snap, &buffer).await;
        // field map wins over the computed ten-minute average
        assert_eq!(data["wspeed"], "16.09");
        assert_eq!(data["soilTH"], "-99");
        // never-seen observation reports the start of the day
        assert_eq!(data["TSolarTM"], "00:00:00");
        assert!(data.get("temp").is_none());
    }

    fn station(station_type: &str) -> GeneratorConfig {
        let mut config = GeneratorConfig::gauge_data("gauges", "gauge-data.txt");
        config.station_type = Some(station_type.to_string());
        config
    }

    #[tokio::test]
    async fn test_lost_contact_from_archive_station() {
        let buffer = buffer_with_weather().await;
        let mut gen = generator(&station("Vantage")).await;

        gen.on_archive(&archive_record(ts::NOON, &[("rxCheckPercent", Some(0.0))]));
        let data = render(&mut gen, &snapshot(ts::NOON + 60, &[]), &buffer).await;
        assert_eq!(data["SensorContactLost"], "1");

        gen.on_archive(&archive_record(ts::NOON + 300, &[("rxCheckPercent", Some(97.0))]));
        let data = render(&mut gen, &snapshot(ts::NOON + 360, &[]), &buffer).await;
        assert_eq!(data["SensorContactLost"], "0");

        // a record without the reception field cannot vouch for contact
        gen.on_archive(&archive_record(ts::NOON + 600, &[("outTemp", Some(50.0))]));
        let data = render(&mut gen, &snapshot(ts::NOON + 660, &[]), &buffer).await;
        assert_eq!(data["SensorContactLost"], "1");
    }

    #[tokio::test]
    async fn test_lost_contact_from_loop_station() {
        let buffer = buffer_with_weather().await;
        let mut gen = generator(&station("FineOffsetUSB")).await;

        let data = render(&mut gen, &snapshot(ts::NOON + 60, &[("status", Some(64.0))]), &buffer).await;
        assert_eq!(data["SensorContactLost"], "1");

        let data = render(&mut gen, &snapshot(ts::NOON + 62, &[("status", Some(0.0))]), &buffer).await;
        assert_eq!(data["SensorContactLost"], "0");

        let data = render(&mut gen, &snapshot(ts::NOON + 64, &[("status", None)]), &buffer).await;
        assert_eq!(data["SensorContactLost"], "1");

        // archive records do not speak for a loop-reporting station
        gen.on_archive(&archive_record(ts::NOON + 300, &[("rxCheckPercent", Some(97.0))]));
        let data = render(&mut gen, &snapshot(ts::NOON + 302, &[("status", Some(0.0))]), &buffer).await;
        assert_eq!(data["SensorContactLost"], "0");
    }

    #[tokio::test]
    async fn test_contact_ignored_for_other_stations() {
        let buffer = buffer_with_weather().await;
        let mut gen = generator(&station("Simulator")).await;
        gen.on_archive(&archive_record(ts::NOON, &[("rxCheckPercent", Some(0.0))]));
        let data = render(&mut gen, &snapshot(ts::NOON + 60, &[]), &buffer).await;
        assert_eq!(data["SensorContactLost"], "0");

        let mut config = station("Vantage");
        config.ignore_lost_contact = true;
        let mut gen = generator(&config).await;
        gen.on_archive(&archive_record(ts::NOON, &[("rxCheckPercent", Some(0.0))]));
        let data = render(&mut gen, &snapshot(ts::NOON + 60, &[]), &buffer).await;
        assert_eq!(data["SensorContactLost"], "0");
    }
}
