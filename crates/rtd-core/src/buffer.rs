//! Day statistics for every tracked observation.
//!
//! [`StatisticsBuffer`] owns one accumulator per manifest observation for the
//! active report day. [`SharedBuffer`] is the lock-guarded handle handed to
//! the coordinator and the generator workers.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use rtd_common::time::archive_day_span;
use rtd_common::{
    DayZone, LoopPacket, RtdResult, StandardUnits, Timestamp, TimeSpan, Unit, UnitConversion, UnitGroup, UnitSystem,
    UnitValue, VectorValue,
};

use crate::accumulator::{Accumulator, AccumulatorKind, ObservationStats, Sample};
use crate::archive::DailySummary;
use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};

/// Per-observation packet handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PacketHandler {
    Default,
    /// Also derives `windrun` and feeds the `wind` vector.
    WindSpeed,
}

impl PacketHandler {
    fn for_observation(name: &str) -> Self {
        match name {
            "windSpeed" => PacketHandler::WindSpeed,
            _ => PacketHandler::Default,
        }
    }
}

/// Rolling statistics for the current report day.
pub struct StatisticsBuffer {
    manifest: BTreeSet<String>,
    history_manifest: BTreeSet<String>,
    retention: i64,
    zone: DayZone,
    units: Arc<dyn UnitConversion>,
    unit_system: Option<UnitSystem>,
    active_day_span: TimeSpan,
    last_wind_speed_ts: Option<Timestamp>,
    accumulators: BTreeMap<String, Accumulator>,
}

impl std::fmt::Debug for StatisticsBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatisticsBuffer")
            .field("unit_system", &self.unit_system)
            .field("active_day_span", &self.active_day_span)
            .field("observations", &self.accumulators.len())
            .finish()
    }
}

impl StatisticsBuffer {
    /// Empty buffer for the report day containing `now`.
    pub fn new(config: &CoreConfig, now: Timestamp) -> CoreResult<Self> {
        Self::with_units(config, now, Arc::new(StandardUnits))
    }

    pub fn with_units(
        config: &CoreConfig,
        now: Timestamp,
        units: Arc<dyn UnitConversion>,
    ) -> CoreResult<Self> {
        let zone = config.day_zone()?;
        Ok(Self {
            manifest: config.manifest.iter().cloned().collect(),
            history_manifest: config.history_manifest.iter().cloned().collect(),
            retention: config.retention_secs,
            zone,
            units,
            unit_system: None,
            active_day_span: archive_day_span(now, zone)?,
            last_wind_speed_ts: None,
            accumulators: BTreeMap::new(),
        })
    }

    /// Fold a loop packet into the day statistics.
    ///
    /// A packet past the active day resets every accumulator and advances the
    /// day first. A packet before the active day is rejected.
    pub fn add_packet(&mut self, packet: &LoopPacket) -> CoreResult<()> {
        packet.validate()?;
        let ts = packet.date_time;
        self.roll_day(ts)?;

        let system = *self.unit_system.get_or_insert(packet.unit_system);
        let packet = packet.to_unit_system(system, self.units.as_ref())?;

        for (name, value) in &packet.observations {
            if !self.manifest.contains(name) {
                continue;
            }
            match PacketHandler::for_observation(name) {
                PacketHandler::Default => self.add_value(name, *value, ts),
                PacketHandler::WindSpeed => self.add_wind_speed(&packet, system)?,
            }
        }
        Ok(())
    }

    /// Load today's totals from an archive summary.
    ///
    /// Leaves histories empty. A summary for any other day is ignored.
    pub fn seed(&mut self, summary: &DailySummary) -> CoreResult<()> {
        if summary.span != self.active_day_span {
            warn!(
                summary_day = %summary.span,
                active_day = %self.active_day_span,
                "Ignoring daily summary for another day"
            );
            return Ok(());
        }
        let system = *self.unit_system.get_or_insert(summary.unit_system);

        for (name, obs) in &summary.observations {
            if !self.manifest.contains(name) {
                continue;
            }
            let obs = match (
                self.units.standard_unit_for(summary.unit_system, name),
                self.units.standard_unit_for(system, name),
            ) {
                (Some((from, _)), Some((to, _))) => obs.converted(from, to)?,
                _ => obs.clone(),
            };
            self.accumulator(name).seed(&obs);
        }
        // windrun picks up from the last archived wind speed
        if let Some(t) = summary.last_wind_speed_ts {
            if self.last_wind_speed_ts.map_or(true, |last| t > last) {
                self.last_wind_speed_ts = Some(t);
            }
        }
        debug!(
            day = %summary.span,
            observations = summary.observations.len(),
            "Seeded buffer from daily summary"
        );
        Ok(())
    }

    pub fn unit_system(&self) -> Option<UnitSystem> {
        self.unit_system
    }

    pub fn active_day_span(&self) -> TimeSpan {
        self.active_day_span
    }

    pub fn zone(&self) -> DayZone {
        self.zone
    }

    pub fn get(&self, observation: &str) -> Option<&Accumulator> {
        self.accumulators.get(observation)
    }

    pub fn contains(&self, observation: &str) -> bool {
        self.accumulators.contains_key(observation)
    }

    pub fn stats(&self, observation: &str) -> Option<ObservationStats> {
        self.accumulators.get(observation).map(Accumulator::snapshot)
    }

    /// Copy of every accumulator's statistics.
    pub fn all_stats(&self) -> BTreeMap<String, ObservationStats> {
        self.accumulators
            .iter()
            .map(|(name, acc)| (name.clone(), acc.snapshot()))
            .collect()
    }

    /// Unit and group the buffer uses for `observation`.
    pub fn unit_for(&self, observation: &str) -> (Unit, UnitGroup) {
        let system = self.unit_system.unwrap_or(UnitSystem::Us);
        self.units
            .standard_unit_for(system, observation)
            .unwrap_or((Unit::Count, UnitGroup::Count))
    }

    fn roll_day(&mut self, ts: Timestamp) -> CoreResult<()> {
        if self.active_day_span.includes_archive_time(ts) {
            return Ok(());
        }
        if ts <= self.active_day_span.start {
            return Err(CoreError::StalePacket {
                ts,
                day_start: self.active_day_span.start,
            });
        }
        let next = archive_day_span(ts, self.zone)?;
        // one reset however many days were skipped
        for acc in self.accumulators.values_mut() {
            acc.day_reset();
        }
        info!(from = %self.active_day_span, to = %next, "Day rollover");
        self.active_day_span = next;
        Ok(())
    }

    fn accumulator(&mut self, name: &str) -> &mut Accumulator {
        let (unit, group) = self.unit_for(name);
        let retention = self
            .history_manifest
            .contains(name)
            .then_some(self.retention);
        self.accumulators
            .entry(name.to_string())
            .or_insert_with(|| {
                Accumulator::new(AccumulatorKind::for_observation(name), unit, group, retention)
            })
    }

    fn add_value(&mut self, name: &str, value: Option<f64>, ts: Timestamp) {
        self.accumulator(name).add_sample(Sample::Scalar(value), ts);
    }

    fn add_wind_speed(&mut self, packet: &LoopPacket, system: UnitSystem) -> CoreResult<()> {
        let ts = packet.date_time;
        let speed = packet.get("windSpeed");
        self.add_value("windSpeed", speed, ts);

        if let Some(speed) = speed {
            if !packet.contains("windrun") && self.manifest.contains("windrun") {
                if let Some(last) = self.last_wind_speed_ts {
                    let elapsed = ts - last;
                    if elapsed > 0 {
                        let run = windrun(self.units.as_ref(), speed, elapsed, system)?;
                        self.add_value("windrun", Some(run), ts);
                    }
                }
            }
            if self.last_wind_speed_ts.map_or(true, |last| ts > last) {
                self.last_wind_speed_ts = Some(ts);
            }
        }

        if self.manifest.contains("wind") {
            let vector = VectorValue::new(speed, packet.get("windDir"));
            self.accumulator("wind").add_sample(Sample::Vector(vector), ts);
        }
        Ok(())
    }

}

/// Distance covered at `speed` for `elapsed` seconds, in the system's
/// distance unit.
pub(crate) fn windrun(
    units: &dyn UnitConversion,
    speed: f64,
    elapsed: i64,
    system: UnitSystem,
) -> RtdResult<f64> {
    let speed = UnitValue::new(Some(speed), system.unit_for(UnitGroup::Speed), UnitGroup::Speed);
    let mps = units.convert(&speed, Unit::MeterPerSecond)?.value.unwrap_or(0.0);
    let meters = UnitValue::new(Some(mps * elapsed as f64), Unit::Meter, UnitGroup::Distance);
    let distance = units.convert(&meters, system.unit_for(UnitGroup::Distance))?;
    Ok(distance.value.unwrap_or(0.0))
}

/// Cloneable handle to a buffer behind a read-write lock.
///
/// Writers hold the lock for a whole packet; readers that look at more than
/// one observation should do so inside one [`SharedBuffer::read`] guard.
#[derive(Debug, Clone)]
pub struct SharedBuffer {
    inner: Arc<RwLock<StatisticsBuffer>>,
}

impl SharedBuffer {
    pub fn new(buffer: StatisticsBuffer) -> Self {
        Self {
            inner: Arc::new(RwLock::new(buffer)),
        }
    }

    pub async fn add_packet(&self, packet: &LoopPacket) -> CoreResult<()> {
        self.inner.write().await.add_packet(packet)
    }

    pub async fn seed(&self, summary: &DailySummary) -> CoreResult<()> {
        self.inner.write().await.seed(summary)
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, StatisticsBuffer> {
        self.inner.read().await
    }

    pub async fn stats(&self, observation: &str) -> Option<ObservationStats> {
        self.inner.read().await.stats(observation)
    }

    pub async fn all_stats(&self) -> BTreeMap<String, ObservationStats> {
        self.inner.read().await.all_stats()
    }

    pub async fn active_day_span(&self) -> TimeSpan {
        self.inner.read().await.active_day_span()
    }

    pub async fn unit_system(&self) -> Option<UnitSystem> {
        self.inner.read().await.unit_system()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Timestamp = 1_705_276_800;

    fn buffer() -> StatisticsBuffer {
        StatisticsBuffer::new(&CoreConfig::utc(), DAY + 1).unwrap()
    }

    fn packet(ts: Timestamp, system: UnitSystem, fields: &[(&str, Option<f64>)]) -> LoopPacket {
        fields
            .iter()
            .fold(LoopPacket::new(ts, system), |p, (n, v)| p.with(n, *v))
    }

    #[test]
    fn test_ignores_unmanifested_fields() {
        let mut buf = buffer();
        buf.add_packet(&packet(DAY + 10, UnitSystem::Us, &[("leafWet1", Some(1.0))]))
            .unwrap();
        assert!(!buf.contains("leafWet1"));
    }

    #[test]
    fn test_adopts_first_unit_system_and_converts() {
        let mut buf = buffer();
        buf.add_packet(&packet(DAY + 10, UnitSystem::MetricWx, &[("outTemp", Some(10.0))]))
            .unwrap();
        buf.add_packet(&packet(DAY + 20, UnitSystem::Us, &[("outTemp", Some(68.0))]))
            .unwrap();
        assert_eq!(buf.unit_system(), Some(UnitSystem::MetricWx));
        let stats = buf.stats("outTemp").unwrap();
        assert_eq!(stats.unit, Unit::DegreeC);
        assert!((stats.max.unwrap() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_packet_before_active_day() {
        let mut buf = buffer();
        let err = buf
            .add_packet(&packet(DAY - 100, UnitSystem::Us, &[("outTemp", Some(1.0))]))
            .unwrap_err();
        assert!(matches!(err, CoreError::StalePacket { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn test_multi_day_gap_resets_once() {
        let mut buf = buffer();
        buf.add_packet(&packet(DAY + 10, UnitSystem::Us, &[("outTemp", Some(1.0))]))
            .unwrap();
        buf.add_packet(&packet(DAY + 3 * 86_400 + 10, UnitSystem::Us, &[("outTemp", Some(2.0))]))
            .unwrap();
        assert_eq!(buf.active_day_span().start, DAY + 3 * 86_400);
        let stats = buf.stats("outTemp").unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.min, Some(2.0));
    }

    #[test]
    fn test_windrun_us() {
        let mut buf = buffer();
        buf.add_packet(&packet(DAY + 10, UnitSystem::Us, &[("windSpeed", Some(10.0))]))
            .unwrap();
        buf.add_packet(&packet(DAY + 370, UnitSystem::Us, &[("windSpeed", Some(10.0))]))
            .unwrap();
        // 10 mph for six minutes
        let run = buf.stats("windrun").unwrap();
        assert!((run.sum - 1.0).abs() < 1e-9);
        assert_eq!(run.unit, Unit::Mile);
    }

    #[test]
    fn test_windrun_metricwx_in_km() {
        let mut buf = buffer();
        buf.add_packet(&packet(DAY + 10, UnitSystem::MetricWx, &[("windSpeed", Some(5.0))]))
            .unwrap();
        buf.add_packet(&packet(DAY + 210, UnitSystem::MetricWx, &[("windSpeed", Some(5.0))]))
            .unwrap();
        let run = buf.stats("windrun").unwrap();
        assert!((run.sum - 1.0).abs() < 1e-9);
        assert_eq!(run.unit, Unit::Km);
    }

    #[test]
    fn test_packet_windrun_takes_precedence() {
        let mut buf = buffer();
        buf.add_packet(&packet(DAY + 10, UnitSystem::Us, &[("windSpeed", Some(10.0))]))
            .unwrap();
        buf.add_packet(&packet(
            DAY + 370,
            UnitSystem::Us,
            &[("windSpeed", Some(10.0)), ("windrun", Some(0.25))],
        ))
        .unwrap();
        let run = buf.stats("windrun").unwrap();
        assert_eq!(run.count, 1);
        assert_eq!(run.sum, 0.25);
    }

    #[test]
    fn test_null_speed_does_not_advance_windrun_clock() {
        let mut buf = buffer();
        buf.add_packet(&packet(DAY + 10, UnitSystem::Us, &[("windSpeed", Some(10.0))]))
            .unwrap();
        buf.add_packet(&packet(DAY + 190, UnitSystem::Us, &[("windSpeed", None)]))
            .unwrap();
        buf.add_packet(&packet(DAY + 370, UnitSystem::Us, &[("windSpeed", Some(10.0))]))
            .unwrap();
        assert!((buf.stats("windrun").unwrap().sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_wind_vector_fed_from_speed_and_dir() {
        let mut buf = buffer();
        buf.add_packet(&packet(
            DAY + 10,
            UnitSystem::Us,
            &[("windSpeed", Some(4.0)), ("windDir", Some(270.0))],
        ))
        .unwrap();
        let wind = buf.get("wind").unwrap().as_vector().unwrap();
        assert_eq!(wind.last(), Some(VectorValue::new(Some(4.0), Some(270.0))));
        assert_eq!(wind.history().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_shared_buffer_round_trip() {
        let shared = SharedBuffer::new(buffer());
        shared
            .add_packet(&packet(DAY + 10, UnitSystem::Us, &[("outTemp", Some(50.0))]))
            .await
            .unwrap();
        assert_eq!(shared.stats("outTemp").await.unwrap().last, Some(50.0));
        assert_eq!(shared.unit_system().await, Some(UnitSystem::Us));
        let guard = shared.read().await;
        assert!(guard.contains("outTemp"));
    }
}
