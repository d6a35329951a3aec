//! Per-observation rolling statistics.
//!
//! Each tracked observation owns one [`Accumulator`] for the current report
//! day: running extrema with timestamps, sum and count, the last value seen and
//! optionally a short history of raw samples. Scalar and vector observations
//! share the same `{add_sample, day_reset, snapshot}` surface.

use std::collections::VecDeque;

use serde::Serialize;

use rtd_common::units::normalize_bearing;
use rtd_common::{Timestamp, Unit, UnitGroup, UnitValue, VectorValue};

use crate::archive::ObservationSummary;

/// Accumulator variant used for an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorKind {
    Scalar,
    Vector,
}

impl AccumulatorKind {
    /// Only the synthesized `wind` observation carries a direction.
    pub fn for_observation(name: &str) -> Self {
        match name {
            "wind" => AccumulatorKind::Vector,
            _ => AccumulatorKind::Scalar,
        }
    }
}

/// One raw reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    Scalar(Option<f64>),
    Vector(VectorValue),
}

impl Sample {
    fn magnitude(&self) -> Option<f64> {
        match self {
            Sample::Scalar(v) => *v,
            Sample::Vector(v) => v.magnitude,
        }
    }

    fn into_vector(self) -> VectorValue {
        match self {
            Sample::Scalar(v) => VectorValue::new(v, None),
            Sample::Vector(v) => v,
        }
    }
}

/// Time-bounded sample history.
#[derive(Debug, Clone)]
pub struct History<T> {
    samples: VecDeque<(T, Timestamp)>,
    retention: i64,
    full: bool,
}

impl<T: Copy> History<T> {
    pub fn new(retention: i64) -> Self {
        Self {
            samples: VecDeque::new(),
            retention,
            full: false,
        }
    }

    /// Insert a sample in timestamp order and drop everything at or before
    /// `newest - retention`. Samples stay sorted oldest first.
    pub fn push(&mut self, value: T, ts: Timestamp) {
        let at = self.samples.partition_point(|(_, t)| *t <= ts);
        self.samples.insert(at, (value, ts));

        let newest = self.samples.back().map_or(ts, |(_, t)| *t);
        let oldest = newest - self.retention;
        self.full = matches!(self.samples.front(), Some((_, t)) if *t <= oldest);
        while matches!(self.samples.front(), Some((_, t)) if *t <= oldest) {
            self.samples.pop_front();
        }
    }

    /// Whether the retention window was already covered at the last insert.
    pub fn is_full(&self) -> bool {
        self.full
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(T, Timestamp)> {
        self.samples.iter()
    }

    /// Samples with `timestamp >= as_of - window`.
    pub fn window(&self, as_of: Timestamp, window: i64) -> impl Iterator<Item = &(T, Timestamp)> {
        let born = as_of - window;
        let start = self.samples.partition_point(|(_, t)| *t < born);
        self.samples.range(start..)
    }
}

/// Running statistics for a scalar observation.
#[derive(Debug, Clone)]
pub struct ScalarAccumulator {
    unit: Unit,
    group: UnitGroup,
    min: Option<f64>,
    min_time: Option<Timestamp>,
    max: Option<f64>,
    max_time: Option<Timestamp>,
    sum: f64,
    count: u64,
    last: Option<f64>,
    last_time: Option<Timestamp>,
    history: Option<History<f64>>,
}

impl ScalarAccumulator {
    pub fn new(unit: Unit, group: UnitGroup, retention: Option<i64>) -> Self {
        Self {
            unit,
            group,
            min: None,
            min_time: None,
            max: None,
            max_time: None,
            sum: 0.0,
            count: 0,
            last: None,
            last_time: None,
            history: retention.map(History::new),
        }
    }

    pub fn add_value(&mut self, value: Option<f64>, ts: Timestamp, update_extrema: bool) {
        let Some(value) = value else {
            return;
        };
        if update_extrema {
            if self.min.map_or(true, |min| value < min) {
                self.min = Some(value);
                self.min_time = Some(ts);
            }
            if self.max.map_or(true, |max| value > max) {
                self.max = Some(value);
                self.max_time = Some(ts);
            }
        }
        self.sum += value;
        self.count += 1;
        if self.last_time.map_or(true, |last| ts >= last) {
            self.last = Some(value);
            self.last_time = Some(ts);
        }
        if let Some(history) = self.history.as_mut() {
            history.push(value, ts);
        }
    }

    pub fn day_reset(&mut self) {
        self.min = None;
        self.min_time = None;
        self.max = None;
        self.max_time = None;
        self.sum = 0.0;
        self.count = 0;
    }

    /// Largest sample in the window and when it occurred.
    pub fn history_max(&self, as_of: Timestamp, window: i64) -> Option<(f64, Timestamp)> {
        self.history
            .as_ref()?
            .window(as_of, window)
            .fold(None, |best: Option<(f64, Timestamp)>, &(v, t)| match best {
                Some((b, _)) if v <= b => best,
                _ => Some((v, t)),
            })
    }

    /// Unweighted mean of the samples in the window.
    pub fn history_average(&self, as_of: Timestamp, window: i64) -> Option<f64> {
        let (sum, n) = self
            .history
            .as_ref()?
            .window(as_of, window)
            .fold((0.0_f64, 0usize), |(sum, n), &(v, _)| (sum + v, n + 1));
        (n > 0).then(|| sum / n as f64)
    }

    pub fn history(&self) -> Option<&History<f64>> {
        self.history.as_ref()
    }

    pub fn last(&self) -> Option<f64> {
        self.last
    }

    fn seed(&mut self, summary: &ObservationSummary) {
        self.min = summary.min;
        self.min_time = summary.min.and(summary.min_time);
        self.max = summary.max;
        self.max_time = summary.max.and(summary.max_time);
        self.sum = if summary.count > 0 { summary.sum } else { 0.0 };
        self.count = summary.count;
    }

    fn snapshot(&self) -> ObservationStats {
        ObservationStats {
            unit: self.unit,
            group: self.group,
            min: self.min,
            min_time: self.min_time,
            max: self.max,
            max_time: self.max_time,
            max_dir: None,
            sum: self.sum,
            count: self.count,
            last: self.last,
            last_time: self.last_time,
            day_vector_average: None,
            history_len: self.history.as_ref().map_or(0, History::len),
            history_full: self.history.as_ref().map_or(false, History::is_full),
        }
    }
}

/// Running statistics for a magnitude and direction observation.
#[derive(Debug, Clone)]
pub struct VectorAccumulator {
    unit: Unit,
    group: UnitGroup,
    min: Option<f64>,
    min_time: Option<Timestamp>,
    max: Option<f64>,
    max_time: Option<Timestamp>,
    max_dir: Option<f64>,
    sum: f64,
    count: u64,
    xsum: f64,
    ysum: f64,
    sumtime: f64,
    // time of the previous sample counted into sumtime; cleared at day reset
    sumtime_anchor: Option<Timestamp>,
    last: Option<VectorValue>,
    last_time: Option<Timestamp>,
    history: Option<History<VectorValue>>,
}

impl VectorAccumulator {
    pub fn new(unit: Unit, group: UnitGroup, retention: Option<i64>) -> Self {
        Self {
            unit,
            group,
            min: None,
            min_time: None,
            max: None,
            max_time: None,
            max_dir: None,
            sum: 0.0,
            count: 0,
            xsum: 0.0,
            ysum: 0.0,
            sumtime: 0.0,
            sumtime_anchor: None,
            last: None,
            last_time: None,
            history: retention.map(History::new),
        }
    }

    pub fn add_value(&mut self, value: VectorValue, ts: Timestamp, update_extrema: bool) {
        let Some(magnitude) = value.magnitude else {
            return;
        };
        if update_extrema {
            if self.min.map_or(true, |min| magnitude < min) {
                self.min = Some(magnitude);
                self.min_time = Some(ts);
            }
            if self.max.map_or(true, |max| magnitude > max) {
                self.max = Some(magnitude);
                self.max_dir = value.direction;
                self.max_time = Some(ts);
            }
        }
        self.sum += magnitude;
        self.count += 1;
        if let Some(anchor) = self.sumtime_anchor {
            self.sumtime += (ts - anchor).max(0) as f64;
        }
        if self.sumtime_anchor.map_or(true, |anchor| ts >= anchor) {
            self.sumtime_anchor = Some(ts);
        }
        if let Some((x, y)) = value.xy() {
            self.xsum += x;
            self.ysum += y;
        }
        if self.last_time.map_or(true, |last| ts >= last) {
            self.last = Some(value);
            self.last_time = Some(ts);
        }
        if value.direction.is_some() {
            if let Some(history) = self.history.as_mut() {
                history.push(value, ts);
            }
        }
    }

    pub fn day_reset(&mut self) {
        self.min = None;
        self.min_time = None;
        self.max = None;
        self.max_time = None;
        self.max_dir = None;
        self.sum = 0.0;
        self.count = 0;
        self.xsum = 0.0;
        self.ysum = 0.0;
        self.sumtime = 0.0;
        self.sumtime_anchor = None;
    }

    /// Time-weighted average vector for the day. Zero vector until time
    /// has accumulated.
    pub fn day_vector_average(&self) -> VectorValue {
        if self.sumtime == 0.0 {
            return VectorValue::new(Some(0.0), Some(0.0));
        }
        let magnitude = (self.xsum.powi(2) + self.ysum.powi(2)).sqrt() / self.sumtime;
        VectorValue::new(
            Some(magnitude),
            Some(VectorValue::bearing_of(self.xsum, self.ysum)),
        )
    }

    /// Sample with the largest magnitude in the window.
    pub fn history_max(&self, as_of: Timestamp, window: i64) -> Option<(VectorValue, Timestamp)> {
        self.history
            .as_ref()?
            .window(as_of, window)
            .fold(None, |best: Option<(VectorValue, Timestamp)>, &(v, t)| {
                match (best, v.magnitude) {
                    (Some((b, _)), Some(m)) if b.magnitude.map_or(false, |bm| m <= bm) => best,
                    (Some(_), None) => best,
                    _ => Some((v, t)),
                }
            })
    }

    /// Unweighted mean of the projected samples in the window.
    pub fn history_average(&self, as_of: Timestamp, window: i64) -> Option<VectorValue> {
        let (x, y, n) = self
            .history
            .as_ref()?
            .window(as_of, window)
            .filter_map(|(v, _)| v.xy())
            .fold((0.0, 0.0, 0usize), |(xs, ys, n), (x, y)| (xs + x, ys + y, n + 1));
        if n == 0 {
            return None;
        }
        let (mx, my) = (x / n as f64, y / n as f64);
        Some(VectorValue::new(
            Some((mx * mx + my * my).sqrt()),
            Some(VectorValue::bearing_of(mx, my)),
        ))
    }

    /// Mean bearing over the whole retained history.
    pub fn history_vector_direction(&self) -> Option<f64> {
        let history = self.history.as_ref()?;
        if history.is_empty() {
            return None;
        }
        let (x, y) = history
            .iter()
            .filter_map(|(v, _)| v.xy())
            .fold((0.0, 0.0), |(xs, ys), (x, y)| (xs + x, ys + y));
        Some(VectorValue::bearing_of(x, y))
    }

    /// Lowest and highest bearings in the window, measured either side of
    /// the window's mean bearing so the range can straddle north.
    pub fn history_bearing_range(&self, as_of: Timestamp, window: i64) -> Option<(f64, f64)> {
        let average = self.history_average(as_of, window)?.direction?;
        let (low, high) = self
            .history
            .as_ref()?
            .window(as_of, window)
            .filter_map(|(v, _)| v.direction)
            .map(|dir| to_plus_minus(dir - average))
            .fold((f64::MAX, f64::MIN), |(lo, hi), off| (lo.min(off), hi.max(off)));
        if low > high {
            return None;
        }
        Some((normalize_bearing(average + low), normalize_bearing(average + high)))
    }

    pub fn history(&self) -> Option<&History<VectorValue>> {
        self.history.as_ref()
    }

    pub fn last(&self) -> Option<VectorValue> {
        self.last
    }

    fn seed(&mut self, summary: &ObservationSummary) {
        self.min = summary.min;
        self.min_time = summary.min.and(summary.min_time);
        self.max = summary.max;
        self.max_time = summary.max.and(summary.max_time);
        self.max_dir = summary.max_dir;
        self.sum = if summary.count > 0 { summary.sum } else { 0.0 };
        self.count = summary.count;
        self.xsum = summary.xsum;
        self.ysum = summary.ysum;
        self.sumtime = summary.sumtime;
        self.sumtime_anchor = None;
    }

    fn snapshot(&self) -> ObservationStats {
        ObservationStats {
            unit: self.unit,
            group: self.group,
            min: self.min,
            min_time: self.min_time,
            max: self.max,
            max_time: self.max_time,
            max_dir: self.max_dir,
            sum: self.sum,
            count: self.count,
            last: self.last.and_then(|v| v.magnitude),
            last_time: self.last_time,
            day_vector_average: Some(self.day_vector_average()),
            history_len: self.history.as_ref().map_or(0, History::len),
            history_full: self.history.as_ref().map_or(false, History::is_full),
        }
    }
}

/// Map an angle difference into `[-180, 180)`.
fn to_plus_minus(degrees: f64) -> f64 {
    (degrees + 180.0).rem_euclid(360.0) - 180.0
}

/// Accumulator for one observation, scalar or vector.
#[derive(Debug, Clone)]
pub enum Accumulator {
    Scalar(ScalarAccumulator),
    Vector(VectorAccumulator),
}

impl Accumulator {
    /// `retention` enables the sample history.
    pub fn new(kind: AccumulatorKind, unit: Unit, group: UnitGroup, retention: Option<i64>) -> Self {
        match kind {
            AccumulatorKind::Scalar => {
                Accumulator::Scalar(ScalarAccumulator::new(unit, group, retention))
            }
            AccumulatorKind::Vector => {
                Accumulator::Vector(VectorAccumulator::new(unit, group, retention))
            }
        }
    }

    pub fn kind(&self) -> AccumulatorKind {
        match self {
            Accumulator::Scalar(_) => AccumulatorKind::Scalar,
            Accumulator::Vector(_) => AccumulatorKind::Vector,
        }
    }

    pub fn add_sample(&mut self, sample: Sample, ts: Timestamp) {
        self.add_sample_with(sample, ts, true);
    }

    /// As `add_sample`, optionally leaving the extrema alone.
    pub fn add_sample_with(&mut self, sample: Sample, ts: Timestamp, update_extrema: bool) {
        match self {
            Accumulator::Scalar(acc) => acc.add_value(sample.magnitude(), ts, update_extrema),
            Accumulator::Vector(acc) => acc.add_value(sample.into_vector(), ts, update_extrema),
        }
    }

    pub fn day_reset(&mut self) {
        match self {
            Accumulator::Scalar(acc) => acc.day_reset(),
            Accumulator::Vector(acc) => acc.day_reset(),
        }
    }

    pub fn snapshot(&self) -> ObservationStats {
        match self {
            Accumulator::Scalar(acc) => acc.snapshot(),
            Accumulator::Vector(acc) => acc.snapshot(),
        }
    }

    /// Load day totals from an archive summary. History is left untouched.
    pub fn seed(&mut self, summary: &ObservationSummary) {
        match self {
            Accumulator::Scalar(acc) => acc.seed(summary),
            Accumulator::Vector(acc) => acc.seed(summary),
        }
    }

    /// Largest magnitude in the history window.
    pub fn history_max(&self, as_of: Timestamp, window: i64) -> Option<(f64, Timestamp)> {
        match self {
            Accumulator::Scalar(acc) => acc.history_max(as_of, window),
            Accumulator::Vector(acc) => acc
                .history_max(as_of, window)
                .and_then(|(v, t)| v.magnitude.map(|m| (m, t))),
        }
    }

    pub fn as_scalar(&self) -> Option<&ScalarAccumulator> {
        match self {
            Accumulator::Scalar(acc) => Some(acc),
            Accumulator::Vector(_) => None,
        }
    }

    pub fn as_vector(&self) -> Option<&VectorAccumulator> {
        match self {
            Accumulator::Vector(acc) => Some(acc),
            Accumulator::Scalar(_) => None,
        }
    }
}

/// Read-only copy of an accumulator's day statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationStats {
    pub unit: Unit,
    pub group: UnitGroup,
    pub min: Option<f64>,
    pub min_time: Option<Timestamp>,
    pub max: Option<f64>,
    pub max_time: Option<Timestamp>,
    /// Direction at the time of the maximum, vectors only.
    pub max_dir: Option<f64>,
    pub sum: f64,
    pub count: u64,
    pub last: Option<f64>,
    pub last_time: Option<Timestamp>,
    pub day_vector_average: Option<VectorValue>,
    pub history_len: usize,
    pub history_full: bool,
}

impl ObservationStats {
    fn tag(&self, value: Option<f64>) -> UnitValue {
        UnitValue::new(value, self.unit, self.group)
    }

    pub fn min_value(&self) -> UnitValue {
        self.tag(self.min)
    }

    pub fn max_value(&self) -> UnitValue {
        self.tag(self.max)
    }

    pub fn last_value(&self) -> UnitValue {
        self.tag(self.last)
    }

    pub fn sum_value(&self) -> UnitValue {
        self.tag((self.count > 0).then_some(self.sum))
    }

    /// Sample-count mean for the day.
    pub fn average(&self) -> UnitValue {
        self.tag((self.count > 0).then(|| self.sum / self.count as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(retention: Option<i64>) -> ScalarAccumulator {
        ScalarAccumulator::new(Unit::DegreeF, UnitGroup::Temperature, retention)
    }

    fn wind() -> VectorAccumulator {
        VectorAccumulator::new(Unit::MilePerHour, UnitGroup::Speed, Some(600))
    }

    fn vec(m: f64, d: f64) -> VectorValue {
        VectorValue::new(Some(m), Some(d))
    }

    #[test]
    fn test_first_sample_is_min_and_max() {
        let mut acc = scalar(None);
        acc.add_value(Some(5.0), 100, true);
        let stats = acc.snapshot();
        assert_eq!(stats.min, Some(5.0));
        assert_eq!(stats.max, Some(5.0));
        assert_eq!(stats.min_time, Some(100));
        assert_eq!(stats.max_time, Some(100));
    }

    #[test]
    fn test_equal_value_keeps_first_extremum_time() {
        let mut acc = scalar(None);
        acc.add_value(Some(5.0), 100, true);
        acc.add_value(Some(5.0), 200, true);
        assert_eq!(acc.snapshot().max_time, Some(100));
    }

    #[test]
    fn test_older_sample_does_not_replace_last() {
        let mut acc = scalar(None);
        acc.add_value(Some(1.0), 200, true);
        acc.add_value(Some(2.0), 100, true);
        let stats = acc.snapshot();
        assert_eq!(stats.last, Some(1.0));
        assert_eq!(stats.last_time, Some(200));
        assert_eq!(stats.count, 2);
        assert_eq!(stats.max, Some(2.0));
    }

    #[test]
    fn test_skip_extrema() {
        let mut acc = scalar(None);
        acc.add_value(Some(3.0), 100, false);
        let stats = acc.snapshot();
        assert_eq!(stats.min, None);
        assert_eq!(stats.min_time, None);
        assert_eq!(stats.count, 1);
    }

    #[test]
    fn test_history_full_flag() {
        let mut history = History::new(600);
        history.push(1.0, 1000);
        assert!(!history.is_full());
        history.push(2.0, 1599);
        assert!(!history.is_full());
        history.push(3.0, 1600);
        assert!(history.is_full());
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_history_sorts_late_samples() {
        let mut history = History::new(600);
        history.push(1.0, 1000);
        history.push(3.0, 1200);
        history.push(2.0, 1100);
        history.push(0.5, 1000);
        let times: Vec<Timestamp> = history.iter().map(|(_, t)| *t).collect();
        assert_eq!(times, [1000, 1000, 1100, 1200]);
        assert_eq!(history.iter().next(), Some(&(1.0, 1000)));

        // a late sample already outside the window is dropped at once
        history.push(4.0, 1700);
        history.push(9.0, 1050);
        let times: Vec<Timestamp> = history.iter().map(|(_, t)| *t).collect();
        assert_eq!(times, [1200, 1700]);
        assert!(history.is_full());

        let window: Vec<f64> = history.window(1700, 500).map(|(v, _)| *v).collect();
        assert_eq!(window, [3.0, 4.0]);
    }

    #[test]
    fn test_history_window_is_inclusive() {
        let mut acc = scalar(Some(600));
        acc.add_value(Some(1.0), 1000, true);
        acc.add_value(Some(9.0), 1100, true);
        acc.add_value(Some(3.0), 1200, true);
        assert_eq!(acc.history_max(1200, 100), Some((9.0, 1100)));
        assert_eq!(acc.history_average(1200, 200), Some(13.0 / 3.0));
        assert_eq!(acc.history_average(5000, 10), None);
    }

    #[test]
    fn test_vector_needs_direction_for_projection() {
        let mut acc = wind();
        acc.add_value(VectorValue::new(Some(4.0), None), 100, true);
        assert_eq!(acc.count, 1);
        assert_eq!(acc.xsum, 0.0);
        assert!(acc.history().unwrap().is_empty());
    }

    #[test]
    fn test_vector_sumtime_and_day_average() {
        let mut acc = wind();
        acc.add_value(vec(10.0, 90.0), 0, true);
        acc.add_value(vec(10.0, 90.0), 10, true);
        assert_eq!(acc.sumtime, 10.0);
        let avg = acc.day_vector_average();
        assert!((avg.magnitude.unwrap() - 2.0).abs() < 1e-9);
        assert!((avg.direction.unwrap() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_sumtime_gives_zero_vector() {
        let mut acc = wind();
        assert_eq!(acc.day_vector_average(), VectorValue::new(Some(0.0), Some(0.0)));
        acc.add_value(vec(5.0, 45.0), 100, true);
        assert_eq!(acc.day_vector_average(), VectorValue::new(Some(0.0), Some(0.0)));
    }

    #[test]
    fn test_vector_reset_clears_sumtime_anchor() {
        let mut acc = wind();
        acc.add_value(vec(5.0, 45.0), 100, true);
        acc.day_reset();
        acc.add_value(vec(5.0, 45.0), 200, true);
        assert_eq!(acc.sumtime, 0.0);
        assert_eq!(acc.last().unwrap(), vec(5.0, 45.0));
        assert_eq!(acc.history().unwrap().len(), 2);
    }

    #[test]
    fn test_max_dir_follows_max() {
        let mut acc = wind();
        acc.add_value(vec(5.0, 45.0), 100, true);
        acc.add_value(vec(8.0, 270.0), 110, true);
        acc.add_value(vec(6.0, 10.0), 120, true);
        let stats = acc.snapshot();
        assert_eq!(stats.max, Some(8.0));
        assert_eq!(stats.max_dir, Some(270.0));
    }

    #[test]
    fn test_bearing_range_straddles_north() {
        let mut acc = wind();
        acc.add_value(vec(5.0, 350.0), 100, true);
        acc.add_value(vec(5.0, 20.0), 110, true);
        acc.add_value(vec(5.0, 5.0), 120, true);
        let (from, to) = acc.history_bearing_range(120, 600).unwrap();
        assert!((from - 350.0).abs() < 1e-6, "from = {}", from);
        assert!((to - 20.0).abs() < 1e-6, "to = {}", to);
    }

    #[test]
    fn test_to_plus_minus() {
        assert_eq!(to_plus_minus(190.0), -170.0);
        assert_eq!(to_plus_minus(-190.0), 170.0);
        assert_eq!(to_plus_minus(10.0), 10.0);
    }

    #[test]
    fn test_enum_dispatch() {
        let mut acc = Accumulator::new(
            AccumulatorKind::for_observation("wind"),
            Unit::MilePerHour,
            UnitGroup::Speed,
            Some(600),
        );
        assert_eq!(acc.kind(), AccumulatorKind::Vector);
        acc.add_sample(Sample::Vector(vec(3.0, 180.0)), 100);
        acc.add_sample(Sample::Scalar(Some(7.0)), 110);
        assert_eq!(acc.history_max(110, 600), Some((3.0, 100)));
        assert_eq!(acc.snapshot().max, Some(7.0));
        assert_eq!(AccumulatorKind::for_observation("outTemp"), AccumulatorKind::Scalar);
    }
}
