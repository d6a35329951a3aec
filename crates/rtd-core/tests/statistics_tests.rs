//! Behavioural properties of the accumulators, buffer and packet cache.

use rtd_common::{TimeSpan, Unit, UnitGroup, UnitSystem, VectorValue};
use rtd_core::accumulator::{ScalarAccumulator, VectorAccumulator};
use rtd_core::{CoreConfig, DailySummary, PacketCache, StatisticsBuffer};
use test_utils::{
    archive_record, assert_approx_eq, assert_some_approx_eq, loop_packet, observation_stream, ts,
    wind_packet,
};

fn buffer() -> StatisticsBuffer {
    StatisticsBuffer::new(&CoreConfig::utc(), ts::NOON).unwrap()
}

// ============================================================================
// Accumulator properties
// ============================================================================

#[test]
fn test_extrema_bound_every_value() {
    let values = [3.5, -2.0, 7.25, 0.0, 7.25, 1.0, -2.0];
    let mut buf = buffer();
    for (i, packet) in observation_stream(ts::NOON, 10, "outTemp", &values)
        .iter()
        .enumerate()
    {
        buf.add_packet(packet).unwrap();
        // interleave packets with a null reading
        buf.add_packet(&loop_packet(ts::NOON + 10 * i as i64 + 5, &[("outTemp", None)]))
            .unwrap();
    }

    let stats = buf.stats("outTemp").unwrap();
    let (min, max) = (stats.min.unwrap(), stats.max.unwrap());
    assert!(values.iter().all(|v| min <= *v && *v <= max));
    assert_eq!(stats.count, values.len() as u64);
    assert_eq!(min, -2.0);
    assert_eq!(max, 7.25);
    // strict comparison keeps the first occurrence
    assert_eq!(stats.max_time, Some(ts::NOON + 20));
    assert_eq!(stats.min_time, Some(ts::NOON + 10));
}

#[test]
fn test_null_is_strict_noop() {
    let mut acc = ScalarAccumulator::new(Unit::DegreeF, UnitGroup::Temperature, Some(600));
    acc.add_value(Some(50.0), ts::NOON, true);
    let before = acc.clone();
    acc.add_value(None, ts::NOON + 10, true);
    assert_eq!(format!("{:?}", acc), format!("{:?}", before));

    let mut buf = buffer();
    buf.add_packet(&loop_packet(ts::NOON, &[("outTemp", Some(50.0))])).unwrap();
    let before = buf.stats("outTemp").unwrap();
    buf.add_packet(&loop_packet(ts::NOON + 10, &[("outTemp", None)])).unwrap();
    assert_eq!(buf.stats("outTemp").unwrap(), before);
}

#[test]
fn test_day_reset_keeps_history() {
    let mut buf = buffer();
    buf.add_packet(&wind_packet(ts::DAY_END - 60, Some(4.0), Some(90.0))).unwrap();
    buf.add_packet(&wind_packet(ts::DAY_END + 60, Some(6.0), Some(90.0))).unwrap();

    assert_eq!(buf.active_day_span(), TimeSpan::new(ts::DAY_END, ts::DAY_END + 86_400));
    let speed = buf.stats("windSpeed").unwrap();
    assert_eq!(speed.count, 1);
    assert_eq!(speed.max, Some(6.0));
    assert_eq!(speed.history_len, 2);
    assert_eq!(buf.stats("wind").unwrap().history_len, 2);
}

#[test]
fn test_history_pruned_to_retention() {
    let mut acc = ScalarAccumulator::new(Unit::MilePerHour, UnitGroup::Speed, Some(600));
    for offset in [0, 300, 600, 601, 900] {
        acc.add_value(Some(1.0), ts::NOON + offset, true);
    }
    let history = acc.history().unwrap();
    let last = ts::NOON + 900;
    assert!(history.iter().all(|(_, t)| *t > last - 600));
    assert_eq!(history.len(), 3);
    assert!(history.is_full());
}

#[test]
fn test_vector_average_without_elapsed_time() {
    let mut acc = VectorAccumulator::new(Unit::MilePerHour, UnitGroup::Speed, None);
    assert_eq!(acc.day_vector_average(), VectorValue::new(Some(0.0), Some(0.0)));
    acc.add_value(VectorValue::new(Some(5.0), Some(90.0)), ts::NOON, true);
    assert_eq!(acc.day_vector_average(), VectorValue::new(Some(0.0), Some(0.0)));
}

// ============================================================================
// Wind scenario
// ============================================================================

#[test]
fn test_wind_scenario_ignores_null_sample() {
    let mut buf = buffer();
    buf.add_packet(&wind_packet(ts::NOON, Some(5.0), Some(90.0))).unwrap();
    buf.add_packet(&wind_packet(ts::NOON + 60, Some(10.0), Some(180.0))).unwrap();
    buf.add_packet(&wind_packet(ts::NOON + 120, None, None)).unwrap();

    let speed = buf.stats("windSpeed").unwrap();
    assert_eq!(speed.count, 2);
    assert_eq!(speed.max, Some(10.0));
    assert_eq!(speed.max_time, Some(ts::NOON + 60));

    let wind = buf.get("wind").unwrap().as_vector().unwrap();
    assert_eq!(wind.history().unwrap().len(), 2);
    let average = wind.history_average(ts::NOON + 120, 600).unwrap();
    // mean of (5, 0) and (0, -10) in x/y
    assert_some_approx_eq!(average.magnitude, 31.25_f64.sqrt(), 1e-9);
    assert_some_approx_eq!(average.direction, 153.434_948_8, 1e-6);

    // time-weighted day average differs from the unweighted history mean
    let day = wind.day_vector_average();
    assert_some_approx_eq!(day.magnitude, (25.0_f64 + 100.0).sqrt() / 60.0, 1e-9);
}

// ============================================================================
// Packet cache
// ============================================================================

#[test]
fn test_cache_keeps_absent_field() {
    let mut cache = PacketCache::with_manifest(vec!["outTemp".into(), "UV".into()]);
    let first = loop_packet(ts::NOON + 100, &[("UV", Some(12.3)), ("outTemp", Some(50.0))]);
    let second = loop_packet(ts::NOON + 200, &[("outTemp", Some(51.0))]);
    cache.update(&first, first.date_time).unwrap();
    cache.update(&second, second.date_time).unwrap();

    let fresh = cache.get_snapshot(ts::NOON + 250, 600);
    assert_eq!(fresh.get("UV"), Some(12.3));
    assert_eq!(fresh.get("outTemp"), Some(51.0));

    let strict = cache.get_snapshot(ts::NOON + 250, 50);
    assert_eq!(strict.get("UV"), None);
    assert!(strict.observations.contains_key("UV"));
    assert_eq!(strict.get("outTemp"), Some(51.0));
}

#[test]
fn test_cache_staleness_boundary() {
    let mut cache = PacketCache::with_manifest(vec!["rain".into()]);
    cache
        .update(&loop_packet(ts::NOON, &[("rain", Some(0.01))]), ts::NOON)
        .unwrap();
    assert_eq!(cache.get_value("rain", ts::NOON + 60, 60), Some(0.01));
    assert_eq!(cache.get_value("rain", ts::NOON + 61, 60), None);
}

#[test]
fn test_cache_null_never_replaces_value() {
    let mut cache = PacketCache::with_manifest(vec!["rain".into()]);
    cache
        .update(&loop_packet(ts::NOON, &[("rain", Some(0.02))]), ts::NOON)
        .unwrap();
    cache
        .update(&loop_packet(ts::NOON + 10, &[("rain", None)]), ts::NOON + 10)
        .unwrap();
    let cached = cache.get("rain").unwrap();
    assert_eq!(cached.value, 0.02);
    assert_eq!(cached.timestamp, ts::NOON);
}

// ============================================================================
// Seeding
// ============================================================================

#[test]
fn test_seed_matches_replay_in_any_order() {
    let rows: Vec<(i64, f64, f64, f64)> = vec![
        (ts::DAY_START + 300, 40.5, 0.0, 3.0),
        (ts::DAY_START + 600, 52.25, 0.25, 7.5),
        (ts::DAY_START + 900, 47.0, 0.5, 1.0),
        (ts::DAY_START + 1200, 38.75, 0.125, 7.5),
    ];
    let fields = |temp: f64, rain: f64, speed: f64| {
        vec![
            ("outTemp", Some(temp)),
            ("rain", Some(rain)),
            ("windSpeed", Some(speed)),
        ]
    };

    let records: Vec<_> = rows
        .iter()
        .map(|(t, temp, rain, speed)| archive_record(*t, &fields(*temp, *rain, *speed)))
        .collect();
    let span = TimeSpan::new(ts::DAY_START, ts::DAY_END);
    let summary = DailySummary::from_records(span, &records).unwrap().unwrap();
    let mut seeded = buffer();
    seeded.seed(&summary).unwrap();

    let replay = |order: Vec<&(i64, f64, f64, f64)>| {
        let mut replayed = buffer();
        for (t, temp, rain, speed) in order {
            replayed
                .add_packet(&loop_packet(*t, &fields(*temp, *rain, *speed)))
                .unwrap();
        }
        replayed
    };
    let same = |a: &StatisticsBuffer, b: &StatisticsBuffer, name: &str| {
        let a = a.stats(name).unwrap_or_else(|| panic!("{name} missing after seeding"));
        let b = b.stats(name).unwrap_or_else(|| panic!("{name} missing after replay"));
        assert_eq!(a.min, b.min, "{name} min");
        assert_eq!(a.max, b.max, "{name} max");
        assert_eq!(a.count, b.count, "{name} count");
        assert_approx_eq!(a.sum, b.sum, 1e-12);
    };

    let forward = replay(rows.iter().collect());
    let reversed = replay(rows.iter().rev().collect());
    for replayed in [&forward, &reversed] {
        for name in ["outTemp", "rain", "windSpeed", "wind"] {
            same(&seeded, replayed, name);
        }
    }
    // windrun needs the time between speeds, so only arrival order replays it
    same(&seeded, &forward, "windrun");
    assert_eq!(seeded.stats("windrun").unwrap().count, 3);
    assert_approx_eq!(seeded.stats("windrun").unwrap().sum, 16.0 / 12.0, 1e-12);

    // seeding does not invent history
    assert_eq!(seeded.stats("windSpeed").unwrap().history_len, 0);
}

#[test]
fn test_windrun_continues_after_seed() {
    let span = TimeSpan::new(ts::DAY_START, ts::DAY_END);
    let record = archive_record(ts::DAY_START + 300, &[("windSpeed", Some(6.0))]);
    let summary = DailySummary::from_records(span, [&record]).unwrap().unwrap();
    let mut buf = buffer();
    buf.seed(&summary).unwrap();

    buf.add_packet(&loop_packet(ts::DAY_START + 600, &[("windSpeed", Some(12.0))]))
        .unwrap();
    // 12 mph for five minutes
    let run = buf.stats("windrun").unwrap();
    assert_eq!(run.count, 1);
    assert_approx_eq!(run.sum, 1.0, 1e-12);
}

#[test]
fn test_seed_converts_unit_system() {
    let span = TimeSpan::new(ts::DAY_START, ts::DAY_END);
    let record = archive_record(ts::DAY_START + 300, &[("outTemp", Some(212.0))]);
    let summary = DailySummary::from_records(span, [&record]).unwrap().unwrap();

    let mut buf = buffer();
    buf.add_packet(&test_utils::packet_in(
        UnitSystem::Metric,
        ts::DAY_START + 200,
        &[("outTemp", Some(10.0))],
    ))
    .unwrap();
    buf.seed(&summary).unwrap();

    let stats = buf.stats("outTemp").unwrap();
    assert_eq!(stats.unit, Unit::DegreeC);
    assert_some_approx_eq!(stats.max, 100.0, 1e-9);
}
