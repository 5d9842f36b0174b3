use std::collections::HashSet;

use tswin::{
    slice, slice_windows, slice_windows_parallel, Observation, SliceConfig, SliceError, Window,
    WindowId,
};

const DAY_MS: i64 = 86_400_000;
const START_TS_MS: i64 = 1_577_923_200_000; // 2020-01-02T00:00:00Z

fn daily_series(entity: &str, points: usize) -> Vec<Observation> {
    (0..points)
        .map(|idx| {
            Observation::new(
                entity,
                START_TS_MS + idx as i64 * DAY_MS,
                300.0 + (idx as f64 * 1.7).sin() * 10.0,
            )
        })
        .collect()
}

fn mixed_input() -> Vec<Observation> {
    let mut obs = daily_series("AAPL", 40);
    obs.extend(daily_series("GOOG", 17));
    obs.extend(daily_series("MSFT", 4));
    // interleave so nothing arrives pre-sorted
    obs.reverse();
    obs.swap(3, 50);
    obs.swap(10, 30);
    obs
}

fn window_set(windows: &[Window]) -> HashSet<(WindowId, Vec<i64>)> {
    windows
        .iter()
        .map(|w| {
            (
                w.id.clone(),
                w.observations.iter().map(|o| o.ts_ms_utc).collect(),
            )
        })
        .collect()
}

#[test]
fn ten_observations_min_five_yields_five_full_history_windows() {
    let obs = daily_series("AAPL", 10);
    let windows = slice(&obs, 20, 5).expect("slice succeeds");

    assert_eq!(windows.len(), 5);
    for (offset, window) in windows.iter().enumerate() {
        let cutoff_idx = 5 + offset;
        assert_eq!(
            window.id,
            WindowId::new("AAPL", START_TS_MS + cutoff_idx as i64 * DAY_MS)
        );
        assert_eq!(window.len(), cutoff_idx + 1);
        assert_eq!(window.observations[0].ts_ms_utc, START_TS_MS);
    }
}

#[test]
fn short_entity_yields_no_windows_without_error() {
    let mut obs = daily_series("AAPL", 10);
    obs.extend(daily_series("GOOG", 3));

    let windows = slice(&obs, 20, 5).expect("slice succeeds");
    let aapl = windows.iter().filter(|w| w.id.entity_id == "AAPL").count();
    let goog = windows.iter().filter(|w| w.id.entity_id == "GOOG").count();
    assert_eq!(aapl, 5);
    assert_eq!(goog, 0);
}

#[test]
fn duplicate_timestamp_fails_whole_call() {
    let mut obs = daily_series("AAPL", 10);
    obs.extend(daily_series("GOOG", 10));
    obs.push(Observation::new("GOOG", START_TS_MS + 4 * DAY_MS, 1.0));

    let err = slice(&obs, 20, 5).expect_err("duplicate must fail");
    assert_eq!(
        err,
        SliceError::DuplicateTimestamp {
            entity_id: "GOOG".to_string(),
            ts_ms_utc: START_TS_MS + 4 * DAY_MS,
        }
    );

    let err = slice_windows_parallel(&obs, 20, 5).expect_err("parallel must fail too");
    assert!(matches!(err, SliceError::DuplicateTimestamp { .. }));
}

#[test]
fn bounds_are_validated_before_any_work() {
    let obs = daily_series("AAPL", 3);
    for (max, min) in [(0, 0), (3, 3), (2, 9)] {
        let err = slice(&obs, max, min).expect_err("bad bounds must fail");
        assert!(matches!(err, SliceError::Configuration(_)), "max={max} min={min}");
    }
}

#[test]
fn every_window_is_causal_bounded_and_single_entity() {
    let max_lookback = 7;
    let min_lookback = 2;
    let windows = slice(&mixed_input(), max_lookback, min_lookback).expect("slice succeeds");

    assert!(!windows.is_empty());
    for window in &windows {
        assert!(window.len() >= min_lookback + 1, "{} too short", window.id);
        assert!(window.len() <= max_lookback, "{} too long", window.id);
        assert!(window
            .observations
            .iter()
            .all(|o| o.ts_ms_utc <= window.id.cutoff_ts_ms_utc));
        assert!(window
            .observations
            .iter()
            .all(|o| o.entity_id == window.id.entity_id));
        assert_eq!(
            window.observations.last().map(|o| o.ts_ms_utc),
            Some(window.id.cutoff_ts_ms_utc)
        );
        assert!(window
            .observations
            .windows(2)
            .all(|pair| pair[0].ts_ms_utc < pair[1].ts_ms_utc));
    }
}

#[test]
fn window_count_per_entity_is_points_minus_min_lookback() {
    let windows = slice(&mixed_input(), 7, 5).expect("slice succeeds");
    for (entity, points) in [("AAPL", 40_usize), ("GOOG", 17), ("MSFT", 4)] {
        let count = windows.iter().filter(|w| w.id.entity_id == entity).count();
        assert_eq!(count, points.saturating_sub(5), "entity {entity}");
    }
}

#[test]
fn cutoffs_ascend_within_each_entity_and_ids_are_unique() {
    let windows = slice(&mixed_input(), 7, 1).expect("slice succeeds");
    let ids: HashSet<&WindowId> = windows.iter().map(|w| &w.id).collect();
    assert_eq!(ids.len(), windows.len());

    for pair in windows.windows(2) {
        if pair[0].id.entity_id == pair[1].id.entity_id {
            assert!(pair[0].id.cutoff_ts_ms_utc < pair[1].id.cutoff_ts_ms_utc);
        }
    }
}

#[test]
fn reordered_input_and_parallel_run_give_identical_output() {
    let input = mixed_input();
    let mut sorted = input.clone();
    sorted.sort_by(|a, b| {
        a.entity_id
            .cmp(&b.entity_id)
            .then(a.ts_ms_utc.cmp(&b.ts_ms_utc))
    });

    let cfg = SliceConfig {
        max_lookback: 10,
        min_lookback: 3,
        parallel: false,
    };
    let from_shuffled = slice_windows(&input, &cfg).expect("shuffled");
    let from_sorted = slice_windows(&sorted, &cfg).expect("sorted");
    let parallel = slice_windows(
        &input,
        &SliceConfig {
            parallel: true,
            ..cfg
        },
    )
    .expect("parallel");

    assert_eq!(window_set(&from_shuffled.windows), window_set(&from_sorted.windows));
    assert_eq!(from_shuffled.windows, parallel.windows);
    assert_eq!(from_shuffled.report, parallel.report);
}

#[test]
fn passthrough_fields_are_replicated_into_every_containing_window() {
    let obs: Vec<Observation> = daily_series("AAPL", 4)
        .into_iter()
        .enumerate()
        .map(|(idx, o)| o.with_passthrough(vec![format!("vol-{idx}")]))
        .collect();

    let windows = slice(&obs, 3, 0).expect("slice succeeds");
    let carrying_first: Vec<&Window> = windows
        .iter()
        .filter(|w| w.observations.iter().any(|o| o.passthrough == ["vol-0"]))
        .collect();
    // index 0 sits in the windows cut at 0, 1 and 2
    assert_eq!(carrying_first.len(), 3);
}
