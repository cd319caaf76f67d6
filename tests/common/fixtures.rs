//! Long-format frames (`month_id`, `country_id`, features...) for drift tests.

#![allow(dead_code)]

use polars::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::HashSet;

pub const FEATURES: [&str; 3] = ["ged_sb", "wdi_pop", "vdem_v2x"];

/// One row per `(month, country)` pair, skipping pairs in `absent`.
///
/// Months start at 400 and countries at 1, mimicking real unit ids.
pub fn long_frame(
    times: usize,
    spaces: usize,
    features: &[&str],
    absent: &HashSet<(usize, usize)>,
    value: impl Fn(usize, usize, usize) -> f64,
) -> DataFrame {
    let mut months = Vec::new();
    let mut countries = Vec::new();
    let mut columns = vec![Vec::new(); features.len()];
    for t in 0..times {
        for s in 0..spaces {
            if absent.contains(&(t, s)) {
                continue;
            }
            months.push(400 + t as i64);
            countries.push(1 + s as i64);
            for (f, column) in columns.iter_mut().enumerate() {
                column.push(value(t, s, f));
            }
        }
    }

    let mut frame = vec![
        Column::new("month_id".into(), months),
        Column::new("country_id".into(), countries),
    ];
    for (name, values) in features.iter().zip(columns) {
        frame.push(Column::new((*name).into(), values));
    }
    DataFrame::new(frame).expect("valid long frame")
}

/// Healthy data: time invariant, strictly positive, no gaps.
pub fn stable_value(_t: usize, s: usize, f: usize) -> f64 {
    1.0 + (s * s * (f + 1) + f) as f64
}

pub fn stable_frame(times: usize, spaces: usize) -> DataFrame {
    long_frame(times, spaces, &FEATURES, &HashSet::new(), stable_value)
}

/// `stable_frame` with `count` cells set to NaN, chosen with a fixed seed.
pub fn frame_with_random_nans(times: usize, spaces: usize, count: usize, seed: u64) -> DataFrame {
    let cells = times * spaces * FEATURES.len();
    let mut rng = StdRng::seed_from_u64(seed);
    let missing: HashSet<usize> = rand::seq::index::sample(&mut rng, cells, count)
        .into_iter()
        .collect();
    long_frame(times, spaces, &FEATURES, &HashSet::new(), |t, s, f| {
        let flat = (t * spaces + s) * FEATURES.len() + f;
        if missing.contains(&flat) {
            f64::NAN
        } else {
            stable_value(t, s, f)
        }
    })
}
