//! End-to-end drift detection: frames in, reports out.

mod common;

use common::fixtures::{self, FEATURES, frame_with_random_nans, long_frame, stable_frame, stable_value};
use ndarray::Array3;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::{Value, json};
use std::collections::HashSet;
use viewser::Error;
use viewser::drift::{
    CheckContext, CheckKind, CheckOutcome, DOES_NOT_EXIST, DriftConfig, DriftOverrides,
    DriftReport, InputGate, Partition, PartitionLengths, Perturber, TensorBuilder, Tester,
    TimeSpaceIndex, TimeSpaceTensor,
};
use viewser::remote::index_first;

fn outcome<'a>(report: &'a DriftReport, check: &str) -> &'a CheckOutcome {
    &report
        .outcomes
        .iter()
        .find(|r| r.check == check)
        .unwrap_or_else(|| panic!("no outcome for {check}"))
        .outcome
}

fn stable_tensor(times: usize, spaces: usize) -> TimeSpaceTensor {
    TensorBuilder::new().build(&stable_frame(times, spaces)).unwrap()
}

#[test]
fn ten_percent_missingness_raises_one_dataset_alarm() {
    // 18 of 180 cells missing.
    let df = frame_with_random_nans(12, 5, 18, 7);
    let overrides = DriftOverrides::new().with_threshold("global_missingness", 0.05);
    let report = InputGate::new(&df, Some(&overrides), None)
        .unwrap()
        .assemble_alerts();

    let dataset_alarms: Vec<_> = report
        .alarms()
        .filter(|a| a.message.contains("dataset missingness"))
        .collect();
    assert_eq!(dataset_alarms.len(), 1, "{report}");
    assert!(dataset_alarms[0].severity >= 2);
    assert!((dataset_alarms[0].ratio - 2.0).abs() < 1e-9);

    let alarms = outcome(&report, "global_missingness").alarms();
    assert_eq!(alarms.len(), 1);
    assert_eq!(
        alarms[0].message,
        "dataset missingness; offender: 0, threshold: 0.05"
    );
}

#[test]
fn delta_completeness_fires_only_for_the_degraded_feature() {
    // wdi_pop loses half its test-window values; the others do not change.
    let df = long_frame(12, 6, &FEATURES, &HashSet::new(), |t, s, f| {
        if t == 11 && f == 1 && s < 3 {
            f64::NAN
        } else {
            stable_value(t, s, f)
        }
    });
    let overrides = DriftOverrides::new().with_threshold("delta_completeness", 1.25);
    let report = InputGate::new(&df, Some(&overrides), None)
        .unwrap()
        .assemble_alerts();

    let alarms = outcome(&report, "delta_completeness").alarms();
    let offenders: Vec<&str> = alarms.iter().map(|a| a.offender.as_str()).collect();
    assert_eq!(offenders, vec!["wdi_pop"]);
    assert!(alarms[0].message.starts_with("feature delta_completeness"));
}

#[test]
fn healthy_data_passes_every_default_check() {
    let report = InputGate::new(&stable_frame(12, 6), None, None)
        .unwrap()
        .assemble_alerts();

    assert_eq!(report.outcomes.len(), DriftConfig::default().checks().len());
    assert_eq!(report.alarms().count(), 0, "{report}");
    assert!(report.is_clean(), "{report}");
    let text = report.to_string();
    assert!(text.contains("dataset missingness passed"));
    assert!(text.contains("dataset ECOD drift passed"));
}

#[test]
fn incomplete_unknown_check_is_a_configuration_error() {
    let overrides =
        DriftOverrides::from_json_str(r#"{"nonexistent_check": {"threshold": 1.0}}"#).unwrap();
    let err = InputGate::new(&stable_frame(12, 6), Some(&overrides), None).unwrap_err();
    assert!(matches!(err, Error::Config(_)), "{err:?}");
    let message = err.to_string();
    assert!(message.contains("nonexistent_check"), "{message}");
    assert!(message.contains("test_function"), "{message}");
}

#[test]
fn custom_check_joins_the_report() {
    let overrides = DriftOverrides::from_json(&json!({
        "zero_watch": {
            "test_function": "feature_zero_fracs",
            "threshold": 0.01,
            "message": "custom zero watch"
        }
    }))
    .unwrap();
    let df = long_frame(12, 4, &FEATURES, &HashSet::new(), |t, s, f| {
        if f == 2 && s == 0 { 0.0 } else { stable_value(t, s, f) }
    });
    let report = InputGate::new(&df, Some(&overrides), None)
        .unwrap()
        .assemble_alerts();
    assert_eq!(report.outcomes[0].check, "zero_watch");
    let alarms = outcome(&report, "zero_watch").alarms();
    assert_eq!(alarms.len(), 1);
    assert_eq!(alarms[0].offender, "vdem_v2x");
}

#[test]
fn self_test_runs_before_the_gate_opens() {
    let reference = stable_frame(12, 6);
    let gate = InputGate::new(&stable_frame(12, 6), None, Some(&reference)).unwrap();
    assert!(gate.assemble_alerts().is_clean());

    let unreachable = DriftOverrides::new().with_threshold("time_zeros", 5.0);
    let err = InputGate::new(&stable_frame(12, 6), Some(&unreachable), Some(&reference)).unwrap_err();
    assert!(matches!(err, Error::SelfTest { .. }), "{err:?}");
    assert!(err.to_string().contains("time_zeros"));
}

#[test]
fn missing_country_months_are_not_missing_values() {
    // Country 6 only exists from the 9th month on; none of that is missingness.
    let absent: HashSet<_> = (0..8).map(|t| (t, 5)).collect();
    let df = long_frame(12, 6, &FEATURES, &absent, stable_value);
    let gate = InputGate::new(&df, None, None).unwrap();
    let data = gate.tensor().data();
    assert_eq!(data[[0, 5, 0]], DOES_NOT_EXIST);
    assert!(data[[8, 5, 0]].is_finite());

    let report = gate.assemble_alerts();
    for check in ["global_missingness", "time_missingness", "space_missingness", "feature_missingness"] {
        assert!(outcome(&report, check).is_passed(), "{check}: {report}");
    }
}

#[test]
fn report_serializes_with_status_tags() {
    let df = frame_with_random_nans(12, 5, 18, 7);
    let report = InputGate::new(&df, None, None).unwrap().assemble_alerts();
    let value: Value = serde_json::to_value(&report).unwrap();
    let first = &value["outcomes"][0];
    assert_eq!(first["check"], json!("global_missingness"));
    assert_eq!(first["status"], json!("alarms"));
    let timestamp = first["alarms"][0]["timestamp"].as_str().unwrap();
    assert_eq!(timestamp.len(), "2024-01-01 00:00:00".len());
}

#[test]
fn every_default_check_fires_on_its_own_perturbation() {
    let reference = stable_tensor(12, 6);
    let config = DriftConfig::default();
    let mut perturber = Perturber::default();
    for (name, spec) in config.checks() {
        let perturbed = perturber.perturb(&reference, spec, config.lengths()).unwrap();
        let ctx = CheckContext {
            data: perturbed.view(),
            index: perturbed.index(),
            features: perturbed.features(),
            lengths: config.lengths(),
        };
        let outcome = Tester::new(spec.kind, spec.threshold, &spec.message, ctx).generate_alarms();
        assert!(!outcome.alarms().is_empty(), "{name} did not fire: {outcome:?}");
    }
}

#[test]
fn negative_infinity_in_the_source_is_rejected() {
    let df = long_frame(3, 2, &FEATURES, &HashSet::new(), |t, s, f| {
        if (t, s, f) == (1, 1, 1) { f64::NEG_INFINITY } else { 1.0 }
    });
    let err = TensorBuilder::new().build(&df).unwrap_err();
    assert!(matches!(err, Error::Data(_)), "{err:?}");
}

fn fraction_kinds() -> impl Strategy<Value = CheckKind> {
    prop::sample::select(vec![
        CheckKind::GlobalNanFracs,
        CheckKind::GlobalZeroFracs,
        CheckKind::TimeNanFracs,
        CheckKind::SpaceNanFracs,
        CheckKind::FeatureNanFracs,
        CheckKind::TimeZeroFracs,
        CheckKind::SpaceZeroFracs,
        CheckKind::FeatureZeroFracs,
        CheckKind::DeltaCompleteness,
        CheckKind::DeltaZeroes,
    ])
}

/// Cells drawn from {NaN, 0, 1, 2, sentinel}.
fn cell() -> impl Strategy<Value = f64> {
    prop_oneof![
        Just(f64::NAN),
        Just(0.0),
        Just(1.0),
        Just(2.0),
        Just(DOES_NOT_EXIST),
    ]
}

fn offenders(outcome: &CheckOutcome) -> HashSet<String> {
    outcome.alarms().iter().map(|a| a.offender.clone()).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn partitions_never_overlap(standard in 1usize..20, test in 1usize..6, extra in 0usize..10) {
        let n = standard + test + extra;
        let data = Array3::<f64>::zeros((n, 2, 1));
        let lengths = PartitionLengths::new(standard, test).unwrap();
        let partition = Partition::split(data.view(), lengths).unwrap();

        prop_assert_eq!(partition.standard_range.len(), standard);
        prop_assert_eq!(partition.test_range.len(), test);
        prop_assert_eq!(partition.standard_range.end, partition.test_range.start);
        prop_assert_eq!(partition.test_range.end, n);
        prop_assert_eq!(partition.standard.dim().0, standard);
        prop_assert_eq!(partition.test.dim().0, test);
    }

    #[test]
    fn sentinel_marks_exactly_the_absent_pairs(
        absent in prop::collection::hash_set((0usize..6, 0usize..4), 0..12),
    ) {
        // Keep every unit present somewhere so the index shape is stable.
        let absent: HashSet<_> = absent.into_iter().filter(|&(t, s)| t != 0 && s != 0).collect();
        let df = long_frame(6, 4, &FEATURES, &absent, |t, s, f| {
            if (t + s + f) % 5 == 0 { f64::NAN } else { -((t * s + f) as f64) }
        });
        let tensor = TensorBuilder::new().build(&df).unwrap();
        prop_assert_eq!(tensor.shape(), (6, 4, FEATURES.len()));

        for ((t, s, _), &value) in tensor.data().indexed_iter() {
            prop_assert_eq!(value == DOES_NOT_EXIST, absent.contains(&(t, s)));
        }
    }

    #[test]
    fn raising_or_lowering_thresholds_is_monotone(
        kind in fraction_kinds(),
        cells in prop::collection::vec(cell(), 4 * 3 * 2),
        threshold in 0.01f64..2.0,
    ) {
        let data = Array3::from_shape_vec((4, 3, 2), cells).unwrap();
        let index = TimeSpaceIndex::new(1..=4, 1..=3);
        let features = vec!["a".to_string(), "b".to_string()];
        let ctx = CheckContext {
            data: data.view(),
            index: &index,
            features: &features,
            lengths: PartitionLengths::new(2, 1).unwrap(),
        };
        let values = kind.run(&ctx).unwrap().values;
        let max = values.iter().copied().fold(0.0_f64, f64::max);

        let above = Tester::new(kind, max.min(1e300) * 2.0 + 1.0, "probe", ctx).generate_alarms();
        prop_assert!(above.alarms().is_empty());

        let base = offenders(&Tester::new(kind, threshold, "probe", ctx).generate_alarms());
        let lower = offenders(&Tester::new(kind, threshold / 2.0, "probe", ctx).generate_alarms());
        prop_assert!(base.is_subset(&lower), "{base:?} not in {lower:?}");
    }

    #[test]
    fn merging_overrides_is_idempotent(
        thresholds in prop::collection::vec(0.01f64..10.0, 0..5),
        disable_ks in any::<bool>(),
    ) {
        let defaults = DriftConfig::default();
        prop_assert_eq!(&defaults.merge(&DriftOverrides::new()).unwrap(), &defaults);

        let names: Vec<&str> = defaults.checks().iter().map(|(n, _)| n.as_str()).collect();
        let mut overrides = DriftOverrides::new();
        for (name, threshold) in names.iter().rev().zip(&thresholds) {
            overrides = overrides.with_threshold(*name, *threshold);
        }
        if disable_ks {
            overrides = DriftOverrides::from_json(&json!({"ks_drift": {"enabled": false}}))
                .unwrap()
                .with_threshold("global_zeros", 0.5);
        }
        let once = defaults.merge(&overrides).unwrap();
        let twice = once.merge(&overrides).unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn self_test_holds_for_any_seed(seed in any::<u64>()) {
        let reference = stable_tensor(12, 6);
        let config = DriftConfig::default();
        let mut perturber = Perturber::new(seed);
        for (name, spec) in config.checks() {
            let perturbed = perturber.perturb(&reference, spec, config.lengths()).unwrap();
            let report = InputGate::from_tensor(
                perturbed,
                Some(&DriftOverrides::new()),
                None,
            )
            .unwrap()
            .assemble_alerts();
            let fired = report
                .outcomes
                .iter()
                .find(|r| &r.check == name)
                .map(|r| !r.outcome.alarms().is_empty());
            prop_assert_eq!(fired, Some(true), "{} did not fire", name);
        }
    }
}

#[test]
fn fixture_layout_matches_real_unit_ids() {
    let df = fixtures::stable_frame(2, 2);
    assert_eq!(df.shape(), (4, 2 + FEATURES.len()));
    let tensor = TensorBuilder::new().build(&df).unwrap();
    assert_eq!(tensor.index().times(), &[400, 401]);
    assert_eq!(tensor.index().spaces(), &[1, 2]);
}

#[test]
fn trailing_index_columns_are_restored_before_tensorizing() {
    let trailing = stable_frame(12, 6)
        .select(["ged_sb", "wdi_pop", "vdem_v2x", "month_id", "country_id"])
        .unwrap();
    let index = ["month_id".to_string(), "country_id".to_string()];
    let df = index_first(trailing, &index).unwrap();

    let gate = InputGate::new(&df, None, None).unwrap();
    let tensor = gate.tensor();
    assert_eq!(tensor.shape(), (12, 6, 3));
    assert_eq!(tensor.index().times().first(), Some(&400));
    assert_eq!(tensor.index().spaces(), &[1, 2, 3, 4, 5, 6]);
    assert_eq!(tensor.features(), FEATURES.map(String::from).as_slice());
    assert!(gate.assemble_alerts().is_clean());
}
