//! Integrity checks.
//!
//! Every check is a pure function of a [`CheckContext`] and returns one raw
//! value per entry (dataset, time unit, space unit or feature). Fractions are
//! taken over *present* cells only: the does-not-exist sentinel is never
//! counted, NaN is never zero, and a slice without present cells reports 0.

use super::partition::{Partition, PartitionLengths};
use super::stats::{Ecod, finite_mean_std, ks_2samp};
use super::tensor::TimeSpaceIndex;
use super::is_present;
use crate::error::{Error, Result};
use ndarray::{Array2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Guards the delta and ratio denominators.
pub const EPSILON: f64 = 1e-20;

/// Reported by `ks_drift` when a partition has no usable values.
pub const KS_EMPTY_SAMPLE: f64 = 1e10;

/// Everything a check may look at.
#[derive(Debug, Clone, Copy)]
pub struct CheckContext<'a> {
    pub data: ArrayView3<'a, f64>,
    pub index: &'a TimeSpaceIndex,
    pub features: &'a [String],
    pub lengths: PartitionLengths,
}

impl<'a> CheckContext<'a> {
    fn partition(&self) -> Result<Partition<'a>> {
        Partition::split(self.data, self.lengths)
    }
}

/// Raw check results plus optional human-readable names for each entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutput {
    pub values: Vec<f64>,
    pub labels: Option<Vec<String>>,
}

impl CheckOutput {
    fn unlabelled(values: Vec<f64>) -> Self {
        Self {
            values,
            labels: None,
        }
    }

    fn labelled(values: Vec<f64>, labels: Vec<String>) -> Self {
        Self {
            values,
            labels: Some(labels),
        }
    }

    /// Name of entry `position`, falling back to the position itself.
    #[must_use]
    pub fn label(&self, position: usize) -> String {
        self.labels
            .as_ref()
            .and_then(|labels| labels.get(position).cloned())
            .unwrap_or_else(|| position.to_string())
    }
}

pub type CheckFn = fn(&CheckContext<'_>) -> Result<CheckOutput>;

/// The check implementations, addressable by their configuration name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    GlobalNanFracs,
    GlobalZeroFracs,
    TimeNanFracs,
    SpaceNanFracs,
    FeatureNanFracs,
    TimeZeroFracs,
    SpaceZeroFracs,
    FeatureZeroFracs,
    DeltaCompleteness,
    DeltaZeroes,
    ExtremeValues,
    KsDrift,
    EcodDrift,
}

impl CheckKind {
    pub const ALL: [Self; 13] = [
        Self::GlobalNanFracs,
        Self::GlobalZeroFracs,
        Self::TimeNanFracs,
        Self::SpaceNanFracs,
        Self::FeatureNanFracs,
        Self::TimeZeroFracs,
        Self::SpaceZeroFracs,
        Self::FeatureZeroFracs,
        Self::DeltaCompleteness,
        Self::DeltaZeroes,
        Self::ExtremeValues,
        Self::KsDrift,
        Self::EcodDrift,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::GlobalNanFracs => "global_nan_fracs",
            Self::GlobalZeroFracs => "global_zero_fracs",
            Self::TimeNanFracs => "time_nan_fracs",
            Self::SpaceNanFracs => "space_nan_fracs",
            Self::FeatureNanFracs => "feature_nan_fracs",
            Self::TimeZeroFracs => "time_zero_fracs",
            Self::SpaceZeroFracs => "space_zero_fracs",
            Self::FeatureZeroFracs => "feature_zero_fracs",
            Self::DeltaCompleteness => "delta_completeness",
            Self::DeltaZeroes => "delta_zeroes",
            Self::ExtremeValues => "extreme_values",
            Self::KsDrift => "ks_drift",
            Self::EcodDrift => "ecod_drift",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Whether the check compares standard and test windows.
    #[must_use]
    pub const fn uses_partition(self) -> bool {
        matches!(
            self,
            Self::DeltaCompleteness
                | Self::DeltaZeroes
                | Self::ExtremeValues
                | Self::KsDrift
                | Self::EcodDrift
        )
    }

    #[must_use]
    pub const fn function(self) -> CheckFn {
        match self {
            Self::GlobalNanFracs => global_nan_fracs,
            Self::GlobalZeroFracs => global_zero_fracs,
            Self::TimeNanFracs => time_nan_fracs,
            Self::SpaceNanFracs => space_nan_fracs,
            Self::FeatureNanFracs => feature_nan_fracs,
            Self::TimeZeroFracs => time_zero_fracs,
            Self::SpaceZeroFracs => space_zero_fracs,
            Self::FeatureZeroFracs => feature_zero_fracs,
            Self::DeltaCompleteness => delta_completeness,
            Self::DeltaZeroes => delta_zeroes,
            Self::ExtremeValues => extreme_values,
            Self::KsDrift => ks_drift,
            Self::EcodDrift => ecod_drift,
        }
    }

    pub fn run(self, ctx: &CheckContext<'_>) -> Result<CheckOutput> {
        (self.function())(ctx)
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CheckKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s).ok_or_else(|| {
            Error::config(format!(
                "unknown test_function '{s}' (expected one of: {})",
                Self::ALL.map(Self::name).join(", ")
            ))
        })
    }
}

fn is_nan(value: f64) -> bool {
    value.is_nan()
}

fn is_zero(value: f64) -> bool {
    value == 0.0
}

/// Share of present cells matching `hit`; 0 when nothing is present.
fn fraction(values: impl IntoIterator<Item = f64>, hit: fn(f64) -> bool) -> f64 {
    let (present, hits) = values
        .into_iter()
        .filter(|v| is_present(*v))
        .fold((0usize, 0usize), |(present, hits), v| {
            (present + 1, hits + usize::from(hit(v)))
        });
    if present == 0 {
        0.0
    } else {
        hits as f64 / present as f64
    }
}

fn slice_fractions(data: ArrayView3<'_, f64>, axis: Axis, hit: fn(f64) -> bool) -> Vec<f64> {
    data.axis_iter(axis)
        .map(|slice| fraction(slice.iter().copied(), hit))
        .collect()
}

fn time_labels(index: &TimeSpaceIndex) -> Vec<String> {
    index.times().iter().map(ToString::to_string).collect()
}

fn space_labels(index: &TimeSpaceIndex) -> Vec<String> {
    index.spaces().iter().map(ToString::to_string).collect()
}

fn global_nan_fracs(ctx: &CheckContext<'_>) -> Result<CheckOutput> {
    Ok(CheckOutput::unlabelled(vec![fraction(ctx.data.iter().copied(), is_nan)]))
}

fn global_zero_fracs(ctx: &CheckContext<'_>) -> Result<CheckOutput> {
    Ok(CheckOutput::unlabelled(vec![fraction(ctx.data.iter().copied(), is_zero)]))
}

fn time_nan_fracs(ctx: &CheckContext<'_>) -> Result<CheckOutput> {
    Ok(CheckOutput::labelled(
        slice_fractions(ctx.data, Axis(0), is_nan),
        time_labels(ctx.index),
    ))
}

fn space_nan_fracs(ctx: &CheckContext<'_>) -> Result<CheckOutput> {
    Ok(CheckOutput::labelled(
        slice_fractions(ctx.data, Axis(1), is_nan),
        space_labels(ctx.index),
    ))
}

fn feature_nan_fracs(ctx: &CheckContext<'_>) -> Result<CheckOutput> {
    Ok(CheckOutput::labelled(
        slice_fractions(ctx.data, Axis(2), is_nan),
        ctx.features.to_vec(),
    ))
}

fn time_zero_fracs(ctx: &CheckContext<'_>) -> Result<CheckOutput> {
    Ok(CheckOutput::labelled(
        slice_fractions(ctx.data, Axis(0), is_zero),
        time_labels(ctx.index),
    ))
}

fn space_zero_fracs(ctx: &CheckContext<'_>) -> Result<CheckOutput> {
    Ok(CheckOutput::labelled(
        slice_fractions(ctx.data, Axis(1), is_zero),
        space_labels(ctx.index),
    ))
}

fn feature_zero_fracs(ctx: &CheckContext<'_>) -> Result<CheckOutput> {
    Ok(CheckOutput::labelled(
        slice_fractions(ctx.data, Axis(2), is_zero),
        ctx.features.to_vec(),
    ))
}

/// Per feature: `|test_frac - standard_frac| / (standard_frac + EPSILON)`.
fn feature_delta(ctx: &CheckContext<'_>, hit: fn(f64) -> bool) -> Result<CheckOutput> {
    let partition = ctx.partition()?;
    let standard = slice_fractions(partition.standard, Axis(2), hit);
    let test = slice_fractions(partition.test, Axis(2), hit);
    let values = standard
        .iter()
        .zip(&test)
        .map(|(s, t)| (t - s).abs() / (s + EPSILON))
        .collect();
    Ok(CheckOutput::labelled(values, ctx.features.to_vec()))
}

fn delta_completeness(ctx: &CheckContext<'_>) -> Result<CheckOutput> {
    feature_delta(ctx, is_nan)
}

fn delta_zeroes(ctx: &CheckContext<'_>) -> Result<CheckOutput> {
    feature_delta(ctx, is_zero)
}

/// Per feature: distance of the test maximum from the standard mean, in
/// standard deviations. Only finite values take part.
fn extreme_values(ctx: &CheckContext<'_>) -> Result<CheckOutput> {
    let partition = ctx.partition()?;
    let mut values = Vec::with_capacity(ctx.features.len());
    for (f, name) in ctx.features.iter().enumerate() {
        let standard = partition.standard.index_axis(Axis(2), f);
        let (mean, std) = finite_mean_std(standard.iter().copied()).ok_or_else(|| {
            Error::check(format!(
                "feature '{name}' has no finite values in the standard partition"
            ))
        })?;
        let test_max = partition
            .test
            .index_axis(Axis(2), f)
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .reduce(f64::max)
            .ok_or_else(|| {
                Error::check(format!(
                    "feature '{name}' has no finite values in the test partition"
                ))
            })?;
        values.push((test_max - mean).abs() / (std + EPSILON));
    }
    Ok(CheckOutput::labelled(values, ctx.features.to_vec()))
}

fn finite_nonzero(values: impl IntoIterator<Item = f64>) -> Vec<f64> {
    values
        .into_iter()
        .filter(|v| v.is_finite() && *v != 0.0)
        .collect()
}

/// Per feature: `1 / p` of a two-sample KS test on finite non-zero values.
fn ks_drift(ctx: &CheckContext<'_>) -> Result<CheckOutput> {
    let partition = ctx.partition()?;
    let values = (0..ctx.features.len())
        .map(|f| {
            let standard = finite_nonzero(partition.standard.index_axis(Axis(2), f).iter().copied());
            let test = finite_nonzero(partition.test.index_axis(Axis(2), f).iter().copied());
            ks_2samp(&standard, &test).map_or(KS_EMPTY_SAMPLE, |ks| {
                1.0 / ks.p_value.max(f64::MIN_POSITIVE)
            })
        })
        .collect();
    Ok(CheckOutput::labelled(values, ctx.features.to_vec()))
}

/// Flatten `[time, space, feature]` into one row per (time, space) cell,
/// keeping only rows where every feature is finite.
pub(crate) fn complete_rows(data: ArrayView3<'_, f64>) -> Array2<f64> {
    let n_features = data.len_of(Axis(2));
    let mut flat = Vec::new();
    let mut rows = 0;
    for time in data.axis_iter(Axis(0)) {
        for cell in time.axis_iter(Axis(0)) {
            if cell.iter().all(|v| v.is_finite()) {
                flat.extend(cell.iter().copied());
                rows += 1;
            }
        }
    }
    Array2::from_shape_vec((rows, n_features), flat).unwrap_or_else(|_| Array2::zeros((0, n_features)))
}

/// Change in ECOD outlier share between the standard and test windows,
/// relative to the standard share.
fn ecod_drift(ctx: &CheckContext<'_>) -> Result<CheckOutput> {
    let partition = ctx.partition()?;
    let standard = complete_rows(partition.standard);
    let test = complete_rows(partition.test);
    if standard.nrows() == 0 || test.nrows() == 0 {
        return Err(Error::check(format!(
            "ECOD needs complete rows in both partitions (standard: {}, test: {})",
            standard.nrows(),
            test.nrows()
        )));
    }

    let model = Ecod::fit(standard.view())?;
    let share = |labels: &[bool]| labels.iter().filter(|l| **l).count() as f64 / labels.len() as f64;
    let standard_share = share(&model.labels());
    let test_share = share(&model.predict(test.view())?);
    Ok(CheckOutput::unlabelled(vec![
        (test_share - standard_share).abs() / (standard_share + EPSILON),
    ]))
}
