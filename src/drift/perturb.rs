//! Deliberate corruption of known-good data, one recipe per check kind.
//!
//! Each recipe returns a modified copy of the reference tensor that the
//! matching check should flag. Random choices come from a seeded [`StdRng`],
//! so a given seed always corrupts the same cells.

use super::checks::CheckKind;
use super::is_present;
use super::partition::{Partition, PartitionLengths};
use super::settings::CheckSpec;
use super::stats::finite_mean_std;
use super::tensor::TimeSpaceTensor;
use crate::error::{Error, Result};
use ndarray::{Array3, ArrayViewMut, Axis, Dimension, s};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

pub const DEFAULT_SEED: u64 = 0x5EED_D81F;

/// Seeded source of perturbations.
#[derive(Debug, Clone)]
pub struct Perturber {
    rng: StdRng,
}

impl Default for Perturber {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

impl Perturber {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Corrupt a copy of `reference` so that `spec` should fire.
    pub fn perturb(
        &mut self,
        reference: &TimeSpaceTensor,
        spec: &CheckSpec,
        lengths: PartitionLengths,
    ) -> Result<TimeSpaceTensor> {
        let mut data = reference.data().clone();
        let strength = spec
            .self_test
            .unwrap_or_else(|| (spec.threshold * 2.0).min(1.0));
        let (n_times, n_spaces, n_features) = data.dim();
        if n_times == 0 || n_spaces == 0 || n_features == 0 {
            return Err(Error::data("reference data is empty"));
        }

        match spec.kind {
            CheckKind::GlobalNanFracs => self.corrupt(data.view_mut(), strength, f64::NAN),
            CheckKind::GlobalZeroFracs => self.corrupt(data.view_mut(), strength, 0.0),
            CheckKind::TimeNanFracs => {
                self.corrupt(data.index_axis_mut(Axis(0), n_times / 2), strength, f64::NAN);
            }
            CheckKind::SpaceNanFracs => {
                self.corrupt(data.index_axis_mut(Axis(1), n_spaces / 2), strength, f64::NAN);
            }
            CheckKind::FeatureNanFracs => {
                self.corrupt(data.index_axis_mut(Axis(2), n_features / 2), strength, f64::NAN);
            }
            CheckKind::TimeZeroFracs => {
                self.corrupt(data.index_axis_mut(Axis(0), n_times / 2), strength, 0.0);
            }
            CheckKind::SpaceZeroFracs => {
                self.corrupt(data.index_axis_mut(Axis(1), n_spaces / 2), strength, 0.0);
            }
            CheckKind::FeatureZeroFracs => {
                self.corrupt(data.index_axis_mut(Axis(2), n_features / 2), strength, 0.0);
            }
            CheckKind::DeltaCompleteness => {
                self.shift_share(&mut data, lengths, strength, f64::NAN)?;
            }
            CheckKind::DeltaZeroes => self.shift_share(&mut data, lengths, strength, 0.0)?,
            CheckKind::ExtremeValues => inject_extreme(&mut data, lengths, strength)?,
            CheckKind::KsDrift => self.shift_distribution(&mut data, lengths)?,
            CheckKind::EcodDrift => swap_edge_features(&mut data, lengths)?,
        }
        reference.with_data(data)
    }

    /// Overwrite `ceil(share * present)` distinct present cells with `value`.
    fn corrupt<D: Dimension>(&mut self, mut view: ArrayViewMut<'_, f64, D>, share: f64, value: f64) {
        let mut cells: Vec<&mut f64> = view.iter_mut().filter(|v| is_present(**v)).collect();
        let count = share_count(share, cells.len());
        for position in rand::seq::index::sample(&mut self.rng, cells.len(), count) {
            *cells[position] = value;
        }
    }

    /// Plant `value` in the test window and scrub it from everything before,
    /// so the test share jumps from zero.
    fn shift_share(
        &mut self,
        data: &mut Array3<f64>,
        lengths: PartitionLengths,
        share: f64,
        value: f64,
    ) -> Result<()> {
        let (standard, test) = lengths.bounds_from_start(data.len_of(Axis(0)))?;
        let matches = |v: f64| if value.is_nan() { v.is_nan() } else { v == value };
        data.slice_mut(s![standard, .., ..])
            .mapv_inplace(|v| if matches(v) { 1.0 } else { v });
        self.corrupt(data.slice_mut(s![test, .., ..]), share, value);
        Ok(())
    }

    /// Replace the first feature of the test window with draws far above
    /// anything in its standard window.
    fn shift_distribution(&mut self, data: &mut Array3<f64>, lengths: PartitionLengths) -> Result<()> {
        let partition = Partition::split(data.view(), lengths)?;
        let standard = partition.standard.index_axis(Axis(2), 0);
        let test_range = partition.test_range.clone();
        let finite: Vec<f64> = standard.iter().copied().filter(|v| v.is_finite()).collect();
        let (_, std) = finite_mean_std(finite.iter().copied()).unwrap_or((0.0, 0.0));
        let max = finite.iter().copied().fold(0.0_f64, f64::max);
        let spread = std.max(1.0);
        let shifted = Normal::new(max + 10.0 * spread, spread)
            .map_err(|e| Error::check(format!("cannot build KS perturbation: {e}")))?;

        for cell in data
            .slice_mut(s![test_range, .., 0])
            .iter_mut()
            .filter(|v| is_present(**v))
        {
            *cell = shifted.sample(&mut self.rng);
        }
        Ok(())
    }
}

/// Plant one value `1 + strength` standard deviations above the standard
/// mean of the first feature, in the middle of the test window.
fn inject_extreme(data: &mut Array3<f64>, lengths: PartitionLengths, strength: f64) -> Result<()> {
    let partition = Partition::split(data.view(), lengths)?;
    let (mean, std) = finite_mean_std(partition.standard.index_axis(Axis(2), 0).iter().copied())
        .ok_or_else(|| Error::check("first feature has no finite standard values to perturb"))?;
    let value = if std > 0.0 {
        mean + (1.0 + strength) * std
    } else {
        mean + 1.0 + strength
    };

    let time = partition.test_range.start + partition.test_range.len() / 2;
    let n_spaces = data.len_of(Axis(1));
    let space = (0..n_spaces)
        .map(|offset| (n_spaces / 2 + offset) % n_spaces)
        .find(|&space| is_present(data[[time, space, 0]]))
        .ok_or_else(|| Error::check("test window has no present cell to perturb"))?;
    data[[time, space, 0]] = value;
    Ok(())
}

/// Swap the first and last features inside the test window.
fn swap_edge_features(data: &mut Array3<f64>, lengths: PartitionLengths) -> Result<()> {
    let n_features = data.len_of(Axis(2));
    if n_features < 2 {
        return Err(Error::check("ECOD perturbation needs at least two features"));
    }
    let (_, test) = lengths.bounds(data.len_of(Axis(0)))?;
    let mut window = data.slice_mut(s![test, .., ..]);
    let (mut first, mut rest) = window.view_mut().split_at(Axis(2), 1);
    let mut last = rest.index_axis_mut(Axis(2), n_features - 2);
    ndarray::Zip::from(first.index_axis_mut(Axis(2), 0))
        .and(&mut last)
        .for_each(std::mem::swap);
    Ok(())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn share_count(share: f64, available: usize) -> usize {
    let wanted = (share.clamp(0.0, 1.0) * available as f64).ceil() as usize;
    wanted.min(available)
}
