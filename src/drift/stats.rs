//! Statistics used by the distributional checks.

use crate::error::{Error, Result};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis, concatenate};

/// Population mean and standard deviation of the finite values, or `None`
/// when there are none.
pub fn finite_mean_std(values: impl IntoIterator<Item = f64>) -> Option<(f64, f64)> {
    let (mut count, mut mean, mut m2) = (0usize, 0.0_f64, 0.0_f64);
    for value in values.into_iter().filter(|v| v.is_finite()) {
        count += 1;
        let delta = value - mean;
        mean += delta / count as f64;
        m2 += delta * (value - mean);
    }
    (count > 0).then(|| (mean, (m2 / count as f64).sqrt()))
}

/// Result of a two-sample Kolmogorov-Smirnov test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KsTest {
    pub statistic: f64,
    pub p_value: f64,
}

/// Above this `m * n` the exact distribution is replaced by Kolmogorov's
/// asymptotic one.
const EXACT_KS_LIMIT: u64 = 10_000_000;

/// Two-sided two-sample KS test. Returns `None` if either sample is empty.
///
/// Small samples use the exact null distribution (lattice-path counting),
/// larger ones the asymptotic Kolmogorov series.
#[must_use]
pub fn ks_2samp(first: &[f64], second: &[f64]) -> Option<KsTest> {
    if first.is_empty() || second.is_empty() {
        return None;
    }
    let mut a = first.to_vec();
    let mut b = second.to_vec();
    a.sort_by(f64::total_cmp);
    b.sort_by(f64::total_cmp);
    let (m, n) = (a.len() as u64, b.len() as u64);

    // Largest |F_a - F_b| scaled by m*n, so ties compare exactly.
    let (mut i, mut j, mut d_scaled) = (0usize, 0usize, 0u64);
    while i < a.len() && j < b.len() {
        let x = a[i].min(b[j]);
        while i < a.len() && a[i] <= x {
            i += 1;
        }
        while j < b.len() && b[j] <= x {
            j += 1;
        }
        d_scaled = d_scaled.max((i as u64 * n).abs_diff(j as u64 * m));
    }

    let statistic = d_scaled as f64 / (m * n) as f64;
    let p_value = if d_scaled == 0 {
        1.0
    } else if m * n <= EXACT_KS_LIMIT {
        exact_p_value(a.len(), b.len(), d_scaled)
    } else {
        asymptotic_p_value(m as f64, n as f64, statistic)
    };
    Some(KsTest {
        statistic,
        p_value: p_value.clamp(0.0, 1.0),
    })
}

/// Probability that a random monotone path from (0,0) to (m,n) touches a node
/// with `|i*n - j*m| >= d_scaled`.
fn exact_p_value(m: usize, n: usize, d_scaled: u64) -> f64 {
    let outside = |i: usize, j: usize| (i as u64 * n as u64).abs_diff(j as u64 * m as u64) >= d_scaled;
    let mut row = vec![0.0_f64; n + 1];
    let mut next = vec![0.0_f64; n + 1];
    let mut absorbed = 0.0;
    row[0] = 1.0;

    for i in 0..=m {
        next.fill(0.0);
        for j in 0..=n {
            let mass = row[j];
            if mass == 0.0 {
                continue;
            }
            if outside(i, j) {
                absorbed += mass;
                continue;
            }
            let remaining = (m + n - i - j) as f64;
            if remaining == 0.0 {
                continue;
            }
            if i < m {
                next[j] += mass * (m - i) as f64 / remaining;
            }
            if j < n {
                row[j + 1] += mass * (n - j) as f64 / remaining;
            }
        }
        std::mem::swap(&mut row, &mut next);
    }
    absorbed
}

fn asymptotic_p_value(m: f64, n: f64, statistic: f64) -> f64 {
    let en = (m * n / (m + n)).sqrt();
    let lambda = (en + 0.12 + 0.11 / en) * statistic;
    kolmogorov_survival(lambda)
}

/// `Q(λ) = 2 Σ (-1)^(k-1) exp(-2 k² λ²)`.
fn kolmogorov_survival(lambda: f64) -> f64 {
    if lambda < 0.2 {
        return 1.0;
    }
    let mut sum = 0.0;
    let mut sign = 1.0;
    for k in 1..=100 {
        let k = f64::from(k);
        let term = (-2.0 * k * k * lambda * lambda).exp();
        sum += sign * term;
        if term < 1e-300 {
            break;
        }
        sign = -sign;
    }
    (2.0 * sum).clamp(0.0, 1.0)
}

/// Empirical-CDF outlier detector (ECOD).
///
/// Each feature contributes a tail probability score from its left and right
/// empirical CDFs; the side is picked by the feature's skewness. Scores are
/// summed across features and the top `contamination` share of the training
/// rows defines the outlier threshold.
#[derive(Debug, Clone)]
pub struct Ecod {
    train: Array2<f64>,
    train_scores: Vec<f64>,
    threshold: f64,
}

impl Ecod {
    pub const DEFAULT_CONTAMINATION: f64 = 0.1;

    pub fn fit(panel: ArrayView2<'_, f64>) -> Result<Self> {
        Self::fit_with_contamination(panel, Self::DEFAULT_CONTAMINATION)
    }

    pub fn fit_with_contamination(panel: ArrayView2<'_, f64>, contamination: f64) -> Result<Self> {
        if panel.nrows() == 0 || panel.ncols() == 0 {
            return Err(Error::check("ECOD needs at least one complete row to fit"));
        }
        if !(contamination > 0.0 && contamination < 0.5) {
            return Err(Error::validation(format!(
                "ECOD contamination must be in (0, 0.5), got {contamination}"
            )));
        }
        let train_scores = scores(panel);
        let threshold = percentile(&train_scores, 100.0 * (1.0 - contamination));
        Ok(Self {
            train: panel.to_owned(),
            train_scores,
            threshold,
        })
    }

    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Outlier labels of the training rows.
    #[must_use]
    pub fn labels(&self) -> Vec<bool> {
        self.train_scores.iter().map(|s| *s > self.threshold).collect()
    }

    /// Scores for new rows, computed against the training ECDFs extended with
    /// the new rows themselves.
    pub fn decision_function(&self, rows: ArrayView2<'_, f64>) -> Result<Vec<f64>> {
        if rows.ncols() != self.train.ncols() {
            return Err(Error::check(format!(
                "ECOD was fitted on {} features, got {}",
                self.train.ncols(),
                rows.ncols()
            )));
        }
        let combined = concatenate(Axis(0), &[self.train.view(), rows.view()])
            .map_err(|e| Error::check(format!("cannot stack ECOD panels: {e}")))?;
        let all = scores(combined.view());
        Ok(all[self.train.nrows()..].to_vec())
    }

    pub fn predict(&self, rows: ArrayView2<'_, f64>) -> Result<Vec<bool>> {
        Ok(self
            .decision_function(rows)?
            .into_iter()
            .map(|s| s > self.threshold)
            .collect())
    }
}

fn scores(panel: ArrayView2<'_, f64>) -> Vec<f64> {
    let mut totals = vec![0.0; panel.nrows()];
    for column in panel.axis_iter(Axis(1)) {
        let mut sorted = column.to_vec();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len() as f64;
        let skew = skewness_sign(column);

        for (total, &value) in totals.iter_mut().zip(column.iter()) {
            let at_or_below = sorted.partition_point(|&x| x <= value) as f64;
            let at_or_above = n - sorted.partition_point(|&x| x < value) as f64;
            let left = -(at_or_below / n).ln();
            let right = -(at_or_above / n).ln();
            let skewed = match skew {
                s if s < 0 => left,
                s if s > 0 => right,
                _ => left + right,
            };
            *total += left.max(right).max(skewed);
        }
    }
    totals
}

/// Sign of the sample skewness; near-symmetric columns count as zero.
fn skewness_sign(column: ArrayView1<'_, f64>) -> i8 {
    let n = column.len() as f64;
    if n == 0.0 {
        return 0;
    }
    let mean = column.sum() / n;
    let (m2, m3) = column.iter().fold((0.0, 0.0), |(m2, m3), &x| {
        let d = x - mean;
        (m2 + d * d, m3 + d * d * d)
    });
    let (m2, m3) = (m2 / n, m3 / n);
    if m2 <= f64::EPSILON * mean.abs().max(1.0) {
        return 0;
    }
    let skew = m3 / m2.powf(1.5);
    if skew.abs() < 1e-9 {
        0
    } else if skew > 0.0 {
        1
    } else {
        -1
    }
}

/// Linearly interpolated percentile, `q` in `[0, 100]`.
fn percentile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let lower = rank.floor() as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    let frac = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}
