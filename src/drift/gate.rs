//! The input gate: configuration, self test and report assembly.

use super::checks::CheckContext;
use super::perturb::{DEFAULT_SEED, Perturber};
use super::settings::{DriftConfig, DriftOverrides};
use super::tensor::{TensorBuilder, TimeSpaceTensor};
use super::tester::{Alarm, CheckOutcome, Tester};
use crate::error::{Error, Result};
use polars::prelude::DataFrame;
use rayon::prelude::*;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info};

/// Result of one configured check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckReport {
    pub check: String,
    #[serde(flatten)]
    pub outcome: CheckOutcome,
}

/// Outcomes of every configured check, in configuration order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftReport {
    pub outcomes: Vec<CheckReport>,
}

impl DriftReport {
    pub fn alarms(&self) -> impl Iterator<Item = &Alarm> {
        self.outcomes.iter().flat_map(|report| report.outcome.alarms())
    }

    /// `(check, reason)` for every check that could not be evaluated.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|report| match &report.outcome {
            CheckOutcome::CheckFailed { reason } => Some((report.check.as_str(), reason.as_str())),
            _ => None,
        })
    }

    /// No alarms and no failed checks.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.outcomes.iter().all(|report| report.outcome.is_passed())
    }
}

impl fmt::Display for DriftReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for report in &self.outcomes {
            match &report.outcome {
                CheckOutcome::Alarms { alarms } => {
                    for alarm in alarms {
                        writeln!(f, "{alarm}")?;
                    }
                }
                CheckOutcome::Passed { message } => writeln!(f, "{message}")?,
                CheckOutcome::CheckFailed { reason } => {
                    writeln!(f, "{} could not be evaluated: {reason}", report.check)?;
                }
            }
        }
        Ok(())
    }
}

fn evaluate(tensor: &TimeSpaceTensor, config: &DriftConfig) -> Vec<CheckReport> {
    let ctx = CheckContext {
        data: tensor.view(),
        index: tensor.index(),
        features: tensor.features(),
        lengths: config.lengths(),
    };
    config
        .checks()
        .par_iter()
        .map(|(name, spec)| {
            debug!(check = %name, function = %spec.kind, threshold = spec.threshold, "Evaluating check");
            CheckReport {
                check: name.clone(),
                outcome: Tester::new(spec.kind, spec.threshold, &spec.message, ctx).generate_alarms(),
            }
        })
        .collect()
}

fn ensure_partitionable(tensor: &TimeSpaceTensor, config: &DriftConfig, what: &str) -> Result<()> {
    if config.needs_partition() {
        config
            .lengths()
            .bounds(tensor.n_times())
            .map_err(|e| match e {
                Error::Config(message) => Error::config(format!("{what}: {message}")),
                other => other,
            })?;
    }
    Ok(())
}

/// Checks that every configured check fires on data corrupted for it.
#[derive(Debug, Clone)]
pub struct SelfTest<'a> {
    reference: &'a TimeSpaceTensor,
    seed: u64,
}

impl<'a> SelfTest<'a> {
    #[must_use]
    pub const fn new(reference: &'a TimeSpaceTensor) -> Self {
        Self {
            reference,
            seed: DEFAULT_SEED,
        }
    }

    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Per check: `Ok(())` if it raised an alarm on its perturbed data.
    pub fn outcomes(&self, config: &DriftConfig) -> Vec<(String, Result<()>)> {
        let mut perturber = Perturber::new(self.seed);
        config
            .checks()
            .iter()
            .map(|(name, spec)| {
                let verdict = perturber
                    .perturb(self.reference, spec, config.lengths())
                    .and_then(|perturbed| {
                        let single = DriftConfig::single(name, spec.clone(), config.lengths());
                        let report = evaluate(&perturbed, &single);
                        match report.into_iter().next().map(|r| r.outcome) {
                            Some(CheckOutcome::Alarms { .. }) => Ok(()),
                            Some(CheckOutcome::CheckFailed { reason }) => {
                                Err(Error::check(format!("failed on perturbed data: {reason}")))
                            }
                            _ => Err(Error::check("did not fire on perturbed data")),
                        }
                    });
                (name.clone(), verdict)
            })
            .collect()
    }

    /// Fail with [`Error::SelfTest`] naming every check that did not fire.
    /// Each failure reads `"<check>: <reason>"`.
    pub fn run(&self, config: &DriftConfig) -> Result<()> {
        ensure_partitionable(self.reference, config, "self-test reference data")?;
        let failures: Vec<String> = self
            .outcomes(config)
            .into_iter()
            .filter_map(|(name, verdict)| match verdict {
                Ok(()) => None,
                Err(Error::Check(reason)) => Some(format!("{name}: {reason}")),
                Err(other) => Some(format!("{name}: {other}")),
            })
            .collect();
        if failures.is_empty() {
            info!(checks = config.checks().len(), "Drift detection self test passed");
            Ok(())
        } else {
            Err(Error::SelfTest { failures })
        }
    }
}

/// Gatekeeper for freshly fetched data.
#[derive(Debug, Clone)]
pub struct InputGate {
    tensor: TimeSpaceTensor,
    config: DriftConfig,
}

impl InputGate {
    /// Tensorize `df`, merge `overrides` over the defaults and, when
    /// `self_test_reference` is given, self test the checks on it first.
    pub fn new(
        df: &DataFrame,
        overrides: Option<&DriftOverrides>,
        self_test_reference: Option<&DataFrame>,
    ) -> Result<Self> {
        let builder = TensorBuilder::new();
        let tensor = builder.build(df)?;
        let reference = self_test_reference.map(|df| builder.build(df)).transpose()?;
        Self::from_tensor(tensor, overrides, reference.as_ref())
    }

    pub fn from_tensor(
        tensor: TimeSpaceTensor,
        overrides: Option<&DriftOverrides>,
        self_test_reference: Option<&TimeSpaceTensor>,
    ) -> Result<Self> {
        let defaults = DriftConfig::default();
        let config = match overrides {
            Some(overrides) => defaults.merge(overrides)?,
            None => defaults,
        };
        ensure_partitionable(&tensor, &config, "input data")?;

        if let Some(reference) = self_test_reference {
            SelfTest::new(reference).run(&config)?;
        }

        let (times, spaces, features) = tensor.shape();
        info!(times, spaces, features, checks = config.checks().len(), "Input gate ready");
        Ok(Self { tensor, config })
    }

    #[must_use]
    pub const fn config(&self) -> &DriftConfig {
        &self.config
    }

    #[must_use]
    pub const fn tensor(&self) -> &TimeSpaceTensor {
        &self.tensor
    }

    /// Run every configured check. Checks are evaluated in parallel; the
    /// report keeps configuration order.
    #[must_use]
    pub fn assemble_alerts(&self) -> DriftReport {
        DriftReport {
            outcomes: evaluate(&self.tensor, &self.config),
        }
    }
}
