//! Default check table and caller overrides.
//!
//! Overrides are a JSON object keyed by check name:
//!
//! ```json
//! {
//!   "global_missingness": {"threshold": 0.1},
//!   "ks_drift": {"enabled": false},
//!   "my_zero_check": {"test_function": "feature_zero_fracs", "threshold": 0.5, "message": "my zeros"},
//!   "standard_partition_length": 12
//! }
//! ```
//!
//! For a built-in check only `threshold` (and `self_test`) may change; its
//! function and message are fixed. A new key must bring a complete
//! `test_function`/`threshold`/`message` entry.

use super::checks::CheckKind;
use super::partition::PartitionLengths;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::warn;

pub const STANDARD_PARTITION_LENGTH: &str = "standard_partition_length";
pub const TEST_PARTITION_LENGTH: &str = "test_partition_length";

/// One configured check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckSpec {
    pub kind: CheckKind,
    pub threshold: f64,
    pub message: String,
    /// Perturbation strength used by the self test, when the kind needs one.
    pub self_test: Option<f64>,
}

impl CheckSpec {
    fn new(kind: CheckKind, threshold: f64, message: &str, self_test: Option<f64>) -> Self {
        Self {
            kind,
            threshold,
            message: message.to_string(),
            self_test,
        }
    }
}

/// The effective check configuration, in evaluation order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftConfig {
    checks: Vec<(String, CheckSpec)>,
    lengths: PartitionLengths,
}

impl Default for DriftConfig {
    fn default() -> Self {
        use CheckKind as K;
        let table = [
            ("global_missingness", K::GlobalNanFracs, 0.05, "dataset missingness", Some(0.10)),
            ("global_zeros", K::GlobalZeroFracs, 0.75, "dataset zero", Some(0.999)),
            ("time_missingness", K::TimeNanFracs, 0.01, "time-unit missingness", Some(0.02)),
            ("space_missingness", K::SpaceNanFracs, 0.03, "space-unit missingness", Some(0.06)),
            ("feature_missingness", K::FeatureNanFracs, 0.01, "feature missingness", Some(0.02)),
            ("time_zeros", K::TimeZeroFracs, 0.75, "time-unit zero", Some(0.9999)),
            ("space_zeros", K::SpaceZeroFracs, 0.95, "space-unit zero", Some(0.99)),
            ("feature_zeros", K::FeatureZeroFracs, 0.75, "feature zero", Some(0.9999)),
            ("delta_completeness", K::DeltaCompleteness, 1.01, "feature delta_completeness", Some(0.99)),
            ("delta_zeroes", K::DeltaZeroes, 1.01, "feature delta_zeroes", Some(0.99)),
            ("extreme_values", K::ExtremeValues, 4.0, "feature extreme values", Some(8.0)),
            ("ks_drift", K::KsDrift, 100.0, "feature KS drift", None),
            ("ecod_drift", K::EcodDrift, 0.05, "dataset ECOD drift", None),
        ];
        Self {
            checks: table
                .into_iter()
                .map(|(name, kind, threshold, message, self_test)| {
                    (name.to_string(), CheckSpec::new(kind, threshold, message, self_test))
                })
                .collect(),
            lengths: PartitionLengths::default(),
        }
    }
}

impl DriftConfig {
    /// A configuration running exactly one check.
    #[must_use]
    pub fn single(name: &str, spec: CheckSpec, lengths: PartitionLengths) -> Self {
        Self {
            checks: vec![(name.to_string(), spec)],
            lengths,
        }
    }

    #[must_use]
    pub fn checks(&self) -> &[(String, CheckSpec)] {
        &self.checks
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CheckSpec> {
        self.checks
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, spec)| spec)
    }

    #[must_use]
    pub const fn lengths(&self) -> PartitionLengths {
        self.lengths
    }

    /// Whether any active check needs a standard/test split.
    #[must_use]
    pub fn needs_partition(&self) -> bool {
        self.checks.iter().any(|(_, spec)| spec.kind.uses_partition())
    }

    /// Apply `overrides` on top of this configuration, returning a new one.
    ///
    /// Overridden keys come first, in override order, followed by the
    /// untouched checks in their existing order.
    pub fn merge(&self, overrides: &DriftOverrides) -> Result<Self> {
        let mut checks = Vec::with_capacity(self.checks.len() + overrides.entries.len());
        let mut seen = HashSet::new();

        for (name, entry) in &overrides.entries {
            seen.insert(name.as_str());
            if entry.enabled == Some(false) {
                continue;
            }
            let spec = match self.get(name) {
                Some(base) => entry.apply_to(name, base)?,
                None => entry.to_new_spec(name)?,
            };
            checks.push((name.clone(), spec));
        }
        checks.extend(
            self.checks
                .iter()
                .filter(|(name, _)| !seen.contains(name.as_str()))
                .cloned(),
        );

        let lengths = PartitionLengths::new(
            overrides.standard_partition_length.unwrap_or(self.lengths.standard),
            overrides.test_partition_length.unwrap_or(self.lengths.test),
        )?;

        Ok(Self { checks, lengths })
    }
}

/// One entry of the override object.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverrideEntry {
    pub threshold: Option<f64>,
    pub test_function: Option<String>,
    pub message: Option<String>,
    pub self_test: Option<f64>,
    pub enabled: Option<bool>,
}

impl OverrideEntry {
    fn apply_to(&self, name: &str, base: &CheckSpec) -> Result<CheckSpec> {
        if let Some(function) = &self.test_function {
            if function != base.kind.name() {
                warn!(check = name, test_function = %function, "Ignoring test_function override of a built-in check");
            }
        }
        if self.message.as_ref().is_some_and(|m| *m != base.message) {
            warn!(check = name, "Ignoring message override of a built-in check");
        }
        let threshold = self.threshold.unwrap_or(base.threshold);
        validate_threshold(name, threshold)?;
        Ok(CheckSpec {
            threshold,
            self_test: self.self_test.or(base.self_test),
            ..base.clone()
        })
    }

    fn to_new_spec(&self, name: &str) -> Result<CheckSpec> {
        let (Some(function), Some(threshold), Some(message)) =
            (&self.test_function, self.threshold, &self.message)
        else {
            let missing: Vec<&str> = [
                ("test_function", self.test_function.is_none()),
                ("threshold", self.threshold.is_none()),
                ("message", self.message.is_none()),
            ]
            .into_iter()
            .filter_map(|(field, absent)| absent.then_some(field))
            .collect();
            return Err(Error::config(format!(
                "unknown drift check '{name}' must define test_function, threshold and message (missing: {})",
                missing.join(", ")
            )));
        };
        let kind: CheckKind = function.parse().map_err(|err: Error| {
            Error::config(format!("drift check '{name}': {err}"))
        })?;
        validate_threshold(name, threshold)?;
        Ok(CheckSpec {
            kind,
            threshold,
            message: message.clone(),
            self_test: self.self_test,
        })
    }
}

fn validate_threshold(name: &str, threshold: f64) -> Result<()> {
    if threshold.is_finite() && threshold > 0.0 {
        Ok(())
    } else {
        Err(Error::config(format!(
            "drift check '{name}' needs a finite positive threshold, got {threshold}"
        )))
    }
}

/// Parsed caller overrides. Entry order is preserved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriftOverrides {
    entries: Vec<(String, OverrideEntry)>,
    standard_partition_length: Option<usize>,
    test_partition_length: Option<usize>,
}

impl DriftOverrides {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_check(mut self, name: impl Into<String>, entry: OverrideEntry) -> Self {
        self.entries.push((name.into(), entry));
        self
    }

    #[must_use]
    pub fn with_threshold(self, name: impl Into<String>, threshold: f64) -> Self {
        self.with_check(
            name,
            OverrideEntry {
                threshold: Some(threshold),
                ..OverrideEntry::default()
            },
        )
    }

    #[must_use]
    pub const fn with_partition_lengths(mut self, standard: usize, test: usize) -> Self {
        self.standard_partition_length = Some(standard);
        self.test_partition_length = Some(test);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
            && self.standard_partition_length.is_none()
            && self.test_partition_length.is_none()
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(Error::config("drift configuration must be a JSON object"));
        };
        let mut overrides = Self::default();
        for (key, value) in map {
            match key.as_str() {
                STANDARD_PARTITION_LENGTH => {
                    overrides.standard_partition_length = Some(partition_length(key, value)?);
                }
                TEST_PARTITION_LENGTH => {
                    overrides.test_partition_length = Some(partition_length(key, value)?);
                }
                _ => {
                    let entry = OverrideEntry::deserialize(value).map_err(|e| {
                        Error::config(format!("drift check '{key}': {e}"))
                    })?;
                    overrides.entries.push((key.clone(), entry));
                }
            }
        }
        Ok(overrides)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::config(format!("invalid drift configuration JSON: {e}")))?;
        Self::from_json(&value)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
            .map_err(|e| Error::config(format!("{}: {e}", path.display())))
    }
}

fn partition_length(key: &str, value: &Value) -> Result<usize> {
    value
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .filter(|n| *n >= 1)
        .ok_or_else(|| Error::config(format!("{key} must be a positive integer, got {value}")))
}
