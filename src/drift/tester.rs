//! Threshold a single check into alarms.

use super::checks::{CheckContext, CheckKind};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use tracing::{debug, warn};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One offending entry of one check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alarm {
    pub message: String,
    /// `floor(1 + ratio)`; an ordering signal, not a calibrated scale.
    pub severity: u64,
    pub offender: String,
    pub ratio: f64,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&ts.format(TIMESTAMP_FORMAT))
}

impl fmt::Display for Alarm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Input alarm: {} Severity: {} Timestamp: {}",
            self.message,
            self.severity,
            self.timestamp.format(TIMESTAMP_FORMAT)
        )
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn severity(ratio: f64) -> u64 {
    // Float-to-int `as` saturates at u64::MAX.
    (1.0 + ratio).floor() as u64
}

/// What running one check produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckOutcome {
    Alarms { alarms: Vec<Alarm> },
    Passed { message: String },
    CheckFailed { reason: String },
}

impl CheckOutcome {
    #[must_use]
    pub fn alarms(&self) -> &[Alarm] {
        match self {
            Self::Alarms { alarms } => alarms,
            _ => &[],
        }
    }

    #[must_use]
    pub const fn is_passed(&self) -> bool {
        matches!(self, Self::Passed { .. })
    }

    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::CheckFailed { .. })
    }
}

/// A check bound to its threshold, message and data.
#[derive(Debug, Clone, Copy)]
pub struct Tester<'a> {
    kind: CheckKind,
    threshold: f64,
    message: &'a str,
    ctx: CheckContext<'a>,
}

impl<'a> Tester<'a> {
    #[must_use]
    pub const fn new(kind: CheckKind, threshold: f64, message: &'a str, ctx: CheckContext<'a>) -> Self {
        Self {
            kind,
            threshold,
            message,
            ctx,
        }
    }

    /// Run the check and raise one alarm per entry whose value exceeds the
    /// threshold. Check errors become [`CheckOutcome::CheckFailed`].
    #[must_use]
    pub fn generate_alarms(&self) -> CheckOutcome {
        if !(self.threshold.is_finite() && self.threshold > 0.0) {
            return CheckOutcome::CheckFailed {
                reason: format!("invalid threshold {}", self.threshold),
            };
        }

        let output = match self.kind.run(&self.ctx) {
            Ok(output) => output,
            Err(err) => {
                warn!(check = %self.kind, error = %err, "Check could not be evaluated");
                return CheckOutcome::CheckFailed {
                    reason: err.to_string(),
                };
            }
        };

        let ratios: Vec<f64> = output.values.iter().map(|v| v / self.threshold).collect();
        if let Some(position) = ratios.iter().position(|r| r.is_nan()) {
            return CheckOutcome::CheckFailed {
                reason: format!(
                    "{} produced a non-numeric result for {}",
                    self.kind,
                    output.label(position)
                ),
            };
        }

        let timestamp = Utc::now();
        let alarms: Vec<Alarm> = ratios
            .iter()
            .enumerate()
            .filter(|(_, ratio)| **ratio > 1.0)
            .map(|(position, &ratio)| {
                let offender = output.label(position);
                Alarm {
                    message: format!(
                        "{}; offender: {offender}, threshold: {}",
                        self.message, self.threshold
                    ),
                    severity: severity(ratio),
                    offender,
                    ratio,
                    timestamp,
                }
            })
            .collect();

        if alarms.is_empty() {
            debug!(check = %self.kind, entries = ratios.len(), "Check passed");
            CheckOutcome::Passed {
                message: format!("{} passed", self.message),
            }
        } else {
            warn!(check = %self.kind, alarms = alarms.len(), "Check raised alarms");
            CheckOutcome::Alarms { alarms }
        }
    }
}
