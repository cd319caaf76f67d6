//! Input drift detection.
//!
//! Freshly fetched data is turned into a dense `[time, space, feature]`
//! tensor, split into a trusted *standard* window and a newer *test* window,
//! and run through a battery of integrity checks. Each check's raw results
//! are normalised by its threshold; anything over 1.0 raises an [`Alarm`].
//!
//! The entry point is [`InputGate`]:
//!
//! ```no_run
//! use viewser::drift::{DriftOverrides, InputGate};
//! # fn demo(df: &polars::prelude::DataFrame) -> viewser::Result<()> {
//! let overrides = DriftOverrides::from_json_str(r#"{"global_missingness": {"threshold": 0.1}}"#)?;
//! let report = InputGate::new(df, Some(&overrides), None)?.assemble_alerts();
//! for alarm in report.alarms() {
//!     println!("{alarm}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod checks;
pub mod gate;
pub mod partition;
pub mod perturb;
pub mod settings;
pub mod stats;
pub mod tensor;
pub mod tester;

pub use checks::{CheckContext, CheckKind, CheckOutput};
pub use gate::{CheckReport, DriftReport, InputGate, SelfTest};
pub use partition::{Partition, PartitionLengths};
pub use perturb::Perturber;
pub use settings::{CheckSpec, DriftConfig, DriftOverrides, OverrideEntry};
pub use tensor::{DOES_NOT_EXIST, TensorBuilder, TimeSpaceIndex, TimeSpaceTensor};
pub use tester::{Alarm, CheckOutcome, Tester};

/// Whether a cell held a value in the source data (NaN included).
#[inline]
#[must_use]
pub fn is_present(value: f64) -> bool {
    value != DOES_NOT_EXIST
}
