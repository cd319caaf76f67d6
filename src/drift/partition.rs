//! Standard/test windows along the time axis.

use crate::error::{Error, Result};
use ndarray::{ArrayView3, Axis, s};
use serde::Serialize;
use std::ops::Range;

/// Window lengths, in time units (not calendar time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PartitionLengths {
    pub standard: usize,
    pub test: usize,
}

impl Default for PartitionLengths {
    fn default() -> Self {
        Self {
            standard: 10,
            test: 1,
        }
    }
}

impl PartitionLengths {
    pub fn new(standard: usize, test: usize) -> Result<Self> {
        if standard == 0 || test == 0 {
            return Err(Error::config(format!(
                "partition lengths must be at least 1 (standard_partition_length={standard}, test_partition_length={test})"
            )));
        }
        Ok(Self { standard, test })
    }

    /// Minimum number of time units a tensor must span.
    #[must_use]
    pub const fn required_time_units(&self) -> usize {
        self.standard + self.test
    }

    /// Index ranges of the (standard, test) windows for a tensor spanning
    /// `n_times` units. The test window ends at the last unit and the standard
    /// window immediately precedes it.
    pub fn bounds(&self, n_times: usize) -> Result<(Range<usize>, Range<usize>)> {
        let required = self.required_time_units();
        if n_times < required {
            return Err(Error::config(format!(
                "partitioning needs at least {required} time units ({} standard + {} test), data has {n_times}",
                self.standard, self.test
            )));
        }
        let test_start = n_times - self.test;
        Ok((test_start - self.standard..test_start, test_start..n_times))
    }

    /// Like [`bounds`](Self::bounds) but the standard window covers every
    /// unit before the test window.
    pub fn bounds_from_start(&self, n_times: usize) -> Result<(Range<usize>, Range<usize>)> {
        if n_times <= self.test {
            return Err(Error::config(format!(
                "need more than {} time units to leave a standard window, data has {n_times}",
                self.test
            )));
        }
        let test_start = n_times - self.test;
        Ok((0..test_start, test_start..n_times))
    }
}

/// Borrowed standard and test slices of one tensor.
#[derive(Debug, Clone)]
pub struct Partition<'a> {
    pub standard: ArrayView3<'a, f64>,
    pub test: ArrayView3<'a, f64>,
    pub standard_range: Range<usize>,
    pub test_range: Range<usize>,
}

impl<'a> Partition<'a> {
    pub fn split(data: ArrayView3<'a, f64>, lengths: PartitionLengths) -> Result<Self> {
        let (standard_range, test_range) = lengths.bounds(data.len_of(Axis(0)))?;
        Ok(Self::from_ranges(data, standard_range, test_range))
    }

    fn from_ranges(
        data: ArrayView3<'a, f64>,
        standard_range: Range<usize>,
        test_range: Range<usize>,
    ) -> Self {
        Self {
            standard: data.slice_move(s![standard_range.clone(), .., ..]),
            test: data.slice_move(s![test_range.clone(), .., ..]),
            standard_range,
            test_range,
        }
    }
}
